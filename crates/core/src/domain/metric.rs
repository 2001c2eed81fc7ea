use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    WindSpeed,
    Precipitation,
    Temperature,
    Visibility,
    Custom(String),
}

impl Metric {
    /// Identifier bound to the reading value inside sandboxed expressions.
    pub fn identifier(&self) -> String {
        match self {
            Self::WindSpeed => "wind_speed".to_string(),
            Self::Precipitation => "precipitation".to_string(),
            Self::Temperature => "temperature".to_string(),
            Self::Visibility => "visibility".to_string(),
            Self::Custom(name) => {
                let mut identifier: String = name
                    .trim()
                    .to_ascii_lowercase()
                    .chars()
                    .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
                    .collect();
                if identifier.is_empty() || identifier.starts_with(|ch: char| ch.is_ascii_digit())
                {
                    identifier.insert_str(0, "metric_");
                }
                identifier
            }
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::WindSpeed => "wind speed".to_string(),
            Self::Precipitation => "precipitation".to_string(),
            Self::Temperature => "temperature".to_string(),
            Self::Visibility => "visibility".to_string(),
            Self::Custom(name) => name.replace('_', " "),
        }
    }

    pub fn family(&self) -> Option<UnitFamily> {
        match self {
            Self::WindSpeed => Some(UnitFamily::Speed),
            Self::Precipitation => Some(UnitFamily::Depth),
            Self::Temperature => Some(UnitFamily::Temperature),
            Self::Visibility => Some(UnitFamily::Distance),
            Self::Custom(_) => None,
        }
    }

    pub fn canonical_unit(&self) -> Option<&'static str> {
        self.family().map(UnitFamily::canonical_unit)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Direction of a threshold. A threshold describes the prohibited condition:
/// operations are blocked when `reading <comparator> value` holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Comparator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Lt => "below",
            Self::Le => "at or below",
            Self::Gt => "above",
            Self::Ge => "at or above",
            Self::Eq => "equal to",
        }
    }

    /// True when the prohibited region lies under the limit.
    pub fn is_lower_bound(self) -> bool {
        matches!(self, Self::Lt | Self::Le)
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    pub metric: Metric,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

impl MetricReading {
    pub fn new(metric: Metric, value: f64, unit: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self { metric, value, unit: unit.into(), timestamp }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitFamily {
    Speed,
    Depth,
    Temperature,
    Distance,
}

impl UnitFamily {
    pub fn canonical_unit(self) -> &'static str {
        match self {
            Self::Speed => "mph",
            Self::Depth => "mm",
            Self::Temperature => "°F",
            Self::Distance => "mi",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CanonicalValue {
    pub value: f64,
    pub unit: String,
    pub verified: bool,
}

#[derive(Clone, Copy, Debug)]
struct Conversion {
    family: UnitFamily,
    scale: f64,
    offset: f64,
}

const fn linear(family: UnitFamily, scale: f64) -> Conversion {
    Conversion { family, scale, offset: 0.0 }
}

fn lookup_unit(raw: &str) -> Option<Conversion> {
    let unit = raw.trim().trim_end_matches('.').to_lowercase();
    let conversion = match unit.as_str() {
        "mph" | "mi/h" | "mi/hr" => linear(UnitFamily::Speed, 1.0),
        "km/h" | "kmh" | "kph" | "km/hr" | "kmph" => linear(UnitFamily::Speed, 0.621_371),
        "m/s" | "mps" => linear(UnitFamily::Speed, 2.236_936),
        "knot" | "knots" | "kt" | "kts" | "kn" => linear(UnitFamily::Speed, 1.150_779),
        "mm" | "millimeter" | "millimeters" | "millimetre" | "millimetres" => {
            linear(UnitFamily::Depth, 1.0)
        }
        "cm" | "centimeter" | "centimeters" | "centimetre" | "centimetres" => {
            linear(UnitFamily::Depth, 10.0)
        }
        "inch" | "inches" => linear(UnitFamily::Depth, 25.4),
        "°f" | "f" | "degf" | "fahrenheit" => linear(UnitFamily::Temperature, 1.0),
        "°c" | "c" | "degc" | "celsius" => {
            Conversion { family: UnitFamily::Temperature, scale: 9.0 / 5.0, offset: 32.0 }
        }
        "mi" | "mile" | "miles" => linear(UnitFamily::Distance, 1.0),
        "km" | "kilometer" | "kilometers" | "kilometre" | "kilometres" => {
            linear(UnitFamily::Distance, 0.621_371)
        }
        "m" | "meter" | "meters" | "metre" | "metres" => {
            linear(UnitFamily::Distance, 0.000_621_371)
        }
        "ft" | "foot" | "feet" => linear(UnitFamily::Distance, 1.0 / 5280.0),
        _ => return None,
    };
    Some(conversion)
}

/// Family of a recognised unit spelling, if any.
pub fn unit_family(raw: &str) -> Option<UnitFamily> {
    lookup_unit(raw).map(|conversion| conversion.family)
}

/// Converts `value` expressed in `unit` into the canonical unit for `metric`.
///
/// Custom metrics take the family of their unit. A missing unit assumes the
/// canonical one; unrecognised or mismatched units are kept verbatim. Both
/// cases come back with `verified = false`.
pub fn canonicalize(metric: &Metric, value: f64, unit: &str) -> CanonicalValue {
    let expected = metric.family();
    match lookup_unit(unit) {
        Some(conversion) if expected.map_or(true, |family| family == conversion.family) => {
            CanonicalValue {
                value: value * conversion.scale + conversion.offset,
                unit: conversion.family.canonical_unit().to_string(),
                verified: true,
            }
        }
        _ if unit.trim().is_empty() => CanonicalValue {
            value,
            unit: metric.canonical_unit().unwrap_or_default().to_string(),
            verified: false,
        },
        _ => CanonicalValue { value, unit: unit.trim().to_string(), verified: false },
    }
}

#[cfg(test)]
mod tests {
    use super::{canonicalize, unit_family, Comparator, Metric, UnitFamily};

    fn close(lhs: f64, rhs: f64) -> bool {
        (lhs - rhs).abs() < 1e-6
    }

    #[test]
    fn wind_units_convert_to_mph() {
        let kmh = canonicalize(&Metric::WindSpeed, 32.0, "km/h");
        assert!(kmh.verified);
        assert_eq!(kmh.unit, "mph");
        assert!(close(kmh.value, 32.0 * 0.621_371));

        let mph = canonicalize(&Metric::WindSpeed, 25.0, "MPH");
        assert_eq!(mph.value, 25.0);
        assert!(mph.verified);
    }

    #[test]
    fn temperature_conversion_applies_offset() {
        let freezing = canonicalize(&Metric::Temperature, 0.0, "°C");
        assert!(close(freezing.value, 32.0));
        assert_eq!(freezing.unit, "°F");
        let boiling = canonicalize(&Metric::Temperature, 100.0, "celsius");
        assert!(close(boiling.value, 212.0));
    }

    #[test]
    fn unknown_unit_is_kept_and_flagged() {
        let value = canonicalize(&Metric::Precipitation, 2.0, "buckets");
        assert!(!value.verified);
        assert_eq!(value.unit, "buckets");
        assert_eq!(value.value, 2.0);
    }

    #[test]
    fn mismatched_family_is_not_converted() {
        let value = canonicalize(&Metric::WindSpeed, 20.0, "mm");
        assert!(!value.verified);
        assert_eq!(value.unit, "mm");
    }

    #[test]
    fn missing_unit_assumes_canonical_but_unverified() {
        let value = canonicalize(&Metric::Precipitation, 5.0, "");
        assert_eq!(value.unit, "mm");
        assert!(!value.verified);
    }

    #[test]
    fn custom_metric_uses_unit_family() {
        let gust = Metric::Custom("wind_gust".to_string());
        let value = canonicalize(&gust, 10.0, "m/s");
        assert!(value.verified);
        assert_eq!(value.unit, "mph");
        assert_eq!(unit_family("kts"), Some(UnitFamily::Speed));
        assert_eq!(gust.identifier(), "wind_gust");
        assert_eq!(gust.label(), "wind gust");
    }

    #[test]
    fn comparator_polarity() {
        assert!(Comparator::Lt.is_lower_bound());
        assert!(!Comparator::Ge.is_lower_bound());
        assert_eq!(Comparator::Ge.symbol(), ">=");
    }
}
