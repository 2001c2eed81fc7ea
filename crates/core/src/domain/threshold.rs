use serde::{Deserialize, Serialize};

use crate::domain::citation::Citation;
use crate::domain::metric::{Comparator, Metric, MetricReading};

/// A directional numeric safety limit extracted from rule text.
///
/// `value` and `unit` are already in the canonical unit of the metric when
/// `unit_verified` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub metric: Metric,
    pub operator: Comparator,
    pub value: f64,
    pub unit: String,
    pub unit_verified: bool,
    pub source_citation: Citation,
    /// Clause the threshold was read from, quoted verbatim in reasoning.
    pub clause: String,
    /// Optional violation expression supplied by an analyst or a model.
    /// Always evaluated through the sandbox.
    pub condition: Option<String>,
}

impl Threshold {
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Expression that evaluates to true when a reading violates this threshold.
    pub fn violation_expression(&self) -> String {
        match &self.condition {
            Some(condition) => condition.clone(),
            None => format!("reading {} limit", self.operator.symbol()),
        }
    }

    pub fn describe(&self) -> String {
        format!("{} {} {}", self.metric, self.operator.symbol(), format_quantity(self.value, &self.unit))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComplianceResult {
    pub threshold: Threshold,
    pub reading: MetricReading,
    pub satisfied: bool,
    /// `reading - threshold`, in the threshold's unit.
    pub margin: f64,
}

impl ComplianceResult {
    pub fn severity(&self) -> f64 {
        self.margin.abs()
    }
}

/// A threshold that was in scope but could not be checked.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedThreshold {
    pub threshold: Threshold,
    pub reason: String,
}

pub fn format_quantity(value: f64, unit: &str) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    let number = if rounded.fract() == 0.0 { format!("{rounded:.0}") } else { format!("{rounded}") };
    if unit.is_empty() {
        number
    } else if unit.starts_with('°') {
        format!("{number}{unit}")
    } else {
        format!("{number} {unit}")
    }
}
