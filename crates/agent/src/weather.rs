use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use siteguard_core::config::WeatherConfig;
use siteguard_core::domain::{Collaborator, Metric, MetricReading};
use siteguard_core::errors::CollaboratorError;

const DAILY_FIELDS: &[(&str, &str)] = &[
    ("wind_speed_10m_max", "km/h"),
    ("wind_gusts_10m_max", "km/h"),
    ("precipitation_sum", "mm"),
    ("temperature_2m_max", "°C"),
    ("temperature_2m_min", "°C"),
];

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<Vec<MetricReading>, CollaboratorError>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Open-Meteo forecast client. No API key is required.
pub struct OpenMeteoClient {
    http: Client,
    forecast_url: String,
    geocoding_url: String,
    forecast_days: u8,
}

impl OpenMeteoClient {
    pub fn from_config(config: &WeatherConfig, timeout: Duration) -> Result<Self, CollaboratorError> {
        let http = Client::builder().timeout(timeout).build().map_err(|error| {
            CollaboratorError::failure(Collaborator::Weather, format!("failed to build HTTP client: {error}"))
        })?;
        Ok(Self {
            http,
            forecast_url: config.forecast_url.clone(),
            geocoding_url: config.geocoding_url.clone(),
            forecast_days: config.forecast_days,
        })
    }

    pub async fn geocode(&self, location: &str) -> Result<Coordinates, CollaboratorError> {
        for query in geocode_queries(location) {
            let response = self
                .http
                .get(&self.geocoding_url)
                .query(&[("name", query.as_str()), ("count", "1"), ("language", "en"), ("format", "json")])
                .send()
                .await;
            let body = match response {
                Ok(response) if response.status().is_success() => response.json::<Value>().await.ok(),
                Ok(response) => {
                    debug!(event_name = "weather.geocode.rejected", query = %query, status = %response.status(), "geocoding request rejected");
                    None
                }
                Err(error) => {
                    debug!(event_name = "weather.geocode.failed", query = %query, error = %error, "geocoding request failed");
                    None
                }
            };
            if let Some(coordinates) = body.as_ref().and_then(first_result) {
                return Ok(coordinates);
            }
        }
        Err(CollaboratorError::failure(Collaborator::Weather, format!("could not geocode `{location}`")))
    }

    async fn forecast(&self, coordinates: Coordinates) -> Result<Value, CollaboratorError> {
        let daily = DAILY_FIELDS.iter().map(|(field, _)| *field).collect::<Vec<_>>().join(",");
        let response = self
            .http
            .get(&self.forecast_url)
            .query(&[
                ("latitude", coordinates.latitude.to_string()),
                ("longitude", coordinates.longitude.to_string()),
                ("daily", daily),
                ("forecast_days", self.forecast_days.to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await
            .map_err(|error| CollaboratorError::failure(Collaborator::Weather, format!("forecast request failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::failure(Collaborator::Weather, format!("forecast returned {status}")));
        }
        response
            .json::<Value>()
            .await
            .map_err(|error| CollaboratorError::invalid_response(Collaborator::Weather, error.to_string()))
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoClient {
    async fn fetch(&self, location: &str) -> Result<Vec<MetricReading>, CollaboratorError> {
        let coordinates = self.geocode(location).await?;
        let body = self.forecast(coordinates).await?;
        readings_from_forecast(&body)
    }
}

/// Query variants tried in order: the full name, the part before a comma,
/// the first word, and the name without a leading `Site <Name> -` label.
pub fn geocode_queries(location: &str) -> Vec<String> {
    let location = location.trim();
    let mut queries: Vec<String> = vec![location.to_string()];

    if let Some((head, _)) = location.split_once(',') {
        queries.push(head.trim().to_string());
    }
    let words: Vec<&str> = location.split_whitespace().collect();
    if words.len() > 1 {
        queries.push(words[0].to_string());
    }
    if let Some(cleaned) = strip_site_label(location) {
        queries.push(cleaned);
    }

    let mut unique: Vec<String> = Vec::new();
    for query in queries {
        if !query.is_empty() && !unique.contains(&query) {
            unique.push(query);
        }
    }
    unique
}

fn strip_site_label(location: &str) -> Option<String> {
    let mut words = location.split_whitespace();
    if !words.next()?.eq_ignore_ascii_case("site") {
        return None;
    }
    words.next()?;
    let rest: Vec<&str> = words.collect();
    let rest = rest.join(" ");
    let cleaned = rest.trim_start_matches(['-', '–']).trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

fn first_result(body: &Value) -> Option<Coordinates> {
    let result = body.get("results")?.as_array()?.first()?;
    Some(Coordinates {
        latitude: result.get("latitude")?.as_f64()?,
        longitude: result.get("longitude")?.as_f64()?,
    })
}

fn metric_for(field: &str) -> Metric {
    match field {
        "wind_speed_10m_max" => Metric::WindSpeed,
        "wind_gusts_10m_max" => Metric::Custom("wind_gust".to_string()),
        "precipitation_sum" => Metric::Precipitation,
        _ => Metric::Temperature,
    }
}

/// Maps the `daily` block of a forecast response to readings, one per field
/// per day. Null values are skipped.
pub fn readings_from_forecast(body: &Value) -> Result<Vec<MetricReading>, CollaboratorError> {
    let daily = body
        .get("daily")
        .and_then(Value::as_object)
        .ok_or_else(|| CollaboratorError::invalid_response(Collaborator::Weather, "forecast has no daily block"))?;
    let units = body.get("daily_units");
    let days: Vec<DateTime<Utc>> = daily
        .get("time")
        .and_then(Value::as_array)
        .map(|times| times.iter().map(|time| day_start(time.as_str())).collect())
        .unwrap_or_default();

    let mut readings = Vec::new();
    for (field, default_unit) in DAILY_FIELDS {
        let Some(values) = daily.get(*field).and_then(Value::as_array) else {
            continue;
        };
        let unit = units
            .and_then(|units| units.get(*field))
            .and_then(Value::as_str)
            .unwrap_or(default_unit);
        for (index, value) in values.iter().enumerate() {
            let Some(value) = value.as_f64() else {
                continue;
            };
            let timestamp = days.get(index).copied().unwrap_or_else(Utc::now);
            readings.push(MetricReading::new(metric_for(field), value, unit, timestamp));
        }
    }
    Ok(readings)
}

fn day_start(date: Option<&str>) -> DateTime<Utc> {
    date.and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc())
        .unwrap_or_else(Utc::now)
}
