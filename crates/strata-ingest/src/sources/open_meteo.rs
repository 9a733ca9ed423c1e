//! Open-Meteo current conditions for a fixed list of capitals

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use strata_common::Record;
use tracing::{info, warn};

use super::http::{endpoint, HttpClient};
use super::{field_at, FetchBatch, FetchedRecord, Fetcher, SourceError};
use crate::config::HttpConfig;
use crate::error::Result;

pub const SOURCE_NAME: &str = "open_meteo";

const CURRENT_FIELDS: &str =
    "temperature_2m,relative_humidity_2m,precipitation,wind_speed_10m,weather_code";

const CONCURRENT_REQUESTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capital {
    /// ISO 3166-1 alpha-2
    pub country: &'static str,
    pub city: &'static str,
    pub latitude: f64,
    pub longitude: f64,
}

const fn capital(
    country: &'static str,
    city: &'static str,
    latitude: f64,
    longitude: f64,
) -> Capital {
    Capital {
        country,
        city,
        latitude,
        longitude,
    }
}

pub const CAPITALS: &[Capital] = &[
    capital("ES", "Madrid", 40.4168, -3.7038),
    capital("FR", "Paris", 48.8566, 2.3522),
    capital("DE", "Berlin", 52.5200, 13.4050),
    capital("IT", "Rome", 41.9028, 12.4964),
    capital("PT", "Lisbon", 38.7223, -9.1393),
    capital("GB", "London", 51.5074, -0.1278),
    capital("US", "Washington", 38.9072, -77.0369),
    capital("CN", "Beijing", 39.9042, 116.4074),
    capital("JP", "Tokyo", 35.6762, 139.6503),
    capital("BR", "Brasilia", -15.8267, -47.9218),
];

#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    http: HttpClient,
    base_url: String,
}

impl OpenMeteoClient {
    pub fn new(base_url: impl Into<String>, config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(SOURCE_NAME, config)?,
            base_url: base_url.into(),
        })
    }

    /// `GET /forecast` with the current conditions of one location, in UTC
    pub async fn current(&self, latitude: f64, longitude: f64) -> Result<Value> {
        let url = endpoint(&self.base_url, &["forecast"])?;
        let latitude = latitude.to_string();
        let longitude = longitude.to_string();
        self.http
            .get_json(
                url,
                &[
                    ("latitude", latitude.as_str()),
                    ("longitude", longitude.as_str()),
                    ("current", CURRENT_FIELDS),
                    ("timezone", "UTC"),
                ],
            )
            .await
    }
}

/// Map a forecast response to a weather staging record.
///
/// Coordinates come from the response (Open-Meteo snaps them to its grid)
/// and fall back to the configured ones.
pub fn weather_record(capital: &Capital, body: &Value) -> std::result::Result<Record, String> {
    let current = body
        .get("current")
        .filter(|c| c.is_object())
        .ok_or_else(|| "response has no 'current' block".to_string())?;
    if current.get("time").map_or(true, Value::is_null) {
        return Err("current block has no 'time'".to_string());
    }

    let latitude = body
        .get("latitude")
        .and_then(Value::as_f64)
        .unwrap_or(capital.latitude);
    let longitude = body
        .get("longitude")
        .and_then(Value::as_f64)
        .unwrap_or(capital.longitude);

    Ok(Record::new()
        .with("measured_at", field_at(current, "/time"))
        .with("country", capital.country)
        .with("city", capital.city)
        .with("latitude", latitude)
        .with("longitude", longitude)
        .with("temperature", field_at(current, "/temperature_2m"))
        .with("humidity", field_at(current, "/relative_humidity_2m"))
        .with("precipitation", field_at(current, "/precipitation"))
        .with("wind_speed", field_at(current, "/wind_speed_10m"))
        .with("weather_code", field_at(current, "/weather_code")))
}

pub struct WeatherFetcher {
    client: OpenMeteoClient,
    capitals: Vec<Capital>,
}

impl WeatherFetcher {
    pub fn new(client: OpenMeteoClient, capitals: Vec<Capital>) -> Self {
        Self { client, capitals }
    }
}

#[async_trait]
impl Fetcher for WeatherFetcher {
    fn name(&self) -> &str {
        "weather"
    }

    /// One request per capital; a failed city is reported and skipped
    async fn fetch(&self) -> Result<FetchBatch> {
        let requests: Vec<_> = self
            .capitals
            .iter()
            .map(|capital| async move {
                (
                    capital,
                    self.client
                        .current(capital.latitude, capital.longitude)
                        .await,
                )
            })
            .collect();
        let responses: Vec<_> = stream::iter(requests)
            .buffered(CONCURRENT_REQUESTS)
            .collect()
            .await;

        let mut batch = FetchBatch::default();
        for (capital, response) in responses {
            let outcome = response
                .map_err(|e| e.to_string())
                .and_then(|body| weather_record(capital, &body).map(|record| (record, body)));

            match outcome {
                Ok((record, body)) => batch.records.push(FetchedRecord::new(record, body)),
                Err(message) => {
                    warn!(city = capital.city, error = %message, "Weather fetch failed for city");
                    batch
                        .errors
                        .push(SourceError::new(SOURCE_NAME, capital.city, message));
                }
            }
        }

        info!(
            cities = self.capitals.len(),
            fetched = batch.records.len(),
            failed = batch.errors.len(),
            "Weather fetched"
        );
        Ok(batch)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_common::FieldValue;

    #[test]
    fn test_capitals() {
        assert_eq!(CAPITALS.len(), 10);
        assert_eq!(CAPITALS[0].city, "Madrid");
        assert!(CAPITALS.iter().all(|c| c.country.len() == 2));
    }

    #[test]
    fn test_weather_record() {
        let body = json!({
            "latitude": 40.42,
            "longitude": -3.70,
            "current": {
                "time": "2026-02-17T12:00",
                "temperature_2m": 14.2,
                "relative_humidity_2m": 55,
                "precipitation": 0.0,
                "wind_speed_10m": 9.8,
                "weather_code": 3
            }
        });

        let record = weather_record(&CAPITALS[0], &body).unwrap();
        assert_eq!(
            record.get("measured_at"),
            Some(&FieldValue::from("2026-02-17T12:00"))
        );
        assert_eq!(record.get("country"), Some(&FieldValue::from("ES")));
        assert_eq!(record.get("latitude"), Some(&FieldValue::Float(40.42)));
        assert_eq!(record.get("humidity"), Some(&FieldValue::Int(55)));
        assert_eq!(record.get("weather_code"), Some(&FieldValue::Int(3)));
    }

    #[test]
    fn test_weather_record_requires_time() {
        assert!(weather_record(&CAPITALS[1], &json!({"latitude": 1.0})).is_err());
        assert!(
            weather_record(&CAPITALS[1], &json!({"current": {"temperature_2m": 3.0}})).is_err()
        );

        let record = weather_record(
            &CAPITALS[1],
            &json!({"current": {"time": "2026-02-17T12:00"}}),
        )
        .unwrap();
        assert_eq!(record.get("latitude"), Some(&FieldValue::Float(48.8566)));
        assert_eq!(record.get("temperature"), Some(&FieldValue::Null));
    }
}
