//! AQICN (World Air Quality Index) city feeds
//!
//! The city list is not configured: it is read from the capitals stored in
//! the historical countries table, so countries must be loaded first.

use std::collections::BTreeSet;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use strata_common::{FieldValue, Record};
use tracing::{debug, info, warn};

use super::http::{endpoint, HttpClient};
use super::{field_at, FetchBatch, FetchedRecord, Fetcher, SourceError};
use crate::config::HttpConfig;
use crate::error::{IngestError, Result};
use crate::reconcile::HistoricalRecord;

pub const SOURCE_NAME: &str = "aqicn";

const CONCURRENT_REQUESTS: usize = 8;

/// Pollutant and weather readings under `iaqi`, with their column names
const IAQI_COLUMNS: &[(&str, &str)] = &[
    ("pm25", "pm25"),
    ("pm10", "pm10"),
    ("o3", "o3"),
    ("no2", "no2"),
    ("so2", "so2"),
    ("co", "co"),
    ("t", "temperature"),
    ("h", "humidity"),
    ("p", "pressure"),
    ("w", "wind_speed"),
];

/// A capital to query, lower-cased as AQICN expects
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct CapitalCity {
    pub city: String,
    /// ISO 3166-1 alpha-2 of the country the capital belongs to
    pub country_code: String,
}

/// Distinct (capital, country) pairs of the stored countries, ordered by city.
///
/// Only the first listed capital counts. Countries without a capital or
/// without an alpha-2 code are left out.
pub fn capitals_from_countries(countries: &[HistoricalRecord]) -> Vec<CapitalCity> {
    let mut capitals = BTreeSet::new();

    for country in countries {
        let Some(code) = country.fields.get("code_iso2").and_then(FieldValue::as_str) else {
            continue;
        };
        let first = country
            .fields
            .get("capital")
            .and_then(FieldValue::as_json)
            .and_then(|c| c.get(0))
            .and_then(Value::as_str)
            .map(|c| c.trim().to_lowercase());

        match first {
            Some(city) if !city.is_empty() => {
                capitals.insert(CapitalCity {
                    city,
                    country_code: code.trim().to_string(),
                });
            }
            _ => {}
        }
    }

    capitals.into_iter().collect()
}

#[derive(Debug, Clone)]
pub struct AqicnClient {
    http: HttpClient,
    base_url: String,
    token: String,
}

impl AqicnClient {
    /// Fails when no API token is configured
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        config: &HttpConfig,
    ) -> Result<Self> {
        let token = token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| IngestError::config("AQICN_API_TOKEN is required for air quality"))?;

        Ok(Self {
            http: HttpClient::new(SOURCE_NAME, config)?,
            base_url: base_url.into(),
            token,
        })
    }

    /// `GET /feed/{city}/`
    pub async fn city_feed(&self, city: &str) -> Result<Value> {
        let url = endpoint(&self.base_url, &["feed", city, ""])?;
        self.http
            .get_json(url, &[("token", self.token.as_str())])
            .await
    }
}

/// Map a city feed to an air quality staging record.
///
/// `None` when the feed has no usable reading: a status other than `ok`,
/// no `data` object, or an AQI of `"-"`.
pub fn air_quality_record(body: &Value, country_code: &str) -> Option<Record> {
    if body.get("status").and_then(Value::as_str) != Some("ok") {
        return None;
    }
    let data = body.get("data").filter(|d| d.is_object())?;
    if data.get("aqi").and_then(Value::as_str) == Some("-") {
        return None;
    }

    // Prefer the zoned ISO time; `time.s` is station-local without offset
    let measured_at = match data.pointer("/time/iso") {
        Some(Value::String(iso)) => FieldValue::from(iso.as_str()),
        _ => field_at(data, "/time/s"),
    };

    let mut record = Record::new()
        .with("measured_at", measured_at)
        .with("station_id", field_at(data, "/idx"))
        .with("city_name", field_at(data, "/city/name"))
        .with("country_code", country_code)
        .with("latitude", field_at(data, "/city/geo/0"))
        .with("longitude", field_at(data, "/city/geo/1"))
        .with("aqi", field_at(data, "/aqi"))
        .with("dominant_pollutant", field_at(data, "/dominentpol"))
        .with("timezone", field_at(data, "/time/tz"))
        .with("timestamp_unix", field_at(data, "/time/v"));

    for (reading, column) in IAQI_COLUMNS {
        record.set(*column, field_at(data, &format!("/iaqi/{}/v", reading)));
    }

    Some(record)
}

pub struct AirQualityFetcher {
    client: AqicnClient,
    cities: Vec<CapitalCity>,
}

impl AirQualityFetcher {
    pub fn new(client: AqicnClient, cities: Vec<CapitalCity>) -> Self {
        Self { client, cities }
    }
}

#[async_trait]
impl Fetcher for AirQualityFetcher {
    fn name(&self) -> &str {
        "air_quality"
    }

    async fn fetch(&self) -> Result<FetchBatch> {
        let requests: Vec<_> = self
            .cities
            .iter()
            .map(|city| async move { (city, self.client.city_feed(&city.city).await) })
            .collect();
        let responses: Vec<_> = stream::iter(requests)
            .buffered(CONCURRENT_REQUESTS)
            .collect()
            .await;

        let mut batch = FetchBatch::default();
        for (city, response) in responses {
            match response {
                Ok(body) => match air_quality_record(&body, &city.country_code) {
                    Some(record) => batch.records.push(FetchedRecord::new(record, body)),
                    None => {
                        debug!(city = %city.city, "No air quality reading for city");
                        batch.skipped += 1;
                    }
                },
                Err(e) => {
                    warn!(city = %city.city, error = %e, "Air quality fetch failed for city");
                    batch.errors.push(SourceError::new(
                        SOURCE_NAME,
                        city.city.clone(),
                        e.to_string(),
                    ));
                }
            }
        }

        info!(
            cities = self.cities.len(),
            fetched = batch.records.len(),
            skipped = batch.skipped,
            failed = batch.errors.len(),
            "Air quality fetched"
        );
        Ok(batch)
    }
}
