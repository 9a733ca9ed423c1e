//! External data sources
//!
//! Each source turns API responses into flat [`Record`]s named after the
//! staging columns of one entity. Fetchers never touch the database.

pub mod aqicn;
pub mod http;
pub mod open_meteo;
pub mod regions;
pub mod rest_countries;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use strata_common::{FieldValue, Record};

pub use aqicn::{capitals_from_countries, AirQualityFetcher, AqicnClient, CapitalCity};
pub use http::HttpClient;
pub use open_meteo::{Capital, OpenMeteoClient, WeatherFetcher, CAPITALS};
pub use regions::{region_stats, RegionStatsFetcher};
pub use rest_countries::{CountriesFetcher, CountryFieldSet, RestCountriesClient};

/// A source record plus the raw document it was extracted from
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedRecord {
    pub record: Record,
    pub raw_payload: Value,
}

impl FetchedRecord {
    pub fn new(record: Record, raw_payload: Value) -> Self {
        Self {
            record,
            raw_payload,
        }
    }
}

/// A single item a source could not deliver
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceError {
    pub source: String,
    /// City, region or array position the error refers to
    pub item: String,
    pub message: String,
}

impl SourceError {
    pub fn new(source: &str, item: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.to_string(),
            item: item.into(),
            message: message.into(),
        }
    }
}

/// Everything one fetch produced
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub records: Vec<FetchedRecord>,
    /// Items that failed individually; the rest of the batch is still usable
    pub errors: Vec<SourceError>,
    /// Items the source answered for but had no usable data
    pub skipped: usize,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Source name used in logs and reports
    fn name(&self) -> &str;

    /// Fetch the full current batch.
    ///
    /// Fails only when the source as a whole is unavailable.
    async fn fetch(&self) -> crate::error::Result<FetchBatch>;
}

/// Look up a JSON pointer and convert it, `Null` when absent
pub(crate) fn field_at(doc: &Value, pointer: &str) -> FieldValue {
    doc.pointer(pointer)
        .map(FieldValue::from_json)
        .unwrap_or(FieldValue::Null)
}

/// Like [`field_at`] for JSON columns, with a default for absent values
pub(crate) fn json_at(doc: &Value, pointer: &str, default: Value) -> FieldValue {
    match doc.pointer(pointer) {
        Some(Value::Null) | None => FieldValue::Json(default),
        Some(v) => FieldValue::Json(v.clone()),
    }
}
