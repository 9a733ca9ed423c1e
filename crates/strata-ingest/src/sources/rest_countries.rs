//! REST Countries v3.1 client
//!
//! Country data is fetched in three field sets, one per staging table, each
//! with a single `GET /all?fields=...` call.

use async_trait::async_trait;
use serde_json::{json, Value};
use strata_common::Record;
use tracing::{info, warn};

use super::http::{endpoint, HttpClient};
use super::{field_at, json_at, FetchBatch, FetchedRecord, Fetcher, SourceError};
use crate::config::HttpConfig;
use crate::entity::{EntitySpec, COUNTRIES_BASIC, COUNTRIES_CULTURE, COUNTRIES_GEO};
use crate::error::{IngestError, Result};

pub const SOURCE_NAME: &str = "rest_countries";

/// Fields requested for region statistics
const REGION_FIELDS: &str = "cca3,population,area,landlocked,independent,unMember";

#[derive(Debug, Clone)]
pub struct RestCountriesClient {
    http: HttpClient,
    base_url: String,
}

impl RestCountriesClient {
    pub fn new(base_url: impl Into<String>, config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(SOURCE_NAME, config)?,
            base_url: base_url.into(),
        })
    }

    /// `GET /all` restricted to `fields`
    pub async fn all(&self, fields: &str) -> Result<Vec<Value>> {
        let url = endpoint(&self.base_url, &["all"])?;
        let body = self.http.get_json(url, &[("fields", fields)]).await?;
        expect_array(body, "/all")
    }

    /// `GET /region/{region}`
    pub async fn region(&self, region: &str) -> Result<Vec<Value>> {
        let url = endpoint(&self.base_url, &["region", region])?;
        let body = self
            .http
            .get_json(url, &[("fields", REGION_FIELDS)])
            .await?;
        expect_array(body, &format!("/region/{}", region))
    }
}

fn expect_array(body: Value, path: &str) -> Result<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        other => Err(IngestError::source_unavailable(
            SOURCE_NAME,
            format!(
                "{} returned a {} instead of an array",
                path,
                json_kind(&other)
            ),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The three partial views of a country
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountryFieldSet {
    Basic,
    Geo,
    Culture,
}

impl CountryFieldSet {
    pub const ALL: [CountryFieldSet; 3] = [Self::Basic, Self::Geo, Self::Culture];

    /// Value of the `fields` query parameter
    pub fn api_fields(self) -> &'static str {
        match self {
            Self::Basic => "cca2,cca3,name,capital,region,subregion,area,population",
            Self::Geo => "cca2,cca3,latlng,landlocked,borders",
            Self::Culture => {
                "cca2,cca3,ccn3,languages,currencies,timezones,flag,flags,independent,unMember"
            }
        }
    }

    pub fn entity(self) -> &'static EntitySpec {
        match self {
            Self::Basic => &COUNTRIES_BASIC,
            Self::Geo => &COUNTRIES_GEO,
            Self::Culture => &COUNTRIES_CULTURE,
        }
    }

    /// Map one API country document to a staging record
    pub fn transform(self, country: &Value) -> Record {
        let record = Record::new()
            .with("code_iso2", field_at(country, "/cca2"))
            .with("code_iso3", field_at(country, "/cca3"));

        match self {
            Self::Basic => record
                .with("name_common", field_at(country, "/name/common"))
                .with("name_official", field_at(country, "/name/official"))
                .with(
                    "name_native",
                    json_at(country, "/name/nativeName", json!({})),
                )
                .with("capital", json_at(country, "/capital", json!([])))
                .with("region", field_at(country, "/region"))
                .with("subregion", field_at(country, "/subregion"))
                .with("area", field_at(country, "/area"))
                .with("population", field_at(country, "/population")),
            Self::Geo => record
                .with("latitude", field_at(country, "/latlng/0"))
                .with("longitude", field_at(country, "/latlng/1"))
                .with("landlocked", field_at(country, "/landlocked"))
                .with("borders", json_at(country, "/borders", json!([]))),
            Self::Culture => record
                .with("code_numeric", field_at(country, "/ccn3"))
                .with("languages", json_at(country, "/languages", json!({})))
                .with("currencies", json_at(country, "/currencies", json!({})))
                .with("timezones", json_at(country, "/timezones", json!([])))
                .with("flag_emoji", field_at(country, "/flag"))
                .with("flag_svg", field_at(country, "/flags/svg"))
                .with("independent", field_at(country, "/independent"))
                .with("un_member", field_at(country, "/unMember")),
        }
    }
}

/// Fetches one country field set
pub struct CountriesFetcher {
    client: RestCountriesClient,
    field_set: CountryFieldSet,
}

impl CountriesFetcher {
    pub fn new(client: RestCountriesClient, field_set: CountryFieldSet) -> Self {
        Self { client, field_set }
    }

    pub fn field_set(&self) -> CountryFieldSet {
        self.field_set
    }
}

#[async_trait]
impl Fetcher for CountriesFetcher {
    fn name(&self) -> &str {
        self.field_set.entity().name
    }

    async fn fetch(&self) -> Result<FetchBatch> {
        let items = self.client.all(self.field_set.api_fields()).await?;
        let mut batch = FetchBatch::default();

        for (position, item) in items.into_iter().enumerate() {
            if !item.is_object() {
                batch.errors.push(SourceError::new(
                    SOURCE_NAME,
                    format!("#{}", position),
                    format!("expected a country object, got a {}", json_kind(&item)),
                ));
                continue;
            }
            let record = self.field_set.transform(&item);
            batch.records.push(FetchedRecord::new(record, item));
        }

        if !batch.errors.is_empty() {
            warn!(
                entity = self.name(),
                errors = batch.errors.len(),
                "Malformed country documents skipped"
            );
        }
        info!(
            entity = self.name(),
            countries = batch.records.len(),
            "Countries fetched"
        );

        Ok(batch)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use strata_common::FieldValue;

    fn spain() -> Value {
        json!({
            "cca2": "ES",
            "cca3": "ESP",
            "ccn3": "724",
            "name": {
                "common": "Spain",
                "official": "Kingdom of Spain",
                "nativeName": {"spa": {"official": "Reino de España", "common": "España"}}
            },
            "capital": ["Madrid"],
            "region": "Europe",
            "subregion": "Southern Europe",
            "area": 505992.0,
            "population": 47351567,
            "latlng": [40.0, -4.0],
            "landlocked": false,
            "borders": ["AND", "FRA", "GIB", "PRT", "MAR"],
            "languages": {"spa": "Spanish"},
            "currencies": {"EUR": {"name": "Euro", "symbol": "€"}},
            "timezones": ["UTC", "UTC+01:00"],
            "flag": "🇪🇸",
            "flags": {"png": "https://flagcdn.com/w320/es.png", "svg": "https://flagcdn.com/es.svg"},
            "independent": true,
            "unMember": true
        })
    }

    #[test]
    fn test_basic_transform() {
        let record = CountryFieldSet::Basic.transform(&spain());
        assert_eq!(record.get("code_iso3"), Some(&FieldValue::from("ESP")));
        assert_eq!(
            record.get("name_official"),
            Some(&FieldValue::from("Kingdom of Spain"))
        );
        assert_eq!(
            record.get("capital"),
            Some(&FieldValue::Json(json!(["Madrid"])))
        );
        assert_eq!(record.get("population"), Some(&FieldValue::Int(47351567)));
        assert!(record
            .get("name_native")
            .unwrap()
            .as_json()
            .unwrap()
            .get("spa")
            .is_some());
        assert!(!record.contains("latitude"));
    }

    #[test]
    fn test_geo_transform() {
        let record = CountryFieldSet::Geo.transform(&spain());
        assert_eq!(record.get("latitude"), Some(&FieldValue::Float(40.0)));
        assert_eq!(record.get("longitude"), Some(&FieldValue::Float(-4.0)));
        assert_eq!(record.get("landlocked"), Some(&FieldValue::Bool(false)));
    }

    #[test]
    fn test_culture_transform() {
        let record = CountryFieldSet::Culture.transform(&spain());
        assert_eq!(record.get("code_numeric"), Some(&FieldValue::from("724")));
        assert_eq!(
            record.get("flag_svg"),
            Some(&FieldValue::from("https://flagcdn.com/es.svg"))
        );
        assert_eq!(record.get("un_member"), Some(&FieldValue::Bool(true)));
    }

    #[test]
    fn test_missing_fields_get_defaults() {
        let record = CountryFieldSet::Culture.transform(&json!({"cca3": "ATA"}));
        assert_eq!(record.get("code_iso2"), Some(&FieldValue::Null));
        assert_eq!(record.get("languages"), Some(&FieldValue::Json(json!({}))));
        assert_eq!(record.get("timezones"), Some(&FieldValue::Json(json!([]))));
        assert_eq!(record.get("flag_svg"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_field_sets_cover_their_staging_columns() {
        for set in CountryFieldSet::ALL {
            let record = set.transform(&spain());
            for field in set.entity().fields {
                assert!(
                    record.contains(field.name),
                    "{:?} misses {}",
                    set,
                    field.name
                );
            }
        }
    }
}
