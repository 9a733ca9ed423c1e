//! Ingest configuration
//!
//! Everything is read from environment variables (optionally seeded from a
//! `.env` file by the binary). Nothing here is global: the loaded
//! [`IngestConfig`] is passed to the components that need it.

use std::time::Duration;

use serde::Serialize;

use crate::db::DbConfig;
use crate::error::{IngestError, Result};
use crate::store::sql::validate_identifier;

pub const DEFAULT_SCHEMA: &str = "ga_integration";
pub const DEFAULT_REST_COUNTRIES_URL: &str = "https://restcountries.com/v3.1";
pub const DEFAULT_OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1";
pub const DEFAULT_AQICN_URL: &str = "https://api.waqi.info";
pub const DEFAULT_REGIONS: &[&str] = &["africa", "americas", "asia", "europe", "oceania"];

/// Shared HTTP client behaviour for every source
#[derive(Debug, Clone, Serialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    /// Total attempts per request, including the first one
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `retry_delay * 2^(n-1)` before retrying
    pub retry_delay_ms: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 2000,
            user_agent: format!("strata-ingest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(IngestError::config(
                "STRATA_HTTP_MAX_RETRIES must be greater than 0",
            ));
        }
        if self.timeout_secs == 0 {
            return Err(IngestError::config(
                "STRATA_HTTP_TIMEOUT_SECS must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Base URLs and credentials of the external sources
#[derive(Debug, Clone, Serialize)]
pub struct SourceConfig {
    pub rest_countries_url: String,
    pub open_meteo_url: String,
    pub aqicn_url: String,
    #[serde(skip_serializing)]
    pub aqicn_token: Option<String>,
    pub regions: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            rest_countries_url: DEFAULT_REST_COUNTRIES_URL.to_string(),
            open_meteo_url: DEFAULT_OPEN_METEO_URL.to_string(),
            aqicn_url: DEFAULT_AQICN_URL.to_string(),
            aqicn_token: None,
            regions: DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect(),
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("STRATA_REST_COUNTRIES_URL", &self.rest_countries_url),
            ("STRATA_OPEN_METEO_URL", &self.open_meteo_url),
            ("STRATA_AQICN_URL", &self.aqicn_url),
        ] {
            if url.trim().is_empty() {
                return Err(IngestError::config(format!("{} must not be empty", name)));
            }
        }
        if self.regions.is_empty() {
            return Err(IngestError::config(
                "STRATA_REGIONS must name at least one region",
            ));
        }
        Ok(())
    }
}

/// Top-level configuration of the ingest binary
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub db: DbConfig,
    /// Schema holding every staging, historical and fact table
    pub schema: String,
    pub http: HttpConfig,
    pub sources: SourceConfig,
}

impl IngestConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build the configuration from an arbitrary variable lookup
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db = DbConfig::from_lookup(&get)?;
        let http_defaults = HttpConfig::default();
        let source_defaults = SourceConfig::default();

        let http = HttpConfig {
            timeout_secs: parse_var(&get, "STRATA_HTTP_TIMEOUT_SECS")?
                .unwrap_or(http_defaults.timeout_secs),
            max_retries: parse_var(&get, "STRATA_HTTP_MAX_RETRIES")?
                .unwrap_or(http_defaults.max_retries),
            retry_delay_ms: parse_var(&get, "STRATA_HTTP_RETRY_DELAY_MS")?
                .unwrap_or(http_defaults.retry_delay_ms),
            user_agent: http_defaults.user_agent,
        };

        let regions = match get("STRATA_REGIONS") {
            Some(list) => list
                .split(',')
                .map(|r| r.trim().to_lowercase())
                .filter(|r| !r.is_empty())
                .collect(),
            None => source_defaults.regions,
        };

        let sources = SourceConfig {
            rest_countries_url: get("STRATA_REST_COUNTRIES_URL")
                .unwrap_or(source_defaults.rest_countries_url),
            open_meteo_url: get("STRATA_OPEN_METEO_URL").unwrap_or(source_defaults.open_meteo_url),
            aqicn_url: get("STRATA_AQICN_URL").unwrap_or(source_defaults.aqicn_url),
            aqicn_token: get("AQICN_API_TOKEN").filter(|t| !t.trim().is_empty()),
            regions,
        };

        Ok(Self {
            db,
            schema: get("STRATA_SCHEMA").unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            http,
            sources,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.db.validate()?;
        validate_identifier(&self.schema)
            .map_err(|e| IngestError::config(format!("STRATA_SCHEMA: {}", e)))?;
        self.http.validate()?;
        self.sources.validate()?;
        Ok(())
    }
}

/// Parse `key` if set; a value that does not parse is an error
pub(crate) fn parse_var<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| IngestError::config(format!("{} has an invalid value '{}'", key, raw))),
    }
}
