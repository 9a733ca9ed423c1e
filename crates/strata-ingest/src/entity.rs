//! Entity catalog
//!
//! Every loadable entity is described statically: which staging table it
//! lands in, which historical or fact table it feeds, its natural key and
//! its typed columns.

use serde::Serialize;
use strata_common::FieldType;

use crate::error::{IngestError, Result};
use crate::store::sql::validate_identifier;

/// How staged rows reach their durable table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStrategy {
    /// Staging only; combined into another entity downstream
    StagingOnly,
    /// Versioned upsert into a historical table
    Merge,
    /// Upsert on (key, timestamp) into a fact table
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
}

const fn field(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec { name, ty }
}

#[derive(Debug, Clone, Copy)]
pub struct EntitySpec {
    pub name: &'static str,
    /// Absent for entities assembled from several staging areas
    pub staging_table: Option<&'static str>,
    pub target_table: Option<&'static str>,
    pub strategy: LoadStrategy,
    pub natural_key: &'static [&'static str],
    /// Event time column of fact entities
    pub timestamp_column: Option<&'static str>,
    pub fields: &'static [FieldSpec],
}

impl EntitySpec {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.field(name).map(|f| f.ty)
    }

    /// Columns that identify a row: the natural key plus the timestamp, if any
    pub fn identity_columns(&self) -> Vec<&'static str> {
        let mut columns = self.natural_key.to_vec();
        if let Some(ts) = self.timestamp_column {
            columns.push(ts);
        }
        columns
    }

    fn is_identity_column(&self, name: &str) -> bool {
        self.natural_key.contains(&name) || self.timestamp_column == Some(name)
    }

    /// Fields compared and written on merge: everything but key and timestamp
    pub fn tracked_fields(&self) -> impl Iterator<Item = &FieldSpec> + '_ {
        self.fields
            .iter()
            .filter(move |f| !self.is_identity_column(f.name))
    }

    pub fn staging_table(&self) -> Result<&'static str> {
        self.staging_table.ok_or_else(|| {
            IngestError::config(format!("entity '{}' has no staging table", self.name))
        })
    }

    pub fn target_table(&self) -> Result<&'static str> {
        self.target_table.ok_or_else(|| {
            IngestError::config(format!("entity '{}' has no target table", self.name))
        })
    }

    /// Check the declaration is internally consistent
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| IngestError::config(format!("entity '{}': {}", self.name, msg));

        for table in self.staging_table.iter().chain(self.target_table.iter()) {
            validate_identifier(table).map_err(|e| invalid(e.to_string()))?;
        }
        for f in self.fields {
            validate_identifier(f.name).map_err(|e| invalid(e.to_string()))?;
        }
        if self.natural_key.is_empty() {
            return Err(invalid("natural key is empty".into()));
        }
        for column in self.identity_columns() {
            if self.field(column).is_none() {
                return Err(invalid(format!(
                    "key column '{}' is not a declared field",
                    column
                )));
            }
        }
        if let Some(ts) = self.timestamp_column {
            if self.field_type(ts) != Some(FieldType::Timestamp) {
                return Err(invalid(format!(
                    "timestamp column '{}' must be a timestamp",
                    ts
                )));
            }
        }
        match self.strategy {
            LoadStrategy::StagingOnly if self.target_table.is_some() => Err(invalid(
                "staging-only entity declares a target table".into(),
            )),
            LoadStrategy::Merge | LoadStrategy::Append if self.target_table.is_none() => {
                Err(invalid("missing target table".into()))
            }
            LoadStrategy::Append if self.timestamp_column.is_none() => {
                Err(invalid("append entity needs a timestamp column".into()))
            }
            LoadStrategy::Merge if self.timestamp_column.is_some() => Err(invalid(
                "merge entity cannot declare a timestamp column".into(),
            )),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Catalog
// ============================================================================

use FieldType::{BigInt, Boolean, Double, Json, Text, Timestamp};

pub static COUNTRIES_BASIC: EntitySpec = EntitySpec {
    name: "countries_basic",
    staging_table: Some("sa_countries_basic"),
    target_table: None,
    strategy: LoadStrategy::StagingOnly,
    natural_key: &["code_iso3"],
    timestamp_column: None,
    fields: &[
        field("code_iso2", Text),
        field("code_iso3", Text),
        field("name_common", Text),
        field("name_official", Text),
        field("name_native", Json),
        field("capital", Json),
        field("region", Text),
        field("subregion", Text),
        field("area", Double),
        field("population", BigInt),
    ],
};

pub static COUNTRIES_GEO: EntitySpec = EntitySpec {
    name: "countries_geo",
    staging_table: Some("sa_countries_geo"),
    target_table: None,
    strategy: LoadStrategy::StagingOnly,
    natural_key: &["code_iso3"],
    timestamp_column: None,
    fields: &[
        field("code_iso2", Text),
        field("code_iso3", Text),
        field("latitude", Double),
        field("longitude", Double),
        field("landlocked", Boolean),
        field("borders", Json),
    ],
};

pub static COUNTRIES_CULTURE: EntitySpec = EntitySpec {
    name: "countries_culture",
    staging_table: Some("sa_countries_culture"),
    target_table: None,
    strategy: LoadStrategy::StagingOnly,
    natural_key: &["code_iso3"],
    timestamp_column: None,
    fields: &[
        field("code_iso2", Text),
        field("code_iso3", Text),
        field("code_numeric", Text),
        field("languages", Json),
        field("currencies", Json),
        field("timezones", Json),
        field("flag_emoji", Text),
        field("flag_svg", Text),
        field("independent", Boolean),
        field("un_member", Boolean),
    ],
};

pub static COUNTRIES: EntitySpec = EntitySpec {
    name: "countries",
    staging_table: None,
    target_table: Some("th_countries"),
    strategy: LoadStrategy::Merge,
    natural_key: &["code_iso3"],
    timestamp_column: None,
    fields: &[
        field("code_iso3", Text),
        field("code_iso2", Text),
        field("code_numeric", Text),
        field("name_common", Text),
        field("name_official", Text),
        field("name_native", Json),
        field("capital", Json),
        field("region", Text),
        field("subregion", Text),
        field("area", Double),
        field("population", BigInt),
        field("latitude", Double),
        field("longitude", Double),
        field("landlocked", Boolean),
        field("borders", Json),
        field("languages", Json),
        field("currencies", Json),
        field("timezones", Json),
        field("flag_emoji", Text),
        field("flag_svg", Text),
        field("independent", Boolean),
        field("un_member", Boolean),
    ],
};

pub static REGIONS_STATS: EntitySpec = EntitySpec {
    name: "regions_stats",
    staging_table: Some("sa_regions_stats"),
    target_table: Some("th_regions_stats"),
    strategy: LoadStrategy::Merge,
    natural_key: &["region"],
    timestamp_column: None,
    fields: &[
        field("region", Text),
        field("country_count", BigInt),
        field("total_population", BigInt),
        field("avg_population", Double),
        field("total_area", Double),
        field("landlocked_count", BigInt),
        field("independent_count", BigInt),
        field("un_member_count", BigInt),
    ],
};

pub static WEATHER: EntitySpec = EntitySpec {
    name: "weather",
    staging_table: Some("sa_weather"),
    target_table: Some("th_weather"),
    strategy: LoadStrategy::Append,
    natural_key: &["city"],
    timestamp_column: Some("measured_at"),
    fields: &[
        field("measured_at", Timestamp),
        field("country", Text),
        field("city", Text),
        field("latitude", Double),
        field("longitude", Double),
        field("temperature", Double),
        field("humidity", Double),
        field("precipitation", Double),
        field("wind_speed", Double),
        field("weather_code", BigInt),
    ],
};

pub static AIR_QUALITY: EntitySpec = EntitySpec {
    name: "air_quality",
    staging_table: Some("sa_air_quality"),
    target_table: Some("th_air_quality"),
    strategy: LoadStrategy::Append,
    natural_key: &["station_id"],
    timestamp_column: Some("measured_at"),
    fields: &[
        field("measured_at", Timestamp),
        field("station_id", BigInt),
        field("city_name", Text),
        field("country_code", Text),
        field("latitude", Double),
        field("longitude", Double),
        field("aqi", BigInt),
        field("dominant_pollutant", Text),
        field("pm25", Double),
        field("pm10", Double),
        field("o3", Double),
        field("no2", Double),
        field("so2", Double),
        field("co", Double),
        field("temperature", Double),
        field("humidity", Double),
        field("pressure", Double),
        field("wind_speed", Double),
        field("timezone", Text),
        field("timestamp_unix", BigInt),
    ],
};

static CATALOG: [&EntitySpec; 7] = [
    &COUNTRIES_BASIC,
    &COUNTRIES_GEO,
    &COUNTRIES_CULTURE,
    &COUNTRIES,
    &REGIONS_STATS,
    &WEATHER,
    &AIR_QUALITY,
];

pub fn catalog() -> &'static [&'static EntitySpec] {
    &CATALOG
}

pub fn lookup(name: &str) -> Result<&'static EntitySpec> {
    CATALOG
        .iter()
        .copied()
        .find(|e| e.name == name)
        .ok_or_else(|| IngestError::UnknownEntity(name.to_string()))
}
