//! Per-region aggregates computed from `GET /region/{region}`

use async_trait::async_trait;
use serde_json::{json, Value};
use strata_common::Record;
use tracing::{info, warn};

use super::rest_countries::{RestCountriesClient, SOURCE_NAME};
use super::{FetchBatch, FetchedRecord, Fetcher, SourceError};
use crate::error::Result;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Aggregate the countries of one region.
///
/// Missing or zero population and area are skipped in the sums. The average
/// population is taken over every country of the region, 0 when there is none.
/// A population total beyond `i64` rejects the whole region.
pub fn region_stats(region: &str, countries: &[Value]) -> std::result::Result<Record, String> {
    let country_count = countries.len() as i64;
    let mut total_population: i64 = 0;
    let mut total_area: f64 = 0.0;
    let mut landlocked = 0i64;
    let mut independent = 0i64;
    let mut un_member = 0i64;

    let flag =
        |country: &Value, name: &str| country.get(name).and_then(Value::as_bool) == Some(true);

    for country in countries {
        if let Some(population) = country.get("population").and_then(Value::as_i64) {
            total_population = total_population.checked_add(population).ok_or_else(|| {
                format!(
                    "total population overflows at {} in region '{}'",
                    population, region
                )
            })?;
        }
        if let Some(area) = country.get("area").and_then(Value::as_f64) {
            total_area += area;
        }
        landlocked += i64::from(flag(country, "landlocked"));
        independent += i64::from(flag(country, "independent"));
        un_member += i64::from(flag(country, "unMember"));
    }

    let avg_population = if country_count > 0 {
        total_population as f64 / country_count as f64
    } else {
        0.0
    };

    Ok(Record::new()
        .with("region", region)
        .with("country_count", country_count)
        .with("total_population", total_population)
        .with("avg_population", round2(avg_population))
        .with("total_area", round2(total_area))
        .with("landlocked_count", landlocked)
        .with("independent_count", independent)
        .with("un_member_count", un_member))
}

pub struct RegionStatsFetcher {
    client: RestCountriesClient,
    regions: Vec<String>,
}

impl RegionStatsFetcher {
    pub fn new(client: RestCountriesClient, regions: Vec<String>) -> Self {
        Self { client, regions }
    }
}

#[async_trait]
impl Fetcher for RegionStatsFetcher {
    fn name(&self) -> &str {
        "regions_stats"
    }

    /// One request per region; a failed region is reported and skipped
    async fn fetch(&self) -> Result<FetchBatch> {
        let mut batch = FetchBatch::default();

        for region in &self.regions {
            match self.client.region(region).await {
                Ok(countries) => match region_stats(region, &countries) {
                    Ok(record) => {
                        let raw = json!({ "region": region, "countries": countries });
                        batch.records.push(FetchedRecord::new(record, raw));
                    }
                    Err(message) => {
                        warn!(region = %region, error = %message, "Region statistics rejected");
                        batch
                            .errors
                            .push(SourceError::new(SOURCE_NAME, region.clone(), message));
                    }
                },
                Err(e) => {
                    warn!(region = %region, error = %e, "Region fetch failed");
                    batch
                        .errors
                        .push(SourceError::new(SOURCE_NAME, region.clone(), e.to_string()));
                }
            }
        }

        info!(
            regions = self.regions.len(),
            fetched = batch.records.len(),
            failed = batch.errors.len(),
            "Region statistics fetched"
        );
        Ok(batch)
    }
}
