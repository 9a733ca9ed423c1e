//! Shared helpers for strata-ingest integration tests
//!
//! `TestPostgres` needs a Docker daemon; tests using it are `#[ignore]`d and
//! run with `cargo test -- --ignored`.

#![allow(dead_code)]

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use strata_common::Record;
use strata_ingest::config::HttpConfig;
use strata_ingest::run::{RunContext, RunId};
use strata_ingest::staging::StagingRow;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container with migrations applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&format!(
                "postgresql://postgres:postgres@{}:{}/postgres",
                host, port
            ))
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, day, hour, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// A run with a fixed id and clock
pub fn run(id: &str, day: u32) -> RunContext {
    RunContext::new(RunId::new(id), at(day, 12))
}

/// Staging rows in the given order, ordinals 0..n
pub fn staged(ctx: &RunContext, records: Vec<Record>) -> Vec<StagingRow> {
    records
        .into_iter()
        .enumerate()
        .map(|(i, record)| StagingRow::new(i as i64, ctx, record))
        .collect()
}

pub fn country(iso3: &str, name: &str, population: i64) -> Record {
    Record::new()
        .with("code_iso3", iso3)
        .with("code_iso2", &iso3[..2])
        .with("name_common", name)
        .with("population", population)
}

pub fn region(name: &str, countries: i64, population: i64) -> Record {
    Record::new()
        .with("region", name)
        .with("country_count", countries)
        .with("total_population", population)
}

pub fn weather(city: &str, measured_at: &str, temperature: f64) -> Record {
    Record::new()
        .with("city", city)
        .with("measured_at", measured_at)
        .with("country", "ES")
        .with("temperature", temperature)
}

/// HTTP settings for mock servers: three attempts, 1 ms base backoff
pub fn fast_http() -> HttpConfig {
    HttpConfig {
        timeout_secs: 5,
        max_retries: 3,
        retry_delay_ms: 1,
        ..HttpConfig::default()
    }
}
