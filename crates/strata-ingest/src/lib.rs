//! Strata Ingest Library
//!
//! Loads external reference and time-series data into a PostgreSQL
//! warehouse in two layers: staging tables (`sa_*`) that hold exactly the
//! last fetched batch, and historical tables (`th_*`) that accumulate it.
//!
//! # Load strategies
//!
//! - **Staging**: atomic full replace per run ([`staging`])
//! - **Merge**: versioned upsert on a natural key ([`reconcile`])
//! - **Append**: upsert of time-series facts on (key, timestamp) ([`facts`])
//!
//! # Data Sources
//!
//! - **REST Countries**: country reference data and per-region aggregates
//! - **Open-Meteo**: current weather for a fixed set of capitals
//! - **AQICN**: air quality for every stored capital
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use strata_ingest::config::IngestConfig;
//! use strata_ingest::pipeline::{Pipeline, PipelineKind, Sources};
//! use strata_ingest::run::RunContext;
//! use strata_ingest::store::PgWarehouse;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let pool = strata_ingest::db::create_pool(&config.db).await?;
//!     let warehouse = Arc::new(PgWarehouse::new(pool, &config.schema)?);
//!     let pipeline = Pipeline::new(warehouse, Sources::from_config(&config.sources, &config.http)?);
//!
//!     let summary = pipeline.run(PipelineKind::Countries, &RunContext::start(None)).await;
//!     assert!(summary.is_success());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod facts;
pub mod pipeline;
pub mod reconcile;
pub mod run;
pub mod sources;
pub mod staging;
pub mod store;

pub use error::{IngestError, Result};
