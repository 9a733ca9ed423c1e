//! Storage backends for staging, historical and fact tables
//!
//! Pipelines only see the traits below. [`PgWarehouse`] is the production
//! backend; [`MemoryWarehouse`] keeps the same transactional semantics in
//! process and backs tests and dry runs.

pub mod memory;
pub mod postgres;
pub mod sql;

use async_trait::async_trait;

pub use memory::MemoryWarehouse;
pub use postgres::PgWarehouse;

use crate::entity::EntitySpec;
use crate::error::Result;
use crate::facts::{FactRecord, FactWriteOutcome};
use crate::reconcile::{HistoricalRecord, PreparedBatch, ReconcileReport};
use crate::run::RunContext;
use crate::staging::StagingRow;

#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Atomically replace the content of `table` with `rows`.
    ///
    /// Returns the number of rows that were replaced.
    async fn replace_staging(&self, table: &str, rows: &[StagingRow]) -> Result<u64>;

    /// All rows of `table` in extraction order
    async fn read_staging(&self, table: &str) -> Result<Vec<StagingRow>>;

    async fn count_staging(&self, table: &str) -> Result<i64>;
}

#[async_trait]
pub trait HistoricalStore: Send + Sync {
    /// Plan and apply a merge of `batch` in one transaction.
    ///
    /// The current rows of the batch keys are locked, the plan is computed
    /// against them and every write is applied, or nothing is.
    async fn merge(
        &self,
        spec: &EntitySpec,
        batch: PreparedBatch,
        ctx: &RunContext,
    ) -> Result<ReconcileReport>;

    /// Every historical row, ordered by natural key
    async fn list_historical(&self, spec: &EntitySpec) -> Result<Vec<HistoricalRecord>>;

    async fn count_historical(&self, spec: &EntitySpec) -> Result<i64>;
}

#[async_trait]
pub trait FactStore: Send + Sync {
    /// Upsert `facts` on (key, timestamp) in one transaction
    async fn upsert_facts(
        &self,
        spec: &EntitySpec,
        facts: Vec<FactRecord>,
    ) -> Result<FactWriteOutcome>;

    /// Every fact row, ordered by key and timestamp
    async fn list_facts(&self, spec: &EntitySpec) -> Result<Vec<FactRecord>>;

    async fn count_facts(&self, spec: &EntitySpec) -> Result<i64>;
}

/// A complete backend
pub trait Warehouse: StagingStore + HistoricalStore + FactStore {}

impl<T: StagingStore + HistoricalStore + FactStore> Warehouse for T {}
