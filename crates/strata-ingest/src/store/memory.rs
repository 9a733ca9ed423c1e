//! In-process warehouse
//!
//! Each table is swapped as a whole under a write lock: writes are applied to
//! a copy and the copy replaces the live table only if every write succeeded.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use strata_common::NaturalKey;
use tokio::sync::RwLock;
use tracing::debug;

use super::{FactStore, HistoricalStore, StagingStore};
use crate::entity::EntitySpec;
use crate::error::{IngestError, Result};
use crate::facts::{FactRecord, FactWriteOutcome};
use crate::reconcile::{
    plan, HistoricalRecord, PreparedBatch, ReconcilePlan, ReconcileReport, WriteOp,
};
use crate::run::RunContext;
use crate::staging::StagingRow;

type HistoricalTable = BTreeMap<NaturalKey, HistoricalRecord>;
type FactTable = BTreeMap<NaturalKey, FactRecord>;

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    staging: RwLock<HashMap<String, Arc<Vec<StagingRow>>>>,
    historical: RwLock<HashMap<String, HistoricalTable>>,
    facts: RwLock<HashMap<String, FactTable>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an already computed plan; fails without changes if any write conflicts
    pub async fn apply_plan(&self, spec: &EntitySpec, plan: &ReconcilePlan) -> Result<i64> {
        let mut tables = self.historical.write().await;
        commit_writes(&mut tables, spec, &plan.writes)
    }
}

fn commit_writes(
    tables: &mut HashMap<String, HistoricalTable>,
    spec: &EntitySpec,
    writes: &[WriteOp],
) -> Result<i64> {
    let table = spec.target_table()?;
    let mut next = tables.get(table).cloned().unwrap_or_default();

    for op in writes {
        match op {
            WriteOp::Insert(record) => {
                if next.contains_key(&record.key) {
                    return Err(IngestError::ConstraintViolation {
                        entity: spec.name.to_string(),
                        detail: format!("duplicate natural key {}", record.key),
                    });
                }
                next.insert(record.key.clone(), record.clone());
            }
            WriteOp::Update {
                previous_version,
                record,
            } => {
                let current_version = next.get(&record.key).map(|r| r.version);
                if current_version != Some(*previous_version) {
                    return Err(IngestError::ConcurrentModification {
                        entity: spec.name.to_string(),
                        key: record.key.to_string(),
                    });
                }
                next.insert(record.key.clone(), record.clone());
            }
        }
    }

    let total = next.len() as i64;
    tables.insert(table.to_string(), next);
    Ok(total)
}

#[async_trait]
impl StagingStore for MemoryWarehouse {
    async fn replace_staging(&self, table: &str, rows: &[StagingRow]) -> Result<u64> {
        let incoming = Arc::new(rows.to_vec());
        let mut tables = self.staging.write().await;
        let previous = tables.insert(table.to_string(), incoming);
        Ok(previous.map(|p| p.len() as u64).unwrap_or(0))
    }

    async fn read_staging(&self, table: &str) -> Result<Vec<StagingRow>> {
        let snapshot = self.staging.read().await.get(table).cloned();
        let mut rows = snapshot
            .map(|rows| rows.as_ref().clone())
            .unwrap_or_default();
        rows.sort_by_key(|r| r.extraction_ordinal);
        Ok(rows)
    }

    async fn count_staging(&self, table: &str) -> Result<i64> {
        Ok(self
            .staging
            .read()
            .await
            .get(table)
            .map(|r| r.len() as i64)
            .unwrap_or(0))
    }
}

#[async_trait]
impl HistoricalStore for MemoryWarehouse {
    async fn merge(
        &self,
        spec: &EntitySpec,
        batch: PreparedBatch,
        ctx: &RunContext,
    ) -> Result<ReconcileReport> {
        let table = spec.target_table()?;
        let mut tables = self.historical.write().await;

        let existing: HashMap<NaturalKey, HistoricalRecord> = match tables.get(table) {
            Some(current) => batch
                .keys()
                .filter_map(|key| current.get(key).map(|r| (key.clone(), r.clone())))
                .collect(),
            None => HashMap::new(),
        };

        let plan = plan(spec, batch, &existing, ctx);
        debug!(
            entity = spec.name,
            writes = plan.writes.len(),
            "Applying merge plan"
        );

        let total = commit_writes(&mut tables, spec, &plan.writes)?;
        Ok(plan.into_report(total))
    }

    async fn list_historical(&self, spec: &EntitySpec) -> Result<Vec<HistoricalRecord>> {
        let table = spec.target_table()?;
        Ok(self
            .historical
            .read()
            .await
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn count_historical(&self, spec: &EntitySpec) -> Result<i64> {
        let table = spec.target_table()?;
        Ok(self
            .historical
            .read()
            .await
            .get(table)
            .map(|t| t.len() as i64)
            .unwrap_or(0))
    }
}

#[async_trait]
impl FactStore for MemoryWarehouse {
    async fn upsert_facts(
        &self,
        spec: &EntitySpec,
        facts: Vec<FactRecord>,
    ) -> Result<FactWriteOutcome> {
        let table = spec.target_table()?;
        let mut tables = self.facts.write().await;
        let mut next = tables.get(table).cloned().unwrap_or_default();
        let mut outcome = FactWriteOutcome::default();

        for fact in facts {
            match next.insert(fact.key.clone(), fact) {
                None => outcome.inserted += 1,
                Some(_) => outcome.overwritten += 1,
            }
        }

        outcome.total_after = next.len() as i64;
        tables.insert(table.to_string(), next);
        Ok(outcome)
    }

    async fn list_facts(&self, spec: &EntitySpec) -> Result<Vec<FactRecord>> {
        let table = spec.target_table()?;
        Ok(self
            .facts
            .read()
            .await
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn count_facts(&self, spec: &EntitySpec) -> Result<i64> {
        let table = spec.target_table()?;
        Ok(self
            .facts
            .read()
            .await
            .get(table)
            .map(|t| t.len() as i64)
            .unwrap_or(0))
    }
}
