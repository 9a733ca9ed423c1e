//! Fact appender: upsert time-series rows keyed on (natural key, timestamp)

use chrono::{DateTime, Utc};
use serde::Serialize;
use strata_common::{NaturalKey, Record};
use tracing::{info, instrument};

use crate::entity::{EntitySpec, LoadStrategy};
use crate::error::{IngestError, Result};
use crate::reconcile::{log_row_errors, prepare, PreparedBatch, RowError};
use crate::run::{RunContext, RunId};
use crate::staging::StagingRow;
use crate::store::FactStore;

/// One stored fact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactRecord {
    /// Natural key parts followed by the timestamp
    pub key: NaturalKey,
    /// Non-identity fields
    pub fields: Record,
    pub source_execution_id: String,
    pub loaded_at: DateTime<Utc>,
}

/// What a fact upsert did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactWriteOutcome {
    pub inserted: usize,
    pub overwritten: usize,
    pub total_after: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FactReport {
    pub entity: String,
    pub run_id: RunId,
    pub staged_rows: usize,
    pub inserted: usize,
    pub overwritten: usize,
    pub failed: usize,
    pub duplicates_collapsed: usize,
    pub errors: Vec<RowError>,
    /// Fact row count after the run
    pub total_after: i64,
}

/// Turn a prepared batch into facts stamped with the run's provenance
pub fn build_facts(batch: &PreparedBatch, ctx: &RunContext) -> Vec<FactRecord> {
    batch
        .rows
        .values()
        .map(|row| FactRecord {
            key: row.key.clone(),
            fields: row.fields.clone(),
            source_execution_id: ctx.run_id.to_string(),
            loaded_at: ctx.started_at,
        })
        .collect()
}

/// Upsert a staging batch into the entity's fact table.
///
/// A conflicting (key, timestamp) overwrites every non-key field and the
/// provenance columns. The whole batch is written in one transaction.
#[instrument(skip_all, fields(entity = spec.name, run_id = %ctx.run_id))]
pub async fn append<S: FactStore + ?Sized>(
    store: &S,
    spec: &EntitySpec,
    batch: &[StagingRow],
    ctx: &RunContext,
) -> Result<FactReport> {
    if spec.strategy != LoadStrategy::Append {
        return Err(IngestError::config(format!(
            "entity '{}' is not a fact entity",
            spec.name
        )));
    }

    let prepared = prepare(spec, batch);
    log_row_errors(spec, &prepared.errors);

    let facts = build_facts(&prepared, ctx);
    let outcome = store.upsert_facts(spec, facts).await?;

    info!(
        staged = prepared.staged_rows,
        inserted = outcome.inserted,
        overwritten = outcome.overwritten,
        failed = prepared.errors.len(),
        duplicates = prepared.duplicates_collapsed,
        total = outcome.total_after,
        "Facts appended"
    );

    Ok(FactReport {
        entity: spec.name.to_string(),
        run_id: ctx.run_id.clone(),
        staged_rows: prepared.staged_rows,
        inserted: outcome.inserted,
        overwritten: outcome.overwritten,
        failed: prepared.errors.len(),
        duplicates_collapsed: prepared.duplicates_collapsed,
        errors: prepared.errors,
        total_after: outcome.total_after,
    })
}
