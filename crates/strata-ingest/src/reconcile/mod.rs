//! Historical merge
//!
//! Reconciles the current staging batch of an entity against its historical
//! table: one row per natural key, versioned, never deleted.
//!
//! The work is split in two. [`planner`] is pure: it validates and coerces
//! the staged rows, collapses in-batch duplicates (last row by extraction
//! order wins), and decides per key whether to insert, update or leave it.
//! The store then applies that plan inside a single transaction, guarding
//! every update with the version it was planned against.

pub mod planner;
pub mod types;

use tracing::{error, info, instrument};

pub use planner::{changed_fields, plan, prepare};
pub use types::{
    HistoricalRecord, Lineage, PreparedBatch, PreparedRow, ReconcilePlan, ReconcileReport,
    RowError, RowErrorKind, WriteOp,
};

use crate::entity::{EntitySpec, LoadStrategy};
use crate::error::{IngestError, Result};
use crate::run::RunContext;
use crate::staging::StagingRow;
use crate::store::HistoricalStore;

const SAMPLE_ERRORS: usize = 5;

/// Merge a staging batch into the entity's historical table
#[instrument(skip_all, fields(entity = spec.name, run_id = %ctx.run_id))]
pub async fn reconcile<S: HistoricalStore + ?Sized>(
    store: &S,
    spec: &EntitySpec,
    batch: &[StagingRow],
    ctx: &RunContext,
) -> Result<ReconcileReport> {
    if spec.strategy != LoadStrategy::Merge {
        return Err(IngestError::config(format!(
            "entity '{}' is not a historical entity",
            spec.name
        )));
    }

    let prepared = prepare(spec, batch);
    log_row_errors(spec, &prepared.errors);

    let report = store.merge(spec, prepared, ctx).await?;

    info!(
        staged = report.staged_rows,
        distinct = report.distinct_keys,
        inserted = report.inserted,
        updated = report.updated,
        unchanged = report.unchanged,
        failed = report.failed,
        duplicates = report.duplicates_collapsed,
        total = report.total_after,
        "Historical merge committed"
    );

    Ok(report)
}

/// Log a summary of skipped rows with a few samples
pub(crate) fn log_row_errors(spec: &EntitySpec, errors: &[RowError]) {
    if errors.is_empty() {
        return;
    }

    error!(
        entity = spec.name,
        failed = errors.len(),
        "Rows skipped during preparation"
    );

    for e in errors.iter().take(SAMPLE_ERRORS) {
        error!(
            entity = spec.name,
            ordinal = e.ordinal,
            kind = ?e.kind,
            field = %e.field,
            error = %e.message,
            "Sample row error"
        );
    }

    if errors.len() > SAMPLE_ERRORS {
        error!(
            additional_errors = errors.len() - SAMPLE_ERRORS,
            "Additional row errors not shown"
        );
    }
}
