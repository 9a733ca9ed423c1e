//! Data types of the reconciliation step

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strata_common::{NaturalKey, Record};

use crate::run::RunId;

/// Why a staged row was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorKind {
    MissingKey,
    MalformedKey,
    Coercion,
}

/// A staged row excluded from the run, with the reason
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    /// Extraction ordinal of the offending staging row
    pub ordinal: i64,
    pub kind: RowErrorKind,
    pub field: String,
    pub message: String,
}

/// Outcome for one distinct natural key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Lineage {
    Inserted,
    Updated,
    Unchanged,
}

/// A validated staged row: natural key plus fields coerced to their declared types
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRow {
    pub key: NaturalKey,
    pub ordinal: i64,
    /// Non-identity fields only; absent fields read as NULL
    pub fields: Record,
}

/// A staging batch after key extraction, coercion and duplicate collapsing
#[derive(Debug, Clone, Default)]
pub struct PreparedBatch {
    pub staged_rows: usize,
    /// One surviving row per distinct key
    pub rows: BTreeMap<NaturalKey, PreparedRow>,
    pub errors: Vec<RowError>,
    pub duplicates_collapsed: usize,
}

impl PreparedBatch {
    pub fn keys(&self) -> impl Iterator<Item = &NaturalKey> {
        self.rows.keys()
    }
}

/// Current state of one natural key in a historical table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalRecord {
    pub key: NaturalKey,
    /// Tracked fields only
    pub fields: Record,
    pub version: i32,
    pub first_loaded_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub source_execution_id: String,
}

/// A single write decided by the planner
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert(HistoricalRecord),
    /// Replace the stored row, provided it is still at `previous_version`
    Update {
        previous_version: i32,
        record: HistoricalRecord,
    },
}

impl WriteOp {
    pub fn record(&self) -> &HistoricalRecord {
        match self {
            WriteOp::Insert(record) => record,
            WriteOp::Update { record, .. } => record,
        }
    }
}

/// Everything a merge will do, computed before any write happens
#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    pub entity: String,
    pub run_id: RunId,
    pub staged_rows: usize,
    pub writes: Vec<WriteOp>,
    pub lineage: BTreeMap<NaturalKey, Lineage>,
    pub errors: Vec<RowError>,
    pub duplicates_collapsed: usize,
}

impl ReconcilePlan {
    pub fn count(&self, lineage: Lineage) -> usize {
        self.lineage.values().filter(|l| **l == lineage).count()
    }

    /// Finalise into a report once the writes are committed
    pub fn into_report(self, total_after: i64) -> ReconcileReport {
        ReconcileReport {
            inserted: self.count(Lineage::Inserted),
            updated: self.count(Lineage::Updated),
            unchanged: self.count(Lineage::Unchanged),
            distinct_keys: self.lineage.len(),
            failed: self.errors.len(),
            entity: self.entity,
            run_id: self.run_id,
            staged_rows: self.staged_rows,
            duplicates_collapsed: self.duplicates_collapsed,
            lineage: self.lineage,
            errors: self.errors,
            total_after,
        }
    }
}

/// Result of merging one staging batch into a historical table
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub entity: String,
    pub run_id: RunId,
    pub staged_rows: usize,
    pub distinct_keys: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub duplicates_collapsed: usize,
    pub lineage: BTreeMap<NaturalKey, Lineage>,
    pub errors: Vec<RowError>,
    /// Historical row count after the run
    pub total_after: i64,
}
