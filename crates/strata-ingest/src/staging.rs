//! Staging loader: full replace of a staging table per run

use chrono::{DateTime, Utc};
use serde::Serialize;
use strata_common::checksum::payload_sha256;
use strata_common::Record;
use tracing::{info, instrument};

use crate::entity::EntitySpec;
use crate::error::Result;
use crate::run::{RunContext, RunId};
use crate::sources::FetchedRecord;
use crate::store::StagingStore;

/// One row of a staging table: source fields as received plus run tagging
#[derive(Debug, Clone, PartialEq)]
pub struct StagingRow {
    /// Position in the fetched batch, 0-based
    pub extraction_ordinal: i64,
    pub run_id: RunId,
    pub extracted_at: DateTime<Utc>,
    pub fields: Record,
    pub raw_payload: serde_json::Value,
    pub payload_sha256: String,
}

impl StagingRow {
    /// Row whose raw payload is the record itself
    pub fn new(extraction_ordinal: i64, ctx: &RunContext, fields: Record) -> Self {
        let raw_payload = fields.to_json();
        Self::with_payload(
            extraction_ordinal,
            &ctx.run_id,
            ctx.started_at,
            fields,
            raw_payload,
        )
    }

    pub fn with_payload(
        extraction_ordinal: i64,
        run_id: &RunId,
        extracted_at: DateTime<Utc>,
        fields: Record,
        raw_payload: serde_json::Value,
    ) -> Self {
        Self {
            extraction_ordinal,
            run_id: run_id.clone(),
            extracted_at,
            payload_sha256: payload_sha256(&raw_payload),
            fields,
            raw_payload,
        }
    }
}

/// Result of replacing one staging table
#[derive(Debug, Clone, Serialize)]
pub struct StagingReport {
    pub entity: String,
    pub table: String,
    pub run_id: RunId,
    pub extracted_at: DateTime<Utc>,
    pub rows_loaded: usize,
    /// Rows of the previous run that were discarded
    pub rows_replaced: u64,
}

/// Tag fetched records with the run and extraction order
pub fn build_batch(
    records: Vec<FetchedRecord>,
    ctx: &RunContext,
    extracted_at: DateTime<Utc>,
) -> Vec<StagingRow> {
    records
        .into_iter()
        .enumerate()
        .map(|(ordinal, fetched)| {
            StagingRow::with_payload(
                ordinal as i64,
                &ctx.run_id,
                extracted_at,
                fetched.record,
                fetched.raw_payload,
            )
        })
        .collect()
}

/// Replace the entity's staging table with `records`.
///
/// Idempotent: the table holds exactly this batch afterwards, whatever it
/// held before. An empty batch leaves an empty table.
#[instrument(skip_all, fields(entity = spec.name, run_id = %ctx.run_id))]
pub async fn load<S: StagingStore + ?Sized>(
    store: &S,
    spec: &EntitySpec,
    records: Vec<FetchedRecord>,
    ctx: &RunContext,
) -> Result<StagingReport> {
    let table = spec.staging_table()?;
    let extracted_at = Utc::now();
    let rows = build_batch(records, ctx, extracted_at);

    let rows_replaced = store.replace_staging(table, &rows).await?;

    info!(
        table,
        rows_loaded = rows.len(),
        rows_replaced,
        "Staging table replaced"
    );

    Ok(StagingReport {
        entity: spec.name.to_string(),
        table: table.to_string(),
        run_id: ctx.run_id.clone(),
        extracted_at,
        rows_loaded: rows.len(),
        rows_replaced,
    })
}

/// Current staging content of an entity, in extraction order
pub async fn read_staging<S: StagingStore + ?Sized>(
    store: &S,
    spec: &EntitySpec,
) -> Result<Vec<StagingRow>> {
    store.read_staging(spec.staging_table()?).await
}
