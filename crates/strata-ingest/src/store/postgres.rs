//! PostgreSQL warehouse
//!
//! One transaction per entity run. Historical merges lock the affected keys
//! with `SELECT ... FOR UPDATE`, insert new keys with a plain `INSERT` (a
//! concurrent writer surfaces as a unique violation) and guard updates with
//! the version they were planned against.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row};
use strata_common::{FieldType, FieldValue, KeyPart, NaturalKey, Record, StrataError};
use tracing::{debug, info};

use super::sql::SqlBuilder;
use super::{FactStore, HistoricalStore, StagingStore};
use crate::entity::{EntitySpec, FieldSpec};
use crate::error::{IngestError, Result};
use crate::facts::{FactRecord, FactWriteOutcome};
use crate::reconcile::{plan, HistoricalRecord, PreparedBatch, ReconcileReport, WriteOp};
use crate::run::{RunContext, RunId};
use crate::staging::StagingRow;

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Keys locked per `SELECT ... FOR UPDATE` statement
const LOCK_CHUNK: usize = 500;

#[derive(Debug, Clone)]
pub struct PgWarehouse {
    pool: PgPool,
    sql: SqlBuilder,
}

impl PgWarehouse {
    pub fn new(pool: PgPool, schema: &str) -> Result<Self> {
        Ok(Self {
            pool,
            sql: SqlBuilder::new(schema)?,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn schema(&self) -> &str {
        self.sql.schema()
    }

    async fn count(&self, table: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&self.sql.count(table)?)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Lock and load the current rows of `keys`
    async fn lock_existing(
        &self,
        conn: &mut PgConnection,
        spec: &EntitySpec,
        keys: &[NaturalKey],
    ) -> Result<HashMap<NaturalKey, HistoricalRecord>> {
        let mut existing = HashMap::with_capacity(keys.len());
        let key_specs = key_fields(spec, spec.natural_key)?;

        for chunk in keys.chunks(LOCK_CHUNK) {
            let sql = self.sql.historical_select_for_update(spec, chunk.len())?;
            let mut query = sqlx::query(&sql);
            for key in chunk {
                query = bind_key(query, key, &key_specs)?;
            }
            for row in query.fetch_all(&mut *conn).await? {
                let record = decode_historical(&row, spec)?;
                existing.insert(record.key.clone(), record);
            }
        }

        Ok(existing)
    }

    async fn apply_writes(
        &self,
        conn: &mut PgConnection,
        spec: &EntitySpec,
        writes: &[WriteOp],
    ) -> Result<()> {
        let insert_sql = self.sql.historical_insert(spec)?;
        let update_sql = self.sql.historical_update(spec)?;
        let key_specs = key_fields(spec, spec.natural_key)?;

        for op in writes {
            match op {
                WriteOp::Insert(record) => {
                    let mut query = bind_key(sqlx::query(&insert_sql), &record.key, &key_specs)?;
                    query = bind_tracked(query, spec, &record.fields)?;
                    query
                        .bind(record.version)
                        .bind(record.first_loaded_at)
                        .bind(record.last_updated_at)
                        .bind(record.source_execution_id.clone())
                        .execute(&mut *conn)
                        .await
                        .map_err(|e| write_error(e, spec, &record.key))?;
                }
                WriteOp::Update {
                    previous_version,
                    record,
                } => {
                    let query = bind_tracked(sqlx::query(&update_sql), spec, &record.fields)?
                        .bind(record.version)
                        .bind(record.last_updated_at)
                        .bind(record.source_execution_id.clone());
                    let result = bind_key(query, &record.key, &key_specs)?
                        .bind(*previous_version)
                        .execute(&mut *conn)
                        .await
                        .map_err(|e| write_error(e, spec, &record.key))?;

                    if result.rows_affected() != 1 {
                        return Err(IngestError::ConcurrentModification {
                            entity: spec.name.to_string(),
                            key: record.key.to_string(),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// Binding and decoding
// ============================================================================

fn key_fields(spec: &EntitySpec, columns: &[&'static str]) -> Result<Vec<FieldSpec>> {
    columns
        .iter()
        .map(|c| {
            spec.field(c).copied().ok_or_else(|| {
                IngestError::config(format!("entity '{}' has no field '{}'", spec.name, c))
            })
        })
        .collect()
}

/// Bind a value as its column type, NULL included
fn bind_value<'q>(query: PgQuery<'q>, value: &FieldValue, ty: FieldType) -> Result<PgQuery<'q>> {
    let value = value.coerce(ty)?;
    let query = match (ty, value) {
        (FieldType::Text, FieldValue::Null) => query.bind(None::<String>),
        (FieldType::BigInt, FieldValue::Null) => query.bind(None::<i64>),
        (FieldType::Double, FieldValue::Null) => query.bind(None::<f64>),
        (FieldType::Boolean, FieldValue::Null) => query.bind(None::<bool>),
        (FieldType::Json, FieldValue::Null) => query.bind(None::<serde_json::Value>),
        (FieldType::Timestamp, FieldValue::Null) => query.bind(None::<DateTime<Utc>>),
        (FieldType::Text, FieldValue::Text(s)) => query.bind(s),
        (FieldType::BigInt, FieldValue::Int(i)) => query.bind(i),
        (FieldType::Double, FieldValue::Float(f)) => query.bind(f),
        (FieldType::Boolean, FieldValue::Bool(b)) => query.bind(b),
        (FieldType::Json, FieldValue::Json(j)) => query.bind(j),
        (FieldType::Timestamp, FieldValue::Timestamp(t)) => query.bind(t),
        (ty, other) => {
            return Err(
                StrataError::coercion(ty.to_string(), other.type_name(), "cannot bind").into(),
            )
        }
    };
    Ok(query)
}

fn bind_key<'q>(
    mut query: PgQuery<'q>,
    key: &NaturalKey,
    fields: &[FieldSpec],
) -> Result<PgQuery<'q>> {
    for (part, field) in key.parts().iter().zip(fields) {
        query = bind_value(query, &part.to_value(), field.ty)?;
    }
    Ok(query)
}

fn bind_tracked<'q>(
    mut query: PgQuery<'q>,
    spec: &EntitySpec,
    fields: &Record,
) -> Result<PgQuery<'q>> {
    for field in spec.tracked_fields() {
        query = bind_value(query, fields.get_or_null(field.name), field.ty)?;
    }
    Ok(query)
}

fn read_value(row: &PgRow, column: &str, ty: FieldType) -> Result<FieldValue> {
    let value = match ty {
        FieldType::Text => row.try_get::<Option<String>, _>(column)?.into(),
        FieldType::BigInt => row.try_get::<Option<i64>, _>(column)?.into(),
        FieldType::Double => row.try_get::<Option<f64>, _>(column)?.into(),
        FieldType::Boolean => row.try_get::<Option<bool>, _>(column)?.into(),
        FieldType::Json => row
            .try_get::<Option<serde_json::Value>, _>(column)?
            .map(FieldValue::Json)
            .unwrap_or(FieldValue::Null),
        FieldType::Timestamp => row.try_get::<Option<DateTime<Utc>>, _>(column)?.into(),
    };
    Ok(value)
}

fn read_key(row: &PgRow, spec: &EntitySpec, columns: &[&'static str]) -> Result<NaturalKey> {
    let mut parts = Vec::with_capacity(columns.len());
    for field in key_fields(spec, columns)? {
        let value = read_value(row, field.name, field.ty)?;
        parts.push(KeyPart::from_value(&value)?);
    }
    Ok(NaturalKey::new(parts))
}

fn read_tracked(row: &PgRow, spec: &EntitySpec) -> Result<Record> {
    let mut fields = Record::new();
    for field in spec.tracked_fields() {
        fields.set(field.name, read_value(row, field.name, field.ty)?);
    }
    Ok(fields)
}

fn decode_historical(row: &PgRow, spec: &EntitySpec) -> Result<HistoricalRecord> {
    Ok(HistoricalRecord {
        key: read_key(row, spec, spec.natural_key)?,
        fields: read_tracked(row, spec)?,
        version: row.try_get("version")?,
        first_loaded_at: row.try_get("first_loaded_at")?,
        last_updated_at: row.try_get("last_updated_at")?,
        source_execution_id: row.try_get("source_execution_id")?,
    })
}

fn decode_fact(row: &PgRow, spec: &EntitySpec) -> Result<FactRecord> {
    Ok(FactRecord {
        key: read_key(row, spec, &spec.identity_columns())?,
        fields: read_tracked(row, spec)?,
        source_execution_id: row.try_get("source_execution_id")?,
        loaded_at: row.try_get("loaded_at")?,
    })
}

fn decode_staging(row: &PgRow) -> Result<StagingRow> {
    let fields: serde_json::Value = row.try_get("fields")?;
    let execution_id: String = row.try_get("execution_id")?;
    Ok(StagingRow {
        extraction_ordinal: row.try_get("extraction_ordinal")?,
        run_id: RunId::new(execution_id),
        extracted_at: row.try_get("extracted_at")?,
        fields: Record::from_json(&fields)?,
        raw_payload: row.try_get("raw_payload")?,
        payload_sha256: row.try_get("payload_sha256")?,
    })
}

/// Map unique violations to the fatal constraint error
fn write_error(error: sqlx::Error, spec: &EntitySpec, key: &NaturalKey) -> IngestError {
    match &error {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            IngestError::ConstraintViolation {
                entity: spec.name.to_string(),
                detail: format!("natural key {} already exists: {}", key, db_err.message()),
            }
        }
        _ => IngestError::Sqlx(error),
    }
}

// ============================================================================
// Store implementations
// ============================================================================

#[async_trait]
impl StagingStore for PgWarehouse {
    async fn replace_staging(&self, table: &str, rows: &[StagingRow]) -> Result<u64> {
        let swap = self.sql.staging_swap(table)?;
        let mut tx = self.pool.begin().await?;

        for statement in &swap.prepare {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        for row in rows {
            sqlx::query(&swap.insert)
                .bind(row.extraction_ordinal)
                .bind(row.run_id.as_str())
                .bind(row.extracted_at)
                .bind(row.fields.to_json())
                .bind(row.raw_payload.clone())
                .bind(row.payload_sha256.as_str())
                .execute(&mut *tx)
                .await?;
        }

        let previous: i64 = sqlx::query_scalar(&swap.count_previous)
            .fetch_one(&mut *tx)
            .await?;

        for statement in &swap.swap {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        tx.commit().await?;

        debug!(table, rows = rows.len(), previous, "Staging swap committed");
        Ok(previous.max(0) as u64)
    }

    async fn read_staging(&self, table: &str) -> Result<Vec<StagingRow>> {
        let sql = self.sql.staging_select(table)?;
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(decode_staging).collect()
    }

    async fn count_staging(&self, table: &str) -> Result<i64> {
        self.count(table).await
    }
}

#[async_trait]
impl HistoricalStore for PgWarehouse {
    async fn merge(
        &self,
        spec: &EntitySpec,
        batch: PreparedBatch,
        ctx: &RunContext,
    ) -> Result<ReconcileReport> {
        let table = spec.target_table()?;
        let keys: Vec<NaturalKey> = batch.keys().cloned().collect();

        let mut tx = self.pool.begin().await?;

        let existing = self.lock_existing(&mut tx, spec, &keys).await?;
        let plan = plan(spec, batch, &existing, ctx);
        self.apply_writes(&mut tx, spec, &plan.writes).await?;

        let total: i64 = sqlx::query_scalar(&self.sql.count(table)?)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            entity = spec.name,
            locked = existing.len(),
            writes = plan.writes.len(),
            "Merge transaction committed"
        );

        Ok(plan.into_report(total))
    }

    async fn list_historical(&self, spec: &EntitySpec) -> Result<Vec<HistoricalRecord>> {
        let sql = self.sql.historical_select_all(spec)?;
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| decode_historical(row, spec))
            .collect()
    }

    async fn count_historical(&self, spec: &EntitySpec) -> Result<i64> {
        self.count(spec.target_table()?).await
    }
}

#[async_trait]
impl FactStore for PgWarehouse {
    async fn upsert_facts(
        &self,
        spec: &EntitySpec,
        facts: Vec<FactRecord>,
    ) -> Result<FactWriteOutcome> {
        let table = spec.target_table()?;
        let sql = self.sql.fact_upsert(spec)?;
        let identity = key_fields(spec, &spec.identity_columns())?;
        let mut outcome = FactWriteOutcome::default();

        let mut tx = self.pool.begin().await?;

        for fact in &facts {
            let query = bind_key(sqlx::query(&sql), &fact.key, &identity)?;
            let row = bind_tracked(query, spec, &fact.fields)?
                .bind(fact.source_execution_id.clone())
                .bind(fact.loaded_at)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| write_error(e, spec, &fact.key))?;

            if row.try_get::<bool, _>("inserted")? {
                outcome.inserted += 1;
            } else {
                outcome.overwritten += 1;
            }
        }

        outcome.total_after = sqlx::query_scalar(&self.sql.count(table)?)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn list_facts(&self, spec: &EntitySpec) -> Result<Vec<FactRecord>> {
        let sql = self.sql.fact_select_all(spec)?;
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(|row| decode_fact(row, spec)).collect()
    }

    async fn count_facts(&self, spec: &EntitySpec) -> Result<i64> {
        self.count(spec.target_table()?).await
    }
}
