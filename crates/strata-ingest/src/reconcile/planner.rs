//! Pure planning: staged rows in, writes and lineage out
//!
//! Nothing here touches storage. Stores load the current rows of the batch
//! keys, call [`plan`], and apply the resulting writes in one transaction.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

use strata_common::{FieldType, FieldValue, KeyPart, NaturalKey, Record};
use tracing::debug;

use super::types::{
    HistoricalRecord, Lineage, PreparedBatch, PreparedRow, ReconcilePlan, RowError, RowErrorKind,
    WriteOp,
};
use crate::entity::EntitySpec;
use crate::run::RunContext;
use crate::staging::StagingRow;

/// Validate keys, coerce fields and collapse duplicates of a staging batch.
///
/// Rows with a missing or malformed key, or a field that does not coerce,
/// are reported and left out. Among the remaining rows of one key the row
/// with the highest extraction ordinal wins; equal ordinals go to the later
/// row in the batch.
pub fn prepare(spec: &EntitySpec, rows: &[StagingRow]) -> PreparedBatch {
    let mut batch = PreparedBatch {
        staged_rows: rows.len(),
        ..PreparedBatch::default()
    };

    for row in rows {
        match prepare_row(spec, row.extraction_ordinal, &row.fields) {
            Ok(prepared) => match batch.rows.entry(prepared.key.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(prepared);
                }
                Entry::Occupied(mut slot) => {
                    batch.duplicates_collapsed += 1;
                    if prepared.ordinal >= slot.get().ordinal {
                        slot.insert(prepared);
                    }
                }
            },
            Err(error) => batch.errors.push(error),
        }
    }

    batch
}

fn prepare_row(
    spec: &EntitySpec,
    ordinal: i64,
    fields: &Record,
) -> std::result::Result<PreparedRow, RowError> {
    let row_error = |kind, field: &str, message: String| RowError {
        ordinal,
        kind,
        field: field.to_string(),
        message,
    };

    let mut parts = Vec::with_capacity(spec.natural_key.len() + 1);
    for column in spec.identity_columns() {
        let raw = fields.get_or_null(column);
        if is_blank(raw) {
            return Err(row_error(
                RowErrorKind::MissingKey,
                column,
                "key column is NULL, absent or blank".to_string(),
            ));
        }
        if let FieldValue::Json(_) = raw {
            return Err(row_error(
                RowErrorKind::MalformedKey,
                column,
                "key column holds a JSON document".to_string(),
            ));
        }
        let ty = spec.field_type(column).unwrap_or(FieldType::Text);
        let part = raw
            .coerce(ty)
            .and_then(|value| KeyPart::from_value(&value))
            .map_err(|e| row_error(RowErrorKind::MalformedKey, column, e.to_string()))?;
        parts.push(part);
    }

    let mut coerced = Record::new();
    for field in spec.tracked_fields() {
        let value = fields
            .get_or_null(field.name)
            .coerce(field.ty)
            .map_err(|e| row_error(RowErrorKind::Coercion, field.name, e.to_string()))?;
        coerced.set(field.name, value);
    }

    Ok(PreparedRow {
        key: NaturalKey::new(parts),
        ordinal,
        fields: coerced,
    })
}

fn is_blank(value: &FieldValue) -> bool {
    match value {
        FieldValue::Null => true,
        FieldValue::Text(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Names of tracked fields whose values differ, NULL-safe
pub fn changed_fields(
    spec: &EntitySpec,
    candidate: &Record,
    current: &Record,
) -> Vec<&'static str> {
    spec.tracked_fields()
        .filter(|f| candidate.get_or_null(f.name) != current.get_or_null(f.name))
        .map(|f| f.name)
        .collect()
}

/// Decide the write and lineage of every distinct key in `batch`.
///
/// `existing` holds the current historical rows of (at least) the batch keys.
/// Keys not in the batch are never written.
pub fn plan(
    spec: &EntitySpec,
    batch: PreparedBatch,
    existing: &HashMap<NaturalKey, HistoricalRecord>,
    ctx: &RunContext,
) -> ReconcilePlan {
    let mut writes = Vec::new();
    let mut lineage = BTreeMap::new();
    let now = ctx.started_at;

    for (key, row) in batch.rows {
        let outcome = match existing.get(&key) {
            None => {
                writes.push(WriteOp::Insert(HistoricalRecord {
                    key: key.clone(),
                    fields: row.fields,
                    version: 1,
                    first_loaded_at: now,
                    last_updated_at: now,
                    source_execution_id: ctx.run_id.to_string(),
                }));
                Lineage::Inserted
            }
            Some(current) => {
                let changed = changed_fields(spec, &row.fields, &current.fields);
                if changed.is_empty() {
                    Lineage::Unchanged
                } else {
                    debug!(entity = spec.name, key = %key, changed = ?changed, "Tracked fields changed");
                    writes.push(WriteOp::Update {
                        previous_version: current.version,
                        record: HistoricalRecord {
                            key: key.clone(),
                            fields: row.fields,
                            version: current.version + 1,
                            first_loaded_at: current.first_loaded_at,
                            last_updated_at: now,
                            source_execution_id: ctx.run_id.to_string(),
                        },
                    });
                    Lineage::Updated
                }
            }
        };
        lineage.insert(key, outcome);
    }

    ReconcilePlan {
        entity: spec.name.to_string(),
        run_id: ctx.run_id.clone(),
        staged_rows: batch.staged_rows,
        writes,
        lineage,
        errors: batch.errors,
        duplicates_collapsed: batch.duplicates_collapsed,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::entity::{REGIONS_STATS, WEATHER};
    use crate::run::RunId;
    use chrono::{TimeZone, Utc};

    fn ctx(run: &str, hour: u32) -> RunContext {
        RunContext::new(
            RunId::new(run),
            Utc.with_ymd_and_hms(2026, 2, 17, hour, 0, 0).unwrap(),
        )
    }

    fn staged(ordinal: i64, record: Record) -> StagingRow {
        StagingRow::new(ordinal, &ctx("stage", 0), record)
    }

    fn region(name: &str, countries: i64) -> Record {
        Record::new()
            .with("region", name)
            .with("country_count", countries)
            .with("total_population", 1_000_i64)
    }

    #[test]
    fn test_prepare_collapses_duplicates_last_row_wins() {
        let rows = vec![
            staged(0, region("europe", 40)),
            staged(1, region("asia", 50)),
            staged(2, region("europe", 44)),
        ];
        let batch = prepare(&REGIONS_STATS, &rows);

        assert_eq!(batch.staged_rows, 3);
        assert_eq!(batch.duplicates_collapsed, 1);
        let europe = &batch.rows[&NaturalKey::text("europe")];
        assert_eq!(europe.ordinal, 2);
        assert_eq!(
            europe.fields.get("country_count"),
            Some(&FieldValue::Int(44))
        );
    }

    #[test]
    fn test_prepare_ties_go_to_later_position() {
        let rows = vec![
            staged(5, region("europe", 1)),
            staged(5, region("europe", 2)),
        ];
        let batch = prepare(&REGIONS_STATS, &rows);
        assert_eq!(
            batch.rows[&NaturalKey::text("europe")]
                .fields
                .get("country_count"),
            Some(&FieldValue::Int(2))
        );
    }

    #[test]
    fn test_prepare_invalid_duplicate_does_not_shadow_valid_row() {
        let rows = vec![
            staged(0, region("europe", 40)),
            staged(1, region("europe", 0).with("country_count", "many")),
        ];
        let batch = prepare(&REGIONS_STATS, &rows);

        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.errors[0].kind, RowErrorKind::Coercion);
        assert_eq!(batch.errors[0].field, "country_count");
        assert_eq!(batch.errors[0].ordinal, 1);
        assert_eq!(batch.duplicates_collapsed, 0);
        assert_eq!(
            batch.rows[&NaturalKey::text("europe")]
                .fields
                .get("country_count"),
            Some(&FieldValue::Int(40))
        );
    }

    #[test]
    fn test_prepare_key_errors() {
        let rows = vec![
            staged(0, Record::new().with("country_count", 1_i64)),
            staged(1, region("   ", 1)),
            staged(
                2,
                region("x", 1).with("region", serde_json::json!(["europe"])),
            ),
            staged(3, region("  oceania ", 14)),
        ];
        let batch = prepare(&REGIONS_STATS, &rows);

        let kinds: Vec<_> = batch.errors.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RowErrorKind::MissingKey,
                RowErrorKind::MissingKey,
                RowErrorKind::MalformedKey
            ]
        );
        assert!(batch.rows.contains_key(&NaturalKey::text("oceania")));
    }

    #[test]
    fn test_prepare_fact_identity_includes_timestamp() {
        let row = Record::new()
            .with("city", "Madrid")
            .with("measured_at", "2026-02-17T12:00")
            .with("temperature", 14.5);
        let missing_ts = Record::new().with("city", "Paris").with("temperature", 9.0);
        let bad_ts = Record::new()
            .with("city", "Rome")
            .with("measured_at", "noon");

        let batch = prepare(
            &WEATHER,
            &[staged(0, row), staged(1, missing_ts), staged(2, bad_ts)],
        );

        assert_eq!(batch.rows.len(), 1);
        let key = batch.rows.keys().next().unwrap();
        assert_eq!(key.to_string(), "Madrid|2026-02-17T12:00:00Z");
        assert_eq!(batch.errors[0].kind, RowErrorKind::MissingKey);
        assert_eq!(batch.errors[0].field, "measured_at");
        assert_eq!(batch.errors[1].kind, RowErrorKind::MalformedKey);
    }

    #[test]
    fn test_missing_tracked_field_reads_as_null() {
        let rows = vec![staged(0, Record::new().with("region", "asia"))];
        let batch = prepare(&REGIONS_STATS, &rows);
        let fields = &batch.rows[&NaturalKey::text("asia")].fields;
        assert_eq!(fields.get("un_member_count"), Some(&FieldValue::Null));
        assert_eq!(fields.len(), REGIONS_STATS.tracked_fields().count());
    }

    #[test]
    fn test_plan_classifies_keys() {
        let first = ctx("run-1", 1);
        let initial = plan(
            &REGIONS_STATS,
            prepare(
                &REGIONS_STATS,
                &[
                    staged(0, region("europe", 40)),
                    staged(1, region("asia", 50)),
                ],
            ),
            &HashMap::new(),
            &first,
        );
        assert_eq!(initial.count(Lineage::Inserted), 2);

        let existing: HashMap<_, _> = initial
            .writes
            .iter()
            .map(|w| (w.record().key.clone(), w.record().clone()))
            .collect();

        let second = ctx("run-2", 2);
        let next = plan(
            &REGIONS_STATS,
            prepare(
                &REGIONS_STATS,
                &[
                    staged(0, region("europe", 41)),
                    staged(1, region("asia", 50)),
                ],
            ),
            &existing,
            &second,
        );

        assert_eq!(next.lineage[&NaturalKey::text("europe")], Lineage::Updated);
        assert_eq!(next.lineage[&NaturalKey::text("asia")], Lineage::Unchanged);
        assert_eq!(next.writes.len(), 1);

        match &next.writes[0] {
            WriteOp::Update {
                previous_version,
                record,
            } => {
                assert_eq!(*previous_version, 1);
                assert_eq!(record.version, 2);
                assert_eq!(record.first_loaded_at, first.started_at);
                assert_eq!(record.last_updated_at, second.started_at);
                assert_eq!(record.source_execution_id, "run-2");
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_null_to_value_is_a_change() {
        let spec = &REGIONS_STATS;
        let with_null = Record::new().with("country_count", FieldValue::Null);
        let with_value = Record::new().with("country_count", 3_i64);
        assert_eq!(
            changed_fields(spec, &with_value, &with_null),
            vec!["country_count"]
        );
        assert!(changed_fields(spec, &with_null, &Record::new()).is_empty());
    }
}
