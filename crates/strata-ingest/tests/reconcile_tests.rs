//! Historical merge behaviour against the in-process warehouse

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::collections::{BTreeMap, HashMap};

use common::{country, region, run, staged};
use proptest::prelude::*;
use strata_common::{FieldValue, NaturalKey, Record};
use strata_ingest::entity::{COUNTRIES, REGIONS_STATS, WEATHER};
use strata_ingest::reconcile::{reconcile, Lineage, RowErrorKind};
use strata_ingest::store::{HistoricalStore, MemoryWarehouse};

fn lineage_of(report: &strata_ingest::reconcile::ReconcileReport, key: &str) -> Lineage {
    report.lineage[&NaturalKey::text(key)]
}

#[tokio::test]
async fn test_spain_population_lifecycle() {
    let store = MemoryWarehouse::new();

    let first = run("run-1", 1);
    let report = reconcile(
        &store,
        &COUNTRIES,
        &staged(&first, vec![country("ESP", "Spain", 47_000_000)]),
        &first,
    )
    .await
    .unwrap();
    assert_eq!(lineage_of(&report, "ESP"), Lineage::Inserted);
    assert_eq!(report.inserted, 1);

    let stored = store.list_historical(&COUNTRIES).await.unwrap();
    assert_eq!(stored[0].version, 1);
    assert_eq!(stored[0].first_loaded_at, first.started_at);

    // Same data again: nothing moves
    let second = run("run-2", 2);
    let report = reconcile(
        &store,
        &COUNTRIES,
        &staged(&second, vec![country("ESP", "Spain", 47_000_000)]),
        &second,
    )
    .await
    .unwrap();
    assert_eq!(lineage_of(&report, "ESP"), Lineage::Unchanged);
    let stored = store.list_historical(&COUNTRIES).await.unwrap();
    assert_eq!(stored[0].version, 1);
    assert_eq!(stored[0].last_updated_at, first.started_at);
    assert_eq!(stored[0].source_execution_id, "run-1");

    let third = run("run-3", 3);
    let report = reconcile(
        &store,
        &COUNTRIES,
        &staged(&third, vec![country("ESP", "Spain", 48_000_000)]),
        &third,
    )
    .await
    .unwrap();
    assert_eq!(lineage_of(&report, "ESP"), Lineage::Updated);
    assert_eq!(report.updated, 1);

    let stored = store.list_historical(&COUNTRIES).await.unwrap();
    assert_eq!(stored[0].version, 2);
    assert_eq!(stored[0].first_loaded_at, first.started_at);
    assert_eq!(stored[0].last_updated_at, third.started_at);
    assert_eq!(stored[0].source_execution_id, "run-3");
    assert_eq!(
        stored[0].fields.get("population"),
        Some(&FieldValue::Int(48_000_000))
    );
}

#[tokio::test]
async fn test_keys_absent_from_batch_are_kept() {
    let store = MemoryWarehouse::new();
    let first = run("run-1", 1);
    reconcile(
        &store,
        &REGIONS_STATS,
        &staged(
            &first,
            vec![region("europe", 53, 740), region("asia", 50, 4600)],
        ),
        &first,
    )
    .await
    .unwrap();

    let second = run("run-2", 2);
    let report = reconcile(
        &store,
        &REGIONS_STATS,
        &staged(&second, vec![region("asia", 51, 4700)]),
        &second,
    )
    .await
    .unwrap();
    assert_eq!(report.total_after, 2);
    assert!(!report.lineage.contains_key(&NaturalKey::text("europe")));

    let stored: HashMap<_, _> = store
        .list_historical(&REGIONS_STATS)
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.key.to_string(), r))
        .collect();
    assert_eq!(stored["europe"].version, 1);
    assert_eq!(
        stored["europe"].fields.get("country_count"),
        Some(&FieldValue::Int(53))
    );
    assert_eq!(stored["asia"].version, 2);
}

#[tokio::test]
async fn test_last_row_wins_within_batch() {
    let store = MemoryWarehouse::new();
    let ctx = run("run-1", 1);
    let rows = staged(
        &ctx,
        vec![
            region("europe", 1, 1),
            region("asia", 50, 4600),
            region(" europe ", 3, 3),
        ],
    );

    let report = reconcile(&store, &REGIONS_STATS, &rows, &ctx)
        .await
        .unwrap();

    assert_eq!(report.staged_rows, 3);
    assert_eq!(report.distinct_keys, 2);
    assert_eq!(report.duplicates_collapsed, 1);
    let europe = store
        .list_historical(&REGIONS_STATS)
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.key == NaturalKey::text("europe"))
        .unwrap();
    assert_eq!(
        europe.fields.get("country_count"),
        Some(&FieldValue::Int(3))
    );
}

#[tokio::test]
async fn test_bad_rows_are_isolated() {
    let store = MemoryWarehouse::new();
    let ctx = run("run-1", 1);
    let rows = staged(
        &ctx,
        vec![
            Record::new().with("name_common", "Nowhere"),
            country("   ", "Blank", 1),
            Record::new().with("code_iso3", FieldValue::Json(serde_json::json!(["ESP"]))),
            country("FRA", "France", 68_000_000).with("population", "lots"),
            country("PRT", "Portugal", 10_300_000),
        ],
    );

    let report = reconcile(&store, &COUNTRIES, &rows, &ctx).await.unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.failed, 4);
    let kinds: Vec<_> = report.errors.iter().map(|e| (e.ordinal, e.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            (0, RowErrorKind::MissingKey),
            (1, RowErrorKind::MissingKey),
            (2, RowErrorKind::MalformedKey),
            (3, RowErrorKind::Coercion),
        ]
    );
    assert_eq!(report.errors[3].field, "population");
    assert_eq!(store.count_historical(&COUNTRIES).await.unwrap(), 1);
}

#[tokio::test]
async fn test_reconcile_rejects_fact_entities() {
    let store = MemoryWarehouse::new();
    let ctx = run("run-1", 1);
    assert!(reconcile(&store, &WEATHER, &[], &ctx).await.is_err());
}

#[tokio::test]
async fn test_empty_batch_is_a_no_op() {
    let store = MemoryWarehouse::new();
    let ctx = run("run-1", 1);
    let report = reconcile(&store, &REGIONS_STATS, &[], &ctx).await.unwrap();
    assert_eq!(report.distinct_keys, 0);
    assert_eq!(report.total_after, 0);
}

// ============================================================================
// Properties
// ============================================================================

const REGIONS: [&str; 4] = ["africa", "americas", "asia", "europe"];

/// A run is a list of (region index, country count) rows
fn runs() -> impl Strategy<Value = Vec<Vec<(usize, i64)>>> {
    prop::collection::vec(
        prop::collection::vec((0..REGIONS.len(), 0i64..3), 0..8),
        1..6,
    )
}

proptest! {
    #[test]
    fn prop_version_counts_effective_changes(batches in runs()) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let store = MemoryWarehouse::new();
            let mut expected: BTreeMap<&str, (i64, i32)> = BTreeMap::new();

            for (i, rows) in batches.iter().enumerate() {
                let ctx = run(&format!("run-{}", i), (i + 1) as u32);
                let records = rows.iter().map(|(r, count)| region(REGIONS[*r], *count, 0)).collect();
                reconcile(&store, &REGIONS_STATS, &staged(&ctx, records), &ctx).await.unwrap();

                let mut last: BTreeMap<&str, i64> = BTreeMap::new();
                for (r, count) in rows {
                    last.insert(REGIONS[*r], *count);
                }
                for (name, count) in last {
                    expected
                        .entry(name)
                        .and_modify(|(value, version)| {
                            if *value != count {
                                *value = count;
                                *version += 1;
                            }
                        })
                        .or_insert((count, 1));
                }
            }

            let stored = store.list_historical(&REGIONS_STATS).await.unwrap();
            prop_assert_eq!(stored.len(), expected.len());
            for record in stored {
                let (value, version) = expected[record.key.to_string().as_str()];
                prop_assert_eq!(record.version, version);
                prop_assert_eq!(record.fields.get("country_count"), Some(&FieldValue::Int(value)));
            }
            Ok(())
        })?;
    }

    #[test]
    fn prop_replaying_a_batch_changes_nothing(rows in prop::collection::vec((0..REGIONS.len(), 0i64..3), 1..8)) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let store = MemoryWarehouse::new();
            let records: Vec<Record> = rows.iter().map(|(r, count)| region(REGIONS[*r], *count, 0)).collect();

            let first = run("run-1", 1);
            reconcile(&store, &REGIONS_STATS, &staged(&first, records.clone()), &first).await.unwrap();
            let before = store.list_historical(&REGIONS_STATS).await.unwrap();

            let second = run("run-2", 2);
            let report = reconcile(&store, &REGIONS_STATS, &staged(&second, records), &second).await.unwrap();

            prop_assert!(report.lineage.values().all(|l| *l == Lineage::Unchanged));
            prop_assert_eq!(report.inserted + report.updated, 0);
            prop_assert_eq!(store.list_historical(&REGIONS_STATS).await.unwrap(), before);
            Ok(())
        })?;
    }
}
