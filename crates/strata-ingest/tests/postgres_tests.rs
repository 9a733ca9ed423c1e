//! PostgreSQL warehouse tests
//!
//! These need Docker: `cargo test -p strata-ingest --test postgres_tests -- --ignored`

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{country, region, run, staged, weather, TestPostgres};
use serde_json::json;
use serial_test::serial;
use strata_common::{FieldValue, NaturalKey, Record};
use strata_ingest::config::DEFAULT_SCHEMA;
use strata_ingest::entity::{COUNTRIES, REGIONS_STATS, WEATHER};
use strata_ingest::facts::append;
use strata_ingest::pipeline::table_status;
use strata_ingest::reconcile::{reconcile, Lineage};
use strata_ingest::sources::FetchedRecord;
use strata_ingest::staging::{load, read_staging};
use strata_ingest::store::{FactStore, HistoricalStore, PgWarehouse, StagingStore};

fn warehouse(pg: &TestPostgres) -> PgWarehouse {
    PgWarehouse::new(pg.pool().clone(), DEFAULT_SCHEMA).unwrap()
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_staging_swap_replaces_content() {
    let pg = TestPostgres::start().await.unwrap();
    let store = warehouse(&pg);

    let first = run("run-1", 1);
    let records = (0..3)
        .map(|i| {
            let name = format!("region-{}", i);
            FetchedRecord::new(
                Record::new().with("region", name.as_str()),
                json!({"region": name}),
            )
        })
        .collect();
    load(&store, &REGIONS_STATS, records, &first).await.unwrap();
    assert_eq!(store.count_staging("sa_regions_stats").await.unwrap(), 3);

    let second = run("run-2", 2);
    let records = vec![FetchedRecord::new(
        Record::new().with("region", "oceania"),
        json!({"region": "oceania"}),
    )];
    let report = load(&store, &REGIONS_STATS, records, &second)
        .await
        .unwrap();
    assert_eq!(report.rows_replaced, 3);

    let rows = read_staging(&store, &REGIONS_STATS).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].run_id.as_str(), "run-2");
    assert_eq!(rows[0].raw_payload, json!({"region": "oceania"}));

    // The swap keeps the table usable for the next run
    let third = run("run-3", 3);
    load(&store, &REGIONS_STATS, Vec::new(), &third)
        .await
        .unwrap();
    assert_eq!(store.count_staging("sa_regions_stats").await.unwrap(), 0);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_merge_versions_countries() {
    let pg = TestPostgres::start().await.unwrap();
    let store = warehouse(&pg);

    let first = run("run-1", 1);
    let rows = staged(
        &first,
        vec![
            country("ESP", "Spain", 47_000_000),
            country("PRT", "Portugal", 10_300_000),
        ],
    );
    let report = reconcile(&store, &COUNTRIES, &rows, &first).await.unwrap();
    assert_eq!(report.inserted, 2);

    let second = run("run-2", 2);
    let rows = staged(
        &second,
        vec![
            country("ESP", "Spain", 48_000_000),
            country("PRT", "Portugal", 10_300_000),
        ],
    );
    let report = reconcile(&store, &COUNTRIES, &rows, &second).await.unwrap();
    assert_eq!(report.lineage[&NaturalKey::text("ESP")], Lineage::Updated);
    assert_eq!(report.lineage[&NaturalKey::text("PRT")], Lineage::Unchanged);
    assert_eq!(report.total_after, 2);

    let stored = store.list_historical(&COUNTRIES).await.unwrap();
    let spain = stored
        .iter()
        .find(|r| r.key == NaturalKey::text("ESP"))
        .unwrap();
    assert_eq!(spain.version, 2);
    assert_eq!(spain.first_loaded_at, first.started_at);
    assert_eq!(spain.last_updated_at, second.started_at);
    assert_eq!(
        spain.fields.get("population"),
        Some(&FieldValue::Int(48_000_000))
    );
    let portugal = stored
        .iter()
        .find(|r| r.key == NaturalKey::text("PRT"))
        .unwrap();
    assert_eq!(portugal.version, 1);
    assert_eq!(portugal.source_execution_id, "run-1");
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_merge_isolates_bad_rows() {
    let pg = TestPostgres::start().await.unwrap();
    let store = warehouse(&pg);

    let ctx = run("run-1", 1);
    let rows = staged(
        &ctx,
        vec![
            region("europe", 53, 740),
            region("asia", 50, 4600).with("total_population", "many"),
            Record::new().with("country_count", 3),
        ],
    );
    let report = reconcile(&store, &REGIONS_STATS, &rows, &ctx)
        .await
        .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(store.count_historical(&REGIONS_STATS).await.unwrap(), 1);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_fact_upsert_overwrites_same_reading() {
    let pg = TestPostgres::start().await.unwrap();
    let store = warehouse(&pg);

    let first = run("run-1", 1);
    let rows = staged(
        &first,
        vec![
            weather("Madrid", "2026-02-17T12:00", 14.0),
            weather("Madrid", "2026-02-17T13:00", 15.0),
        ],
    );
    let report = append(&store, &WEATHER, &rows, &first).await.unwrap();
    assert_eq!(report.inserted, 2);

    let second = run("run-2", 2);
    let rows = staged(
        &second,
        vec![weather("Madrid", "2026-02-17T12:00:00+00:00", 14.5)],
    );
    let report = append(&store, &WEATHER, &rows, &second).await.unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.overwritten, 1);
    assert_eq!(report.total_after, 2);

    let facts = store.list_facts(&WEATHER).await.unwrap();
    assert_eq!(
        facts[0].fields.get("temperature"),
        Some(&FieldValue::Float(14.5))
    );
    assert_eq!(facts[0].source_execution_id, "run-2");
    assert_eq!(facts[1].source_execution_id, "run-1");

    let status = table_status(&store).await.unwrap();
    let th_weather = status.iter().find(|s| s.table == "th_weather").unwrap();
    assert_eq!(th_weather.rows, 2);
}
