//! Assemble the countries batch from its three staging areas

use std::collections::HashMap;

use serde_json::json;
use strata_common::{FieldType, FieldValue};

use crate::staging::StagingRow;

/// Identity columns shared by the three staging areas
const SHARED_COLUMNS: &[&str] = &["code_iso2", "code_iso3"];

/// Result of the three-way join
#[derive(Debug, Clone, Default)]
pub struct CombinedCountries {
    pub rows: Vec<StagingRow>,
    /// Basic rows dropped for lack of a geo or culture partner
    pub unmatched: usize,
}

/// Usable `code_iso3` of a row, trimmed
fn join_key(row: &StagingRow) -> Option<String> {
    match row.fields.get("code_iso3")? {
        FieldValue::Json(_) => None,
        value => value
            .coerce(FieldType::Text)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty()),
    }
}

/// Last row per key by extraction order
fn index_by_key(rows: &[StagingRow]) -> HashMap<String, &StagingRow> {
    let mut ordered: Vec<&StagingRow> = rows.iter().collect();
    ordered.sort_by_key(|r| r.extraction_ordinal);

    let mut index = HashMap::with_capacity(ordered.len());
    for row in ordered {
        if let Some(key) = join_key(row) {
            index.insert(key, row);
        }
    }
    index
}

/// Inner join of basic, geo and culture rows on `code_iso3`.
///
/// Basic rows drive the order and keep their ordinal, so in-batch duplicates
/// are still collapsed downstream. A basic row without a usable key is kept
/// as-is for the reconciler to reject.
pub fn combine_countries(
    basic: &[StagingRow],
    geo: &[StagingRow],
    culture: &[StagingRow],
) -> CombinedCountries {
    let geo = index_by_key(geo);
    let culture = index_by_key(culture);
    let mut combined = CombinedCountries::default();

    let mut ordered: Vec<&StagingRow> = basic.iter().collect();
    ordered.sort_by_key(|r| r.extraction_ordinal);

    for row in ordered {
        let Some(key) = join_key(row) else {
            combined.rows.push(row.clone());
            continue;
        };

        let (Some(geo_row), Some(culture_row)) = (geo.get(&key), culture.get(&key)) else {
            combined.unmatched += 1;
            continue;
        };

        let mut fields = row.fields.clone();
        for partner in [geo_row, culture_row] {
            for (name, value) in partner.fields.iter() {
                if !SHARED_COLUMNS.contains(&name) {
                    fields.set(name, value.clone());
                }
            }
        }

        let raw_payload = json!({
            "basic": row.raw_payload,
            "geo": geo_row.raw_payload,
            "culture": culture_row.raw_payload,
        });

        combined.rows.push(StagingRow::with_payload(
            row.extraction_ordinal,
            &row.run_id,
            row.extracted_at,
            fields,
            raw_payload,
        ));
    }

    combined
}
