//! SQL text for the dynamic, catalog-driven tables
//!
//! Table and column names come from the entity catalog or configuration and
//! are validated as plain lower-case identifiers before they are quoted into
//! statements. Values are always bound; every placeholder carries an explicit
//! cast so NULLs bind without type inference.

use strata_common::{FieldType, StrataError};

use crate::entity::{EntitySpec, FieldSpec};
use crate::error::Result;

/// Postgres truncates identifiers beyond this length
const MAX_IDENTIFIER_LEN: usize = 63;

/// Suffix of the table a staging swap builds before renaming it into place
pub const INCOMING_SUFFIX: &str = "__incoming";
/// Suffix the replaced staging table carries until it is dropped
pub const RETIRED_SUFFIX: &str = "__retired";

/// Audit columns of historical tables
pub const HISTORICAL_AUDIT_COLUMNS: &[&str] = &[
    "version",
    "first_loaded_at",
    "last_updated_at",
    "source_execution_id",
];

/// Accept `[a-z_][a-z0-9_]*` up to 63 bytes
pub fn validate_identifier(name: &str) -> strata_common::Result<()> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if !valid_start || !valid_rest || name.len() > MAX_IDENTIFIER_LEN {
        return Err(StrataError::Config(format!(
            "'{}' is not a valid SQL identifier",
            name
        )));
    }
    Ok(())
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name)
}

/// Builds statements for one schema
#[derive(Debug, Clone)]
pub struct SqlBuilder {
    schema: String,
}

impl SqlBuilder {
    pub fn new(schema: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        validate_identifier(&schema)?;
        Ok(Self { schema })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// `"schema"."table"`, validating the table name
    pub fn table(&self, table: &str) -> Result<String> {
        validate_identifier(table)?;
        Ok(format!("{}.{}", quote(&self.schema), quote(table)))
    }

    pub fn count(&self, table: &str) -> Result<String> {
        Ok(format!("SELECT COUNT(*) FROM {}", self.table(table)?))
    }

    // ------------------------------------------------------------------------
    // Staging
    // ------------------------------------------------------------------------

    /// Statements of an atomic staging swap, in execution order.
    ///
    /// The row insert (see [`Self::staging_insert`]) runs between the first
    /// two statements and the rename/drop tail.
    pub fn staging_swap(&self, table: &str) -> Result<StagingSwapSql> {
        let incoming = format!("{}{}", table, INCOMING_SUFFIX);
        let retired = format!("{}{}", table, RETIRED_SUFFIX);
        let live = self.table(table)?;
        let incoming_q = self.table(&incoming)?;
        let retired_q = self.table(&retired)?;

        Ok(StagingSwapSql {
            prepare: vec![
                format!("DROP TABLE IF EXISTS {}", incoming_q),
                format!("DROP TABLE IF EXISTS {}", retired_q),
                format!("CREATE TABLE {} (LIKE {} INCLUDING ALL)", incoming_q, live),
            ],
            insert: self.staging_insert(&incoming)?,
            count_previous: self.count(table)?,
            swap: vec![
                format!("ALTER TABLE {} RENAME TO {}", live, quote(&retired)),
                format!("ALTER TABLE {} RENAME TO {}", incoming_q, quote(table)),
                format!("DROP TABLE {}", retired_q),
            ],
        })
    }

    pub fn staging_insert(&self, table: &str) -> Result<String> {
        Ok(format!(
            "INSERT INTO {} (extraction_ordinal, execution_id, extracted_at, fields, raw_payload, payload_sha256) \
             VALUES ($1::bigint, $2::text, $3::timestamptz, $4::jsonb, $5::jsonb, $6::text)",
            self.table(table)?
        ))
    }

    pub fn staging_select(&self, table: &str) -> Result<String> {
        Ok(format!(
            "SELECT extraction_ordinal, execution_id, extracted_at, fields, raw_payload, payload_sha256 \
             FROM {} ORDER BY extraction_ordinal",
            self.table(table)?
        ))
    }

    // ------------------------------------------------------------------------
    // Historical
    // ------------------------------------------------------------------------

    fn historical_columns(spec: &EntitySpec) -> Vec<&'static str> {
        let mut columns = spec.natural_key.to_vec();
        columns.extend(spec.tracked_fields().map(|f| f.name));
        columns.extend(HISTORICAL_AUDIT_COLUMNS);
        columns
    }

    /// Select and lock the current rows of `key_count` natural keys
    pub fn historical_select_for_update(
        &self,
        spec: &EntitySpec,
        key_count: usize,
    ) -> Result<String> {
        let columns = column_list(&Self::historical_columns(spec));
        let key_tuple = format!("({})", column_list(spec.natural_key));
        let values = key_value_tuples(spec, spec.natural_key, key_count);

        Ok(format!(
            "SELECT {} FROM {} WHERE {} IN ({}) FOR UPDATE",
            columns,
            self.table(spec.target_table()?)?,
            key_tuple,
            values
        ))
    }

    pub fn historical_select_all(&self, spec: &EntitySpec) -> Result<String> {
        Ok(format!(
            "SELECT {} FROM {} ORDER BY {}",
            column_list(&Self::historical_columns(spec)),
            self.table(spec.target_table()?)?,
            column_list(spec.natural_key)
        ))
    }

    /// Plain insert of a new key; binds key columns, tracked fields, then audit columns
    pub fn historical_insert(&self, spec: &EntitySpec) -> Result<String> {
        let mut typed: Vec<(&str, &str)> = key_fields(spec, spec.natural_key)
            .chain(spec.tracked_fields())
            .map(|f| (f.name, f.ty.sql_type()))
            .collect();
        typed.extend([
            ("version", "integer"),
            ("first_loaded_at", "timestamptz"),
            ("last_updated_at", "timestamptz"),
            ("source_execution_id", "text"),
        ]);

        let columns: Vec<&str> = typed.iter().map(|(name, _)| *name).collect();
        let placeholders = typed
            .iter()
            .enumerate()
            .map(|(i, (_, ty))| format!("${}::{}", i + 1, ty))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table(spec.target_table()?)?,
            column_list(&columns),
            placeholders
        ))
    }

    /// Version-guarded update.
    ///
    /// Binds tracked fields, new version, last_updated_at, source_execution_id,
    /// key columns, then the expected previous version.
    pub fn historical_update(&self, spec: &EntitySpec) -> Result<String> {
        let mut n = 0;
        let mut next = || {
            n += 1;
            n
        };

        let mut assignments: Vec<String> = spec
            .tracked_fields()
            .map(|f| format!("{} = ${}::{}", quote(f.name), next(), f.ty.sql_type()))
            .collect();
        assignments.push(format!("version = ${}::integer", next()));
        assignments.push(format!("last_updated_at = ${}::timestamptz", next()));
        assignments.push(format!("source_execution_id = ${}::text", next()));

        let mut conditions: Vec<String> = key_fields(spec, spec.natural_key)
            .map(|f| format!("{} = ${}::{}", quote(f.name), next(), f.ty.sql_type()))
            .collect();
        conditions.push(format!("version = ${}::integer", next()));

        Ok(format!(
            "UPDATE {} SET {} WHERE {}",
            self.table(spec.target_table()?)?,
            assignments.join(", "),
            conditions.join(" AND ")
        ))
    }

    // ------------------------------------------------------------------------
    // Facts
    // ------------------------------------------------------------------------

    fn fact_columns(spec: &EntitySpec) -> Vec<&'static str> {
        let mut columns = spec.identity_columns();
        columns.extend(spec.tracked_fields().map(|f| f.name));
        columns.extend(["source_execution_id", "loaded_at"]);
        columns
    }

    /// Upsert on (key, timestamp) reporting whether the row was new.
    ///
    /// Binds identity columns, tracked fields, source_execution_id, loaded_at.
    pub fn fact_upsert(&self, spec: &EntitySpec) -> Result<String> {
        let identity = spec.identity_columns();
        let mut typed: Vec<(&str, &str)> = key_fields(spec, &identity)
            .chain(spec.tracked_fields())
            .map(|f| (f.name, f.ty.sql_type()))
            .collect();
        typed.extend([
            ("source_execution_id", "text"),
            ("loaded_at", "timestamptz"),
        ]);

        let columns: Vec<&str> = typed.iter().map(|(name, _)| *name).collect();
        let placeholders = typed
            .iter()
            .enumerate()
            .map(|(i, (_, ty))| format!("${}::{}", i + 1, ty))
            .collect::<Vec<_>>()
            .join(", ");
        let updates = columns
            .iter()
            .filter(|c| !identity.contains(c))
            .map(|c| format!("{} = EXCLUDED.{}", quote(c), quote(c)))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {} RETURNING (xmax = 0) AS inserted",
            self.table(spec.target_table()?)?,
            column_list(&columns),
            placeholders,
            column_list(&identity),
            updates
        ))
    }

    pub fn fact_select_all(&self, spec: &EntitySpec) -> Result<String> {
        Ok(format!(
            "SELECT {} FROM {} ORDER BY {}",
            column_list(&Self::fact_columns(spec)),
            self.table(spec.target_table()?)?,
            column_list(&spec.identity_columns())
        ))
    }
}

/// Statements of one staging swap
#[derive(Debug, Clone)]
pub struct StagingSwapSql {
    pub prepare: Vec<String>,
    pub insert: String,
    pub count_previous: String,
    pub swap: Vec<String>,
}

fn column_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| quote(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Field declarations of the given key columns, in key order
fn key_fields<'a>(
    spec: &'a EntitySpec,
    columns: &'a [&'static str],
) -> impl Iterator<Item = &'a FieldSpec> + 'a {
    columns.iter().filter_map(move |c| spec.field(c))
}

/// `($1::text), ($2::text)` style tuples for `key_count` keys
fn key_value_tuples(spec: &EntitySpec, columns: &[&'static str], key_count: usize) -> String {
    let types: Vec<FieldType> = key_fields(spec, columns).map(|f| f.ty).collect();
    let mut n = 0;
    (0..key_count)
        .map(|_| {
            let parts = types
                .iter()
                .map(|ty| {
                    n += 1;
                    format!("${}::{}", n, ty.sql_type())
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", parts)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::entity::{REGIONS_STATS, WEATHER};

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("ga_integration").is_ok());
        assert!(validate_identifier("_x1").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("Upper").is_err());
        assert!(validate_identifier("a\"; DROP").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_historical_update_placeholders() {
        let sql = SqlBuilder::new("ga")
            .unwrap()
            .historical_update(&REGIONS_STATS)
            .unwrap();
        // 7 tracked fields, 3 audit values, 1 key column, expected version
        assert!(sql
            .starts_with("UPDATE \"ga\".\"th_regions_stats\" SET \"country_count\" = $1::bigint"));
        assert!(sql.contains("version = $8::integer, last_updated_at = $9::timestamptz"));
        assert!(sql.ends_with("WHERE \"region\" = $11::text AND version = $12::integer"));
    }

    #[test]
    fn test_select_for_update_tuples() {
        let sql = SqlBuilder::new("ga")
            .unwrap()
            .historical_select_for_update(&REGIONS_STATS, 2)
            .unwrap();
        assert!(sql.contains("WHERE (\"region\") IN (($1::text), ($2::text)) FOR UPDATE"));
    }

    #[test]
    fn test_fact_upsert_conflict_target() {
        let sql = SqlBuilder::new("ga")
            .unwrap()
            .fact_upsert(&WEATHER)
            .unwrap();
        assert!(sql.contains("(\"city\", \"measured_at\", \"country\""));
        assert!(sql.contains("ON CONFLICT (\"city\", \"measured_at\") DO UPDATE SET \"country\" = EXCLUDED.\"country\""));
        assert!(sql.contains("\"loaded_at\" = EXCLUDED.\"loaded_at\""));
        assert!(!sql.contains("\"city\" = EXCLUDED"));
        assert!(sql.ends_with("RETURNING (xmax = 0) AS inserted"));
    }

    #[test]
    fn test_staging_swap_order() {
        let swap = SqlBuilder::new("ga")
            .unwrap()
            .staging_swap("sa_weather")
            .unwrap();
        assert_eq!(
            swap.prepare[2],
            "CREATE TABLE \"ga\".\"sa_weather__incoming\" (LIKE \"ga\".\"sa_weather\" INCLUDING ALL)"
        );
        assert!(swap
            .insert
            .starts_with("INSERT INTO \"ga\".\"sa_weather__incoming\""));
        assert_eq!(
            swap.swap[0],
            "ALTER TABLE \"ga\".\"sa_weather\" RENAME TO \"sa_weather__retired\""
        );
        assert_eq!(swap.swap[2], "DROP TABLE \"ga\".\"sa_weather__retired\"");
    }
}
