//! Error types for the ingest pipelines

use strata_common::StrataError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors that abort a fetch or an entity run
///
/// Row-level data problems are not errors at this level; they are collected
/// as [`crate::reconcile::RowError`]s and reported.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] StrataError),

    #[error("Source '{source_name}' unavailable: {message}")]
    Source {
        source_name: String,
        message: String,
    },

    /// A uniqueness constraint fired while writing; the entity run is rolled back
    #[error("Constraint violation while writing '{entity}': {detail}")]
    ConstraintViolation { entity: String, detail: String },

    /// The stored version changed between read and write; the entity run is rolled back
    #[error("Concurrent modification of '{entity}' key {key}")]
    ConcurrentModification { entity: String, key: String },

    /// A load step whose staging inputs were not all refreshed by this run
    #[error("Staging for '{entity}' is incomplete: {detail}")]
    StagingIncomplete { entity: String, detail: String },

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    pub fn source_unavailable(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the error aborted the write phase of an entity run
    pub fn is_fatal_write(&self) -> bool {
        matches!(
            self,
            IngestError::ConstraintViolation { .. } | IngestError::ConcurrentModification { .. }
        )
    }
}
