//! Error types for Strata

use thiserror::Error;

/// Result type alias for Strata operations
pub type Result<T> = std::result::Result<T, StrataError>;

/// Main error type shared by all Strata crates
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cannot coerce {found} into {expected}: {detail}")]
    Coercion {
        expected: String,
        found: String,
        detail: String,
    },

    #[error("Invalid natural key: {0}")]
    InvalidKey(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl StrataError {
    /// Create a coercion error for a value that does not fit its declared type
    pub fn coercion(
        expected: impl Into<String>,
        found: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::Coercion {
            expected: expected.into(),
            found: found.into(),
            detail: detail.into(),
        }
    }
}
