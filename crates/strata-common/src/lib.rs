//! Strata Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared building blocks for the Strata warehouse loader:
//!
//! - **Types**: dynamically typed field values, records and natural keys
//! - **Errors**: the shared [`StrataError`] and [`Result`] alias
//! - **Checksums**: SHA-256 digests of raw source payloads
//! - **Logging**: one-call `tracing` subscriber setup for binaries

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{Result, StrataError};
pub use types::{FieldType, FieldValue, KeyPart, NaturalKey, Record};
