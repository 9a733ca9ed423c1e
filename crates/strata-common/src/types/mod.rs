//! Core value types shared by staging, historical and fact tables

mod record;
mod value;

pub use record::{KeyPart, NaturalKey, Record};
pub use value::{parse_timestamp, FieldType, FieldValue};
