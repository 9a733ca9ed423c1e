//! Dynamically typed field values and their column types

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::error::{Result, StrataError};

/// Accepted naive timestamp layouts, all interpreted as UTC.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"];

/// Column type of a field, as declared by an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Text,
    BigInt,
    Double,
    Boolean,
    Json,
    Timestamp,
}

impl FieldType {
    /// PostgreSQL type used for casts and column definitions
    pub fn sql_type(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::BigInt => "bigint",
            FieldType::Double => "double precision",
            FieldType::Boolean => "boolean",
            FieldType::Json => "jsonb",
            FieldType::Timestamp => "timestamptz",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::Text => "text",
            FieldType::BigInt => "bigint",
            FieldType::Double => "double",
            FieldType::Boolean => "boolean",
            FieldType::Json => "json",
            FieldType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// A single source field value
///
/// Equality is NULL-safe: two `Null`s are equal, and `Null` never equals a
/// non-null value. Floats with identical bit patterns (including NaN) are equal.
#[derive(Debug, Clone, Default)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Short name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Text(_) => "text",
            FieldValue::Json(_) => "json",
            FieldValue::Timestamp(_) => "timestamp",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            FieldValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            FieldValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Build a value from a JSON document as received from a source.
    ///
    /// Arrays and objects are kept whole as `Json`.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => n.as_f64().map(FieldValue::Float).unwrap_or(FieldValue::Null),
            },
            serde_json::Value::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Json(other.clone()),
        }
    }

    /// Render the value as JSON. Timestamps become RFC 3339 strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Int(i) => serde_json::Value::from(*i),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Json(v) => v.clone(),
            FieldValue::Timestamp(t) => {
                serde_json::Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            },
        }
    }

    /// Convert the value into the representation of `ty`.
    ///
    /// `Null` is accepted for every type. Anything that cannot be represented
    /// without guessing is rejected.
    pub fn coerce(&self, ty: FieldType) -> Result<FieldValue> {
        use FieldValue as V;

        let coerced = match (ty, self) {
            (_, V::Null) => V::Null,

            (FieldType::Text, V::Text(s)) => V::Text(s.clone()),
            (FieldType::Text, V::Int(i)) => V::Text(i.to_string()),
            (FieldType::Text, V::Float(f)) => V::Text(f.to_string()),
            (FieldType::Text, V::Bool(b)) => V::Text(b.to_string()),
            (FieldType::Text, V::Json(j)) => V::Text(j.to_string()),
            (FieldType::Text, V::Timestamp(t)) => {
                V::Text(t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            },

            (FieldType::BigInt, V::Int(i)) => V::Int(*i),
            (FieldType::BigInt, V::Float(f)) => V::Int(integral_f64(*f)?),
            (FieldType::BigInt, V::Text(s)) => V::Int(s.trim().parse::<i64>().map_err(|e| {
                StrataError::coercion(ty.to_string(), "text", format!("'{}': {}", s, e))
            })?),

            (FieldType::Double, V::Float(f)) => V::Float(*f),
            (FieldType::Double, V::Int(i)) => V::Float(*i as f64),
            (FieldType::Double, V::Text(s)) => V::Float(s.trim().parse::<f64>().map_err(|e| {
                StrataError::coercion(ty.to_string(), "text", format!("'{}': {}", s, e))
            })?),

            (FieldType::Boolean, V::Bool(b)) => V::Bool(*b),
            (FieldType::Boolean, V::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => V::Bool(true),
                "false" => V::Bool(false),
                _ => {
                    return Err(StrataError::coercion(
                        ty.to_string(),
                        "text",
                        format!("'{}' is not true/false", s),
                    ))
                },
            },

            (FieldType::Json, V::Text(s)) => V::Json(text_to_json(s)),
            (FieldType::Json, other) => V::Json(other.to_json()),

            (FieldType::Timestamp, V::Timestamp(t)) => V::Timestamp(*t),
            (FieldType::Timestamp, V::Text(s)) => V::Timestamp(parse_timestamp(s)?),
            (FieldType::Timestamp, V::Int(secs)) => {
                V::Timestamp(DateTime::from_timestamp(*secs, 0).ok_or_else(|| {
                    StrataError::coercion(ty.to_string(), "int", format!("{} out of range", secs))
                })?)
            },

            (ty, other) => {
                return Err(StrataError::coercion(
                    ty.to_string(),
                    other.type_name(),
                    "unsupported conversion",
                ))
            },
        };

        Ok(coerced)
    }
}

fn integral_f64(f: f64) -> Result<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Ok(f as i64)
    } else {
        Err(StrataError::coercion("bigint", "float", format!("{} is not an integer", f)))
    }
}

/// Text that looks like a JSON array/object is parsed, anything else stays a JSON string.
fn text_to_json(s: &str) -> serde_json::Value {
    let trimmed = s.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(parsed) = serde_json::from_str(s) {
            return parsed;
        }
    }
    serde_json::Value::String(s.to_string())
}

/// Parse a timestamp in RFC 3339 or one of the naive layouts the sources emit.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(StrataError::coercion("timestamp", "text", format!("'{}' is not a recognised timestamp", s)))
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        use FieldValue as V;
        match (self, other) {
            (V::Null, V::Null) => true,
            (V::Bool(a), V::Bool(b)) => a == b,
            (V::Int(a), V::Int(b)) => a == b,
            (V::Float(a), V::Float(b)) => a == b || a.to_bits() == b.to_bits(),
            (V::Text(a), V::Text(b)) => a == b,
            (V::Json(a), V::Json(b)) => a == b,
            (V::Timestamp(a), V::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value.into())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        FieldValue::from_json(&value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_null_safe_equality() {
        assert_eq!(FieldValue::Null, FieldValue::Null);
        assert_ne!(FieldValue::Null, FieldValue::Int(0));
        assert_ne!(FieldValue::Text(String::new()), FieldValue::Null);
        assert_eq!(FieldValue::Float(f64::NAN), FieldValue::Float(f64::NAN));
        assert_ne!(FieldValue::Int(1), FieldValue::Float(1.0));
    }

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(FieldValue::from_json(&json!(47_000_000)), FieldValue::Int(47_000_000));
        assert_eq!(FieldValue::from_json(&json!(505_990.5)), FieldValue::Float(505_990.5));
        assert_eq!(FieldValue::from_json(&json!(null)), FieldValue::Null);
        assert_eq!(
            FieldValue::from_json(&json!(["Madrid"])),
            FieldValue::Json(json!(["Madrid"]))
        );
    }

    #[test]
    fn test_coerce_numeric() {
        assert_eq!(FieldValue::Float(48.0).coerce(FieldType::BigInt).unwrap(), FieldValue::Int(48));
        assert_eq!(FieldValue::from(" 12 ").coerce(FieldType::BigInt).unwrap(), FieldValue::Int(12));
        assert_eq!(FieldValue::Int(3).coerce(FieldType::Double).unwrap(), FieldValue::Float(3.0));
        assert!(FieldValue::Float(1.5).coerce(FieldType::BigInt).is_err());
        assert!(FieldValue::from("abc").coerce(FieldType::Double).is_err());
        assert!(FieldValue::Bool(true).coerce(FieldType::BigInt).is_err());
    }

    #[test]
    fn test_coerce_text_and_bool() {
        assert_eq!(FieldValue::Int(724).coerce(FieldType::Text).unwrap(), FieldValue::from("724"));
        assert_eq!(FieldValue::from("TRUE").coerce(FieldType::Boolean).unwrap(), FieldValue::Bool(true));
        assert!(FieldValue::from("yes").coerce(FieldType::Boolean).is_err());
    }

    #[test]
    fn test_coerce_json() {
        assert_eq!(
            FieldValue::from("[\"Madrid\"]").coerce(FieldType::Json).unwrap(),
            FieldValue::Json(json!(["Madrid"]))
        );
        assert_eq!(
            FieldValue::from("plain").coerce(FieldType::Json).unwrap(),
            FieldValue::Json(json!("plain"))
        );
        assert_eq!(FieldValue::Int(5).coerce(FieldType::Json).unwrap(), FieldValue::Json(json!(5)));
    }

    #[test]
    fn test_coerce_timestamps() {
        let expected = Utc.with_ymd_and_hms(2026, 2, 17, 12, 0, 0).unwrap();
        for input in ["2026-02-17T12:00", "2026-02-17 12:00:00", "2026-02-17T12:00:00Z", "2026-02-17T13:00:00+01:00"] {
            assert_eq!(
                FieldValue::from(input).coerce(FieldType::Timestamp).unwrap(),
                FieldValue::Timestamp(expected),
                "input {}",
                input
            );
        }
        assert_eq!(
            FieldValue::Int(expected.timestamp()).coerce(FieldType::Timestamp).unwrap(),
            FieldValue::Timestamp(expected)
        );
        assert!(FieldValue::from("yesterday").coerce(FieldType::Timestamp).is_err());
    }

    #[test]
    fn test_null_coerces_to_everything() {
        for ty in [
            FieldType::Text,
            FieldType::BigInt,
            FieldType::Double,
            FieldType::Boolean,
            FieldType::Json,
            FieldType::Timestamp,
        ] {
            assert_eq!(FieldValue::Null.coerce(ty).unwrap(), FieldValue::Null);
        }
    }
}
