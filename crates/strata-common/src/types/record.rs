//! Records and natural keys

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use super::value::FieldValue;
use crate::error::{Result, StrataError};

static NULL_VALUE: FieldValue = FieldValue::Null;

/// A set of named field values, ordered by field name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Field value, with absent fields reading as `Null`
    pub fn get_or_null(&self, name: &str) -> &FieldValue {
        self.fields.get(name).unwrap_or(&NULL_VALUE)
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy every field of `other` into this record, overwriting on collision
    pub fn merge(&mut self, other: &Record) {
        for (name, value) in &other.fields {
            self.fields.insert(name.clone(), value.clone());
        }
    }

    /// Render as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Build a record from a JSON object, keeping values as received
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            StrataError::Parse(format!("expected a JSON object, got {}", json_kind(value)))
        })?;
        Ok(Self {
            fields: object
                .iter()
                .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
                .collect(),
        })
    }
}

impl FromIterator<(String, FieldValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ============================================================================
// Natural keys
// ============================================================================

/// One component of a natural key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyPart {
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl KeyPart {
    /// Convert an already-coerced, non-null value into a key part.
    ///
    /// Text is trimmed and must not be blank; integral floats become integers.
    pub fn from_value(value: &FieldValue) -> Result<Self> {
        match value {
            FieldValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Err(StrataError::InvalidKey("blank text".to_string()))
                } else {
                    Ok(KeyPart::Text(trimmed.to_string()))
                }
            },
            FieldValue::Int(i) => Ok(KeyPart::Int(*i)),
            FieldValue::Float(f) if f.is_finite() && f.fract() == 0.0 => Ok(KeyPart::Int(*f as i64)),
            FieldValue::Timestamp(t) => Ok(KeyPart::Timestamp(*t)),
            other => Err(StrataError::InvalidKey(format!(
                "{} value cannot be part of a key",
                other.type_name()
            ))),
        }
    }

    pub fn to_value(&self) -> FieldValue {
        match self {
            KeyPart::Int(i) => FieldValue::Int(*i),
            KeyPart::Text(s) => FieldValue::Text(s.clone()),
            KeyPart::Timestamp(t) => FieldValue::Timestamp(*t),
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Int(i) => write!(f, "{}", i),
            KeyPart::Text(s) => f.write_str(s),
            KeyPart::Timestamp(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

/// Composite natural key, displayed as its parts joined by `|`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NaturalKey(Vec<KeyPart>);

impl NaturalKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self(vec![KeyPart::Text(value.into())])
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

// Serialized as a string so keys can be used as JSON object keys.
impl Serialize for NaturalKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
