//! Sensor Record Types
//!
//! Codec-agnostic representation of the records republished by local
//! outputs. A record is an ordered list of named values laid out per a
//! [`RecordSchema`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::offering::SensorIdentity;

// =============================================================================
// Schema
// =============================================================================

/// Value kind of a single record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Floating point quantity.
    Double,
    /// Signed integer count.
    Integer,
    /// Boolean flag.
    Boolean,
    /// Free text.
    Text,
    /// ISO-8601 time instant.
    Time,
    /// Opaque binary payload.
    Binary,
}

/// Definition of one field in a record layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Field value kind.
    #[serde(rename = "type")]
    pub kind: FieldKind,
}

impl FieldDef {
    /// Create a field definition.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Record layout retrieved from a remote stream (or built locally).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    /// Schema name. Remote templates may omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional human readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered field layout.
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl RecordSchema {
    /// Create a schema from a field layout.
    #[must_use]
    pub fn new(name: Option<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            name,
            description: None,
            fields,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Schema name, ignoring blank names.
    #[must_use]
    pub fn declared_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }
}

// =============================================================================
// Records
// =============================================================================

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Boolean flag.
    Boolean(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point.
    Double(f64),
    /// Time instant.
    Time(DateTime<Utc>),
    /// Text.
    Text(String),
    /// Binary payload.
    Binary(Vec<u8>),
    /// Missing value.
    Null,
}

/// A named value inside a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Field value.
    pub value: FieldValue,
}

/// A sensor record: named values in schema order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Fields in schema order.
    pub fields: Vec<Field>,
}

impl Record {
    /// Create an empty record.
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Append a named value.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push(Field {
            name: name.into(),
            value,
        });
        self
    }

    /// Look up a value by field name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Sensor description document, kept opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescription {
    /// Sensor the description belongs to.
    pub sensor: SensorIdentity,
    /// Raw description document.
    pub document: serde_json::Value,
}
