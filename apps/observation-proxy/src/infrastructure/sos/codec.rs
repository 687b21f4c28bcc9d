//! Result Codec
//!
//! Decodes JSON result payloads into [`Record`]s laid out per the session's
//! [`RecordSchema`].
//!
//! # Payload Forms
//!
//! A payload (HTTP poll body or WebSocket text frame) may be:
//!
//! ```json
//! {"resultValues": [ ... ]}       // envelope
//! [ ... ]                         // bare list of records
//! {"time": "...", "temp": 21.5}   // single record
//! ```
//!
//! Each record is either an object keyed by field name or a positional
//! array aligned with the schema's fields.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::domain::record::{FieldDef, FieldKind, FieldValue, Record, RecordSchema};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Positional record length differs from the schema.
    #[error("record has {actual} values, schema declares {expected}")]
    Arity {
        /// Fields in the schema.
        expected: usize,
        /// Values in the record.
        actual: usize,
    },

    /// A value does not fit its field kind.
    #[error("field '{field}' expects {kind:?}, got {value}")]
    Mismatch {
        /// Field name.
        field: String,
        /// Declared kind.
        kind: FieldKind,
        /// Offending value.
        value: String,
    },

    /// Invalid payload shape.
    #[error("invalid result format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for result payloads of one schema.
#[derive(Debug, Clone)]
pub struct ResultCodec {
    schema: RecordSchema,
}

impl ResultCodec {
    /// Create a codec for a schema.
    #[must_use]
    pub const fn new(schema: RecordSchema) -> Self {
        Self { schema }
    }

    /// Decode a text payload into zero or more records.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not JSON or a record does not fit
    /// the schema.
    pub fn decode(&self, text: &str) -> Result<Vec<Record>, CodecError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(vec![]);
        }
        self.decode_value(serde_json::from_str(trimmed)?)
    }

    /// Decode an already parsed payload.
    ///
    /// # Errors
    ///
    /// Returns an error if a record does not fit the schema.
    pub fn decode_value(&self, payload: Value) -> Result<Vec<Record>, CodecError> {
        match payload {
            Value::Object(mut map) if map.contains_key("resultValues") => {
                match map.remove("resultValues") {
                    Some(Value::Array(items)) => self.decode_list(items),
                    Some(Value::Null) | None => Ok(vec![]),
                    Some(other) => Err(CodecError::InvalidFormat(format!(
                        "resultValues must be an array, got {}",
                        type_name(&other)
                    ))),
                }
            }
            Value::Array(items) if items.iter().all(|i| i.is_object() || i.is_array()) => {
                self.decode_list(items)
            }
            // A bare array of scalars is a single positional record.
            array @ Value::Array(_) => Ok(vec![self.decode_record(array)?]),
            object @ Value::Object(_) => Ok(vec![self.decode_record(object)?]),
            other => Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got {}",
                type_name(&other)
            ))),
        }
    }

    fn decode_list(&self, items: Vec<Value>) -> Result<Vec<Record>, CodecError> {
        items.into_iter().map(|item| self.decode_record(item)).collect()
    }

    fn decode_record(&self, item: Value) -> Result<Record, CodecError> {
        match item {
            Value::Object(mut map) => {
                if self.schema.fields.is_empty() {
                    // Schema-less: keep whatever the service sent.
                    return Ok(map.into_iter().fold(Record::new(), |record, (name, value)| {
                        record.with(name, untyped(value))
                    }));
                }
                self.schema.fields.iter().try_fold(Record::new(), |record, def| {
                    let value = map.remove(&def.name).unwrap_or(Value::Null);
                    Ok(record.with(def.name.clone(), typed(def, value)?))
                })
            }
            Value::Array(values) => {
                if values.len() != self.schema.fields.len() {
                    return Err(CodecError::Arity {
                        expected: self.schema.fields.len(),
                        actual: values.len(),
                    });
                }
                self.schema
                    .fields
                    .iter()
                    .zip(values)
                    .try_fold(Record::new(), |record, (def, value)| {
                        Ok(record.with(def.name.clone(), typed(def, value)?))
                    })
            }
            other => Err(CodecError::InvalidFormat(format!(
                "record must be an object or array, got {}",
                type_name(&other)
            ))),
        }
    }
}

fn typed(def: &FieldDef, value: Value) -> Result<FieldValue, CodecError> {
    let mismatch = |value: &Value| CodecError::Mismatch {
        field: def.name.clone(),
        kind: def.kind,
        value: value.to_string(),
    };

    if value.is_null() {
        return Ok(FieldValue::Null);
    }

    match def.kind {
        FieldKind::Double => value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .map(FieldValue::Double)
            .ok_or_else(|| mismatch(&value)),
        FieldKind::Integer => value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .map(FieldValue::Integer)
            .ok_or_else(|| mismatch(&value)),
        FieldKind::Boolean => value
            .as_bool()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .map(FieldValue::Boolean)
            .ok_or_else(|| mismatch(&value)),
        FieldKind::Text => match value {
            Value::String(s) => Ok(FieldValue::Text(s)),
            Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
            Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
            other => Err(mismatch(&other)),
        },
        FieldKind::Time => parse_time(&value)
            .map(FieldValue::Time)
            .ok_or_else(|| mismatch(&value)),
        FieldKind::Binary => match &value {
            Value::Array(bytes) => bytes
                .iter()
                .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .map(FieldValue::Binary)
                .ok_or_else(|| mismatch(&value)),
            _ => Err(mismatch(&value)),
        },
    }
}

fn untyped(value: Value) -> FieldValue {
    match value {
        Value::Bool(b) => FieldValue::Boolean(b),
        Value::Number(n) => n
            .as_i64()
            .map(FieldValue::Integer)
            .or_else(|| n.as_f64().map(FieldValue::Double))
            .unwrap_or(FieldValue::Null),
        Value::String(s) => DateTime::parse_from_rfc3339(&s).map_or_else(
            |_| FieldValue::Text(s.clone()),
            |t| FieldValue::Time(t.with_timezone(&Utc)),
        ),
        Value::Null | Value::Array(_) | Value::Object(_) => FieldValue::Null,
    }
}

/// RFC 3339 string or epoch seconds.
fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => {
            let secs = n.as_f64()?;
            #[allow(clippy::cast_possible_truncation)]
            let millis = (secs * 1000.0).round() as i64;
            Utc.timestamp_millis_opt(millis).single()
        }
        _ => None,
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather() -> ResultCodec {
        ResultCodec::new(RecordSchema::new(
            Some("weather".to_string()),
            vec![
                FieldDef::new("time", FieldKind::Time),
                FieldDef::new("temp", FieldKind::Double),
                FieldDef::new("station", FieldKind::Text),
            ],
        ))
    }

    #[test]
    fn decodes_envelope_of_objects() {
        let records = weather()
            .decode(
                r#"{"resultValues":[
                    {"time":"2024-05-01T12:00:00Z","temp":21.5,"station":"north"},
                    {"time":"2024-05-01T12:00:01Z","temp":21.6,"station":"north"}
                ]}"#,
            )
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("temp"), Some(&FieldValue::Double(21.6)));
        assert!(matches!(records[0].get("time"), Some(FieldValue::Time(_))));
    }

    #[test]
    fn decodes_positional_records_in_schema_order() {
        let records = weather()
            .decode(r#"[["2024-05-01T12:00:00Z", "20.25", "south"]]"#)
            .unwrap();

        let names: Vec<_> = records[0].fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["time", "temp", "station"]);
        assert_eq!(records[0].get("temp"), Some(&FieldValue::Double(20.25)));
    }

    #[test]
    fn bare_scalar_array_is_one_record() {
        let records = weather()
            .decode(r#"[1714564800, 19.0, "east"]"#)
            .unwrap();

        assert_eq!(records.len(), 1);
        assert!(matches!(records[0].get("time"), Some(FieldValue::Time(_))));
    }

    #[test]
    fn missing_object_field_is_null() {
        let records = weather().decode(r#"{"temp": 3}"#).unwrap();

        assert_eq!(records[0].get("station"), Some(&FieldValue::Null));
        assert_eq!(records[0].get("temp"), Some(&FieldValue::Double(3.0)));
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let err = weather().decode(r#"[["2024-05-01T12:00:00Z", 1.0]]"#).unwrap_err();
        assert!(matches!(err, CodecError::Arity { expected: 3, actual: 2 }));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let err = weather()
            .decode(r#"{"time":"yesterday","temp":1.0,"station":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, CodecError::Mismatch { field, .. } if field == "time"));
    }

    #[test]
    fn empty_payload_yields_nothing() {
        assert!(weather().decode("  ").unwrap().is_empty());
        assert!(weather().decode(r#"{"resultValues":null}"#).unwrap().is_empty());
    }

    #[test]
    fn schemaless_objects_keep_their_fields() {
        let codec = ResultCodec::new(RecordSchema::default());
        let records = codec.decode(r#"{"count": 4, "ok": true}"#).unwrap();

        assert_eq!(records[0].get("count"), Some(&FieldValue::Integer(4)));
        assert_eq!(records[0].get("ok"), Some(&FieldValue::Boolean(true)));
    }
}
