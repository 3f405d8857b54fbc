//! Embedded payload decoding
//!
//! The payload column carries a JSON document of the form
//! `{object_name, number_of_aligners, number_of_refinements, number_of_retainers, data}`.
//! Decoding never fails the row: unparseable text becomes [`Payload::Malformed`] and
//! an unknown `object_name` becomes [`ObjectKind::Unrecognized`].

use aligner_common::EntityKind;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::coerce;
use crate::error::ChildImportError;
use crate::models::PayloadSummary;

/// Decoded payload column
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Empty column
    None,
    /// Not JSON, or JSON that is not an object
    Malformed(String),
    Decoded(DecodedPayload),
}

/// Discriminator resolved at decode time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    Known(EntityKind),
    /// Missing or unknown `object_name`; empty when it was missing
    Unrecognized(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    pub kind: ObjectKind,
    pub summary: PayloadSummary,
    /// Variant attributes, `None` when `data` is absent or not an object
    pub data: Option<Map<String, Value>>,
}

impl Payload {
    /// Header columns copied onto the activity row
    pub fn summary(&self) -> PayloadSummary {
        match self {
            Payload::Decoded(decoded) => decoded.summary.clone(),
            Payload::None | Payload::Malformed(_) => PayloadSummary::default(),
        }
    }
}

/// Decode the raw payload column
pub fn decode(raw: &str) -> Payload {
    if raw.trim().is_empty() {
        return Payload::None;
    }

    let mut document = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(document)) => document,
        Ok(other) => {
            return Payload::Malformed(format!("expected a JSON object, got {}", json_type(&other)))
        },
        Err(e) => return Payload::Malformed(e.to_string()),
    };

    let object_name = document
        .get("object_name")
        .and_then(Value::as_str)
        .map(str::to_string);

    let kind = match object_name.as_deref().and_then(EntityKind::from_object_name) {
        Some(kind) => ObjectKind::Known(kind),
        None => ObjectKind::Unrecognized(object_name.clone().unwrap_or_default()),
    };

    let summary = PayloadSummary {
        object_name,
        number_of_aligners: count(&document, "number_of_aligners"),
        number_of_refinements: count(&document, "number_of_refinements"),
        number_of_retainers: count(&document, "number_of_retainers"),
    };

    let data = match document.remove("data") {
        Some(Value::Object(data)) => Some(data),
        _ => None,
    };

    Payload::Decoded(DecodedPayload {
        kind,
        summary,
        data,
    })
}

fn count(document: &Map<String, Value>, key: &str) -> Option<i64> {
    match document.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => coerce::parse_integer(s),
        _ => None,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Typed accessors over a variant's `data` attributes.
///
/// Missing and `null` attributes are always `None`. Only values of the wrong JSON
/// type are reported, as [`ChildImportError::InvalidField`].
#[derive(Debug, Clone, Copy)]
pub struct Attrs<'a> {
    data: &'a Map<String, Value>,
}

impl<'a> Attrs<'a> {
    pub fn new(data: &'a Map<String, Value>) -> Self {
        Self { data }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.data.get(key).filter(|v| !v.is_null())
    }

    /// The child's own key
    pub fn id(&self) -> Result<i64, ChildImportError> {
        match self.int("id") {
            Ok(Some(id)) => Ok(id),
            Ok(None) | Err(_) => Err(ChildImportError::MissingId),
        }
    }

    pub fn int(&self, key: &'static str) -> Result<Option<i64>, ChildImportError> {
        match self.get(key) {
            None => Ok(None),
            Some(v @ Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| invalid(key, "an integer", v)),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(v @ Value::String(s)) => coerce::parse_integer(s)
                .map(Some)
                .ok_or_else(|| invalid(key, "an integer", v)),
            Some(other) => Err(invalid(key, "an integer", other)),
        }
    }

    pub fn text(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => coerce::parse_text(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(other.to_string()),
        }
    }

    pub fn flag(&self, key: &'static str) -> Result<Option<bool>, ChildImportError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => Ok(coerce::parse_boolean(s)),
            Some(other) => Err(invalid(key, "a boolean", other)),
        }
    }

    /// Exact decimal. Numbers keep their textual form; unparseable strings are `None`.
    pub fn decimal(&self, key: &'static str) -> Result<Option<BigDecimal>, ChildImportError> {
        match self.get(key) {
            None => Ok(None),
            Some(v @ Value::Number(n)) => BigDecimal::from_str(&n.to_string())
                .map(Some)
                .map_err(|_| invalid(key, "a decimal", v)),
            Some(Value::String(s)) => Ok(coerce::parse_decimal(s)),
            Some(other) => Err(invalid(key, "a decimal", other)),
        }
    }

    pub fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get(key)
            .and_then(Value::as_str)
            .and_then(coerce::parse_iso_timestamp)
    }

    /// Nested sub-document, normalized to JSON.
    ///
    /// Sub-documents usually arrive as JSON text; text that does not parse is kept
    /// as a JSON string rather than dropped.
    pub fn document(&self, key: &str) -> Option<Value> {
        match self.get(key)? {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(
                serde_json::from_str::<Value>(s).unwrap_or_else(|_| Value::String(s.clone())),
            ),
            other => Some(other.clone()),
        }
    }
}

fn invalid(field: &'static str, expected: &'static str, found: &Value) -> ChildImportError {
    ChildImportError::InvalidField {
        field,
        expected,
        found: found.to_string(),
    }
}
