//! Canonical Record: the business record every layer converges on
//!
//! A record is a set of schema fields plus a small block of typed bookkeeping
//! ("meta") values. On the wire it is one flat JSON object in which meta keys
//! carry the reserved `_` prefix:
//!
//! ```json
//! { "_ocrSuccess": true, "_ocrTimestamp": "2025-01-01T10:00:00Z",
//!   "NOMBRE": "Acme GmbH", "CALLE": "Stadtring Nordhorn", "ABIERTO_COMO_CLIENTE": false }
//! ```
//!
//! Values arriving from outside (extractors, the browser) go through
//! [`CanonicalRecord::from_json`], which coerces known fields to their schema
//! kind and passes unknown business fields through untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::schema::{self, FieldDefault, FieldKind, FIELD_SCHEMA};

/// Wire keys of the meta namespace
pub mod meta_keys {
    pub const OCR_SUCCESS: &str = "_ocrSuccess";
    pub const OCR_TIMESTAMP: &str = "_ocrTimestamp";
    pub const OCR_ERROR: &str = "_ocrError";
    pub const OCR_FAILED: &str = "_ocrFailed";
    pub const PROCESSING_METHOD: &str = "_processingMethod";
    pub const FILES_PROCESSED: &str = "_filesProcessed";
    pub const TOTAL_FILES: &str = "_totalFiles";
}

/// Record errors
#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("Record must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Which extraction path produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    /// Single call to the combined OCR + mapping service
    Direct,
    /// Raw OCR followed by a separate mapping pass
    TwoStepFallback,
}

impl ProcessingMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingMethod::Direct => "direct",
            ProcessingMethod::TwoStepFallback => "two_step_fallback",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(ProcessingMethod::Direct),
            "two_step_fallback" => Some(ProcessingMethod::TwoStepFallback),
            _ => None,
        }
    }
}

/// Pipeline bookkeeping carried alongside the business fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordMeta {
    pub success: Option<bool>,
    pub timestamp: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Whole batch failed, form is in manual-entry mode
    pub failed: Option<bool>,
    pub processing_method: Option<ProcessingMethod>,
    /// Present on merged records only
    pub files_processed: Option<usize>,
    /// Present on merged records only
    pub total_files: Option<usize>,
}

impl RecordMeta {
    /// Meta for a record that a single extraction just produced
    pub fn extracted(method: ProcessingMethod) -> Self {
        Self {
            success: Some(true),
            timestamp: Some(Utc::now()),
            processing_method: Some(method),
            ..Default::default()
        }
    }

    fn absorb(&mut self, key: &str, value: &Value) {
        match key {
            meta_keys::OCR_SUCCESS => self.success = value.as_bool(),
            meta_keys::OCR_FAILED => self.failed = value.as_bool(),
            meta_keys::OCR_ERROR => {
                self.error = value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
            }
            meta_keys::OCR_TIMESTAMP => {
                self.timestamp = value
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
            }
            meta_keys::PROCESSING_METHOD => {
                self.processing_method = value.as_str().and_then(ProcessingMethod::parse)
            }
            meta_keys::FILES_PROCESSED => {
                self.files_processed = value.as_u64().map(|n| n as usize)
            }
            meta_keys::TOTAL_FILES => self.total_files = value.as_u64().map(|n| n as usize),
            other => debug!(key = other, "Ignoring unrecognised meta field"),
        }
    }

    fn write_into(&self, map: &mut Map<String, Value>) {
        if let Some(success) = self.success {
            map.insert(meta_keys::OCR_SUCCESS.into(), Value::Bool(success));
        }
        if let Some(ts) = self.timestamp {
            map.insert(meta_keys::OCR_TIMESTAMP.into(), Value::String(ts.to_rfc3339()));
        }
        if let Some(error) = &self.error {
            map.insert(meta_keys::OCR_ERROR.into(), Value::String(error.clone()));
        }
        if let Some(failed) = self.failed {
            map.insert(meta_keys::OCR_FAILED.into(), Value::Bool(failed));
        }
        if let Some(method) = self.processing_method {
            map.insert(
                meta_keys::PROCESSING_METHOD.into(),
                Value::String(method.as_str().into()),
            );
        }
        if let Some(n) = self.files_processed {
            map.insert(meta_keys::FILES_PROCESSED.into(), Value::from(n));
        }
        if let Some(n) = self.total_files {
            map.insert(meta_keys::TOTAL_FILES.into(), Value::from(n));
        }
    }
}

/// A single business field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Text(String),
    /// Unknown field passed through from an extractor as-is
    Opaque(Value),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    /// Empty/absent for reconciliation purposes.
    ///
    /// `Flag(false)` counts as unset so a later `true` can fill it.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Flag(flag) => !flag,
            FieldValue::Text(text) => text.is_empty(),
            FieldValue::Opaque(value) => match value {
                Value::Null => true,
                Value::Bool(b) => !b,
                Value::String(s) => s.is_empty(),
                Value::Array(items) => items.is_empty(),
                Value::Object(entries) => entries.is_empty(),
                Value::Number(_) => false,
            },
        }
    }

    /// Length used by the "longer wins" rule; `None` when the value has no length
    pub fn char_len(&self) -> Option<usize> {
        match self {
            FieldValue::Text(text) => Some(text.chars().count()),
            FieldValue::Opaque(Value::String(s)) => Some(s.chars().count()),
            FieldValue::Opaque(Value::Array(items)) => Some(items.len()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            FieldValue::Opaque(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FieldValue::Flag(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Flag(flag) => Value::Bool(*flag),
            FieldValue::Text(text) => Value::String(text.clone()),
            FieldValue::Opaque(value) => value.clone(),
        }
    }
}

/// The Canonical Record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct CanonicalRecord {
    pub meta: RecordMeta,
    fields: BTreeMap<String, FieldValue>,
}

impl CanonicalRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from untrusted JSON, coercing known fields to their kind.
    ///
    /// Numbers become text, arrays of scalars are joined with `", "`, `null`
    /// means absent. Values that cannot be represented are dropped with a
    /// warning rather than failing the whole record.
    pub fn from_json(value: Value) -> Result<Self, RecordError> {
        let map = match value {
            Value::Object(map) => map,
            other => return Err(RecordError::NotAnObject(json_type_name(&other))),
        };

        let mut record = CanonicalRecord::new();
        for (key, value) in map {
            if schema::is_meta_key(&key) {
                record.meta.absorb(&key, &value);
                continue;
            }
            if value.is_null() {
                continue;
            }
            match schema::field(&key) {
                Some(spec) => match coerce(spec.kind, value) {
                    Ok(coerced) => {
                        record.fields.insert(key, coerced);
                    }
                    Err(reason) => warn!(field = %key, reason = %reason, "Dropping field value"),
                },
                None => {
                    debug!(field = %key, "Passing through unknown field");
                    record.fields.insert(key, FieldValue::Opaque(value));
                }
            }
        }
        Ok(record)
    }

    /// Flat JSON object with meta keys first
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        self.meta.write_into(&mut map);
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.to_json());
        }
        Value::Object(map)
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Text value of a field, `None` if absent or not textual
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(FieldValue::as_text)
    }

    /// Text value of a field, empty string if absent
    pub fn text_or_empty(&self, name: &str) -> &str {
        self.text(name).unwrap_or("")
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.fields.get(name).and_then(FieldValue::as_flag)
    }

    pub fn is_empty_field(&self, name: &str) -> bool {
        self.fields.get(name).map_or(true, FieldValue::is_empty)
    }

    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn set_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.set(name, FieldValue::Text(value.into()));
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    /// Business fields in name order (meta excluded)
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Number of business fields holding a non-empty value
    pub fn filled_count(&self) -> usize {
        self.fields.values().filter(|v| !v.is_empty()).count()
    }

    /// Fill schema defaults into absent or empty fields
    pub fn apply_defaults(&mut self) {
        for spec in FIELD_SCHEMA {
            let Some(default) = spec.default else { continue };
            let missing = match self.fields.get(spec.name) {
                None => true,
                Some(FieldValue::Text(text)) => text.is_empty(),
                Some(_) => false,
            };
            if missing {
                let value = match default {
                    FieldDefault::Text(text) => FieldValue::text(text),
                    FieldDefault::Flag(flag) => FieldValue::Flag(flag),
                };
                self.fields.insert(spec.name.to_string(), value);
            }
        }
    }

    /// Overlay every field present in `other` onto this record (user edit semantics)
    pub fn overlay(&mut self, other: &CanonicalRecord) {
        for (key, value) in &other.fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }
}

impl TryFrom<Value> for CanonicalRecord {
    type Error = RecordError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        CanonicalRecord::from_json(value)
    }
}

impl From<CanonicalRecord> for Value {
    fn from(record: CanonicalRecord) -> Self {
        record.to_json()
    }
}

/// Coerce an untrusted JSON value to the representation of a schema kind
fn coerce(kind: FieldKind, value: Value) -> Result<FieldValue, String> {
    match kind {
        FieldKind::Flag => match value {
            Value::Bool(b) => Ok(FieldValue::Flag(b)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(FieldValue::Flag(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") || s.is_empty() => {
                Ok(FieldValue::Flag(false))
            }
            Value::Number(n) if n.as_i64() == Some(0) => Ok(FieldValue::Flag(false)),
            Value::Number(n) if n.as_i64() == Some(1) => Ok(FieldValue::Flag(true)),
            other => Err(format!("expected boolean, got {}", json_type_name(&other))),
        },
        FieldKind::Text | FieldKind::Email | FieldKind::Date | FieldKind::Decimal => {
            scalar_text(&value)
                .or_else(|| match &value {
                    Value::Array(items) => items
                        .iter()
                        .map(scalar_text)
                        .collect::<Option<Vec<_>>>()
                        .map(|parts| parts.join(", ")),
                    _ => None,
                })
                .map(FieldValue::Text)
                .ok_or_else(|| format!("expected text, got {}", json_type_name(&value)))
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(format_number(n)),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Render a JSON number as decimal text; integral floats lose the `.0`
pub fn format_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
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
    use serde_json::json;

    #[test]
    fn test_from_json_coerces_known_fields() {
        let record = CanonicalRecord::from_json(json!({
            "NOMBRE": "Acme GmbH",
            "CREDITO_SOLICITADO_EUROS": 650000,
            "CERTIFICADOS": ["IATF 16949", "ISO 9001"],
            "ABIERTO_COMO_CLIENTE": "true",
            "CALLE": null,
        }))
        .unwrap();

        assert_eq!(record.text("NOMBRE"), Some("Acme GmbH"));
        assert_eq!(record.text("CREDITO_SOLICITADO_EUROS"), Some("650000"));
        assert_eq!(record.text("CERTIFICADOS"), Some("IATF 16949, ISO 9001"));
        assert_eq!(record.flag("ABIERTO_COMO_CLIENTE"), Some(true));
        assert!(record.get("CALLE").is_none());
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let record = CanonicalRecord::from_json(json!({
            "NEW_FIELD": {"nested": 1},
            "_somethingInternal": "dropped",
        }))
        .unwrap();

        assert_eq!(
            record.get("NEW_FIELD"),
            Some(&FieldValue::Opaque(json!({"nested": 1})))
        );
        assert_eq!(record.field_count(), 1);
    }

    #[test]
    fn test_unrepresentable_value_dropped() {
        let record = CanonicalRecord::from_json(json!({
            "NOMBRE": {"first": "x"},
            "ABIERTO_COMO_CLIENTE": "maybe",
            "CIF": "DE123",
        }))
        .unwrap();

        assert!(record.get("NOMBRE").is_none());
        assert!(record.get("ABIERTO_COMO_CLIENTE").is_none());
        assert_eq!(record.text("CIF"), Some("DE123"));
    }

    #[test]
    fn test_meta_parsing_is_lenient() {
        let record = CanonicalRecord::from_json(json!({
            "_ocrSuccess": true,
            "_ocrTimestamp": "",
            "_processingMethod": "two_step_fallback",
            "_totalFiles": 3,
        }))
        .unwrap();

        assert_eq!(record.meta.success, Some(true));
        assert_eq!(record.meta.timestamp, None);
        assert_eq!(
            record.meta.processing_method,
            Some(ProcessingMethod::TwoStepFallback)
        );
        assert_eq!(record.meta.total_files, Some(3));
        assert_eq!(record.field_count(), 0);
    }

    #[test]
    fn test_rejects_non_object() {
        assert_eq!(
            CanonicalRecord::from_json(json!([1, 2])),
            Err(RecordError::NotAnObject("array"))
        );
    }

    #[test]
    fn test_serde_wire_shape_is_flat() {
        let mut record = CanonicalRecord::new();
        record.meta = RecordMeta::extracted(ProcessingMethod::Direct);
        record.set_text("CIF", "DE811");

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["CIF"], "DE811");
        assert_eq!(value["_ocrSuccess"], true);
        assert_eq!(value["_processingMethod"], "direct");

        let parsed: CanonicalRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_apply_defaults_only_fills_gaps() {
        let mut record = CanonicalRecord::new();
        record.set_text("MONEDA", "USD");
        record.set_text("ESTADO_APROBACION", "");
        record.apply_defaults();

        assert_eq!(record.text("MONEDA"), Some("USD"));
        assert_eq!(record.text("ESTADO_APROBACION"), Some("pending"));
        assert_eq!(record.flag("ABIERTO_COMO_CLIENTE"), Some(false));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(&serde_json::Number::from(650000)), "650000");
        let f = serde_json::Number::from_f64(650000.0).unwrap();
        assert_eq!(format_number(&f), "650000");
        let f = serde_json::Number::from_f64(1234.5).unwrap();
        assert_eq!(format_number(&f), "1234.5");
    }
}
