//! Field validation against the Field Schema
//!
//! Used twice: per step while the user walks the form, and on the whole record
//! right before it is persisted. Errors are collected, never fail-fast.

use chrono::{DateTime, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::record::{CanonicalRecord, FieldValue};
use crate::schema::{self, FieldKind, FieldSpec, FormStep, FIELD_SCHEMA};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

// 650000 / 650000.00 / 650000,00 / 650.000,00 / -12
static PLAIN_AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d+([.,]\d+)?$").expect("valid amount regex"));
static GROUPED_AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d{1,3}(\.\d{3})+(,\d+)?$").expect("valid amount regex"));

/// One field-level violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// All violations found in a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Validation failed: {} field error(s)", .0.len())]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }
}

/// Check one field value against its spec; `None` when valid
pub fn validate_field(spec: &FieldSpec, value: Option<&FieldValue>) -> Option<String> {
    let text = match value {
        None => None,
        Some(FieldValue::Flag(_)) if spec.kind == FieldKind::Flag => return None,
        Some(FieldValue::Flag(_)) => return Some("Expected text".to_string()),
        Some(_) if spec.kind == FieldKind::Flag => return Some("Expected true or false".to_string()),
        Some(other) => match other.as_text() {
            Some(text) => Some(text),
            None => return Some("Expected text".to_string()),
        },
    };

    let text = text.unwrap_or("");
    if text.trim().is_empty() {
        return spec.required.then(|| format!("{} is required", spec.name));
    }

    match spec.kind {
        FieldKind::Email if !EMAIL_RE.is_match(text.trim()) => Some("Invalid email".to_string()),
        FieldKind::Date if !is_valid_date(text) => {
            Some("Invalid date, expected YYYY-MM-DD".to_string())
        }
        FieldKind::Decimal if !is_valid_amount(text) => Some("Invalid amount".to_string()),
        _ => None,
    }
}

fn is_valid_date(text: &str) -> bool {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok() || DateTime::parse_from_rfc3339(text).is_ok()
}

fn is_valid_amount(text: &str) -> bool {
    let trimmed = text
        .trim()
        .trim_end_matches("EUR")
        .trim_end_matches('€')
        .trim();
    PLAIN_AMOUNT_RE.is_match(trimmed) || GROUPED_AMOUNT_RE.is_match(trimmed)
}

fn collect<'a>(
    record: &CanonicalRecord,
    specs: impl Iterator<Item = &'a FieldSpec>,
) -> Vec<FieldError> {
    specs
        .filter_map(|spec| {
            validate_field(spec, record.get(spec.name)).map(|msg| FieldError::new(spec.name, msg))
        })
        .collect()
}

/// Validate only the fields owned by one form step
pub fn validate_step(record: &CanonicalRecord, step: FormStep) -> Vec<FieldError> {
    collect(record, step.fields())
}

/// Validate every schema field of the record
pub fn validate_record(record: &CanonicalRecord) -> Result<(), ValidationErrors> {
    let errors = collect(record, FIELD_SCHEMA.iter());
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

/// Prepare a submitted record for storage.
///
/// Applies schema defaults, drops fields the schema does not know, then
/// validates the result.
pub fn validate_submission(mut record: CanonicalRecord) -> Result<CanonicalRecord, ValidationErrors> {
    record.apply_defaults();

    let unknown: Vec<String> = record
        .fields()
        .filter(|(name, _)| schema::field(name).is_none())
        .map(|(name, _)| name.to_string())
        .collect();
    for name in unknown {
        debug!(field = %name, "Dropping field not in schema before persistence");
        record.remove(&name);
    }

    validate_record(&record)?;
    Ok(record)
}
