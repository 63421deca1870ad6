//! # Onboard Common Library
//!
//! Shared code for the customer onboarding service:
//! - Field Schema and Canonical Record
//! - Reconciliation of per-document extraction records
//! - Field validation and the multi-step Form Session
//! - Configuration loading

pub mod config;
pub mod error;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod session;
pub mod validation;

pub use error::{Error, Result};
pub use reconcile::{reconcile, ReconcileError};
pub use record::{CanonicalRecord, FieldValue, ProcessingMethod, RecordError, RecordMeta};
pub use schema::{FieldKind, FieldSpec, FormStep, FIELD_SCHEMA};
pub use session::{ApplicationType, FormSession, StepOutcome};
pub use validation::{FieldError, ValidationErrors};
