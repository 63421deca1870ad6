//! Form Session: state of one onboarding form being filled in
//!
//! The session is strictly linear over the six [`FormStep`]s. It holds the
//! working record (seeded from extraction, overwritten by user edits) and the
//! validation errors of the step the user last tried to leave.

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::record::{CanonicalRecord, FieldValue, RecordError};
use crate::schema::{self, FormStep};
use crate::validation::{self, FieldError};

/// Kind of request the form is opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplicationType {
    /// New customer registration
    AltaClientes,
    /// Master data change
    ModificacionMaestro,
    /// Financial data change
    ModificacionFinanciera,
}

impl ApplicationType {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationType::AltaClientes => "alta-clientes",
            ApplicationType::ModificacionMaestro => "modificacion-maestro",
            ApplicationType::ModificacionFinanciera => "modificacion-financiera",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "alta-clientes" => Some(ApplicationType::AltaClientes),
            "modificacion-maestro" => Some(ApplicationType::ModificacionMaestro),
            "modificacion-financiera" => Some(ApplicationType::ModificacionFinanciera),
            _ => None,
        }
    }

    /// Only new-customer registration has a form so far
    pub fn supports_form(self) -> bool {
        matches!(self, ApplicationType::AltaClientes)
    }
}

/// Result of trying to leave the current step forward
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Moved on to this step
    Moved(FormStep),
    /// Stayed; these fields need fixing first
    Blocked(Vec<FieldError>),
    /// Last step passed; the record is ready for submission
    Ready(CanonicalRecord),
}

/// Client-held form state
#[derive(Debug, Clone)]
pub struct FormSession {
    application_type: ApplicationType,
    record: CanonicalRecord,
    current_step: FormStep,
    errors: Vec<FieldError>,
    manual_entry: bool,
}

impl FormSession {
    pub fn new(application_type: ApplicationType) -> Self {
        Self {
            application_type,
            record: Self::seed_record(),
            current_step: FormStep::RequestData,
            errors: Vec::new(),
            manual_entry: false,
        }
    }

    fn seed_record() -> CanonicalRecord {
        let mut record = CanonicalRecord::new();
        record.apply_defaults();
        record.set_text(
            "FECHA_SOLICITUD_ALTA",
            Local::now().date_naive().format("%Y-%m-%d").to_string(),
        );
        record
    }

    pub fn application_type(&self) -> ApplicationType {
        self.application_type
    }

    pub fn record(&self) -> &CanonicalRecord {
        &self.record
    }

    pub fn current_step(&self) -> FormStep {
        self.current_step
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// True after a batch failed extraction entirely
    pub fn is_manual_entry(&self) -> bool {
        self.manual_entry
    }

    /// Seed the form with a merged extraction record
    pub fn apply_extraction(&mut self, merged: &CanonicalRecord) {
        self.record.overlay(merged);
        self.record.meta = merged.meta.clone();
        self.manual_entry = false;
        info!(
            fields = merged.field_count(),
            filled = merged.filled_count(),
            "Form pre-filled from documents"
        );
    }

    /// Switch to manual entry after every document failed
    pub fn apply_failure(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.record.meta.failed = Some(true);
        self.record.meta.success = Some(false);
        self.record.meta.error = Some(message.clone());
        self.manual_entry = true;
        info!(error = %message, "Document extraction failed, manual entry");
    }

    /// User edit of a single field
    pub fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), RecordError> {
        if schema::field(name).is_none() {
            return Err(RecordError::UnknownField(name.to_string()));
        }
        self.record.set(name, value);
        Ok(())
    }

    /// Validate the current step and move forward if it is clean
    pub fn advance(&mut self) -> StepOutcome {
        let errors = validation::validate_step(&self.record, self.current_step);
        if !errors.is_empty() {
            debug!(step = self.current_step.number(), errors = errors.len(), "Step blocked");
            self.errors = errors.clone();
            return StepOutcome::Blocked(errors);
        }
        self.errors.clear();

        match self.current_step.next() {
            Some(next) => {
                self.current_step = next;
                StepOutcome::Moved(next)
            }
            None => match validation::validate_submission(self.record.clone()) {
                Ok(record) => StepOutcome::Ready(record),
                Err(errors) => {
                    self.errors = errors.0.clone();
                    StepOutcome::Blocked(errors.0)
                }
            },
        }
    }

    /// Go back one step; stays on the first step
    pub fn back(&mut self) -> FormStep {
        if let Some(previous) = self.current_step.previous() {
            self.current_step = previous;
        }
        self.errors.clear();
        self.current_step
    }

    /// Discard everything and start over
    pub fn reset(&mut self) {
        *self = FormSession::new(self.application_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ProcessingMethod, RecordMeta};

    fn walk_to(session: &mut FormSession, step: FormStep) {
        while session.current_step() != step {
            match session.advance() {
                StepOutcome::Moved(_) => {}
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }

    #[test]
    fn test_new_session_is_seeded() {
        let session = FormSession::new(ApplicationType::AltaClientes);
        assert_eq!(session.current_step(), FormStep::RequestData);
        assert_eq!(session.record().text("MONEDA"), Some("EUR"));
        assert!(session.record().text("FECHA_SOLICITUD_ALTA").is_some());
        assert!(session.errors().is_empty());
    }

    #[test]
    fn test_application_types() {
        assert!(ApplicationType::AltaClientes.supports_form());
        assert!(!ApplicationType::ModificacionMaestro.supports_form());
        assert_eq!(
            ApplicationType::parse("modificacion-financiera"),
            Some(ApplicationType::ModificacionFinanciera)
        );
        assert_eq!(ApplicationType::parse("other"), None);
    }

    #[test]
    fn test_advance_blocks_on_required_fields() {
        let mut session = FormSession::new(ApplicationType::AltaClientes);
        walk_to(&mut session, FormStep::GeneralData);

        match session.advance() {
            StepOutcome::Blocked(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected Blocked, got {:?}", other),
        }
        assert_eq!(session.current_step(), FormStep::GeneralData);

        session.set_field("NOMBRE", FieldValue::text("Acme")).unwrap();
        session.set_field("CIF", FieldValue::text("DE1")).unwrap();
        assert_eq!(session.advance(), StepOutcome::Moved(FormStep::SalesArea));
        assert!(session.errors().is_empty());
    }

    #[test]
    fn test_full_walk_reaches_ready() {
        let mut session = FormSession::new(ApplicationType::AltaClientes);
        let mut merged = CanonicalRecord::new();
        merged.meta = RecordMeta::extracted(ProcessingMethod::Direct);
        merged.set_text("NOMBRE", "Acme GmbH");
        merged.set_text("CIF", "DE811");
        session.apply_extraction(&merged);

        walk_to(&mut session, FormStep::ApprovedConditions);
        match session.advance() {
            StepOutcome::Ready(record) => {
                assert_eq!(record.text("NOMBRE"), Some("Acme GmbH"));
                assert_eq!(record.text("ESTADO_APROBACION"), Some("pending"));
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn test_user_edits_overwrite_extraction() {
        let mut session = FormSession::new(ApplicationType::AltaClientes);
        let mut merged = CanonicalRecord::new();
        merged.set_text("CALLE", "Stadtring");
        session.apply_extraction(&merged);
        session.set_field("CALLE", FieldValue::text("Ring")).unwrap();
        assert_eq!(session.record().text("CALLE"), Some("Ring"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut session = FormSession::new(ApplicationType::AltaClientes);
        assert_eq!(
            session.set_field("NOPE", FieldValue::text("x")),
            Err(RecordError::UnknownField("NOPE".into()))
        );
    }

    #[test]
    fn test_back_and_reset() {
        let mut session = FormSession::new(ApplicationType::AltaClientes);
        assert_eq!(session.back(), FormStep::RequestData);

        session.advance();
        assert_eq!(session.back(), FormStep::RequestData);

        session.apply_failure("OCR processing failed");
        assert!(session.is_manual_entry());
        assert_eq!(session.record().meta.failed, Some(true));

        session.set_field("NOMBRE", FieldValue::text("Acme")).unwrap();
        session.reset();
        assert!(!session.is_manual_entry());
        assert!(session.record().get("NOMBRE").is_none());
        assert_eq!(session.current_step(), FormStep::RequestData);
    }
}
