//! Document extraction: uploaded file bytes → Canonical Record
//!
//! Two paths exist per file:
//! - **Direct**: one generative-AI call reads the document and emits schema fields
//! - **Two-step fallback**: the OCR service returns a raw nested structure, then a
//!   mapper converts it to schema fields
//!
//! The [`pipeline`] drives both paths over an upload batch and hands the
//! per-file records to the reconciliation engine.

pub mod basic_mapper;
pub mod gemini;
pub mod ocr_client;
pub mod pipeline;

pub use basic_mapper::BasicMapper;
pub use gemini::{GeminiClient, GeminiDirectExtractor, GeminiMapper};
pub use ocr_client::OcrClient;
pub use pipeline::{BatchOutcome, ExtractionPipeline, FileFailure};

use async_trait::async_trait;
use onboard_common::CanonicalRecord;
use serde_json::Value;
use thiserror::Error;

/// One uploaded file, held in memory
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadedDocument {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Untyped OCR output, consumed only by a [`FieldMapper`]
#[derive(Debug, Clone, PartialEq)]
pub struct RawExtraction(pub Value);

/// Extraction error
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Transport failure (connect, DNS, TLS, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded its timeout
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Remote returned a non-success HTTP status
    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    /// Remote returned success but reported an error in the body
    #[error("Service error: {0}")]
    Service(String),

    /// Response could not be parsed into the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Extractor cannot run (missing credential, ...)
    #[error("Extractor not configured: {0}")]
    NotConfigured(String),
}

impl ExtractionError {
    /// Classify a reqwest failure
    pub fn from_reqwest(err: reqwest::Error, timeout: std::time::Duration) -> Self {
        if err.is_timeout() {
            ExtractionError::Timeout(timeout)
        } else if err.is_decode() {
            ExtractionError::Parse(err.to_string())
        } else {
            ExtractionError::Network(err.to_string())
        }
    }
}

/// Single-call extraction straight from document bytes
#[async_trait]
pub trait DirectExtractor: Send + Sync {
    /// Extractor name for logging
    fn name(&self) -> &'static str;

    async fn extract_direct(
        &self,
        document: &UploadedDocument,
    ) -> Result<CanonicalRecord, ExtractionError>;
}

/// Raw OCR of a document (first half of the two-step path)
#[async_trait]
pub trait RawExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract_raw(&self, document: &UploadedDocument)
        -> Result<RawExtraction, ExtractionError>;
}

/// Raw OCR structure → schema fields (second half of the two-step path)
#[async_trait]
pub trait FieldMapper: Send + Sync {
    fn name(&self) -> &'static str;

    async fn map_raw(&self, raw: &RawExtraction) -> Result<CanonicalRecord, ExtractionError>;
}
