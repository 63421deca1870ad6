//! Per-file extraction orchestration
//!
//! Files are processed sequentially in upload order. Each file tries the
//! direct path first; any error falls through to raw OCR + mapping. A file
//! whose both paths fail contributes no record and never stops the batch.

use onboard_common::reconcile::{reconcile, ReconcileError};
use onboard_common::record::{ProcessingMethod, RecordMeta};
use onboard_common::CanonicalRecord;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::{
    DirectExtractor, ExtractionError, FieldMapper, GeminiClient, GeminiDirectExtractor,
    GeminiMapper, OcrClient, RawExtractor, UploadedDocument,
};
use crate::config::ServiceConfig;

/// A file that produced no record
#[derive(Debug)]
pub struct FileFailure {
    pub file_name: String,
    pub error: ExtractionError,
}

/// Result of running the pipeline over one upload batch
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Successful per-file records, upload order
    pub records: Vec<CanonicalRecord>,
    pub failures: Vec<FileFailure>,
    pub total_files: usize,
}

impl BatchOutcome {
    /// Reconcile the successful records into one
    pub fn into_merged(self) -> Result<CanonicalRecord, ReconcileError> {
        reconcile(self.records, self.total_files)
    }
}

/// Direct extraction with two-step fallback
pub struct ExtractionPipeline {
    direct: Arc<dyn DirectExtractor>,
    raw: Arc<dyn RawExtractor>,
    mapper: Arc<dyn FieldMapper>,
}

impl ExtractionPipeline {
    pub fn new(
        direct: Arc<dyn DirectExtractor>,
        raw: Arc<dyn RawExtractor>,
        mapper: Arc<dyn FieldMapper>,
    ) -> Self {
        Self { direct, raw, mapper }
    }

    /// Wire up the OCR and Gemini clients from configuration
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ExtractionError> {
        let gemini = Arc::new(GeminiClient::new(&config.gemini)?);
        Ok(Self::new(
            Arc::new(GeminiDirectExtractor::new(
                gemini.clone(),
                config.gemini.direct_timeout,
            )),
            Arc::new(OcrClient::new(&config.ocr)?),
            Arc::new(GeminiMapper::new(gemini, config.gemini.mapping_timeout)),
        ))
    }

    /// Extract one file: direct first, then raw OCR + mapping
    pub async fn process_file(
        &self,
        document: &UploadedDocument,
    ) -> Result<CanonicalRecord, ExtractionError> {
        let started = Instant::now();

        let direct_error = match self.direct.extract_direct(document).await {
            Ok(mut record) => {
                record.meta = RecordMeta::extracted(ProcessingMethod::Direct);
                info!(
                    file = %document.file_name,
                    extractor = self.direct.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "File extracted"
                );
                return Ok(record);
            }
            Err(e) => e,
        };

        warn!(
            file = %document.file_name,
            extractor = self.direct.name(),
            error = %direct_error,
            "Direct extraction failed, falling back to OCR + mapping"
        );

        let raw = self.raw.extract_raw(document).await?;
        let mut record = self.mapper.map_raw(&raw).await?;
        record.meta = RecordMeta::extracted(ProcessingMethod::TwoStepFallback);
        info!(
            file = %document.file_name,
            ocr = self.raw.name(),
            mapper = self.mapper.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "File extracted via fallback"
        );
        Ok(record)
    }

    /// Run every file of a batch; failures are collected, not propagated
    pub async fn process_batch(&self, documents: &[UploadedDocument]) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            total_files: documents.len(),
            ..Default::default()
        };

        for (index, document) in documents.iter().enumerate() {
            info!(
                file = %document.file_name,
                position = index + 1,
                total = documents.len(),
                "Processing document"
            );
            match self.process_file(document).await {
                Ok(record) => outcome.records.push(record),
                Err(error) => {
                    warn!(file = %document.file_name, error = %error, "Dropping document, extraction failed");
                    outcome.failures.push(FileFailure {
                        file_name: document.file_name.clone(),
                        error,
                    });
                }
            }
        }

        info!(
            succeeded = outcome.records.len(),
            failed = outcome.failures.len(),
            total = outcome.total_files,
            "Batch extraction finished"
        );
        outcome
    }
}
