//! Document pre-fill endpoint
//!
//! `POST /api/v2/process-document` accepts 1 to 5 files under the multipart
//! field `documents` (or `document`), runs each through the extraction
//! pipeline and returns the reconciled record. When every file fails the
//! response is still 200 and tells the client to fall back to manual entry.

use axum::{
    extract::{multipart::Field, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use onboard_common::reconcile::ReconcileError;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::UploadLimits;
use crate::error::{ApiError, ApiResult};
use crate::extraction::{BatchOutcome, UploadedDocument};
use crate::AppState;

const FILE_FIELDS: &[&str] = &["documents", "document"];
const OCTET_STREAM: &str = "application/octet-stream";
pub const MANUAL_ENTRY_MESSAGE: &str = "OCR processing failed. Please enter data manually.";

/// Pick the MIME type to trust for an upload
///
/// The declared type wins unless it is missing or generic, in which case the
/// bytes are sniffed. Parameters such as `; charset=utf-8` are dropped.
/// Undetectable UTF-8 content is treated as plain text.
pub fn resolve_mime_type(declared: Option<&str>, bytes: &[u8]) -> String {
    let essence = declared.map(|d| d.split(';').next().unwrap_or(d).trim());
    match essence {
        Some(declared) if !declared.is_empty() && !declared.eq_ignore_ascii_case(OCTET_STREAM) => {
            declared.to_ascii_lowercase()
        }
        _ => match infer::get(bytes) {
            Some(kind) => kind.mime_type().to_string(),
            None if !bytes.is_empty() && std::str::from_utf8(bytes).is_ok() => {
                "text/plain".to_string()
            }
            None => OCTET_STREAM.to_string(),
        },
    }
}

async fn read_document(field: Field<'_>, limits: &UploadLimits) -> ApiResult<UploadedDocument> {
    let file_name = field.file_name().unwrap_or("upload").to_string();
    let declared = field.content_type().map(str::to_string);

    let bytes = field.bytes().await.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(format!("{} exceeds the upload limit", file_name))
        } else {
            ApiError::BadRequest(format!("Malformed upload: {}", e.body_text()))
        }
    })?;

    if bytes.len() > limits.max_file_size {
        return Err(ApiError::PayloadTooLarge(format!(
            "{} is {} bytes; the limit is {} bytes",
            file_name,
            bytes.len(),
            limits.max_file_size
        )));
    }

    let mime_type = resolve_mime_type(declared.as_deref(), &bytes);
    if !limits.is_allowed(&mime_type) {
        return Err(ApiError::BadRequest(format!(
            "Invalid file type for {}: {}. Allowed: {}",
            file_name,
            mime_type,
            limits.allowed_types.join(", ")
        )));
    }

    Ok(UploadedDocument::new(file_name, mime_type, bytes.to_vec()))
}

/// Collect the uploaded files, enforcing count, size and type rules
pub async fn read_documents(
    mut multipart: Multipart,
    limits: &UploadLimits,
) -> ApiResult<Vec<UploadedDocument>> {
    let mut documents = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed upload: {}", e.body_text())))?
    {
        if !field.name().is_some_and(|name| FILE_FIELDS.contains(&name)) {
            continue;
        }
        if documents.len() == limits.max_files {
            return Err(ApiError::BadRequest(format!(
                "Too many files; at most {} per request",
                limits.max_files
            )));
        }
        documents.push(read_document(field, limits).await?);
    }

    if documents.is_empty() {
        return Err(ApiError::BadRequest("No file uploaded".to_string()));
    }
    Ok(documents)
}

fn failure_summary(outcome: &BatchOutcome) -> String {
    outcome
        .failures
        .iter()
        .map(|failure| format!("{}: {}", failure.file_name, failure.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// POST /api/v2/process-document
pub async fn process_document(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let documents = read_documents(multipart, &state.uploads).await?;
    info!(files = documents.len(), "Document batch received");

    let outcome = state.pipeline.process_batch(&documents).await;
    let summary = failure_summary(&outcome);

    match outcome.into_merged() {
        Ok(merged) => Ok(Json(merged.to_json())),
        Err(ReconcileError::AllSourcesFailed { total_files }) => {
            warn!(total_files, errors = %summary, "No document could be extracted");
            state
                .record_error(format!("Extraction failed for all {} file(s)", total_files))
                .await;
            Ok(Json(json!({
                "_ocrFailed": true,
                "_ocrError": summary,
                "message": MANUAL_ENTRY_MESSAGE,
                "_filesProcessed": 0,
                "_totalFiles": total_files,
            })))
        }
    }
}

pub fn document_routes() -> Router<AppState> {
    Router::new().route("/process-document", post(process_document))
}
