//! Shared fixtures for onboard-api integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use onboard_api::config::UploadLimits;
use onboard_api::extraction::{
    BasicMapper, DirectExtractor, ExtractionError, ExtractionPipeline, RawExtraction,
    RawExtractor, UploadedDocument,
};
use onboard_api::AppState;
use onboard_common::CanonicalRecord;
use serde_json::Value;
use std::sync::Arc;

pub const BOUNDARY: &str = "onboard-test-boundary";

/// Direct extractor that parses each file's text as `FIELD=value` lines;
/// files whose name starts with `bad` fail
pub struct LineDirect;

#[async_trait]
impl DirectExtractor for LineDirect {
    fn name(&self) -> &'static str {
        "line-direct"
    }

    async fn extract_direct(
        &self,
        document: &UploadedDocument,
    ) -> Result<CanonicalRecord, ExtractionError> {
        if document.file_name.starts_with("bad") {
            return Err(ExtractionError::Service("unreadable scan".into()));
        }
        let text = String::from_utf8_lossy(&document.bytes);
        let mut record = CanonicalRecord::new();
        for line in text.lines() {
            if let Some((field, value)) = line.split_once('=') {
                record.set_text(field.trim(), value.trim());
            }
        }
        Ok(record)
    }
}

/// OCR stand-in that never succeeds
pub struct DownOcr;

#[async_trait]
impl RawExtractor for DownOcr {
    fn name(&self) -> &'static str {
        "down-ocr"
    }

    async fn extract_raw(
        &self,
        _document: &UploadedDocument,
    ) -> Result<RawExtraction, ExtractionError> {
        Err(ExtractionError::Network("connection refused".into()))
    }
}

pub fn fake_pipeline() -> ExtractionPipeline {
    ExtractionPipeline::new(Arc::new(LineDirect), Arc::new(DownOcr), Arc::new(BasicMapper))
}

/// Router over an in-memory database and the fake pipeline
pub async fn create_test_app() -> (axum::Router, sqlx::SqlitePool) {
    let pool = onboard_api::db::init_memory_pool()
        .await
        .expect("Failed to create in-memory database");
    let state = AppState::new(pool.clone(), fake_pipeline(), UploadLimits::default());
    (onboard_api::build_router(state), pool)
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("user-agent", "onboard-tests")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Multipart upload of `(field, file name, content type, content)` parts
pub fn multipart_request(parts: &[(&str, &str, &str, &str)]) -> Request<Body> {
    let mut body = Vec::new();
    for (field, file_name, content_type, content) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend_from_slice(content.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/v2/process-document")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}
