//! OCR service client
//!
//! Posts one document as multipart form data (`prompt`, `model`, `file`) and
//! returns the service's JSON body untouched. The service sometimes reports
//! failures inside a 200 response (`{"status_code": 500, "detail": {...}}`);
//! those are treated as errors too.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ExtractionError, RawExtraction, RawExtractor, UploadedDocument};
use crate::config::OcrConfig;

/// OCR service client
pub struct OcrClient {
    http_client: Client,
    url: String,
    /// Bearer token, present only when auth is enabled and a key is set
    bearer: Option<String>,
    prompt: String,
    model: String,
    timeout: Duration,
}

impl OcrClient {
    pub fn new(config: &OcrConfig) -> Result<Self, ExtractionError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExtractionError::NotConfigured(format!("HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            url: config.url.clone(),
            bearer: config
                .api_key
                .clone()
                .filter(|_| config.send_auth),
            prompt: config.prompt.clone(),
            model: config.model.clone(),
            timeout: config.timeout,
        })
    }

    fn form_for(&self, document: &UploadedDocument) -> Result<Form, ExtractionError> {
        let file = Part::bytes(document.bytes.clone())
            .file_name(document.file_name.clone())
            .mime_str(&document.mime_type)
            .map_err(|e| ExtractionError::Parse(format!("Invalid MIME type: {}", e)))?;
        Ok(Form::new()
            .text("prompt", self.prompt.clone())
            .text("model", self.model.clone())
            .part("file", file))
    }
}

/// Error embedded in a success response, if any
fn embedded_error(body: &Value) -> Option<String> {
    let status = body.get("status_code").and_then(Value::as_u64)?;
    if status < 400 {
        return None;
    }
    let detail = body.get("detail").cloned().unwrap_or(Value::Null);
    let message = detail
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| detail.to_string());
    Some(format!("OCR service error ({}): {}", status, message))
}

#[async_trait]
impl RawExtractor for OcrClient {
    fn name(&self) -> &'static str {
        "ocr-service"
    }

    async fn extract_raw(
        &self,
        document: &UploadedDocument,
    ) -> Result<RawExtraction, ExtractionError> {
        info!(
            file = %document.file_name,
            mime = %document.mime_type,
            size = document.size(),
            url = %self.url,
            "Sending document to OCR service"
        );

        let mut request = self.http_client.post(&self.url).multipart(self.form_for(document)?);
        if let Some(key) = &self.bearer {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExtractionError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExtractionError::from_reqwest(e, self.timeout))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "OCR service returned error status");
            return Err(ExtractionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = serde_json::from_str(&body)
            .map_err(|e| ExtractionError::Parse(format!("OCR response is not JSON: {}", e)))?;

        if let Some(message) = embedded_error(&json) {
            return Err(ExtractionError::Service(message));
        }

        debug!(file = %document.file_name, "OCR response received");
        Ok(RawExtraction(json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_embedded_error_detection() {
        assert_eq!(embedded_error(&json!({"response": {}})), None);
        assert_eq!(embedded_error(&json!({"status_code": 200})), None);
        assert_eq!(
            embedded_error(&json!({"status_code": 500, "detail": {"error": "model overloaded"}})),
            Some("OCR service error (500): model overloaded".to_string())
        );
        assert_eq!(
            embedded_error(&json!({"status_code": 422, "detail": "bad file"})),
            Some("OCR service error (422): \"bad file\"".to_string())
        );
    }
}
