//! Generative-AI (Gemini `generateContent`) extraction and mapping
//!
//! Two uses of the same endpoint:
//! - [`GeminiDirectExtractor`]: document bytes inline → schema fields (direct path)
//! - [`GeminiMapper`]: raw OCR JSON → schema fields (second half of the fallback),
//!   degrading to [`BasicMapper`] when no key is configured or the call fails
//!
//! Both ask for `application/json` output at low temperature and read the
//! answer from `candidates[0].content.parts[0].text`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use onboard_common::schema::{FieldDefault, FieldKind, FIELD_SCHEMA};
use onboard_common::CanonicalRecord;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::basic_mapper::BasicMapper;
use super::{
    DirectExtractor, ExtractionError, FieldMapper, RawExtraction, UploadedDocument,
};
use crate::config::GeminiConfig;

const TEMPERATURE: f64 = 0.1;

/// Thin client for the `generateContent` endpoint
pub struct GeminiClient {
    http_client: Client,
    api_url: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Result<Self, ExtractionError> {
        let http_client = Client::builder()
            .build()
            .map_err(|e| ExtractionError::NotConfigured(format!("HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Send one request and return the parsed JSON answer
    pub async fn generate(&self, parts: Vec<Value>, timeout: Duration) -> Result<Value, ExtractionError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ExtractionError::NotConfigured("Gemini API key".to_string()))?;

        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": TEMPERATURE,
            },
        });

        let response = self
            .http_client
            .post(&self.api_url)
            .query(&[("key", key)])
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExtractionError::from_reqwest(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| ExtractionError::from_reqwest(e, timeout))?;
        parse_answer(&envelope)
    }
}

/// Pull the JSON answer out of a `generateContent` response
fn parse_answer(envelope: &Value) -> Result<Value, ExtractionError> {
    let text = envelope
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .ok_or_else(|| ExtractionError::Parse("No candidate text in Gemini response".to_string()))?;

    serde_json::from_str(strip_code_fence(text))
        .map_err(|e| ExtractionError::Parse(format!("Gemini answer is not JSON: {}", e)))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// Empty target object listing every schema field (defaults pre-filled)
fn target_template() -> Value {
    let mut map = Map::new();
    for spec in FIELD_SCHEMA {
        let value = match (spec.kind, spec.default) {
            (_, Some(FieldDefault::Text(text))) => Value::String(text.to_string()),
            (_, Some(FieldDefault::Flag(flag))) => Value::Bool(flag),
            (FieldKind::Flag, None) => Value::Bool(false),
            _ => Value::String(String::new()),
        };
        map.insert(spec.name.to_string(), value);
    }
    Value::Object(map)
}

const FIELD_RULES: &str = "\
Rules:
- Fill only fields whose values appear in the source; leave everything else as \"\".
- Split the house number off the street: CALLE holds the street, NUMERO the number.
- CIF is the VAT identification number.
- PERSONA_CONTACTO is the first managing director, APELLIDO their last name.
- Amount fields (*_EUROS, LIMITE_CREDITO) are plain numbers such as 650000.00.
- IDIOMA is DE for Germany, FR for France, otherwise ES.
- Dates use YYYY-MM-DD.
- Return only the JSON object, no commentary.";

fn direct_prompt() -> String {
    format!(
        "Read the attached customer document (business report, registration or \
         credit information) and fill this customer onboarding record.\n{}\n\nTarget:\n{}",
        FIELD_RULES,
        target_template()
    )
}

fn mapping_prompt(raw: &Value) -> String {
    format!(
        "Map this OCR output of a customer business report onto the customer \
         onboarding record.\n{}\n\nSource:\n{}\n\nTarget:\n{}",
        FIELD_RULES,
        serde_json::to_string_pretty(raw).unwrap_or_else(|_| raw.to_string()),
        target_template()
    )
}

fn record_from_answer(answer: Value) -> Result<CanonicalRecord, ExtractionError> {
    CanonicalRecord::from_json(answer).map_err(|e| ExtractionError::Parse(e.to_string()))
}

/// Direct path: one call with the document inline
pub struct GeminiDirectExtractor {
    client: Arc<GeminiClient>,
    timeout: Duration,
}

impl GeminiDirectExtractor {
    pub fn new(client: Arc<GeminiClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl DirectExtractor for GeminiDirectExtractor {
    fn name(&self) -> &'static str {
        "gemini-direct"
    }

    async fn extract_direct(
        &self,
        document: &UploadedDocument,
    ) -> Result<CanonicalRecord, ExtractionError> {
        if !self.client.is_configured() {
            return Err(ExtractionError::NotConfigured(
                "Gemini API key not set".to_string(),
            ));
        }

        let parts = vec![
            json!({ "text": direct_prompt() }),
            json!({
                "inline_data": {
                    "mime_type": document.mime_type,
                    "data": BASE64.encode(&document.bytes),
                }
            }),
        ];

        let answer = self.client.generate(parts, self.timeout).await?;
        let record = record_from_answer(answer)?;
        info!(
            file = %document.file_name,
            fields = record.filled_count(),
            "Direct extraction complete"
        );
        Ok(record)
    }
}

/// Mapping path: raw OCR JSON → record, with deterministic fallback
pub struct GeminiMapper {
    client: Arc<GeminiClient>,
    timeout: Duration,
    fallback: BasicMapper,
}

impl GeminiMapper {
    pub fn new(client: Arc<GeminiClient>, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            fallback: BasicMapper,
        }
    }
}

#[async_trait]
impl FieldMapper for GeminiMapper {
    fn name(&self) -> &'static str {
        "gemini-mapper"
    }

    async fn map_raw(&self, raw: &RawExtraction) -> Result<CanonicalRecord, ExtractionError> {
        if !self.client.is_configured() {
            warn!("Gemini API key not configured, using basic mapping");
            return self.fallback.map_raw(raw).await;
        }

        let parts = vec![json!({ "text": mapping_prompt(&raw.0) })];
        match self
            .client
            .generate(parts, self.timeout)
            .await
            .and_then(record_from_answer)
        {
            Ok(record) => {
                debug!(fields = record.filled_count(), "Gemini mapping complete");
                Ok(record)
            }
            Err(e) => {
                warn!(error = %e, "Gemini mapping failed, using basic mapping");
                self.fallback.map_raw(raw).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unconfigured() -> Arc<GeminiClient> {
        let config = GeminiConfig {
            api_url: "http://127.0.0.1:9/unused".to_string(),
            api_key: None,
            direct_timeout: Duration::from_secs(1),
            mapping_timeout: Duration::from_secs(1),
        };
        Arc::new(GeminiClient::new(&config).unwrap())
    }

    #[test]
    fn test_parse_answer() {
        let envelope = json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"NOMBRE\": \"Acme\"}" }] } }]
        });
        assert_eq!(parse_answer(&envelope).unwrap(), json!({"NOMBRE": "Acme"}));

        assert!(matches!(
            parse_answer(&json!({"candidates": []})),
            Err(ExtractionError::Parse(_))
        ));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence(" {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_template_lists_every_field() {
        let template = target_template();
        let map = template.as_object().unwrap();
        assert_eq!(map.len(), FIELD_SCHEMA.len());
        assert_eq!(map["MONEDA"], "EUR");
        assert_eq!(map["ABIERTO_COMO_CLIENTE"], false);
        assert_eq!(map["CALLE"], "");
    }

    #[tokio::test]
    async fn test_direct_requires_key() {
        let extractor = GeminiDirectExtractor::new(unconfigured(), Duration::from_secs(1));
        let doc = UploadedDocument::new("a.pdf", "application/pdf", vec![1, 2, 3]);
        assert!(matches!(
            extractor.extract_direct(&doc).await,
            Err(ExtractionError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_mapper_without_key_uses_basic_mapping() {
        let mapper = GeminiMapper::new(unconfigured(), Duration::from_secs(1));
        let raw = RawExtraction(json!({"company_identification": {"name": "Acme"}}));
        let record = mapper.map_raw(&raw).await.unwrap();
        assert_eq!(record.text("NOMBRE"), Some("Acme"));
    }
}
