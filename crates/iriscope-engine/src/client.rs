use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use crate::config::{env_f64, non_empty_env};
use crate::error::PipelineError;
use crate::request::AnalysisRequest;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const SAMPLE_REPORT_JSON: &str = include_str!("../resources/sample_report.json");

/// Remote analysis collaborator: takes the assembled request, returns the
/// raw machine-parseable text payload. Parsing and shape validation stay
/// with the orchestrator.
pub trait AnalysisBackend {
    fn name(&self) -> &str;

    fn complete(&self, request: &AnalysisRequest) -> Result<String, PipelineError>;
}

/// Gemini `generateContent` backend over blocking HTTP.
pub struct GeminiBackend {
    api_base: String,
    model: String,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new() -> Self {
        Self {
            api_base: non_empty_env("IRISCOPE_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model: non_empty_env("IRISCOPE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            http: HttpClient::new(),
        }
    }

    pub fn with_model(model: impl Into<String>) -> Self {
        let mut backend = Self::new();
        backend.model = model.into();
        backend
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    fn request_timeout_seconds() -> f64 {
        env_f64("IRISCOPE_REQUEST_TIMEOUT", 90.0, 15.0, 300.0)
    }
}

impl Default for GeminiBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn complete(&self, request: &AnalysisRequest) -> Result<String, PipelineError> {
        let api_key = Self::api_key().ok_or_else(|| {
            PipelineError::Configuration("GEMINI_API_KEY or GOOGLE_API_KEY not set".to_string())
        })?;
        let endpoint = self.endpoint();
        let payload = build_payload(request);

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key.as_str())])
            .timeout(Duration::from_secs_f64(Self::request_timeout_seconds()))
            .json(&payload)
            .send()
            .map_err(|err| {
                PipelineError::Transport(format!("request to {endpoint} failed: {err}"))
            })?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| PipelineError::Transport(format!("response body unreadable: {err}")))?;
        if !status.is_success() {
            return Err(PipelineError::Transport(format!(
                "service returned {status}: {}",
                snippet(&body)
            )));
        }

        let parsed: Value = serde_json::from_str(&body).map_err(|err| {
            PipelineError::Transport(format!("response body was not JSON: {err}"))
        })?;
        extract_candidate_text(&parsed)
    }
}

/// Wire payload: one inline image part, one text part, and the schema
/// descriptor constraining the output shape.
pub(crate) fn build_payload(request: &AnalysisRequest) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                {
                    "inline_data": {
                        "mime_type": request.image.mime_type,
                        "data": BASE64.encode(&request.image.bytes),
                    }
                },
                { "text": request.instruction },
            ],
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": request.schema,
        },
    })
}

/// Concatenated text parts from the first delivered candidate. An envelope
/// with no text part is a shape failure, not a transport one.
pub(crate) fn extract_candidate_text(payload: &Value) -> Result<String, PipelineError> {
    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut out = String::new();

    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(Value::as_object)
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                out.push_str(text);
            }
        }
        if !out.trim().is_empty() {
            return Ok(out);
        }
    }

    Err(PipelineError::SchemaViolation(
        "service response contained no text part".to_string(),
    ))
}

/// Offline collaborator returning a fixed, schema-complete payload. Useful
/// for demos and for exercising the pipeline without credentials.
pub struct CannedBackend {
    body: String,
}

impl CannedBackend {
    pub fn sample() -> Self {
        Self {
            body: SAMPLE_REPORT_JSON.to_string(),
        }
    }

    pub fn with_body(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }
}

impl AnalysisBackend for CannedBackend {
    fn name(&self) -> &str {
        "canned"
    }

    fn complete(&self, _request: &AnalysisRequest) -> Result<String, PipelineError> {
        Ok(self.body.clone())
    }
}

// Truncates on a character boundary; error bodies can be localized.
fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(200) {
        Some((end, _)) => format!("{}...", &trimmed[..end]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::error::PipelineError;
    use crate::media::{NormalizedImage, JPEG_MIME};
    use crate::request::build_request;
    use crate::validate::validate_report;

    use super::{build_payload, extract_candidate_text, snippet, AnalysisBackend, CannedBackend};

    fn request() -> crate::request::AnalysisRequest {
        build_request(&NormalizedImage {
            bytes: vec![0xd8; 600],
            mime_type: JPEG_MIME,
            width: 1024,
            height: 768,
            original_len: 2_400,
            encoded_len: 600,
        })
        .expect("build")
    }

    #[test]
    fn payload_carries_image_part_text_part_and_schema() {
        let payload = build_payload(&request());
        let parts = payload["contents"][0]["parts"]
            .as_array()
            .expect("parts array");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["inline_data"]["mime_type"], json!(JPEG_MIME));
        assert!(!parts[0]["inline_data"]["data"]
            .as_str()
            .expect("base64 data")
            .is_empty());
        assert!(parts[1]["text"].as_str().expect("text part").contains("iris"));
        assert_eq!(
            payload["generationConfig"]["responseMimeType"],
            json!("application/json")
        );
        assert!(payload["generationConfig"]["responseSchema"]["required"].is_array());
    }

    #[test]
    fn candidate_text_is_extracted_and_concatenated() {
        let envelope = json!({
            "candidates": [{
                "content": {"parts": [{"text": "{\"a\":"}, {"text": "1}"}]}
            }]
        });
        assert_eq!(
            extract_candidate_text(&envelope).expect("text"),
            "{\"a\":1}"
        );
    }

    #[test]
    fn empty_envelope_is_a_schema_violation() {
        let err = extract_candidate_text(&json!({"candidates": []})).expect_err("no text");
        assert!(matches!(err, PipelineError::SchemaViolation(_)));
    }

    #[test]
    fn snippet_truncates_localized_bodies_on_char_boundaries() {
        // A multi-byte character straddling the cutoff must not split.
        let body = format!("{}€ quota épuisé pour ce modèle", "x".repeat(199));
        let short = snippet(&body);
        assert!(short.ends_with("..."));
        assert_eq!(short.chars().count(), 203);
        assert!(short.contains('€'));

        assert_eq!(snippet("  brief  "), "brief");
    }

    #[test]
    fn canned_backend_returns_a_schema_complete_report() {
        let body = CannedBackend::sample().complete(&request()).expect("canned");
        let parsed: Value = serde_json::from_str(&body).expect("json");
        let report = validate_report(&parsed).expect("valid");
        assert!(report.rarity_index.percentage <= 100);
    }
}
