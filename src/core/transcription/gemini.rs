//! Gemini `generateContent` transcription.
//!
//! The clip is sent inline (base64) next to a transcription instruction and
//! the text parts of the first candidate are returned.

use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{
    NO_SPEECH_SENTINEL, Transcriber, TranscriptionError, TranscriptionResult, status_error,
};
use crate::core::live::Content;

/// Gemini REST API base URL.
pub const GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Model used when none is configured.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone)]
pub struct GeminiTranscriberConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl GeminiTranscriberConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: GEMINI_API_BASE_URL.to_string(),
            model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    fn endpoint(&self) -> String {
        let model = self.model.trim_start_matches("models/");
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        )
    }
}

/// Error body of Google APIs.
#[derive(Debug, Deserialize)]
pub(crate) struct GoogleErrorResponse {
    pub error: GoogleError,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GoogleError {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

impl GoogleErrorResponse {
    /// Readable message for a failed response body.
    pub(crate) fn describe(status: reqwest::StatusCode, body: &str) -> String {
        match serde_json::from_str::<GoogleErrorResponse>(body) {
            Ok(parsed) => format!(
                "Gemini API error: {} ({} {})",
                parsed.error.message, parsed.error.code, parsed.error.status
            ),
            Err(_) => format!("Gemini API error ({status}): {body}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

pub struct GeminiTranscriber {
    config: GeminiTranscriberConfig,
    http_client: Client,
}

impl GeminiTranscriber {
    pub fn new(config: GeminiTranscriberConfig) -> TranscriptionResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(TranscriptionError::ConfigurationError(
                "API key is required".to_string(),
            ));
        }

        let http_client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| {
                TranscriptionError::ConfigurationError(format!(
                    "Failed to create HTTP client: {e}"
                ))
            })?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn instruction() -> String {
        format!(
            "Transcribe the speech in this audio exactly as spoken. \
             Reply with the transcript only, without commentary. \
             If there is no intelligible speech, reply with {NO_SPEECH_SENTINEL}."
        )
    }
}

#[async_trait]
impl Transcriber for GeminiTranscriber {
    async fn transcribe(&self, audio: Bytes, mime_type: &str) -> TranscriptionResult<String> {
        info!(
            "Sending {} bytes of {} to Gemini for transcription",
            audio.len(),
            mime_type
        );

        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"text": Self::instruction()},
                    {"inlineData": {"mimeType": mime_type, "data": BASE64_STANDARD.encode(&audio)}}
                ]
            }],
            "generationConfig": {"temperature": 0.0}
        });

        let response = self
            .http_client
            .post(self.config.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TranscriptionError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            TranscriptionError::NetworkError(format!("Failed to read response: {e}"))
        })?;

        if !status.is_success() {
            return Err(status_error(
                status,
                GoogleErrorResponse::describe(status, &response_text),
            ));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&response_text)
            .map_err(|e| TranscriptionError::InvalidResponse(e.to_string()))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        debug!("Gemini transcript: {:?}", text);
        Ok(text.trim().to_string())
    }

    fn provider_name(&self) -> &'static str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transcriber(server: &MockServer) -> GeminiTranscriber {
        let mut config = GeminiTranscriberConfig::new("test-key");
        config.base_url = server.uri();
        GeminiTranscriber::new(config).unwrap()
    }

    #[test]
    fn test_api_key_required() {
        let result = GeminiTranscriber::new(GeminiTranscriberConfig::new(""));
        assert!(matches!(
            result,
            Err(TranscriptionError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_endpoint_strips_model_prefix() {
        let mut config = GeminiTranscriberConfig::new("k");
        config.model = "models/gemini-x".to_string();
        config.base_url = "http://localhost:1/".to_string();
        assert_eq!(
            config.endpoint(),
            "http://localhost:1/v1beta/models/gemini-x:generateContent"
        );
    }

    #[tokio::test]
    async fn test_transcribe_returns_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_string_contains("\"data\":\"AQI=\""))
            .and(body_string_contains("audio/wav"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"role": "model", "parts": [
                    {"text": "I am feeling "}, {"text": "better today\n"}
                ]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = transcriber(&server)
            .transcribe(Bytes::from_static(&[1, 2]), "audio/wav")
            .await
            .unwrap();
        assert_eq!(text, "I am feeling better today");
    }

    #[tokio::test]
    async fn test_missing_candidates_is_empty_transcript() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&server)
            .await;

        let text = transcriber(&server)
            .transcribe(Bytes::from_static(&[0, 0]), "audio/wav")
            .await
            .unwrap();
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED"}
            })))
            .mount(&server)
            .await;

        let err = transcriber(&server)
            .transcribe(Bytes::from_static(&[0, 0]), "audio/wav")
            .await
            .unwrap_err();
        match err {
            TranscriptionError::AuthenticationFailed(msg) => {
                assert!(msg.contains("API key not valid"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
