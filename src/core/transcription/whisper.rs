//! OpenAI audio transcription (Whisper) over multipart upload.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::info;

use super::{Transcriber, TranscriptionError, TranscriptionResult, status_error};

pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com";

pub const DEFAULT_WHISPER_MODEL: &str = "whisper-1";

/// Hard upload limit of the transcription endpoint.
pub const MAX_FILE_SIZE_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct WhisperTranscriberConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// ISO-639-1 hint, empty for auto-detect
    pub language: String,
    pub timeout: Duration,
}

impl WhisperTranscriberConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: OPENAI_API_BASE_URL.to_string(),
            model: DEFAULT_WHISPER_MODEL.to_string(),
            language: String::new(),
            timeout: Duration::from_secs(60),
        }
    }

    fn api_url(&self) -> String {
        format!(
            "{}/v1/audio/transcriptions",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
    #[serde(rename = "type", default)]
    error_type: String,
}

pub struct WhisperTranscriber {
    config: WhisperTranscriberConfig,
    http_client: Client,
}

impl WhisperTranscriber {
    pub fn new(config: WhisperTranscriberConfig) -> TranscriptionResult<Self> {
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
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: Bytes, mime_type: &str) -> TranscriptionResult<String> {
        if audio.len() > MAX_FILE_SIZE_BYTES {
            return Err(TranscriptionError::ConfigurationError(format!(
                "Audio ({} bytes) exceeds maximum file size ({} bytes)",
                audio.len(),
                MAX_FILE_SIZE_BYTES
            )));
        }

        let file_part = Part::bytes(audio.to_vec())
            .file_name("audio.wav")
            .mime_str(mime_type)
            .map_err(|e| TranscriptionError::ConfigurationError(format!("Invalid MIME type: {e}")))?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.config.model.clone())
            .text("response_format", "json");
        if !self.config.language.is_empty() {
            form = form.text("language", self.config.language.clone());
        }

        let response = self
            .http_client
            .post(self.config.api_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranscriptionError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            TranscriptionError::NetworkError(format!("Failed to read response: {e}"))
        })?;

        if !status.is_success() {
            let error_msg = match serde_json::from_str::<OpenAIErrorResponse>(&response_text) {
                Ok(parsed) => format!(
                    "OpenAI API error: {} ({})",
                    parsed.error.message, parsed.error.error_type
                ),
                Err(_) => format!("OpenAI API error ({status}): {response_text}"),
            };
            return Err(status_error(status, error_msg));
        }

        let parsed: TranscriptionResponse = serde_json::from_str(&response_text)
            .map_err(|e| TranscriptionError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        info!("Transcription complete: {} characters", parsed.text.len());
        Ok(parsed.text.trim().to_string())
    }

    fn provider_name(&self) -> &'static str {
        "openai-whisper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transcriber(server: &MockServer) -> WhisperTranscriber {
        let mut config = WhisperTranscriberConfig::new("sk-test");
        config.base_url = server.uri();
        WhisperTranscriber::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_multipart_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_string_contains("whisper-1"))
            .and(body_string_contains("filename=\"audio.wav\""))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"text": " Hello there. "})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let text = transcriber(&server)
            .transcribe(Bytes::from_static(b"RIFF"), "audio/wav")
            .await
            .unwrap();
        assert_eq!(text, "Hello there.");
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_authentication_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
            })))
            .mount(&server)
            .await;

        let err = transcriber(&server)
            .transcribe(Bytes::from_static(b"RIFF"), "audio/wav")
            .await
            .unwrap_err();
        assert!(matches!(err, TranscriptionError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = transcriber(&server)
            .transcribe(Bytes::from_static(b"RIFF"), "audio/wav")
            .await
            .unwrap_err();
        match err {
            TranscriptionError::ProviderError(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(WhisperTranscriber::new(WhisperTranscriberConfig::new(" ")).is_err());
    }
}
