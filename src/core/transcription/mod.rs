//! Batch transcription collaborators.
//!
//! A [`Transcriber`] turns one finished audio clip into text. The turn
//! coordinator calls it once per completed model turn, and once per finished
//! user utterance.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod gemini;
pub mod whisper;

pub use gemini::{GeminiTranscriber, GeminiTranscriberConfig};
pub use whisper::{WhisperTranscriber, WhisperTranscriberConfig};

/// Reply a transcriber gives for clips without intelligible speech.
pub const NO_SPEECH_SENTINEL: &str = "NO_SPEECH";

/// Errors from transcription providers.
#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Request could not be sent or read
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Provider rejected the credentials
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Provider returned an error status
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Provider reply could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type TranscriptionResult<T> = Result<T, TranscriptionError>;

/// Converts one audio clip into a transcript.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `audio`, a complete file of type `mime_type` (e.g. `audio/wav`).
    async fn transcribe(&self, audio: Bytes, mime_type: &str) -> TranscriptionResult<String>;

    /// Provider name for logs.
    fn provider_name(&self) -> &'static str;
}

/// Map a non-success HTTP status to an error.
pub(crate) fn status_error(status: reqwest::StatusCode, message: String) -> TranscriptionError {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        TranscriptionError::AuthenticationFailed(message)
    } else {
        TranscriptionError::ProviderError(message)
    }
}
