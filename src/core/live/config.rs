//! Live protocol constants and option enums.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Live API WebSocket endpoint (API key appended as `?key=`).
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Model used when none is configured.
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.0-flash-live-001";

/// Sample rate of microphone audio sent to the service.
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of audio produced by the service.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// MIME type for outbound microphone chunks.
pub const INPUT_AUDIO_MIME: &str = "audio/pcm;rate=16000";

/// MIME prefix identifying audio parts in server content.
pub const AUDIO_MIME_PREFIX: &str = "audio/pcm";

/// MIME type for outbound video frames.
pub const VIDEO_FRAME_MIME: &str = "image/jpeg";

/// How long `connect()` waits for `setupComplete`.
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(15);

/// How long `disconnect()` waits for the socket task to flush a close frame.
pub(crate) const CLOSE_GRACE_PERIOD: Duration = Duration::from_millis(500);

// =============================================================================
// Response Modality
// =============================================================================

/// Modality the model answers in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    #[default]
    Audio,
    Text,
}

impl Modality {
    /// Convert to the wire value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "AUDIO",
            Self::Text => "TEXT",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "text" => Self::Text,
            "audio" => Self::Audio,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modality_parsing() {
        assert_eq!(Modality::from_str_or_default("audio"), Modality::Audio);
        assert_eq!(Modality::from_str_or_default("TEXT"), Modality::Text);
        assert_eq!(Modality::from_str_or_default("video"), Modality::Audio);
    }

    #[test]
    fn test_modality_serde() {
        assert_eq!(serde_json::to_string(&Modality::Text).unwrap(), "\"TEXT\"");
        let parsed: Modality = serde_json::from_str("\"AUDIO\"").unwrap();
        assert_eq!(parsed, Modality::Audio);
    }
}
