//! Base types for the live protocol client.
//!
//! Connection state, configuration handed to `connect()`, the error type and
//! the events published to subscribers.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::{DEFAULT_LIVE_MODEL, Modality};
use super::messages::{FunctionCall, ServerContent};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur on a live connection.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Transport could not be opened or was lost
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Message could not be serialized
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Inbound frame did not match any known message shape
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for live client operations.
pub type LiveResult<T> = Result<T, LiveError>;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle of the single connection owned by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport open
    #[default]
    Disconnected,
    /// Transport opening or waiting for setup acknowledgement
    Connecting,
    /// Setup acknowledged, messages may be sent
    Connected,
    /// Transport shutting down
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Closing => write!(f, "Closing"),
        }
    }
}

// =============================================================================
// Configuration Types
// =============================================================================

/// Generation options sent with `setup`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Modality of the model's reply
    pub response_modality: Modality,

    /// Prebuilt voice name for audio replies
    #[serde(default)]
    pub voice: Option<String>,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            response_modality: Modality::Audio,
            voice: None,
            temperature: None,
        }
    }
}

/// A function the model may call during the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON schema of the arguments
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

/// Session configuration passed to `connect()`.
///
/// Treated as immutable for the lifetime of a connection; changing it
/// requires a fresh `connect()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Model identifier, with or without the `models/` prefix
    pub model: String,

    #[serde(default)]
    pub generation: GenerationOptions,

    /// System prompt
    #[serde(default)]
    pub system_instruction: Option<String>,

    #[serde(default)]
    pub tools: Vec<ToolDeclaration>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_LIVE_MODEL.to_string(),
            generation: GenerationOptions::default(),
            system_instruction: None,
            tools: Vec::new(),
        }
    }
}

impl LiveConfig {
    /// Config for `model` with default generation options.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_response_modality(mut self, modality: Modality) -> Self {
        self.generation.response_modality = modality;
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.generation.voice = Some(voice.into());
        self
    }

    pub fn with_tool(mut self, tool: ToolDeclaration) -> Self {
        self.tools.push(tool);
        self
    }

    /// Model name as the wire expects it (`models/<id>`).
    pub fn qualified_model(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }

    pub fn validate(&self) -> LiveResult<()> {
        if self.model.trim().is_empty() {
            return Err(LiveError::InvalidConfiguration(
                "model identifier is required".to_string(),
            ));
        }
        if let Some(t) = self.generation.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(LiveError::InvalidConfiguration(format!(
                "temperature must be within 0.0..=2.0, got {t}"
            )));
        }
        if let Some(tool) = self.tools.iter().find(|t| t.name.trim().is_empty()) {
            return Err(LiveError::InvalidConfiguration(format!(
                "tool declaration without a name: {tool:?}"
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Events
// =============================================================================

/// Event kinds a subscriber can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Close,
    SetupComplete,
    Audio,
    Content,
    Interrupted,
    TurnComplete,
    ToolCall,
    ToolCallCancellation,
    Log,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::SetupComplete => "setupcomplete",
            Self::Audio => "audio",
            Self::Content => "content",
            Self::Interrupted => "interrupted",
            Self::TurnComplete => "turncomplete",
            Self::ToolCall => "toolcall",
            Self::ToolCallCancellation => "toolcallcancellation",
            Self::Log => "log",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code, when the peer sent one
    pub code: Option<u16>,
    pub reason: String,
}

/// Structured diagnostic record published on the `log` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    /// Milestone name, see [`super::log_kind`]
    pub kind: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub payload: serde_json::Value,
}

/// Everything a client publishes to its subscribers.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    Open,
    Close(CloseInfo),
    SetupComplete,
    /// Decoded PCM16 from one audio part, in arrival order
    Audio(Bytes),
    /// Full decoded server content
    Content(ServerContent),
    Interrupted,
    TurnComplete,
    ToolCall(Vec<FunctionCall>),
    /// Ids of tool calls the server withdrew
    ToolCallCancellation(Vec<String>),
    Log(LogEvent),
}

impl LiveEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Close(_) => EventKind::Close,
            Self::SetupComplete => EventKind::SetupComplete,
            Self::Audio(_) => EventKind::Audio,
            Self::Content(_) => EventKind::Content,
            Self::Interrupted => EventKind::Interrupted,
            Self::TurnComplete => EventKind::TurnComplete,
            Self::ToolCall(_) => EventKind::ToolCall,
            Self::ToolCallCancellation(_) => EventKind::ToolCallCancellation,
            Self::Log(_) => EventKind::Log,
        }
    }
}

/// Callback type for client events.
pub type EventCallback =
    Arc<dyn Fn(LiveEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Closing.to_string(), "Closing");
    }

    #[test]
    fn test_qualified_model() {
        assert_eq!(LiveConfig::new("m").qualified_model(), "models/m");
        assert_eq!(
            LiveConfig::new("models/gemini-x").qualified_model(),
            "models/gemini-x"
        );
    }

    #[test]
    fn test_validate_rejects_empty_model() {
        let err = LiveConfig::new("  ").validate().unwrap_err();
        assert!(matches!(err, LiveError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_validate_rejects_bad_temperature() {
        let mut config = LiveConfig::new("m");
        config.generation.temperature = Some(3.5);
        assert!(config.validate().is_err());
        config.generation.temperature = Some(0.7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_event_kind_mapping() {
        assert_eq!(LiveEvent::Audio(Bytes::new()).kind(), EventKind::Audio);
        assert_eq!(LiveEvent::TurnComplete.kind().as_str(), "turncomplete");
    }
}
