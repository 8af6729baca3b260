//! Live protocol WebSocket message types.
//!
//! Every frame is a JSON object with exactly one top-level key naming its kind.
//!
//! # Protocol Overview
//!
//! Client messages (sent to server):
//! - setup - Model, generation options, system prompt, tools
//! - clientContent - Text turns from the caller
//! - realtimeInput - Microphone/video media chunks
//! - toolResponse - Results of tool calls
//!
//! Server messages (received from server):
//! - setupComplete - Setup acknowledged
//! - serverContent - Model turn parts, `turnComplete`/`interrupted` flags
//! - toolCall - Functions the model wants invoked
//! - toolCallCancellation - Tool calls withdrawn by the server
//! - goAway - Server is about to close the connection
//!
//! Media payloads are raw bytes internally. Base64 only exists in the JSON:
//! [`Blob::data`] is encoded on serialization and decoded on parsing.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::base::{LiveConfig, LiveError, LiveResult};
use super::config::{AUDIO_MIME_PREFIX, Modality};

// =============================================================================
// Shared Content Types
// =============================================================================

/// Inline media with its MIME type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Bytes,
}

impl Blob {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Whether this blob carries PCM audio.
    #[inline]
    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with(AUDIO_MIME_PREFIX)
    }
}

/// Media chunk sent as realtime input.
pub type MediaChunk = Blob;

/// One part of a content turn: text or inline media.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn inline(mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            text: None,
            inline_data: Some(Blob::new(mime_type, data)),
        }
    }

    /// The inline blob if it carries PCM audio.
    pub fn audio(&self) -> Option<&Blob> {
        self.inline_data.as_ref().filter(|b| b.is_audio())
    }
}

/// A role-tagged list of parts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts,
        }
    }
}

// =============================================================================
// Client Messages (sent to server)
// =============================================================================

/// Prebuilt voice selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

/// Generation options as sent in `setup`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// Body of the `setup` message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

impl From<&LiveConfig> for Setup {
    fn from(config: &LiveConfig) -> Self {
        let speech_config = config.generation.voice.as_ref().map(|voice| SpeechConfig {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice.clone(),
                },
            },
        });

        let tools = if config.tools.is_empty() {
            Vec::new()
        } else {
            vec![Tool {
                function_declarations: config
                    .tools
                    .iter()
                    .map(|t| FunctionDeclaration {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    })
                    .collect(),
            }]
        };

        Self {
            model: config.qualified_model(),
            generation_config: GenerationConfig {
                response_modalities: vec![config.generation.response_modality],
                speech_config,
                temperature: config.generation.temperature,
            },
            system_instruction: config.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part::text(text.clone())],
            }),
            tools,
        }
    }
}

/// Body of the `clientContent` message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

/// Body of the `realtimeInput` message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

/// Result of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: serde_json::Value,
}

/// Body of the `toolResponse` message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// Messages sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    ClientContent(ClientContent),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// A single user turn made of `parts`.
    pub fn user_turn(parts: Vec<Part>, turn_complete: bool) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content::user(parts)],
            turn_complete,
        })
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::ClientContent(_) => "clientContent",
            Self::RealtimeInput(_) => "realtimeInput",
            Self::ToolResponse(_) => "toolResponse",
        }
    }

    pub fn to_json(&self) -> LiveResult<String> {
        serde_json::to_string(self).map_err(|e| LiveError::SerializationError(e.to_string()))
    }
}

// =============================================================================
// Server Messages (received from server)
// =============================================================================

/// Body of `serverContent`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<Content>,

    #[serde(default)]
    pub turn_complete: bool,

    #[serde(default)]
    pub interrupted: bool,

    #[serde(default)]
    pub generation_complete: bool,
}

impl ServerContent {
    /// Audio blobs of the model turn, in part order.
    pub fn audio_parts(&self) -> impl Iterator<Item = &Blob> {
        self.model_turn
            .iter()
            .flat_map(|turn| turn.parts.iter())
            .filter_map(Part::audio)
    }

    /// Concatenated text parts of the model turn, if any.
    pub fn text(&self) -> Option<String> {
        let text: String = self
            .model_turn
            .iter()
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!text.is_empty()).then_some(text)
    }
}

/// A function the model asks the caller to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    SetupComplete,
    ServerContent(ServerContent),
    ToolCall(ToolCall),
    ToolCallCancellation(ToolCallCancellation),
    GoAway(GoAway),
}

/// Every key a server frame may carry. `usageMetadata` rides along with other
/// kinds and does not count as one.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    tool_call: Option<ToolCall>,
    #[serde(default)]
    tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default)]
    go_away: Option<GoAway>,
    #[serde(default, rename = "usageMetadata")]
    _usage_metadata: Option<serde_json::Value>,
}

impl ServerMessage {
    /// Parse one frame, requiring exactly one known message kind.
    pub fn parse(text: &str) -> LiveResult<Self> {
        let raw: RawServerMessage = serde_json::from_str(text)
            .map_err(|e| LiveError::ProtocolError(format!("malformed frame: {e}")))?;

        let mut found = Vec::with_capacity(1);
        if raw.setup_complete.is_some() {
            found.push(ServerMessage::SetupComplete);
        }
        if let Some(content) = raw.server_content {
            found.push(ServerMessage::ServerContent(content));
        }
        if let Some(call) = raw.tool_call {
            found.push(ServerMessage::ToolCall(call));
        }
        if let Some(cancellation) = raw.tool_call_cancellation {
            found.push(ServerMessage::ToolCallCancellation(cancellation));
        }
        if let Some(go_away) = raw.go_away {
            found.push(ServerMessage::GoAway(go_away));
        }

        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err(LiveError::ProtocolError(
                "frame carries no known message kind".to_string(),
            )),
            n => Err(LiveError::ProtocolError(format!(
                "frame carries {n} message kinds"
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetupComplete => "setupComplete",
            Self::ServerContent(_) => "serverContent",
            Self::ToolCall(_) => "toolCall",
            Self::ToolCallCancellation(_) => "toolCallCancellation",
            Self::GoAway(_) => "goAway",
        }
    }
}

// =============================================================================
// Base64 Boundary
// =============================================================================

mod base64_bytes {
    use base64::prelude::*;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64_STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64_STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::live::base::ToolDeclaration;
    use serde_json::json;

    #[test]
    fn test_setup_serialization() {
        let config = LiveConfig::new("m")
            .with_voice("Puck")
            .with_system_instruction("Be kind.");
        let msg = ClientMessage::Setup(Setup::from(&config));
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "setup": {
                    "model": "models/m",
                    "generationConfig": {
                        "responseModalities": ["AUDIO"],
                        "speechConfig": {
                            "voiceConfig": {"prebuiltVoiceConfig": {"voiceName": "Puck"}}
                        }
                    },
                    "systemInstruction": {"parts": [{"text": "Be kind."}]}
                }
            })
        );
    }

    #[test]
    fn test_setup_with_tools() {
        let config = LiveConfig::new("m").with_tool(ToolDeclaration {
            name: "lookup".to_string(),
            description: Some("Find a record".to_string()),
            parameters: None,
        });
        let value = serde_json::to_value(ClientMessage::Setup(Setup::from(&config))).unwrap();
        assert_eq!(
            value["setup"]["tools"][0]["functionDeclarations"][0]["name"],
            "lookup"
        );
    }

    #[test]
    fn test_client_content_serialization() {
        let msg = ClientMessage::user_turn(vec![Part::text("Hello")], true);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "clientContent": {
                    "turns": [{"role": "user", "parts": [{"text": "Hello"}]}],
                    "turnComplete": true
                }
            })
        );
    }

    #[test]
    fn test_realtime_input_encodes_base64() {
        let msg = ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob::new("audio/pcm;rate=16000", vec![1u8, 2, 3])],
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["realtimeInput"]["mediaChunks"][0]["data"], "AQID");
        assert_eq!(
            value["realtimeInput"]["mediaChunks"][0]["mimeType"],
            "audio/pcm;rate=16000"
        );
    }

    #[test]
    fn test_parse_server_content_with_audio() {
        let frame = r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AQID"}},
            {"text":"hi"}
        ]}}}"#;
        let ServerMessage::ServerContent(content) = ServerMessage::parse(frame).unwrap() else {
            panic!("expected serverContent");
        };
        let audio: Vec<&Blob> = content.audio_parts().collect();
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].data.as_ref(), &[1u8, 2, 3]);
        assert_eq!(content.text().as_deref(), Some("hi"));
        assert!(!content.turn_complete);
    }

    #[test]
    fn test_parse_flags_and_setup_complete() {
        assert_eq!(
            ServerMessage::parse(r#"{"setupComplete":{}}"#).unwrap(),
            ServerMessage::SetupComplete
        );
        let msg = ServerMessage::parse(
            r#"{"serverContent":{"turnComplete":true},"usageMetadata":{"totalTokenCount":5}}"#,
        )
        .unwrap();
        assert!(matches!(msg, ServerMessage::ServerContent(c) if c.turn_complete));
    }

    #[test]
    fn test_parse_tool_call() {
        let msg = ServerMessage::parse(
            r#"{"toolCall":{"functionCalls":[{"id":"c1","name":"lookup","args":{"q":1}}]}}"#,
        )
        .unwrap();
        let ServerMessage::ToolCall(call) = msg else {
            panic!("expected toolCall");
        };
        assert_eq!(call.function_calls[0].name, "lookup");
        assert_eq!(call.function_calls[0].args["q"], 1);
    }

    #[test]
    fn test_parse_rejects_unknown_and_ambiguous_shapes() {
        assert!(matches!(
            ServerMessage::parse(r#"{"somethingElse":{}}"#),
            Err(LiveError::ProtocolError(_))
        ));
        assert!(ServerMessage::parse("not json").is_err());
        assert!(ServerMessage::parse("[1,2]").is_err());
        assert!(ServerMessage::parse(r#"{"setupComplete":{},"toolCall":{}}"#).is_err());
    }

    #[test]
    fn test_parse_rejects_invalid_base64() {
        let frame = r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm","data":"@@@"}}
        ]}}}"#;
        assert!(ServerMessage::parse(frame).is_err());
    }
}
