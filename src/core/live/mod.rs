//! Live protocol client.
//!
//! One [`LiveClient`] owns one duplex connection to a Gemini-Live-style
//! service, encodes outbound `setup`/`clientContent`/`realtimeInput`/
//! `toolResponse` messages, and republishes decoded server traffic on a
//! per-client [`EventBus`].

pub mod base;
pub mod client;
pub mod config;
pub mod events;
pub mod messages;

pub use base::{
    CloseInfo, ConnectionState, EventCallback, EventKind, GenerationOptions, LiveConfig,
    LiveError, LiveEvent, LiveResult, LogEvent, SubscriptionId, ToolDeclaration,
};
pub use client::{LiveClient, LiveEndpoint};
pub use config::{
    DEFAULT_LIVE_MODEL, GEMINI_LIVE_URL, INPUT_AUDIO_MIME, INPUT_SAMPLE_RATE, Modality,
    OUTPUT_SAMPLE_RATE, VIDEO_FRAME_MIME,
};
pub use events::{EventBus, callback, log_kind};
pub use messages::{
    Blob, ClientMessage, Content, FunctionCall, FunctionResponse, MediaChunk, Part,
    ServerContent, ServerMessage,
};
