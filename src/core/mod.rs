pub mod live;
pub mod persistence;
pub mod playback;
pub mod rag;
pub mod risk;
pub mod session;
pub mod transcription;
pub mod turn;

// Re-export commonly used types for convenience
pub use live::{
    ConnectionState, EventBus, EventKind, LiveClient, LiveConfig, LiveEndpoint, LiveError,
    LiveEvent, LiveResult, Modality, Part,
};

pub use playback::{AudioSink, AudioStreamer, PlaybackError, QueueSink, WavFileSink};

pub use transcription::{
    GeminiTranscriber, GeminiTranscriberConfig, Transcriber, TranscriptionError,
    WhisperTranscriber, WhisperTranscriberConfig,
};

pub use turn::{
    ConversationEntry, ConversationHistory, Role, SessionKind, TranscriptFilter, TurnCoordinator,
    UserSpeechRecorder,
};

pub use rag::{
    Embedder, OutboundRewriter, RagDocument, RagError, RagRewriter, RagService, ScopedRag,
};

pub use persistence::{MemorySessionStore, SessionRecord, SessionStore, StoreError};
pub use risk::{RiskLevel, RiskScorer};
pub use session::{LiveSession, LiveSessionBuilder};
