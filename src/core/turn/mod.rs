//! Turn and transcription coordination.
//!
//! Server audio is accumulated per model turn; each completed turn is wrapped
//! as WAV and transcribed exactly once, noise transcripts are filtered out,
//! and accepted ones extend the conversation history.

pub mod accumulator;
pub mod coordinator;
pub mod filter;
pub mod history;
pub mod user_speech;

pub use accumulator::TurnAccumulator;
pub use coordinator::{
    ConversationUpdateCallback, TRANSCRIPTION_MIME, TranscriptCallback, TurnCoordinator,
    TurnCoordinatorConfig, TurnPhase,
};
pub use filter::TranscriptFilter;
pub use history::{ConversationEntry, ConversationHistory, Role, SessionKind};
pub use user_speech::UserSpeechRecorder;
