//! Configuration for the live voice client
//!
//! Settings come from environment variables (a `.env` file is loaded into the
//! environment by the binary) and optionally a YAML file.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Example
//! ```rust,no_run
//! use live_voice::config::ClientConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variables underneath
//! let config = ClientConfig::from_file(Path::new("live-voice.yaml"))?;
//! let live = config.to_live_config();
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

mod yaml;

pub use yaml::YamlConfig;

use crate::core::live::{
    DEFAULT_LIVE_MODEL, GEMINI_LIVE_URL, LiveConfig, LiveEndpoint, Modality, OUTPUT_SAMPLE_RATE,
};
use crate::core::rag::{
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_EMBEDDING_MODEL, DEFAULT_TOP_K,
    TextSplitter,
};
use crate::core::transcription::gemini::{DEFAULT_TRANSCRIPTION_MODEL, GEMINI_API_BASE_URL};
use crate::core::turn::SessionKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    ReadFailed(String),

    #[error("{0}")]
    ParseFailed(String),

    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },

    #[error("Missing required setting: {0}")]
    Missing(String),
}

/// Which service transcribes finished turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranscriptionProvider {
    #[default]
    Gemini,
    Whisper,
}

impl TranscriptionProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Whisper => "whisper",
        }
    }

    /// Parse a provider name, falling back to Gemini.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Self::Whisper,
            _ => Self::Gemini,
        }
    }
}

impl std::fmt::Display for TranscriptionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client configuration
///
/// Contains everything needed to run a live session:
/// - Live connection settings (URL, model, voice, modality, prompt)
/// - Provider API keys (Gemini, optionally OpenAI for Whisper)
/// - Transcription and embedding models
/// - Retrieval settings (top k, chunking)
/// - Session kind and playback rate
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // Live connection
    pub live_url: String,
    pub live_model: String,
    pub voice: Option<String>,
    pub response_modality: Modality,
    pub system_instruction: Option<String>,
    pub setup_timeout: Duration,

    // Provider API keys
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    /// Base URL of the Gemini REST API
    pub api_base_url: String,

    // Transcription
    pub transcription_provider: TranscriptionProvider,
    pub transcription_model: String,

    // Retrieval
    pub embedding_model: String,
    pub rag_top_k: usize,
    pub rag_chunk_size: usize,
    pub rag_chunk_overlap: usize,

    pub session_kind: SessionKind,
    /// Output device sample rate
    pub playback_sample_rate: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            live_url: GEMINI_LIVE_URL.to_string(),
            live_model: DEFAULT_LIVE_MODEL.to_string(),
            voice: None,
            response_modality: Modality::Audio,
            system_instruction: None,
            setup_timeout: Duration::from_secs(15),
            gemini_api_key: None,
            openai_api_key: None,
            api_base_url: GEMINI_API_BASE_URL.to_string(),
            transcription_provider: TranscriptionProvider::Gemini,
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            rag_top_k: DEFAULT_TOP_K,
            rag_chunk_size: DEFAULT_CHUNK_SIZE,
            rag_chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            session_kind: SessionKind::Assistant,
            playback_sample_rate: OUTPUT_SAMPLE_RATE,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, with defaults for
    /// anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            live_url: env_string("LIVE_URL").unwrap_or(defaults.live_url),
            live_model: env_string("LIVE_MODEL").unwrap_or(defaults.live_model),
            voice: env_string("LIVE_VOICE"),
            response_modality: env_string("LIVE_RESPONSE_MODALITY")
                .map(|s| Modality::from_str_or_default(&s))
                .unwrap_or(defaults.response_modality),
            system_instruction: env_string("LIVE_SYSTEM_INSTRUCTION"),
            setup_timeout: env_parse::<u64>("LIVE_SETUP_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.setup_timeout),
            gemini_api_key: env_string("GEMINI_API_KEY"),
            openai_api_key: env_string("OPENAI_API_KEY"),
            api_base_url: env_string("API_BASE_URL").unwrap_or(defaults.api_base_url),
            transcription_provider: env_string("TRANSCRIPTION_PROVIDER")
                .map(|s| TranscriptionProvider::from_str_or_default(&s))
                .unwrap_or(defaults.transcription_provider),
            transcription_model: env_string("TRANSCRIPTION_MODEL")
                .unwrap_or(defaults.transcription_model),
            embedding_model: env_string("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            rag_top_k: env_parse("RAG_TOP_K")?.unwrap_or(defaults.rag_top_k),
            rag_chunk_size: env_parse("RAG_CHUNK_SIZE")?.unwrap_or(defaults.rag_chunk_size),
            rag_chunk_overlap: env_parse("RAG_CHUNK_OVERLAP")?
                .unwrap_or(defaults.rag_chunk_overlap),
            session_kind: env_string("SESSION_KIND")
                .map(|s| SessionKind::from_str_or_default(&s))
                .unwrap_or(defaults.session_kind),
            playback_sample_rate: env_parse("PLAYBACK_SAMPLE_RATE")?
                .unwrap_or(defaults.playback_sample_rate),
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file on top of the environment.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        // .env is loaded into the environment by main.rs before this runs.
        let yaml_config = YamlConfig::from_file(path)?;
        let mut config = Self::from_env()?;
        config.apply_yaml(yaml_config);
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(live) = yaml.live {
            override_with(&mut self.live_url, live.url);
            override_with(&mut self.live_model, live.model);
            if live.voice.is_some() {
                self.voice = live.voice;
            }
            if let Some(modality) = live.response_modality {
                self.response_modality = Modality::from_str_or_default(&modality);
            }
            if live.system_instruction.is_some() {
                self.system_instruction = live.system_instruction;
            }
            if let Some(ms) = live.setup_timeout_ms {
                self.setup_timeout = Duration::from_millis(ms);
            }
        }
        if let Some(providers) = yaml.providers {
            if providers.gemini_api_key.is_some() {
                self.gemini_api_key = providers.gemini_api_key;
            }
            if providers.openai_api_key.is_some() {
                self.openai_api_key = providers.openai_api_key;
            }
            override_with(&mut self.api_base_url, providers.api_base_url);
        }
        if let Some(transcription) = yaml.transcription {
            if let Some(provider) = transcription.provider {
                self.transcription_provider = TranscriptionProvider::from_str_or_default(&provider);
            }
            override_with(&mut self.transcription_model, transcription.model);
        }
        if let Some(rag) = yaml.rag {
            override_with(&mut self.embedding_model, rag.embedding_model);
            override_with(&mut self.rag_top_k, rag.top_k);
            override_with(&mut self.rag_chunk_size, rag.chunk_size);
            override_with(&mut self.rag_chunk_overlap, rag.chunk_overlap);
        }
        if let Some(kind) = yaml.session.and_then(|s| s.kind) {
            self.session_kind = SessionKind::from_str_or_default(&kind);
        }
        if let Some(rate) = yaml.playback.and_then(|p| p.sample_rate) {
            self.playback_sample_rate = rate;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.live_url.starts_with("ws://") && !self.live_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue {
                name: "LIVE_URL".to_string(),
                message: format!("expected a ws:// or wss:// URL, got {}", self.live_url),
            });
        }
        if self.live_model.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "LIVE_MODEL".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.rag_top_k == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RAG_TOP_K".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.playback_sample_rate == 0 {
            return Err(ConfigError::InvalidValue {
                name: "PLAYBACK_SAMPLE_RATE".to_string(),
                message: "must be positive".to_string(),
            });
        }
        self.splitter().map(|_| ())
    }

    /// The Gemini key, which every live session needs.
    pub fn require_gemini_api_key(&self) -> Result<&str, ConfigError> {
        self.gemini_api_key
            .as_deref()
            .ok_or_else(|| ConfigError::Missing("GEMINI_API_KEY".to_string()))
    }

    /// Derive the immutable per-connection configuration.
    pub fn to_live_config(&self) -> LiveConfig {
        let mut config =
            LiveConfig::new(self.live_model.clone()).with_response_modality(self.response_modality);
        if let Some(voice) = &self.voice {
            config = config.with_voice(voice.clone());
        }
        if let Some(instruction) = &self.system_instruction {
            config = config.with_system_instruction(instruction.clone());
        }
        config
    }

    pub fn live_endpoint(&self) -> LiveEndpoint {
        let mut endpoint =
            LiveEndpoint::new(self.live_url.clone()).with_setup_timeout(self.setup_timeout);
        if let Some(key) = &self.gemini_api_key {
            endpoint = endpoint.with_api_key(key.clone());
        }
        endpoint
    }

    pub fn splitter(&self) -> Result<TextSplitter, ConfigError> {
        TextSplitter::new(self.rag_chunk_size, self.rag_chunk_overlap).map_err(|e| {
            ConfigError::InvalidValue {
                name: "RAG_CHUNK_OVERLAP".to_string(),
                message: e.to_string(),
            }
        })
    }
}

fn override_with<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

/// Non-empty value of an environment variable.
fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(name)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("{raw:?}: {e}"),
            })
        })
        .transpose()
}
