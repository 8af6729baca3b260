use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional so a file may set only what it needs. Values
/// present here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// live:
///   url: "wss://generativelanguage.googleapis.com/ws/..."
///   model: "gemini-2.0-flash-live-001"
///   voice: "Puck"
///   response_modality: "audio"
///   system_instruction: "You are a supportive therapist."
///   setup_timeout_ms: 15000
///
/// providers:
///   gemini_api_key: "your-gemini-key"
///   openai_api_key: "your-openai-key"
///   api_base_url: "https://generativelanguage.googleapis.com"
///
/// transcription:
///   provider: "gemini"
///   model: "gemini-2.0-flash"
///
/// rag:
///   embedding_model: "text-embedding-004"
///   top_k: 3
///   chunk_size: 1000
///   chunk_overlap: 200
///
/// session:
///   kind: "therapy"
///
/// playback:
///   sample_rate: 24000
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub live: Option<LiveYaml>,
    pub providers: Option<ProvidersYaml>,
    pub transcription: Option<TranscriptionYaml>,
    pub rag: Option<RagYaml>,
    pub session: Option<SessionYaml>,
    pub playback: Option<PlaybackYaml>,
}

/// Live connection settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LiveYaml {
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub response_modality: Option<String>,
    pub system_instruction: Option<String>,
    pub setup_timeout_ms: Option<u64>,
}

/// Provider credentials from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersYaml {
    pub gemini_api_key: Option<String>,
    /// Only needed for Whisper transcription
    pub openai_api_key: Option<String>,
    /// Base URL of the Gemini REST API (transcription and embeddings)
    pub api_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TranscriptionYaml {
    pub provider: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RagYaml {
    pub embedding_model: Option<String>,
    pub top_k: Option<usize>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PlaybackYaml {
    pub sample_rate: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ReadFailed(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        serde_yaml::from_str(&contents)
            .map_err(|e| ConfigError::ParseFailed(format!("Failed to parse YAML config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
live:
  url: "ws://localhost:9000/live"
  model: "gemini-test"
  voice: "Kore"
  response_modality: "text"
  system_instruction: "Be brief."
  setup_timeout_ms: 2500

providers:
  gemini_api_key: "g-key"
  openai_api_key: "o-key"

transcription:
  provider: "whisper"

rag:
  top_k: 5
  chunk_size: 500
  chunk_overlap: 50

session:
  kind: "twin"

playback:
  sample_rate: 48000
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        let live = config.live.unwrap();
        assert_eq!(live.model.as_deref(), Some("gemini-test"));
        assert_eq!(live.setup_timeout_ms, Some(2500));
        assert_eq!(
            config.providers.unwrap().openai_api_key.as_deref(),
            Some("o-key")
        );
        assert_eq!(config.rag.unwrap().chunk_overlap, Some(50));
        assert_eq!(config.session.unwrap().kind.as_deref(), Some("twin"));
        assert_eq!(config.playback.unwrap().sample_rate, Some(48000));
    }

    #[test]
    fn test_yaml_config_partial() {
        let config: YamlConfig = serde_yaml::from_str("rag:\n  top_k: 1\n").unwrap();
        assert!(config.live.is_none());
        assert_eq!(config.rag.unwrap().top_k, Some(1));
    }

    #[test]
    fn test_yaml_from_file_errors() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        fs::write(&path, "live: [unclosed").unwrap();

        assert!(matches!(
            YamlConfig::from_file(&path),
            Err(ConfigError::ParseFailed(_))
        ));
        assert!(matches!(
            YamlConfig::from_file(&temp_dir.path().join("missing.yaml")),
            Err(ConfigError::ReadFailed(_))
        ));
    }
}
