//! Text embedding collaborators.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{RagError, RagResult};
use crate::core::transcription::gemini::{GEMINI_API_BASE_URL, GoogleErrorResponse};

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

/// Turns text into a vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> RagResult<Vec<f32>>;

    /// Embed several texts, in order.
    async fn embed_batch(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn name(&self) -> &'static str;
}

// =============================================================================
// Gemini embedContent
// =============================================================================

#[derive(Debug, Clone)]
pub struct GeminiEmbedderConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl GeminiEmbedderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: GEMINI_API_BASE_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    fn model_name(&self) -> &str {
        self.model.trim_start_matches("models/")
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:embedContent",
            self.base_url.trim_end_matches('/'),
            self.model_name()
        )
    }
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

pub struct GeminiEmbedder {
    config: GeminiEmbedderConfig,
    http_client: Client,
}

impl GeminiEmbedder {
    pub fn new(config: GeminiEmbedderConfig) -> RagResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(RagError::ConfigurationError(
                "API key is required".to_string(),
            ));
        }
        let http_client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| {
                RagError::ConfigurationError(format!("Failed to create HTTP client: {e}"))
            })?;
        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        let body = json!({
            "model": format!("models/{}", self.config.model_name()),
            "content": {"parts": [{"text": text}]}
        });

        let response = self
            .http_client
            .post(self.config.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| RagError::NetworkError(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(RagError::EmbeddingFailed(GoogleErrorResponse::describe(
                status,
                &response_text,
            )));
        }

        let parsed: EmbedContentResponse = serde_json::from_str(&response_text)
            .map_err(|e| RagError::EmbeddingFailed(format!("Failed to parse response: {e}")))?;
        if parsed.embedding.values.is_empty() {
            return Err(RagError::EmbeddingFailed("empty embedding".to_string()));
        }
        debug!("Embedded {} chars into {} dims", text.len(), parsed.embedding.values.len());
        Ok(parsed.embedding.values)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

// =============================================================================
// Offline hashing embedder
// =============================================================================

/// Bag-of-words feature hashing into a fixed number of dimensions.
///
/// Needs no network; texts sharing words get similar vectors. Used for
/// offline runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 1)
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let hash = hasher.finish();
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    fn name(&self) -> &'static str {
        "hashing"
    }
}
