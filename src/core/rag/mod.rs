//! Retrieval augmentation.
//!
//! Documents are staged with [`RagService::add_documents`], chunked and
//! embedded by [`RagService::initialize`], and searched by similarity. A
//! [`RagRewriter`] appends retrieved context to outbound text parts.

use thiserror::Error;

pub mod document;
pub mod embedder;
pub mod index;
pub mod rewriter;
pub mod service;
pub mod splitter;

pub use document::{CHUNK_ID_KEY, CHUNK_INDEX_KEY, Chunk, Metadata, RagDocument};
pub use embedder::{
    DEFAULT_EMBEDDING_MODEL, Embedder, GeminiEmbedder, GeminiEmbedderConfig, HashingEmbedder,
};
pub use index::{MemoryVectorIndex, MetadataFilter, ScoredChunk, VectorIndex, cosine_similarity};
pub use rewriter::{CONTEXT_HEADER, ContextSource, OutboundRewriter, RagRewriter, augment_text};
pub use service::{DEFAULT_TOP_K, RagService, ScopedRag};
pub use splitter::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, TextSplitter};

/// Errors from the retrieval path.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Embedding request could not be sent or read
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Index error: {0}")]
    IndexError(String),
}

pub type RagResult<T> = Result<T, RagError>;
