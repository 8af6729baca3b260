//! Send-time rewriting of outbound parts with retrieved context.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{RagResult, RagService, ScopedRag};
use crate::core::live::Part;

/// Line introducing retrieved context in an augmented prompt.
pub const CONTEXT_HEADER: &str = "Relevant context from documents:";

/// `original` followed by the context block.
pub fn augment_text(original: &str, context: &str) -> String {
    format!("{original}\n\n{CONTEXT_HEADER}\n{context}")
}

/// Rewrites outbound parts before they are sent.
#[async_trait]
pub trait OutboundRewriter: Send + Sync {
    /// New parts to send instead of `parts`. Callers send the original parts
    /// when this fails.
    async fn rewrite(&self, parts: &[Part]) -> RagResult<Vec<Part>>;
}

/// Anything that can produce a context string for a prompt.
#[async_trait]
pub trait ContextSource: Send + Sync {
    fn is_ready(&self) -> bool;

    async fn retrieve(&self, text: &str, k: usize) -> RagResult<String>;
}

#[async_trait]
impl ContextSource for RagService {
    fn is_ready(&self) -> bool {
        self.is_initialized()
    }

    async fn retrieve(&self, text: &str, k: usize) -> RagResult<String> {
        self.query(text, k).await
    }
}

#[async_trait]
impl ContextSource for ScopedRag {
    fn is_ready(&self) -> bool {
        self.is_initialized()
    }

    async fn retrieve(&self, text: &str, k: usize) -> RagResult<String> {
        self.query(text, k).await
    }
}

/// Appends retrieved context to every non-empty text part.
///
/// Inline media parts pass through untouched, and nothing changes while the
/// source is not ready or finds no context.
pub struct RagRewriter {
    source: Arc<dyn ContextSource>,
    top_k: usize,
}

impl RagRewriter {
    pub fn new(source: Arc<dyn ContextSource>, top_k: usize) -> Self {
        Self {
            source,
            top_k: top_k.max(1),
        }
    }
}

#[async_trait]
impl OutboundRewriter for RagRewriter {
    async fn rewrite(&self, parts: &[Part]) -> RagResult<Vec<Part>> {
        if !self.source.is_ready() {
            return Ok(parts.to_vec());
        }

        let mut rewritten = Vec::with_capacity(parts.len());
        for part in parts {
            let Some(text) = part.text.as_deref().filter(|t| !t.trim().is_empty()) else {
                rewritten.push(part.clone());
                continue;
            };
            let context = self.source.retrieve(text, self.top_k).await?;
            if context.is_empty() {
                rewritten.push(part.clone());
                continue;
            }
            debug!("Augmenting prompt with {} chars of context", context.len());
            rewritten.push(Part {
                text: Some(augment_text(text, &context)),
                ..part.clone()
            });
        }
        Ok(rewritten)
    }
}
