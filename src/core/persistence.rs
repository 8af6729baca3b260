//! Session records handed to external storage.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::risk::SessionRiskSummary;
use crate::core::turn::{ConversationEntry, SessionKind};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Record rejected: {0}")]
    Rejected(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A finished conversation and what is known about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub kind: SessionKind,
    /// Milliseconds since the Unix epoch
    pub started_at: u64,
    pub ended_at: u64,
    pub history: Vec<ConversationEntry>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<SessionRiskSummary>,
}

/// Durable storage for finished sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, record: SessionRecord) -> StoreResult<()>;
}

/// Keeps records in memory, keyed by session id.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    records: RwLock<BTreeMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.records.read().get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, record: SessionRecord) -> StoreResult<()> {
        if record.session_id.is_empty() {
            return Err(StoreError::Rejected("session id is empty".to_string()));
        }
        self.records
            .write()
            .insert(record.session_id.clone(), record);
        Ok(())
    }
}
