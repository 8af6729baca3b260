//! Documents and chunks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// String metadata attached to documents and chunks.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key holding a chunk's unique id.
pub const CHUNK_ID_KEY: &str = "chunk_id";

/// Metadata key holding a chunk's position within its document.
pub const CHUNK_INDEX_KEY: &str = "chunk_index";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RagDocument {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl RagDocument {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A slice of a document as stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    /// Document metadata plus [`CHUNK_ID_KEY`] and [`CHUNK_INDEX_KEY`]
    pub metadata: Metadata,
}

impl Chunk {
    pub(crate) fn from_document(document: &RagDocument, index: usize, text: String) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let mut metadata = document.metadata.clone();
        metadata.insert(CHUNK_ID_KEY.to_string(), id.clone());
        metadata.insert(CHUNK_INDEX_KEY.to_string(), index.to_string());
        Self { id, text, metadata }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_carries_document_metadata_and_id() {
        let doc = RagDocument::new("body").with_metadata("patient_id", "p-1");
        let a = Chunk::from_document(&doc, 0, "body".to_string());
        let b = Chunk::from_document(&doc, 1, "body".to_string());

        assert_ne!(a.id, b.id);
        assert_eq!(a.metadata.get(CHUNK_ID_KEY), Some(&a.id));
        assert_eq!(b.metadata.get(CHUNK_INDEX_KEY).map(String::as_str), Some("1"));
        assert_eq!(a.metadata.get("patient_id").map(String::as_str), Some("p-1"));
    }
}
