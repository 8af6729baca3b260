//! Similarity index over embedded chunks.

use parking_lot::RwLock;

use super::{Chunk, Metadata, RagError, RagResult};

/// Cosine similarity of two vectors; 0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Equality constraints on chunk metadata; all must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    equals: Metadata,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.equals
            .iter()
            .all(|(k, v)| metadata.get(k).is_some_and(|m| m == v))
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Stores embedded chunks and ranks them against a query vector.
pub trait VectorIndex: Send + Sync {
    /// Replace the whole index content.
    fn rebuild(&self, entries: Vec<(Chunk, Vec<f32>)>) -> RagResult<()>;

    /// Best `k` chunks passing `filter`, highest score first.
    fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> RagResult<Vec<ScoredChunk>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);
}

/// Brute-force in-memory index.
#[derive(Default)]
pub struct MemoryVectorIndex {
    entries: RwLock<Vec<(Chunk, Vec<f32>)>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorIndex for MemoryVectorIndex {
    fn rebuild(&self, entries: Vec<(Chunk, Vec<f32>)>) -> RagResult<()> {
        if let Some((_, first)) = entries.first() {
            let dims = first.len();
            if let Some((chunk, _)) = entries.iter().find(|(_, v)| v.len() != dims) {
                return Err(RagError::IndexError(format!(
                    "embedding dimension mismatch for chunk {}",
                    chunk.id
                )));
            }
        }
        *self.entries.write() = entries;
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> RagResult<Vec<ScoredChunk>> {
        let entries = self.entries.read();
        if let Some((_, first)) = entries.first()
            && first.len() != query.len()
        {
            return Err(RagError::IndexError(format!(
                "query has {} dimensions, index has {}",
                query.len(),
                first.len()
            )));
        }

        let mut scored: Vec<ScoredChunk> = entries
            .iter()
            .filter(|(chunk, _)| filter.is_none_or(|f| f.matches(&chunk.metadata)))
            .map(|(chunk, vector)| ScoredChunk {
                chunk: chunk.clone(),
                score: cosine_similarity(query, vector),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rag::RagDocument;

    fn chunk(text: &str, patient: &str) -> Chunk {
        let doc = RagDocument::new(text).with_metadata("patient_id", patient);
        Chunk::from_document(&doc, 0, text.to_string())
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-5);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-5);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-5);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_search_ranks_and_truncates() {
        let index = MemoryVectorIndex::new();
        index
            .rebuild(vec![
                (chunk("east", "a"), vec![1.0, 0.0]),
                (chunk("north", "a"), vec![0.0, 1.0]),
                (chunk("north-east", "a"), vec![0.7, 0.7]),
            ])
            .unwrap();

        let hits = index.search(&[1.0, 0.1], 2, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.text, "east");
        assert_eq!(hits[1].chunk.text, "north-east");
    }

    #[test]
    fn test_filter_scopes_results() {
        let index = MemoryVectorIndex::new();
        index
            .rebuild(vec![
                (chunk("mine", "p-1"), vec![1.0, 0.0]),
                (chunk("theirs", "p-2"), vec![1.0, 0.0]),
            ])
            .unwrap();

        let filter = MetadataFilter::new().with("patient_id", "p-2");
        let hits = index.search(&[1.0, 0.0], 5, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.text, "theirs");
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let index = MemoryVectorIndex::new();
        assert!(
            index
                .rebuild(vec![
                    (chunk("a", "p"), vec![1.0]),
                    (chunk("b", "p"), vec![1.0, 0.0]),
                ])
                .is_err()
        );
        index.rebuild(vec![(chunk("a", "p"), vec![1.0, 0.0])]).unwrap();
        assert!(index.search(&[1.0], 1, None).is_err());
        index.clear();
        assert!(index.is_empty());
    }
}
