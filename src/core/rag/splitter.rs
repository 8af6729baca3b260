//! Overlapping character-window text splitter.

use super::{Chunk, RagDocument, RagError, RagResult};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Splits text into windows of at most `chunk_size` characters, each
/// starting `chunk_size - overlap` characters after the previous one.
///
/// A window is cut at the last whitespace in its second half when there is
/// one, so words are not split mid-way.
#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    overlap: usize,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl TextSplitter {
    pub fn new(chunk_size: usize, overlap: usize) -> RagResult<Self> {
        if chunk_size == 0 {
            return Err(RagError::ConfigurationError(
                "chunk size must be positive".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(RagError::ConfigurationError(format!(
                "chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut pieces = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let mut end = (start + self.chunk_size).min(chars.len());
            if end < chars.len() {
                let floor = start + self.chunk_size / 2;
                if let Some(cut) = (floor..end).rev().find(|&i| chars[i].is_whitespace()) {
                    end = cut;
                }
            }

            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                pieces.push(piece.to_string());
            }
            if end >= chars.len() {
                break;
            }
            start = end.saturating_sub(self.overlap).max(start + 1);
        }
        pieces
    }

    /// Split every document, copying its metadata onto each chunk.
    pub fn split_documents(&self, documents: &[RagDocument]) -> Vec<Chunk> {
        documents
            .iter()
            .flat_map(|doc| {
                self.split(&doc.content)
                    .into_iter()
                    .enumerate()
                    .map(move |(i, text)| Chunk::from_document(doc, i, text))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let splitter = TextSplitter::default();
        assert_eq!(splitter.split("  hello world "), vec!["hello world"]);
        assert!(splitter.split("   ").is_empty());
    }

    #[test]
    fn test_windows_overlap() {
        let splitter = TextSplitter::new(10, 4).unwrap();
        let pieces = splitter.split("abcdefghijklmnopqrst");
        assert_eq!(pieces, vec!["abcdefghij", "ghijklmnop", "mnopqrst"]);
    }

    #[test]
    fn test_default_sizes_bound_chunks() {
        let text = "word ".repeat(700);
        let pieces = TextSplitter::default().split(&text);
        assert!(pieces.len() >= 4);
        assert!(pieces.iter().all(|p| p.chars().count() <= DEFAULT_CHUNK_SIZE));
        assert!(pieces.iter().all(|p| !p.starts_with("ord")));
    }

    #[test]
    fn test_invalid_overlap_rejected() {
        assert!(TextSplitter::new(100, 100).is_err());
        assert!(TextSplitter::new(0, 0).is_err());
    }

    #[test]
    fn test_split_documents_numbers_chunks_per_document() {
        let splitter = TextSplitter::new(10, 2).unwrap();
        let chunks = splitter.split_documents(&[
            RagDocument::new("aaaaaaaaaaaaaaa"),
            RagDocument::new("short"),
        ]);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].metadata[super::super::CHUNK_INDEX_KEY], "0");
    }
}
