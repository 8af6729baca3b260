//! Document store, index lifecycle and retrieval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::{
    Embedder, MemoryVectorIndex, MetadataFilter, RagDocument, RagResult, ScoredChunk,
    TextSplitter, VectorIndex,
};

pub const DEFAULT_TOP_K: usize = 3;

/// Owns one knowledge base: staged documents plus the index built from them.
///
/// `initialized` is cleared whenever documents are added and set again by a
/// successful [`RagService::initialize`], which always rebuilds from every
/// staged document.
pub struct RagService {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    splitter: TextSplitter,
    top_k: usize,
    documents: RwLock<Vec<RagDocument>>,
    initialized: AtomicBool,
    /// Serializes rebuilds
    rebuild_lock: tokio::sync::Mutex<()>,
}

impl RagService {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            index: Arc::new(MemoryVectorIndex::new()),
            splitter: TextSplitter::default(),
            top_k: DEFAULT_TOP_K,
            documents: RwLock::new(Vec::new()),
            initialized: AtomicBool::new(false),
            rebuild_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = index;
        self
    }

    pub fn with_splitter(mut self, splitter: TextSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn document_count(&self) -> usize {
        self.documents.read().len()
    }

    /// Stage documents. Nothing is embedded until [`RagService::initialize`].
    pub fn add_documents(&self, documents: impl IntoIterator<Item = RagDocument>) {
        let mut staged = self.documents.write();
        let before = staged.len();
        staged.extend(documents);
        self.initialized.store(false, Ordering::SeqCst);
        debug!("Staged {} documents", staged.len() - before);
    }

    /// Chunk, embed and index every staged document.
    ///
    /// Returns the number of indexed chunks. With nothing staged this only
    /// logs a warning.
    pub async fn initialize(&self) -> RagResult<usize> {
        let _guard = self.rebuild_lock.lock().await;

        let documents = self.documents.read().clone();
        if documents.is_empty() {
            warn!("No documents staged, skipping index build");
            return Ok(0);
        }

        let chunks = self.splitter.split_documents(&documents);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        let count = chunks.len();
        self.index.rebuild(chunks.into_iter().zip(vectors).collect())?;

        // Documents added while embedding leave the index stale.
        if self.documents.read().len() == documents.len() {
            self.initialized.store(true, Ordering::SeqCst);
        }
        info!(
            "Indexed {} chunks from {} documents with {} embedder",
            count,
            documents.len(),
            self.embedder.name()
        );
        Ok(count)
    }

    /// Ranked chunks for `text`. Empty when the index is not initialized.
    pub async fn search(
        &self,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> RagResult<Vec<ScoredChunk>> {
        if !self.is_initialized() {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(text).await?;
        self.index.search(&query, k, filter)
    }

    /// Context string of the top `k` chunks, separated by blank lines.
    pub async fn query(&self, text: &str, k: usize) -> RagResult<String> {
        self.query_filtered(text, k, None).await
    }

    pub async fn query_filtered(
        &self,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> RagResult<String> {
        let hits = self.search(text, k, filter).await?;
        Ok(hits
            .into_iter()
            .map(|hit| hit.chunk.text)
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    /// Drop all documents and the index.
    pub fn clear(&self) {
        self.documents.write().clear();
        self.index.clear();
        self.initialized.store(false, Ordering::SeqCst);
    }

    /// View restricted to documents whose metadata `key` equals `value`.
    pub fn scoped(self: &Arc<Self>, key: impl Into<String>, value: impl Into<String>) -> ScopedRag {
        ScopedRag {
            service: Arc::clone(self),
            key: key.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Debug for RagService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagService")
            .field("embedder", &self.embedder.name())
            .field("documents", &self.document_count())
            .field("chunks", &self.index.len())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// Tenant view of a [`RagService`], e.g. one patient.
///
/// Stamps the scoping key on every added document and filters every query by
/// it, so one tenant never retrieves another's chunks.
#[derive(Debug, Clone)]
pub struct ScopedRag {
    service: Arc<RagService>,
    key: String,
    value: String,
}

impl ScopedRag {
    pub fn service(&self) -> &Arc<RagService> {
        &self.service
    }

    pub fn scope(&self) -> (&str, &str) {
        (&self.key, &self.value)
    }

    fn filter(&self) -> MetadataFilter {
        MetadataFilter::new().with(self.key.clone(), self.value.clone())
    }

    pub fn add_documents(&self, documents: impl IntoIterator<Item = RagDocument>) {
        let key = self.key.clone();
        let value = self.value.clone();
        self.service.add_documents(
            documents
                .into_iter()
                .map(move |doc| doc.with_metadata(key.clone(), value.clone())),
        );
    }

    pub async fn initialize(&self) -> RagResult<usize> {
        self.service.initialize().await
    }

    pub fn is_initialized(&self) -> bool {
        self.service.is_initialized()
    }

    pub async fn search(&self, text: &str, k: usize) -> RagResult<Vec<ScoredChunk>> {
        self.service.search(text, k, Some(&self.filter())).await
    }

    pub async fn query(&self, text: &str, k: usize) -> RagResult<String> {
        self.service
            .query_filtered(text, k, Some(&self.filter()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rag::{HashingEmbedder, RagError};
    use async_trait::async_trait;

    fn service() -> Arc<RagService> {
        Arc::new(RagService::new(Arc::new(HashingEmbedder::default())))
    }

    #[tokio::test]
    async fn test_round_trip() {
        let rag = service();
        let doc = RagDocument::new("The patient reports insomnia and wakes up at 3am every night.");
        assert_eq!(rag.query("insomnia", 2).await.unwrap(), "");

        rag.add_documents([doc.clone(), RagDocument::new("Quarterly revenue grew by ten percent.")]);
        assert!(!rag.is_initialized());
        assert_eq!(rag.query("insomnia", 2).await.unwrap(), "");

        assert_eq!(rag.initialize().await.unwrap(), 2);
        assert!(rag.is_initialized());
        let context = rag.query("Why does the patient have insomnia at night?", 1).await.unwrap();
        assert_eq!(context, doc.content);
    }

    #[tokio::test]
    async fn test_initialize_without_documents_is_noop() {
        let rag = service();
        assert_eq!(rag.initialize().await.unwrap(), 0);
        assert!(!rag.is_initialized());
    }

    #[tokio::test]
    async fn test_adding_documents_requires_rebuild() {
        let rag = service();
        rag.add_documents([RagDocument::new("first document about sleep")]);
        rag.initialize().await.unwrap();
        rag.add_documents([RagDocument::new("second document about diet")]);
        assert!(!rag.is_initialized());

        assert_eq!(rag.initialize().await.unwrap(), 2);
        let hits = rag.search("diet", 5, None).await.unwrap();
        assert_eq!(hits.len(), 2);

        rag.clear();
        assert_eq!(rag.document_count(), 0);
        assert_eq!(rag.query("diet", 5).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_scoped_views_do_not_leak() {
        let rag = service();
        let alice = rag.scoped("patient_id", "alice");
        let bob = rag.scoped("patient_id", "bob");
        alice.add_documents([RagDocument::new("Alice takes sertraline every morning.")]);
        bob.add_documents([RagDocument::new("Bob takes sertraline every evening.")]);
        alice.initialize().await.unwrap();

        let context = bob.query("sertraline", 5).await.unwrap();
        assert_eq!(context, "Bob takes sertraline every evening.");
        let hits = alice.search("sertraline", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.metadata["patient_id"], "alice");
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> RagResult<Vec<f32>> {
            Err(RagError::EmbeddingFailed("offline".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_failed_build_stays_uninitialized() {
        let rag = RagService::new(Arc::new(FailingEmbedder));
        rag.add_documents([RagDocument::new("text")]);
        assert!(rag.initialize().await.is_err());
        assert!(!rag.is_initialized());
    }
}
