//! The retrieval engine: index a textbook once, then answer queries.
//!
//! A [`Retriever`] owns a [`VersionStore`], an optional embedding backend,
//! and the currently active document. It moves through three states:
//!
//! ```text
//! Idle ──index(id)──▶ Indexing(id) ──built/loaded──▶ Ready(id)
//!                          ▲                              │
//!                          └──────────index(other)────────┘
//! ```
//!
//! # Indexing
//!
//! 1. If the store already holds a version built from identical content
//!    with identical chunk parameters (and `force` is false) it is loaded.
//! 2. Otherwise the text is split by headings, deduplicated, and filtered
//!    by length. With an embedding backend the chunks are embedded in
//!    batches; failing batches are skipped.
//! 3. The result is persisted and becomes the active document.
//!
//! # Querying
//!
//! Queries are truncated and normalised, then answered by vector search
//! when possible. Any failure along the vector path (no backend, no
//! vectors, embedding error, zero hits) falls back to keyword search
//! without surfacing an error. An unknown textbook yields no results.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use handbook_rag_core::chunk::split_document;
use handbook_rag_core::dedupe::dedupe;
use handbook_rag_core::embedding::EmbeddingPort;
use handbook_rag_core::index::VectorIndex;
use handbook_rag_core::keyword::keyword_search;
use handbook_rag_core::models::{DocumentIndex, IndexMeta, RetrievedChunk, SearchHit};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::progress::{batch_percent, NoProgress, ProgressReporter};
use crate::store::VersionStore;

/// Characters stripped from queries before searching.
const QUERY_MARKUP: &[char] = &['#', '*', '_', '~', '`'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrieverState {
    Idle,
    Indexing(String),
    Ready(String),
}

/// How an `index` call obtained its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOutcome {
    /// An up-to-date persisted version was reused.
    Loaded,
    /// The document was chunked (and embedded) from scratch.
    Built,
}

/// Summary of an `index` call.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub textbook_id: String,
    pub outcome: IndexOutcome,
    pub chunk_count: usize,
    pub vector_count: usize,
    /// Zero-based numbers of embedding batches that were skipped.
    pub failed_batches: Vec<usize>,
    pub embedding_model: Option<String>,
}

impl IndexReport {
    fn new(doc: &DocumentIndex, outcome: IndexOutcome, failed_batches: Vec<usize>) -> Self {
        Self {
            textbook_id: doc.textbook_id.clone(),
            outcome,
            chunk_count: doc.chunks.len(),
            vector_count: doc.searchable_index().map(VectorIndex::len).unwrap_or(0),
            failed_batches,
            embedding_model: doc.meta.embedding_model.clone(),
        }
    }
}

/// Persisted state of a textbook, as shown by `hbk status`.
#[derive(Debug, Clone, Serialize)]
pub struct TextbookStatus {
    pub textbook_id: String,
    pub indexed: bool,
    pub active: bool,
    pub meta: Option<IndexMeta>,
}

pub struct Retriever {
    config: Config,
    store: VersionStore,
    embedder: Option<Box<dyn EmbeddingPort>>,
    state: RetrieverState,
    active: Option<Arc<DocumentIndex>>,
    progress: Arc<dyn ProgressReporter>,
}

impl Retriever {
    /// Build a retriever with the embedding backend named in `config`.
    ///
    /// A backend that fails to initialise is logged and the retriever runs
    /// keyword-only.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = match create_provider(&config.embedding) {
            Ok(embedder) => embedder,
            Err(e) => {
                warn!(
                    provider = %config.embedding.provider,
                    error = %format!("{:#}", e),
                    "embedding backend unavailable, using keyword search only"
                );
                None
            }
        };
        Self::with_embedder(config, embedder)
    }

    /// Build a retriever around an explicit embedding backend (or none).
    pub fn with_embedder(config: &Config, embedder: Option<Box<dyn EmbeddingPort>>) -> Result<Self> {
        let store = VersionStore::open(&config.cache.dir, config.cache.memory_capacity)?;
        match &embedder {
            Some(port) => info!(model = port.model_name(), "retriever ready with vector search"),
            None => info!("retriever ready in keyword-only mode"),
        }
        Ok(Self {
            config: config.clone(),
            store,
            embedder,
            state: RetrieverState::Idle,
            active: None,
            progress: Arc::new(NoProgress),
        })
    }

    /// Default reporter used by [`index`](Self::index).
    pub fn set_progress(&mut self, progress: Arc<dyn ProgressReporter>) {
        self.progress = progress;
    }

    pub fn state(&self) -> &RetrieverState {
        &self.state
    }

    pub fn active_textbook(&self) -> Option<&str> {
        self.active.as_deref().map(|doc| doc.textbook_id.as_str())
    }

    pub fn has_vector_backend(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// Index `content` under `textbook_id`, reporting to the default
    /// progress reporter.
    pub fn index(&mut self, content: &str, textbook_id: &str, force: bool) -> Result<IndexReport> {
        let progress = Arc::clone(&self.progress);
        self.index_with_progress(content, textbook_id, force, progress.as_ref())
    }

    /// Index `content` under `textbook_id`.
    ///
    /// Partial embedding failure is not an error; it shows up in
    /// [`IndexReport::failed_batches`]. If persisting fails, the freshly
    /// built document still becomes active and the error is returned.
    pub fn index_with_progress(
        &mut self,
        content: &str,
        textbook_id: &str,
        force: bool,
        progress: &dyn ProgressReporter,
    ) -> Result<IndexReport> {
        progress.report("Analyzing textbook content...", 5);
        let params = self.config.chunking.params();

        if !self.store.needs_rebuild(
            textbook_id,
            content,
            params.chunk_size,
            params.chunk_overlap,
            force,
        ) {
            progress.report("Loading existing index...", 10);
            match self.store.load(textbook_id) {
                Ok(doc) => {
                    let report = IndexReport::new(&doc, IndexOutcome::Loaded, Vec::new());
                    self.activate(doc);
                    progress.report("Index loaded successfully", 100);
                    info!(textbook_id, chunks = report.chunk_count, "reused existing index");
                    return Ok(report);
                }
                Err(e) => info!(textbook_id, error = %e, "existing index unusable, rebuilding"),
            }
        }

        self.state = RetrieverState::Indexing(textbook_id.to_string());
        let (doc, failed_batches) = self.build(content, textbook_id, progress);
        let doc = Arc::new(doc);

        let saved = self.store.save(Arc::clone(&doc), progress);
        let report = IndexReport::new(&doc, IndexOutcome::Built, failed_batches);
        self.activate(doc);
        saved.with_context(|| format!("Failed to persist index for '{}'", textbook_id))?;

        progress.report("Indexing complete", 100);
        info!(
            textbook_id,
            chunks = report.chunk_count,
            vectors = report.vector_count,
            failed_batches = report.failed_batches.len(),
            "indexing complete"
        );
        Ok(report)
    }

    fn build(
        &self,
        content: &str,
        textbook_id: &str,
        progress: &dyn ProgressReporter,
    ) -> (DocumentIndex, Vec<usize>) {
        let params = self.config.chunking.params();

        progress.report("Splitting textbook into chunks...", 15);
        let segments = split_document(content, &params);

        progress.report("Processing text chunks...", 30);
        debug!(textbook_id, segments = segments.len(), "split textbook");

        progress.report("Removing duplicate content...", 40);
        let chunks = dedupe(segments, self.config.chunking.min_chunk_len);

        progress.report("Creating chunk metadata...", 50);
        debug!(textbook_id, chunks = chunks.len(), "deduplicated chunks");

        let (vector_index, failed_batches) = match &self.embedder {
            Some(port) => {
                progress.report("Creating vector embeddings...", 60);
                let result = VectorIndex::build(
                    &chunks,
                    port.as_ref(),
                    &self.config.indexing.batch_policy(),
                    |n, total| {
                        progress.report(
                            &format!("Processing batch {}/{}...", n, total),
                            batch_percent(n, total),
                        )
                    },
                );
                let failed = result.failed_batches().to_vec();
                if !failed.is_empty() {
                    warn!(
                        textbook_id,
                        failed = failed.len(),
                        "some embedding batches failed; affected chunks are keyword-only"
                    );
                }
                (Some(result.into_index()), failed)
            }
            None => (None, Vec::new()),
        };

        let vector_count = vector_index.as_ref().map(VectorIndex::len).unwrap_or(0);
        let meta = IndexMeta {
            textbook_id: textbook_id.to_string(),
            content_hash: VersionStore::content_hash(content),
            created_at: chrono::Utc::now(),
            chunk_count: chunks.len(),
            embedding_model: self.embedder.as_ref().map(|p| p.model_name().to_string()),
            chunk_size: params.chunk_size,
            chunk_overlap: params.chunk_overlap,
            vector_count,
        };

        let doc = DocumentIndex {
            textbook_id: textbook_id.to_string(),
            meta,
            chunks,
            vector_index,
        };
        (doc, failed_batches)
    }

    fn activate(&mut self, doc: Arc<DocumentIndex>) {
        self.state = RetrieverState::Ready(doc.textbook_id.clone());
        self.active = Some(doc);
    }

    /// Active document for `textbook_id`, loading it from the store if
    /// another (or no) document is active.
    fn document(&mut self, textbook_id: &str) -> Option<Arc<DocumentIndex>> {
        if let Some(doc) = &self.active {
            if doc.textbook_id == textbook_id {
                return Some(Arc::clone(doc));
            }
        }
        match self.store.load(textbook_id) {
            Ok(doc) => {
                self.activate(Arc::clone(&doc));
                Some(doc)
            }
            Err(e) => {
                info!(textbook_id, error = %e, "no index available for query");
                None
            }
        }
    }

    /// Return up to `top_k` chunks relevant to `query`, best first.
    ///
    /// Never fails: an unknown textbook yields an empty list and vector
    /// search problems fall back to keyword search.
    pub fn query(&mut self, textbook_id: &str, query: &str, top_k: usize) -> Vec<RetrievedChunk> {
        let query = preprocess_query(query, self.config.retrieval.max_query_len);
        let Some(doc) = self.document(textbook_id) else {
            return Vec::new();
        };

        let hits = match self.vector_search(&doc, &query, top_k) {
            Some(hits) => hits,
            None => keyword_search(&doc.chunks, &query, top_k),
        };

        hits.into_iter()
            .filter_map(|hit| {
                doc.chunks
                    .get(hit.chunk_id)
                    .map(|chunk| RetrievedChunk::from_hit(chunk, hit))
            })
            .collect()
    }

    /// `None` whenever vector search cannot produce results.
    fn vector_search(&self, doc: &DocumentIndex, query: &str, top_k: usize) -> Option<Vec<SearchHit>> {
        let port = self.embedder.as_ref()?;
        let Some(index) = doc.searchable_index() else {
            debug!(textbook_id = %doc.textbook_id, "no vectors, using keyword search");
            return None;
        };

        let vector = match port.embed(query) {
            Ok(vector) => vector,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "query embedding failed, using keyword search");
                return None;
            }
        };

        match index.search(&vector, top_k) {
            Ok(hits) if !hits.is_empty() => Some(hits),
            Ok(_) => {
                debug!("vector search returned nothing, using keyword search");
                None
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "vector search failed, using keyword search");
                None
            }
        }
    }

    /// Persisted and in-memory state for `textbook_id`.
    pub fn status(&self, textbook_id: &str) -> TextbookStatus {
        let meta = self.store.read_meta(textbook_id).ok();
        TextbookStatus {
            textbook_id: textbook_id.to_string(),
            indexed: meta.is_some(),
            active: self.active_textbook() == Some(textbook_id),
            meta,
        }
    }

    /// Drop everything persisted for `textbook_id`. Returns whether
    /// anything existed.
    pub fn clear(&mut self, textbook_id: &str) -> Result<bool> {
        if self.active_textbook() == Some(textbook_id) {
            self.active = None;
            self.state = RetrieverState::Idle;
        }
        self.store.invalidate(textbook_id)
    }
}

/// Truncate to `max_len` characters, collapse whitespace, and strip
/// Markdown emphasis and heading markers.
pub fn preprocess_query(query: &str, max_len: usize) -> String {
    let stripped: String = query
        .chars()
        .take(max_len)
        .filter(|c| !QUERY_MARKUP.contains(c))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Join retrieved chunks into a single context block for a prompt.
pub fn join_context(results: &[RetrievedChunk]) -> String {
    results
        .iter()
        .map(|r| r.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_query() {
        assert_eq!(preprocess_query("  What   is\n\t**policy**? ", 1000), "What is policy?");
        assert_eq!(preprocess_query("## `code` ~x~ _y_", 1000), "code x y");
        assert_eq!(preprocess_query("abcdef", 3), "abc");
        assert_eq!(preprocess_query("", 1000), "");
    }

    #[test]
    fn test_preprocess_truncates_by_chars() {
        assert_eq!(preprocess_query("ééééé", 2), "éé");
    }

    #[test]
    fn test_join_context() {
        let meta = handbook_rag_core::models::ChunkMetadata {
            heading: "H".to_string(),
            level: 1,
            context: Vec::new(),
            sub_section: None,
            total_sub_sections: 1,
            chunk_id: 0,
        };
        let results = vec![
            RetrievedChunk {
                content: "first".to_string(),
                metadata: meta.clone(),
                score: 1.0,
            },
            RetrievedChunk {
                content: "second".to_string(),
                metadata: meta,
                score: 0.5,
            },
        ];
        assert_eq!(join_context(&results), "first\n\nsecond");
        assert_eq!(join_context(&[]), "");
    }
}
