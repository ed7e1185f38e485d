//! Core data models shared by the chunker, deduplicator, index, and store.
//!
//! These types serialize to the JSON files persisted in the cache
//! directory, so field names are part of the on-disk format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A chunk candidate produced by the chunker, before deduplication.
///
/// Carries everything a [`Chunk`] does except the `chunk_id`, which is
/// only meaningful once duplicates have been removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub content: String,
    pub heading: String,
    pub level: u8,
    pub context: Vec<String>,
    pub sub_section: Option<usize>,
    pub total_sub_sections: usize,
}

impl Segment {
    /// Promote this segment to a [`Chunk`] at position `chunk_id`.
    pub fn into_chunk(self, chunk_id: usize) -> Chunk {
        Chunk {
            content: self.content,
            metadata: ChunkMetadata {
                heading: self.heading,
                level: self.level,
                context: self.context,
                sub_section: self.sub_section,
                total_sub_sections: self.total_sub_sections,
                chunk_id,
            },
        }
    }
}

/// Structural metadata attached to every retained chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Nearest section title, or a synthetic title.
    pub heading: String,
    /// Heading depth (1 = top level).
    pub level: u8,
    /// Ancestor heading titles, outermost first.
    pub context: Vec<String>,
    /// 1-based index when a long section was split, otherwise `None`.
    pub sub_section: Option<usize>,
    pub total_sub_sections: usize,
    /// Position in the deduplicated chunk list. Also the key used by the
    /// vector index to map vectors back to chunks.
    pub chunk_id: usize,
}

/// An immutable unit of retrievable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// A ranked reference to a chunk, produced by keyword or vector search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub chunk_id: usize,
    pub score: f32,
}

/// A query result handed back to callers: the chunk text plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

impl RetrievedChunk {
    pub fn from_hit(chunk: &Chunk, hit: SearchHit) -> Self {
        Self {
            content: chunk.content.clone(),
            metadata: chunk.metadata.clone(),
            score: hit.score,
        }
    }
}

/// Version record persisted next to each document's chunks.
///
/// Compared against incoming content and chunking parameters to decide
/// whether a rebuild is needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Id the record was saved under. Distinct ids may share a file stem,
    /// so readers check this before trusting the files.
    #[serde(default)]
    pub textbook_id: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub chunk_count: usize,
    /// `None` when the document was indexed without an embedding backend.
    pub embedding_model: Option<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Number of vectors in the persisted index. Lower than `chunk_count`
    /// when some embedding batches failed.
    #[serde(default)]
    pub vector_count: usize,
}

impl IndexMeta {
    /// SHA-256 hex digest of the exact document text.
    pub fn fingerprint(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Whether this record was built from `content` with the given
    /// chunking parameters.
    pub fn matches(&self, content_hash: &str, chunk_size: usize, chunk_overlap: usize) -> bool {
        self.content_hash == content_hash
            && self.chunk_size == chunk_size
            && self.chunk_overlap == chunk_overlap
    }
}

/// Everything known about one indexed document.
#[derive(Debug, Clone)]
pub struct DocumentIndex {
    pub textbook_id: String,
    pub meta: IndexMeta,
    pub chunks: Vec<Chunk>,
    pub vector_index: Option<crate::index::VectorIndex>,
}

impl DocumentIndex {
    /// The vector index, if one exists and holds at least one vector.
    pub fn searchable_index(&self) -> Option<&crate::index::VectorIndex> {
        self.vector_index.as_ref().filter(|idx| !idx.is_empty())
    }
}
