//! Versioned on-disk store for indexed documents.
//!
//! Each document (`textbook_id`) is persisted as three files in the cache
//! directory:
//!
//! | File | Contents |
//! |------|----------|
//! | `{id}.index` | Vector index (absent in keyword-only mode) |
//! | `{id}.chunks.json` | `{ "chunks": [...], "metadata": [...] }`, parallel arrays |
//! | `{id}.meta.json` | [`IndexMeta`]: content hash, chunk params, model, counts |
//!
//! Every file is written to a `.tmp` sibling and renamed into place. The
//! meta file is removed first and renamed in last, so it acts as a commit
//! marker: a crash mid-save leaves no meta file, which reads as "not found"
//! and triggers a rebuild.
//!
//! Anything unreadable or inconsistent is treated the same way. The only
//! errors `save` surfaces are genuine I/O failures on the cache directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use handbook_rag_core::index::{tmp_path, VectorIndex};
use handbook_rag_core::models::{Chunk, ChunkMetadata, DocumentIndex, IndexMeta};

use crate::cache::{BoundedCache, CacheStats};
use crate::error::StoreError;
use crate::progress::ProgressReporter;

/// Chunk file layout: contents and metadata as parallel arrays.
#[derive(Serialize, Deserialize)]
struct ChunksFile {
    chunks: Vec<String>,
    metadata: Vec<ChunkMetadata>,
}

impl ChunksFile {
    fn from_chunks(chunks: &[Chunk]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.content.clone()).collect(),
            metadata: chunks.iter().map(|c| c.metadata.clone()).collect(),
        }
    }

    fn into_chunks(self) -> Result<Vec<Chunk>, StoreError> {
        if self.chunks.len() != self.metadata.len() {
            return Err(StoreError::Format(format!(
                "{} chunks but {} metadata entries",
                self.chunks.len(),
                self.metadata.len()
            )));
        }
        self.chunks
            .into_iter()
            .zip(self.metadata)
            .enumerate()
            .map(|(i, (content, metadata))| {
                if metadata.chunk_id != i {
                    return Err(StoreError::Format(format!(
                        "chunk at position {} has chunk_id {}",
                        i, metadata.chunk_id
                    )));
                }
                Ok(Chunk { content, metadata })
            })
            .collect()
    }
}

/// Persisted document indexes plus an in-memory LRU of loaded ones.
pub struct VersionStore {
    dir: PathBuf,
    cache: BoundedCache<String, Arc<DocumentIndex>>,
}

impl VersionStore {
    /// Open (and create if needed) the cache directory.
    pub fn open(dir: impl Into<PathBuf>, memory_capacity: usize) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;
        Ok(Self {
            dir,
            cache: BoundedCache::new(memory_capacity),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fingerprint used to detect content changes.
    pub fn content_hash(content: &str) -> String {
        IndexMeta::fingerprint(content)
    }

    fn path(&self, textbook_id: &str, suffix: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", file_stem(textbook_id), suffix))
    }

    pub fn index_path(&self, textbook_id: &str) -> PathBuf {
        self.path(textbook_id, "index")
    }

    pub fn chunks_path(&self, textbook_id: &str) -> PathBuf {
        self.path(textbook_id, "chunks.json")
    }

    pub fn meta_path(&self, textbook_id: &str) -> PathBuf {
        self.path(textbook_id, "meta.json")
    }

    /// Read just the version record for `textbook_id`.
    pub fn read_meta(&self, textbook_id: &str) -> Result<IndexMeta, StoreError> {
        let path = self.meta_path(textbook_id);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(textbook_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let meta: IndexMeta = serde_json::from_str(&content)?;
        if meta.textbook_id != textbook_id {
            tracing::debug!(
                textbook_id,
                stored = %meta.textbook_id,
                "index files belong to another textbook"
            );
            return Err(StoreError::NotFound(textbook_id.to_string()));
        }
        Ok(meta)
    }

    /// Whether `content` must be (re)indexed under `textbook_id`.
    pub fn needs_rebuild(
        &self,
        textbook_id: &str,
        content: &str,
        chunk_size: usize,
        chunk_overlap: usize,
        force: bool,
    ) -> bool {
        if force {
            return true;
        }
        match self.read_meta(textbook_id) {
            Ok(meta) => !meta.matches(&Self::content_hash(content), chunk_size, chunk_overlap),
            Err(StoreError::NotFound(_)) => true,
            Err(e) => {
                tracing::warn!(textbook_id, error = %e, "unreadable index metadata, rebuilding");
                true
            }
        }
    }

    /// Load a persisted document, from memory when possible.
    ///
    /// Missing, unreadable, and inconsistent data all come back as
    /// [`StoreError::NotFound`].
    pub fn load(&mut self, textbook_id: &str) -> Result<Arc<DocumentIndex>, StoreError> {
        let key = textbook_id.to_string();
        if let Some(doc) = self.cache.get(&key) {
            return Ok(doc);
        }

        match self.load_from_disk(textbook_id) {
            Ok(doc) => {
                let doc = Arc::new(doc);
                self.cache.insert(key, Arc::clone(&doc));
                Ok(doc)
            }
            Err(StoreError::NotFound(id)) => Err(StoreError::NotFound(id)),
            Err(e) => {
                tracing::warn!(textbook_id, error = %e, "persisted index is corrupt, treating as not found");
                Err(StoreError::NotFound(key))
            }
        }
    }

    fn load_from_disk(&self, textbook_id: &str) -> Result<DocumentIndex, StoreError> {
        let meta = self.read_meta(textbook_id)?;

        let chunks_path = self.chunks_path(textbook_id);
        let raw = std::fs::read(&chunks_path)?;
        let file: ChunksFile = serde_json::from_slice(&raw)?;
        let chunks = file.into_chunks()?;

        if chunks.len() != meta.chunk_count {
            return Err(StoreError::Format(format!(
                "metadata records {} chunks, chunk file has {}",
                meta.chunk_count,
                chunks.len()
            )));
        }

        let vector_index = if meta.vector_count > 0 {
            let index = VectorIndex::load(&self.index_path(textbook_id))
                .map_err(|e| StoreError::Index(format!("{:#}", e)))?;
            if index.len() != meta.vector_count {
                return Err(StoreError::Format(format!(
                    "metadata records {} vectors, index has {}",
                    meta.vector_count,
                    index.len()
                )));
            }
            if index.chunk_ids().iter().any(|&id| id >= chunks.len()) {
                return Err(StoreError::Format(
                    "vector index references a missing chunk".to_string(),
                ));
            }
            Some(index)
        } else {
            None
        };

        tracing::debug!(
            textbook_id,
            chunks = chunks.len(),
            vectors = meta.vector_count,
            "loaded persisted index"
        );

        Ok(DocumentIndex {
            textbook_id: textbook_id.to_string(),
            meta,
            chunks,
            vector_index,
        })
    }

    /// Persist `doc`, replacing any previous version for its id.
    ///
    /// `chunk_count` and `vector_count` in the stored metadata are taken
    /// from the document itself.
    pub fn save(
        &mut self,
        mut doc: Arc<DocumentIndex>,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        let vector_count = doc.searchable_index().map(VectorIndex::len).unwrap_or(0);
        if doc.meta.chunk_count != doc.chunks.len()
            || doc.meta.vector_count != vector_count
            || doc.meta.textbook_id != doc.textbook_id
        {
            let fixed = Arc::make_mut(&mut doc);
            fixed.meta.textbook_id = fixed.textbook_id.clone();
            fixed.meta.chunk_count = fixed.chunks.len();
            fixed.meta.vector_count = vector_count;
        }

        let id = doc.textbook_id.clone();
        let meta_path = self.meta_path(&id);
        let index_path = self.index_path(&id);

        // Uncommit the previous version before touching its data files.
        self.cache.remove(&id);
        remove_if_exists(&meta_path)?;

        progress.report("Saving vector index to disk...", 80);
        match doc.searchable_index() {
            Some(index) => index.save(&index_path)?,
            None => {
                remove_if_exists(&index_path)?;
            }
        }

        progress.report("Saving chunk data...", 85);
        let chunks_json = serde_json::to_vec(&ChunksFile::from_chunks(&doc.chunks))?;
        write_atomic(&self.chunks_path(&id), &chunks_json)?;

        progress.report("Finalizing metadata...", 90);
        let meta_json = serde_json::to_string_pretty(&doc.meta)?;
        write_atomic(&meta_path, meta_json.as_bytes())?;

        tracing::info!(
            textbook_id = %id,
            chunks = doc.meta.chunk_count,
            vectors = doc.meta.vector_count,
            "saved index"
        );

        self.cache.insert(id, doc);
        Ok(())
    }

    /// Delete everything persisted for `textbook_id`. Returns whether
    /// anything existed.
    pub fn invalidate(&mut self, textbook_id: &str) -> Result<bool> {
        self.cache.remove(&textbook_id.to_string());
        let mut existed = false;
        for path in [
            self.meta_path(textbook_id),
            self.chunks_path(textbook_id),
            self.index_path(textbook_id),
        ] {
            existed |= remove_if_exists(&path)?;
        }
        if existed {
            tracing::info!(textbook_id, "invalidated index");
        }
        Ok(existed)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

/// Map a textbook id onto a safe file stem: anything other than ASCII
/// alphanumerics, `-`, `_` and `.` becomes `_`. Ids that had to be changed
/// get a short hash of the original appended, so `my book` and `my_book`
/// land in different files.
fn file_stem(textbook_id: &str) -> String {
    let stem: String = textbook_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = if stem.is_empty() || stem.chars().all(|c| c == '.') {
        format!("_{}", stem)
    } else {
        stem
    };
    if stem == textbook_id {
        stem
    } else {
        format!("{}-{}", stem, &IndexMeta::fingerprint(textbook_id)[..8])
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    std::fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
