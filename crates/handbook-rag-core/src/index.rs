//! Flat cosine-similarity vector index with batched, fault-tolerant build.
//!
//! Every entry stores the `chunk_id` it was embedded from, so search
//! results map back to chunks correctly even when some embedding batches
//! failed and their chunks are missing from the index.
//!
//! # Build policy
//!
//! Small documents (at most [`BatchPolicy::single_batch_max`] chunks) are
//! embedded in a single call. Larger ones are embedded
//! [`BatchPolicy::batch_size`] chunks at a time, sequentially. The first
//! successful batch fixes the vector dimensionality. A batch that errors,
//! returns the wrong number of vectors, or returns vectors of the wrong
//! length is logged and skipped; the build carries on with the next batch
//! and the skipped batch numbers are reported in [`BatchResult`].
//!
//! # On-disk format
//!
//! Little-endian: magic `HRVI`, format version (`u32`), dims (`u32`),
//! entry count (`u32`), then per entry the `chunk_id` (`u32`) followed by
//! `dims` `f32` values.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, EmbeddingPort};
use crate::models::{Chunk, SearchHit};

const MAGIC: &[u8; 4] = b"HRVI";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

/// Batch sizing for [`VectorIndex::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Chunks per embedding call for documents above `single_batch_max`.
    pub batch_size: usize,
    /// Documents with at most this many chunks are embedded in one call.
    pub single_batch_max: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            batch_size: 5,
            single_batch_max: 10,
        }
    }
}

impl BatchPolicy {
    /// Number of chunks per batch for a document of `chunk_count` chunks.
    pub fn batch_len(&self, chunk_count: usize) -> usize {
        if chunk_count <= self.single_batch_max {
            chunk_count.max(1)
        } else {
            self.batch_size.max(1)
        }
    }
}

/// Outcome of a batched build.
#[derive(Debug, Clone)]
pub enum BatchResult {
    /// Every batch was embedded and inserted.
    Success(VectorIndex),
    /// Some batches were skipped. `failed_batches` holds their 0-based
    /// batch numbers; the index holds everything else.
    PartiallyFailed {
        index: VectorIndex,
        failed_batches: Vec<usize>,
    },
}

impl BatchResult {
    pub fn index(&self) -> &VectorIndex {
        match self {
            BatchResult::Success(index) => index,
            BatchResult::PartiallyFailed { index, .. } => index,
        }
    }

    pub fn failed_batches(&self) -> &[usize] {
        match self {
            BatchResult::Success(_) => &[],
            BatchResult::PartiallyFailed { failed_batches, .. } => failed_batches,
        }
    }

    pub fn into_index(self) -> VectorIndex {
        match self {
            BatchResult::Success(index) => index,
            BatchResult::PartiallyFailed { index, .. } => index,
        }
    }
}

/// Brute-force cosine index over chunk vectors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VectorIndex {
    dims: usize,
    chunk_ids: Vec<usize>,
    /// Row-major, `chunk_ids.len() × dims`.
    vectors: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            chunk_ids: Vec::new(),
            vectors: Vec::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    /// Chunk ids in insertion order.
    pub fn chunk_ids(&self) -> &[usize] {
        &self.chunk_ids
    }

    /// The vector stored for `chunk_id`, if that chunk was indexed.
    pub fn vector_for(&self, chunk_id: usize) -> Option<&[f32]> {
        self.chunk_ids
            .iter()
            .position(|&id| id == chunk_id)
            .map(|pos| self.row(pos))
    }

    fn row(&self, pos: usize) -> &[f32] {
        &self.vectors[pos * self.dims..(pos + 1) * self.dims]
    }

    /// Append one batch of vectors. All-or-nothing: on error the index is
    /// unchanged.
    pub fn insert_batch(&mut self, chunk_ids: &[usize], vectors: Vec<Vec<f32>>) -> Result<()> {
        if chunk_ids.len() != vectors.len() {
            bail!(
                "expected {} vectors, embedding returned {}",
                chunk_ids.len(),
                vectors.len()
            );
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            bail!(
                "vector dimension mismatch: index has {}, got {}",
                self.dims,
                bad.len()
            );
        }
        self.chunk_ids.extend_from_slice(chunk_ids);
        for v in vectors {
            self.vectors.extend(v);
        }
        Ok(())
    }

    /// Embed `chunks` batch by batch and collect their vectors.
    ///
    /// `on_batch(n, total)` is called before batch `n` (1-based) is
    /// embedded. Never fails as a whole; see [`BatchResult`].
    pub fn build<F>(
        chunks: &[Chunk],
        port: &dyn EmbeddingPort,
        policy: &BatchPolicy,
        mut on_batch: F,
    ) -> BatchResult
    where
        F: FnMut(usize, usize),
    {
        if chunks.is_empty() {
            return BatchResult::Success(VectorIndex::default());
        }

        let batch_len = policy.batch_len(chunks.len());
        let total = chunks.len().div_ceil(batch_len);
        let mut index: Option<VectorIndex> = None;
        let mut failed_batches = Vec::new();

        for (batch_no, batch) in chunks.chunks(batch_len).enumerate() {
            on_batch(batch_no + 1, total);

            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let ids: Vec<usize> = batch.iter().map(|c| c.metadata.chunk_id).collect();

            let outcome = port.embed_batch(&texts).and_then(|vectors| {
                let dims = vectors.first().map(Vec::len).unwrap_or(0);
                if index.is_none() && dims == 0 {
                    bail!("embedding returned empty vectors");
                }
                index
                    .get_or_insert_with(|| VectorIndex::new(dims))
                    .insert_batch(&ids, vectors)
            });

            if let Err(e) = outcome {
                tracing::warn!(
                    batch = batch_no + 1,
                    total,
                    error = %e,
                    "embedding batch failed, skipping"
                );
                failed_batches.push(batch_no);
            }
        }

        let index = index.unwrap_or_default();
        if failed_batches.is_empty() {
            BatchResult::Success(index)
        } else {
            BatchResult::PartiallyFailed {
                index,
                failed_batches,
            }
        }
    }

    /// Return the `top_k` most similar chunks to `query`, best first.
    ///
    /// Equal scores keep insertion order. Rows whose similarity is NaN
    /// (non-finite stored vectors) are never returned.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        if self.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            bail!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dims
            );
        }

        let mut hits: Vec<SearchHit> = self
            .chunk_ids
            .iter()
            .enumerate()
            .map(|(pos, &chunk_id)| SearchHit {
                chunk_id,
                score: cosine_similarity(query, self.row(pos)),
            })
            .filter(|hit| !hit.score.is_nan())
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.len() * (4 + self.dims * 4));
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dims as u32).to_le_bytes());
        out.extend_from_slice(&(self.len() as u32).to_le_bytes());
        for (pos, &chunk_id) in self.chunk_ids.iter().enumerate() {
            out.extend_from_slice(&(chunk_id as u32).to_le_bytes());
            out.extend_from_slice(&vec_to_blob(self.row(pos)));
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            bail!("not a vector index file");
        }
        let version = read_u32(bytes, 4);
        if version != FORMAT_VERSION {
            bail!("unsupported vector index version {}", version);
        }
        let dims = read_u32(bytes, 8) as usize;
        let count = read_u32(bytes, 12) as usize;

        let entry_len = 4 + dims * 4;
        let expected = count
            .checked_mul(entry_len)
            .and_then(|n| n.checked_add(HEADER_LEN))
            .unwrap_or(usize::MAX);
        if bytes.len() != expected {
            bail!(
                "vector index truncated: expected {} bytes, found {}",
                expected,
                bytes.len()
            );
        }

        let mut index = VectorIndex::new(dims);
        for entry in bytes[HEADER_LEN..].chunks_exact(entry_len) {
            index.chunk_ids.push(read_u32(entry, 0) as usize);
            index.vectors.extend(blob_to_vec(&entry[4..]));
        }
        Ok(index)
    }

    /// Write the index atomically (temp file, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = tmp_path(path);
        std::fs::write(&tmp, self.to_bytes())
            .with_context(|| format!("Failed to write vector index: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move vector index into place: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read vector index: {}", path.display()))?;
        Self::from_bytes(&bytes)
            .with_context(|| format!("Invalid vector index: {}", path.display()))
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// `foo.index` → `foo.index.tmp`
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
