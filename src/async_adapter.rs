//! Async facade over [`Retriever`].
//!
//! The engine is synchronous and may block for a long time (embedding
//! calls, file I/O), so every call runs on tokio's blocking pool. Calls
//! against one `AsyncRetriever` are serialised by a mutex; clones share
//! the same engine.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};

use handbook_rag_core::models::RetrievedChunk;

use crate::config::Config;
use crate::progress::ProgressReporter;
use crate::retriever::{IndexReport, Retriever, TextbookStatus};

#[derive(Clone)]
pub struct AsyncRetriever {
    inner: Arc<Mutex<Retriever>>,
    index_timeout: Option<Duration>,
}

impl AsyncRetriever {
    /// Build a retriever from `config` off the async runtime (loading a
    /// local model can take a while).
    pub async fn open(config: Config) -> Result<Self> {
        let timeout = config.indexing.timeout_secs;
        let retriever = tokio::task::spawn_blocking(move || Retriever::from_config(&config))
            .await
            .map_err(|e| anyhow!("retriever setup task failed: {}", e))??;
        Ok(Self::new(retriever).with_index_timeout(timeout_from_secs(timeout)))
    }

    pub fn new(retriever: Retriever) -> Self {
        Self {
            inner: Arc::new(Mutex::new(retriever)),
            index_timeout: None,
        }
    }

    /// Give up waiting for `index` after `timeout`. The build keeps running
    /// in the background and only persists once complete.
    pub fn with_index_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.index_timeout = timeout;
        self
    }

    /// Run `f` against the engine on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Retriever) -> T + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| anyhow!("retriever lock poisoned"))?;
            Ok(f(&mut guard))
        })
        .await
        .map_err(|e| anyhow!("retriever task failed: {}", e))?
    }

    pub async fn index(
        &self,
        content: String,
        textbook_id: String,
        force: bool,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<IndexReport> {
        let work = self.run(move |r| {
            r.index_with_progress(&content, &textbook_id, force, progress.as_ref())
        });
        match self.index_timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| anyhow!("indexing timed out after {}s", limit.as_secs()))??,
            None => work.await?,
        }
    }

    pub async fn query(
        &self,
        textbook_id: String,
        query: String,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        self.run(move |r| r.query(&textbook_id, &query, top_k)).await
    }

    pub async fn status(&self, textbook_id: String) -> Result<TextbookStatus> {
        self.run(move |r| r.status(&textbook_id)).await
    }

    pub async fn clear(&self, textbook_id: String) -> Result<bool> {
        self.run(move |r| r.clear(&textbook_id)).await?
    }

    pub async fn has_vector_backend(&self) -> Result<bool> {
        self.run(|r| r.has_vector_backend()).await
    }
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
