use thiserror::Error;

/// Errors at the persisted-index boundary.
///
/// Callers of [`VersionStore::load`](crate::store::VersionStore::load)
/// only ever see [`StoreError::NotFound`]: unreadable or inconsistent data
/// is logged and downgraded so the document gets rebuilt.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No persisted index for '{0}'")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid vector index: {0}")]
    Index(String),

    #[error("Inconsistent index data: {0}")]
    Format(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
