use pkg_state::registry::StoreError;

/// Why a reconciliation pass stopped early.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The Deployment cannot be rolled out as written. Retrying will not help
    /// until its spec changes.
    #[error("invalid deployment: {0}")]
    Configuration(String),
}

impl ReconcileError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store(StoreError::Conflict { .. }))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::Store(StoreError::NotFound { .. }))
    }

    /// Whether the dispatcher should requeue the key with backoff.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileError::Configuration(_))
    }
}
