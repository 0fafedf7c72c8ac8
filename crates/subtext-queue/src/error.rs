//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Shared tier error: {0}")]
    Cache(#[from] subtext_cache::CacheError),

    #[error("Durable store error: {0}")]
    Store(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Whether the failure points at an unavailable backing service.
    pub fn is_dependency_down(&self) -> bool {
        matches!(self, QueueError::Cache(_) | QueueError::Store(_))
    }
}
