//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cache error: {0}")]
    Cache(#[from] subtext_cache::CacheError),

    #[error("Queue error: {0}")]
    Queue(#[from] subtext_queue::QueueError),

    #[error("Store error: {0}")]
    Store(#[from] subtext_store::StoreError),

    #[error("Extraction error: {0}")]
    Extract(#[from] subtext_extractor::ExtractError),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
