//! Cache error types.

use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Durable store error: {0}")]
    Store(String),

    #[error("Reservation contended: {0}")]
    Contended(String),
}

impl CacheError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn contended(msg: impl Into<String>) -> Self {
        Self::Contended(msg.into())
    }

    /// Whether the failure points at an unavailable backing service.
    pub fn is_dependency_down(&self) -> bool {
        matches!(self, CacheError::Redis(_) | CacheError::Store(_))
    }
}
