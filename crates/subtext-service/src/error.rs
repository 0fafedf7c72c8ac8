//! Service-facing errors.
//!
//! Admission surfaces only `InvalidInput` and `RateLimited` synchronously;
//! everything else reaches callers through the job record. Every error
//! carries a correlation id suitable for end-to-end tracing.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use subtext_models::ErrorKind;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid input: {detail} [{correlation_id}]")]
    InvalidInput {
        detail: String,
        correlation_id: String,
    },

    #[error("Rate limited; retry after {retry_after_seconds}s [{correlation_id}]")]
    RateLimited {
        retry_after_seconds: u64,
        reset_at: DateTime<Utc>,
        correlation_id: String,
    },

    #[error("Not found: {detail} [{correlation_id}]")]
    NotFound {
        detail: String,
        correlation_id: String,
    },

    #[error("Service unavailable: {detail} [{correlation_id}]")]
    Unavailable {
        detail: String,
        correlation_id: String,
    },

    #[error("Internal error: {detail} [{correlation_id}]")]
    Internal {
        detail: String,
        correlation_id: String,
    },
}

fn correlation_id() -> String {
    Uuid::new_v4().to_string()
}

impl ServiceError {
    pub fn invalid_input(detail: impl Into<String>) -> Self {
        Self::InvalidInput {
            detail: detail.into(),
            correlation_id: correlation_id(),
        }
    }

    pub fn rate_limited(retry_after_seconds: u64, reset_at: DateTime<Utc>) -> Self {
        Self::RateLimited {
            retry_after_seconds,
            reset_at,
            correlation_id: correlation_id(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound {
            detail: detail.into(),
            correlation_id: correlation_id(),
        }
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::Unavailable {
            detail: detail.into(),
            correlation_id: correlation_id(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal {
            detail: detail.into(),
            correlation_id: correlation_id(),
        }
    }

    /// Pipeline classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::InvalidInput { .. } | ServiceError::NotFound { .. } => {
                ErrorKind::InvalidInput
            }
            ServiceError::RateLimited { .. } => ErrorKind::RateLimited,
            ServiceError::Unavailable { .. } => ErrorKind::DependencyDown,
            ServiceError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Human hint for this error's kind.
    pub fn hint(&self) -> &'static str {
        self.kind().hint()
    }

    /// The correlation id attached at construction.
    pub fn correlation_id(&self) -> &str {
        match self {
            ServiceError::InvalidInput { correlation_id, .. }
            | ServiceError::RateLimited { correlation_id, .. }
            | ServiceError::NotFound { correlation_id, .. }
            | ServiceError::Unavailable { correlation_id, .. }
            | ServiceError::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl From<subtext_cache::CacheError> for ServiceError {
    fn from(e: subtext_cache::CacheError) -> Self {
        match e {
            subtext_cache::CacheError::Contended(detail) => Self::unavailable(detail),
            other => Self::unavailable(other.to_string()),
        }
    }
}

impl From<subtext_queue::QueueError> for ServiceError {
    fn from(e: subtext_queue::QueueError) -> Self {
        Self::unavailable(e.to_string())
    }
}
