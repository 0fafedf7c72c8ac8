//! Extraction error types and upstream classification.

use thiserror::Error;

use subtext_models::ErrorKind;

pub type ExtractResult<T> = Result<T, ExtractError>;

/// An extraction failure with its pipeline classification attached.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct ExtractError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExtractError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn video_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::VideoUnavailable, message)
    }

    pub fn subtitles_disabled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SubtitlesDisabled, message)
    }

    pub fn language_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LanguageUnavailable, message)
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamBlocked, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamTransient, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Whether the ladder may keep attempting after this failure.
    pub fn is_retryable(&self) -> bool {
        !self.kind.is_terminal_for_extraction() && self.kind != ErrorKind::Internal
    }

    /// Classify an HTTP status from the upstream source.
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            403 | 429 => Self::blocked(format!("upstream returned HTTP {status}")),
            404 | 410 => Self::video_unavailable(format!("upstream returned HTTP {status}")),
            _ => Self::transient(format!("upstream returned HTTP {status}")),
        }
    }
}

impl From<reqwest::Error> for ExtractError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::from_status(status);
        }
        // Timeouts, resets, and DNS failures are all transient: a proxy or
        // the fallback engine may still succeed.
        Self::transient(format!("request failed: {e}"))
    }
}

impl From<serde_json::Error> for ExtractError {
    fn from(e: serde_json::Error) -> Self {
        Self::transient(format!("undecodable upstream payload: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            ExtractError::from_status(reqwest::StatusCode::FORBIDDEN).kind,
            ErrorKind::UpstreamBlocked
        );
        assert_eq!(
            ExtractError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS).kind,
            ErrorKind::UpstreamBlocked
        );
        assert_eq!(
            ExtractError::from_status(reqwest::StatusCode::NOT_FOUND).kind,
            ErrorKind::VideoUnavailable
        );
        assert_eq!(
            ExtractError::from_status(reqwest::StatusCode::BAD_GATEWAY).kind,
            ErrorKind::UpstreamTransient
        );
    }

    #[test]
    fn retryability_follows_kind() {
        assert!(ExtractError::blocked("x").is_retryable());
        assert!(ExtractError::transient("x").is_retryable());
        assert!(!ExtractError::video_unavailable("x").is_retryable());
        assert!(!ExtractError::subtitles_disabled("x").is_retryable());
        assert!(!ExtractError::language_unavailable("x").is_retryable());
        assert!(!ExtractError::internal("x").is_retryable());
    }
}
