//! The error taxonomy shared across the pipeline.
//!
//! Every failure that crosses a component boundary is classified into one of
//! these closed kinds. The kind decides retry behaviour: the extractor only
//! continues its ladder on retryable kinds, the worker never retries terminal
//! kinds, and admission surfaces only `InvalidInput` and `RateLimited`
//! synchronously.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Stable failure classification for jobs and requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Fingerprint canonicalisation failed
    InvalidInput,
    /// Rate limit bucket exhausted
    RateLimited,
    /// Video removed, private, or region-blocked
    VideoUnavailable,
    /// Creator disabled captions for the video
    SubtitlesDisabled,
    /// The requested caption track does not exist
    LanguageUnavailable,
    /// 403/429 from the source after the full ladder
    UpstreamBlocked,
    /// Timeouts, 5xx, connection resets during the ladder
    UpstreamTransient,
    /// Shared cache or durable store unavailable
    DependencyDown,
    /// Programmer fault
    Internal,
}

impl ErrorKind {
    /// Stable snake_case tag, suitable for persistence and wire formats.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::VideoUnavailable => "video_unavailable",
            ErrorKind::SubtitlesDisabled => "subtitles_disabled",
            ErrorKind::LanguageUnavailable => "language_unavailable",
            ErrorKind::UpstreamBlocked => "upstream_blocked",
            ErrorKind::UpstreamTransient => "upstream_transient",
            ErrorKind::DependencyDown => "dependency_down",
            ErrorKind::Internal => "internal",
        }
    }

    /// Parse a stored tag back into a kind.
    pub fn parse(tag: &str) -> Option<Self> {
        Some(match tag {
            "invalid_input" => ErrorKind::InvalidInput,
            "rate_limited" => ErrorKind::RateLimited,
            "video_unavailable" => ErrorKind::VideoUnavailable,
            "subtitles_disabled" => ErrorKind::SubtitlesDisabled,
            "language_unavailable" => ErrorKind::LanguageUnavailable,
            "upstream_blocked" => ErrorKind::UpstreamBlocked,
            "upstream_transient" => ErrorKind::UpstreamTransient,
            "dependency_down" => ErrorKind::DependencyDown,
            "internal" => ErrorKind::Internal,
            _ => return None,
        })
    }

    /// Human-readable hint attached to error responses and job records.
    pub fn hint(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => {
                "provide a valid 11-character YouTube video id or a YouTube URL"
            }
            ErrorKind::RateLimited => "too many requests; retry after the indicated delay",
            ErrorKind::VideoUnavailable => "the video is removed, private, or region-blocked",
            ErrorKind::SubtitlesDisabled => "captions are disabled for this video",
            ErrorKind::LanguageUnavailable => "no caption track exists for the requested language",
            ErrorKind::UpstreamBlocked => {
                "the source refused the request on every route; try again later"
            }
            ErrorKind::UpstreamTransient => "the source was temporarily unreachable",
            ErrorKind::DependencyDown => "a backing service was unavailable; the job will retry",
            ErrorKind::Internal => "an internal error occurred",
        }
    }

    /// Kinds the extractor may keep attempting within its ladder.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::UpstreamTransient | ErrorKind::UpstreamBlocked | ErrorKind::DependencyDown
        )
    }

    /// Kinds that short-circuit the ladder: no proxy or engine change helps.
    pub fn is_terminal_for_extraction(&self) -> bool {
        matches!(
            self,
            ErrorKind::VideoUnavailable
                | ErrorKind::SubtitlesDisabled
                | ErrorKind::LanguageUnavailable
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
