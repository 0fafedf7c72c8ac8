//! Extraction artifacts: the committed result for a fingerprint.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::fingerprint::Fingerprint;

/// Which extraction engine produced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    /// Caption track API (timedtext), the fast path
    Primary,
    /// Player-response discovery, for videos the track API refuses
    Fallback,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Primary => "primary",
            Engine::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single caption cue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Segment {
    /// Cue text (cleaned when the fingerprint's clean flag is set)
    pub text: String,
    /// Offset from the start of the video, in seconds
    pub start_seconds: f64,
    /// Cue duration, in seconds
    pub duration_seconds: f64,
}

impl Segment {
    pub fn new(text: impl Into<String>, start_seconds: f64, duration_seconds: f64) -> Self {
        Self {
            text: text.into(),
            start_seconds,
            duration_seconds,
        }
    }
}

/// The committed extraction result for a fingerprint.
///
/// Immutable once stored: consumers rely on `integrity` for change
/// detection, and the durable store is authoritative for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Artifact {
    /// Identity of this artifact
    pub fingerprint: Fingerprint,
    /// Video title, fetched best-effort via oEmbed
    pub title: Option<String>,
    /// Engine that produced the winning extraction
    pub engine_used: Engine,
    /// Ordered caption segments
    pub segments: Vec<Segment>,
    /// Whitespace-normalised concatenation of segment text; present iff the
    /// fingerprint requested cleaning and segments are non-empty
    pub plain_text: Option<String>,
    /// Wall-clock time spent across the whole extraction ladder
    pub extraction_duration_ms: u64,
    /// Proxy endpoint used by the winning attempt, if any
    pub proxy_used: Option<String>,
    /// When the artifact was committed
    pub created_at: DateTime<Utc>,
    /// When the artifact falls out of the durable retention window
    pub expires_at: DateTime<Utc>,
    /// Lowercase hex SHA-256 over the canonical JSON of `segments`
    pub integrity: String,
}

impl Artifact {
    /// Content hash over segments, used for cross-tier change detection.
    pub fn integrity_of(segments: &[Segment]) -> String {
        // Canonical form: the serde_json encoding of the segment sequence.
        // Serialization of an in-memory value cannot fail here.
        let canonical =
            serde_json::to_vec(segments).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        hex::encode(digest)
    }

    /// Whether the artifact has outlived its retention window.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::fingerprint::Fingerprint;

    fn sample_fingerprint() -> Fingerprint {
        Fingerprint::canonicalise("dQw4w9WgXcQ", Some("en"), true).unwrap()
    }

    fn sample_artifact() -> Artifact {
        let segments = vec![
            Segment::new("never gonna give you up", 0.0, 2.5),
            Segment::new("never gonna let you down", 2.5, 2.5),
        ];
        let integrity = Artifact::integrity_of(&segments);
        let now = Utc::now();
        Artifact {
            fingerprint: sample_fingerprint(),
            title: Some("Test Video".to_string()),
            engine_used: Engine::Primary,
            plain_text: Some(
                segments
                    .iter()
                    .map(|s| s.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            segments,
            extraction_duration_ms: 1234,
            proxy_used: None,
            created_at: now,
            expires_at: now + Duration::days(30),
            integrity,
        }
    }

    #[test]
    fn integrity_is_deterministic() {
        let segments = vec![Segment::new("hello", 0.0, 1.0)];
        assert_eq!(
            Artifact::integrity_of(&segments),
            Artifact::integrity_of(&segments)
        );
        assert_eq!(Artifact::integrity_of(&segments).len(), 64);
    }

    #[test]
    fn integrity_detects_changes() {
        let a = vec![Segment::new("hello", 0.0, 1.0)];
        let b = vec![Segment::new("hello!", 0.0, 1.0)];
        let c = vec![Segment::new("hello", 0.5, 1.0)];
        assert_ne!(Artifact::integrity_of(&a), Artifact::integrity_of(&b));
        assert_ne!(Artifact::integrity_of(&a), Artifact::integrity_of(&c));
    }

    #[test]
    fn expiry_check() {
        let artifact = sample_artifact();
        assert!(!artifact.is_expired(Utc::now()));
        assert!(artifact.is_expired(Utc::now() + Duration::days(31)));
    }

    #[test]
    fn serde_roundtrip() {
        let artifact = sample_artifact();
        let json = serde_json::to_string(&artifact).unwrap();
        let decoded: Artifact = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, artifact);
    }

    #[test]
    fn engine_serialises_snake_case() {
        assert_eq!(serde_json::to_string(&Engine::Primary).unwrap(), "\"primary\"");
        assert_eq!(
            serde_json::to_string(&Engine::Fallback).unwrap(),
            "\"fallback\""
        );
    }
}
