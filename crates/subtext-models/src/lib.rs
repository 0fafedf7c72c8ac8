//! Shared data models for the subtext backend.
//!
//! This crate provides Serde-serializable types for:
//! - Fingerprints (video id + language + clean flag) and canonicalisation
//! - Extraction artifacts and caption segments
//! - Job records and their lifecycle
//! - The error taxonomy shared across the pipeline
//! - Caption text cleaning for AI consumption

pub mod artifact;
pub mod clean;
pub mod error;
pub mod fingerprint;
pub mod job;
pub mod url;

// Re-export common types
pub use artifact::{Artifact, Engine, Segment};
pub use clean::{clean_segments, clean_text, CleanOutput};
pub use error::ErrorKind;
pub use fingerprint::{Fingerprint, Language, VideoId};
pub use job::{JobId, JobRecord, JobStatus, WebhookDeliveryStatus};
pub use url::{extract_video_id, validate_webhook_url, VideoRefError};
