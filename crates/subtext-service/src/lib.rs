//! Admission and runtime wiring for the subtext pipeline.
//!
//! This crate binds a request to the pipeline: canonicalise, rate-limit,
//! tiered lookup, single-flight reservation, enqueue. It also owns the
//! Redis-backed token-bucket rate limiter, the admin operations, and the
//! `Runtime` value that wires every component together at process start.

pub mod admission;
pub mod config;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod runtime;

pub use admission::{
    Admission, AdmissionConfig, ArtifactPurge, BatchOutcome, CacheClearOutcome, CacheClearScope,
    JobStatusView, ServiceStats, Submission, SubmitRequest,
};
pub use config::ServiceConfig;
pub use error::{ServiceError, ServiceResult};
pub use rate_limit::{BucketStats, RateLimitConfig, RateLimitDecision, RateLimitInfo, RateLimiter};
pub use runtime::{build_rotator, Runtime};
