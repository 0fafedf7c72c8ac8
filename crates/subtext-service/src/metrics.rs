//! Metrics for the admission path.
//!
//! Recorded through the `metrics` facade; installing an exporter is the
//! embedder's concern.

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "subtext_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "subtext_cache_misses_total";
    pub const ADMISSIONS_TOTAL: &str = "subtext_admissions_total";
    pub const RATE_LIMIT_DENIALS_TOTAL: &str = "subtext_rate_limit_denials_total";
    pub const QUEUE_DEPTH: &str = "subtext_queue_depth";
}

/// Record a tiered-cache hit.
pub fn record_cache_hit(tier: &str) {
    let labels = [("tier", tier.to_string())];
    counter!(names::CACHE_HITS_TOTAL, &labels).increment(1);
}

/// Record a full cache miss.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record an admission outcome (`ready`, `queued`, `followed`).
pub fn record_admission(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::ADMISSIONS_TOTAL, &labels).increment(1);
}

/// Record a rate-limit denial.
pub fn record_rate_limit_denial(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::RATE_LIMIT_DENIALS_TOTAL, &labels).increment(1);
}

/// Update the queue depth gauge.
pub fn set_queue_depth(depth: u64) {
    gauge!(names::QUEUE_DEPTH).set(depth as f64);
}
