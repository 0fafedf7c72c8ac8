//! Key layout of the shared tier.
//!
//! All keys are derived from the fingerprint's stable string encoding so
//! that equal fingerprints address the same entries from every process.

use subtext_models::{Fingerprint, JobId};

/// Cached artifact payload for a fingerprint.
pub fn artifact(fp: &Fingerprint) -> String {
    format!("artifact:{}", fp.encode())
}

/// Single-flight lock guarding extraction for a fingerprint.
pub fn lock(fp: &Fingerprint) -> String {
    format!("lock:{}", fp.encode())
}

/// Index from fingerprint to the currently in-flight job id.
pub fn job_index(fp: &Fingerprint) -> String {
    format!("job:index:{}", fp.encode())
}

/// Snapshot of a job record.
pub fn job(job_id: &JobId) -> String {
    format!("job:{job_id}")
}

/// FIFO list backing a named queue.
pub fn queue(name: &str) -> String {
    format!("queue:{name}")
}

/// Token bucket for a principal/endpoint pair.
pub fn rate_limit(principal: &str, endpoint_hash: &str) -> String {
    format!("rl:{principal}:{endpoint_hash}")
}

/// Pattern matching every rate-limit bucket of a principal.
pub fn rate_limit_pattern(principal: &str) -> String {
    format!("rl:{principal}:*")
}

/// Pattern matching every cached artifact.
pub fn artifact_pattern() -> String {
    "artifact:*".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use subtext_models::Fingerprint;

    #[test]
    fn keys_are_derived_from_encoding() {
        let fp = Fingerprint::canonicalise("dQw4w9WgXcQ", Some("en"), true).unwrap();
        assert_eq!(artifact(&fp), "artifact:dQw4w9WgXcQ:en:1");
        assert_eq!(lock(&fp), "lock:dQw4w9WgXcQ:en:1");
        assert_eq!(job_index(&fp), "job:index:dQw4w9WgXcQ:en:1");
    }

    #[test]
    fn queue_and_rl_keys() {
        assert_eq!(queue("extract"), "queue:extract");
        assert_eq!(rate_limit("p1", "abcd1234"), "rl:p1:abcd1234");
        assert_eq!(rate_limit_pattern("p1"), "rl:p1:*");
    }
}
