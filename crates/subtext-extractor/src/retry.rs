//! Exponential backoff with full jitter.
//!
//! One policy shared by the extraction ladder and the webhook dispatcher.
//! Jitter uses the subsecond clock instead of pulling in a PRNG crate; the
//! spread only needs to decorrelate workers, not be unpredictable.

use std::time::{Duration, SystemTime};

/// Backoff policy: `base * 2^attempt`, capped, with full jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// First delay before jitter
    pub base: Duration,
    /// Upper bound on any delay
    pub cap: Duration,
    /// Total attempts (including the first)
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(8),
            max_attempts: 4,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// The exponential delay for a zero-based attempt index, before jitter.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        exp.min(self.cap)
    }

    /// Full-jitter delay: uniform-ish in `[0, raw_delay]`, floored at a
    /// millisecond so consecutive attempts never run back-to-back.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let capped = self.raw_delay(attempt);
        if capped.is_zero() {
            return capped;
        }

        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let factor = (nanos % 1000) as f64 / 1000.0;
        let jittered = capped.mul_f64(factor);
        jittered.max(Duration::from_millis(1))
    }

    /// Whether another attempt is allowed after `attempt` attempts so far.
    pub fn allows_another(&self, attempts_so_far: u32) -> bool {
        attempts_so_far < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_delays_double_and_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.raw_delay(0), Duration::from_secs(1));
        assert_eq!(policy.raw_delay(1), Duration::from_secs(2));
        assert_eq!(policy.raw_delay(2), Duration::from_secs(4));
        assert_eq!(policy.raw_delay(3), Duration::from_secs(8));
        // Capped from here on.
        assert_eq!(policy.raw_delay(4), Duration::from_secs(8));
        assert_eq!(policy.raw_delay(30), Duration::from_secs(8));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = BackoffPolicy::default();
        for attempt in 0..6 {
            let delay = policy.jittered_delay(attempt);
            assert!(delay >= Duration::from_millis(1));
            assert!(delay <= policy.raw_delay(attempt));
        }
    }

    #[test]
    fn attempt_budget() {
        let policy = BackoffPolicy::default();
        assert!(policy.allows_another(0));
        assert!(policy.allows_another(3));
        assert!(!policy.allows_another(4));
    }
}
