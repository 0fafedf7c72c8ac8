//! Token-bucket rate limiting over the shared tier.
//!
//! Buckets live under `rl:<principal>:<endpoint_hash>` and are mutated only
//! through atomic compare-and-swap, so concurrent admitters across
//! processes never double-spend a token. When the shared tier is
//! unreachable the limiter fails closed unless configured otherwise.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use subtext_cache::{keys, SharedCache};

/// Bucket TTL: one refill window plus a second of slack.
const BUCKET_TTL: Duration = Duration::from_secs(61);

/// Bounded CAS retries before treating the bucket as contended.
const CAS_ATTEMPTS: u32 = 16;

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Sustained allowance per minute
    pub per_minute: u32,
    /// Additional burst capacity
    pub burst: u32,
    /// Allow requests when the shared tier is down (default: deny)
    pub fail_open: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 30,
            burst: 5,
            fail_open: false,
        }
    }
}

impl RateLimitConfig {
    pub fn capacity(&self) -> f64 {
        (self.per_minute + self.burst) as f64
    }

    pub fn refill_per_second(&self) -> f64 {
        self.per_minute as f64 / 60.0
    }
}

/// Stored bucket state.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Bucket {
    /// Remaining tokens
    tokens: f64,
    /// Unix timestamp (seconds) of the last refill
    refilled_at: f64,
}

/// Limit headroom reported with every decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitDecision {
    Allowed(RateLimitInfo),
    Denied {
        retry_after_seconds: u64,
        info: RateLimitInfo,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed(_))
    }
}

/// Per-bucket stats for the admin endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BucketStats {
    pub key: String,
    pub remaining: u32,
}

/// Distributed token-bucket limiter.
pub struct RateLimiter {
    shared: Arc<dyn SharedCache>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(shared: Arc<dyn SharedCache>, config: RateLimitConfig) -> Self {
        Self { shared, config }
    }

    /// Check whether `cost` admissions are allowed for this principal and
    /// endpoint. Batch admission charges one token per unique fingerprint.
    pub async fn check(
        &self,
        principal: &str,
        endpoint: &str,
        cost: u32,
    ) -> RateLimitDecision {
        let key = keys::rate_limit(principal, &endpoint_hash(endpoint));

        for _ in 0..CAS_ATTEMPTS {
            match self.try_consume(&key, cost as f64).await {
                Ok(Some(decision)) => return decision,
                Ok(None) => {
                    // CAS lost; let the winner finish before re-reading.
                    tokio::task::yield_now().await;
                    continue;
                }
                Err(e) => {
                    warn!(
                        principal = principal,
                        error = %e,
                        fail_open = self.config.fail_open,
                        "Rate limiter backend unavailable"
                    );
                    return self.unavailable_decision();
                }
            }
        }

        // Contention this heavy means the principal is hammering the
        // endpoint; denying is both safe and honest.
        debug!(principal = principal, "Rate-limit bucket contended; denying");
        self.denied(0.0)
    }

    /// One CAS round. `Ok(None)` means the swap lost and should be retried.
    async fn try_consume(
        &self,
        key: &str,
        cost: f64,
    ) -> Result<Option<RateLimitDecision>, subtext_cache::CacheError> {
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        let current_raw = self.shared.get(key).await?;

        let mut bucket = match &current_raw {
            Some(raw) => serde_json::from_str::<Bucket>(raw).unwrap_or(Bucket {
                tokens: self.config.capacity(),
                refilled_at: now,
            }),
            None => Bucket {
                tokens: self.config.capacity(),
                refilled_at: now,
            },
        };

        // Refill proportionally to elapsed time, capped at capacity.
        let elapsed = (now - bucket.refilled_at).max(0.0);
        bucket.tokens =
            (bucket.tokens + elapsed * self.config.refill_per_second()).min(self.config.capacity());
        bucket.refilled_at = now;

        let allowed = bucket.tokens >= cost;
        if allowed {
            bucket.tokens -= cost;
        }

        let new_raw = serde_json::to_string(&bucket)
            .map_err(subtext_cache::CacheError::from)?;
        let swapped = self
            .shared
            .compare_and_swap(key, current_raw.as_deref(), &new_raw, BUCKET_TTL)
            .await?;
        if !swapped {
            return Ok(None);
        }

        Ok(Some(if allowed {
            RateLimitDecision::Allowed(self.info(bucket.tokens))
        } else {
            self.denied(bucket.tokens)
        }))
    }

    fn info(&self, tokens: f64) -> RateLimitInfo {
        RateLimitInfo {
            limit: self.config.per_minute,
            remaining: tokens.max(0.0) as u32,
            reset_at: Utc::now() + chrono::Duration::seconds(BUCKET_TTL.as_secs() as i64),
        }
    }

    fn denied(&self, tokens: f64) -> RateLimitDecision {
        // Time until the next whole token becomes available.
        let deficit = (1.0 - tokens).max(0.0);
        let wait = (deficit / self.config.refill_per_second().max(1e-6)).ceil() as u64;
        let retry_after_seconds = wait.max(1);
        RateLimitDecision::Denied {
            retry_after_seconds,
            info: RateLimitInfo {
                limit: self.config.per_minute,
                remaining: 0,
                reset_at: Utc::now() + chrono::Duration::seconds(retry_after_seconds as i64),
            },
        }
    }

    fn unavailable_decision(&self) -> RateLimitDecision {
        if self.config.fail_open {
            RateLimitDecision::Allowed(self.info(self.config.per_minute as f64))
        } else {
            self.denied(0.0)
        }
    }

    /// Drop every bucket of a principal.
    pub async fn reset(&self, principal: &str) -> Result<u64, subtext_cache::CacheError> {
        self.shared
            .scan_delete(&keys::rate_limit_pattern(principal))
            .await
    }

    /// Remaining tokens per endpoint bucket of a principal.
    pub async fn stats(
        &self,
        principal: &str,
    ) -> Result<Vec<BucketStats>, subtext_cache::CacheError> {
        let bucket_keys = self
            .shared
            .scan_keys(&keys::rate_limit_pattern(principal), 500)
            .await?;
        let mut stats = Vec::with_capacity(bucket_keys.len());
        for key in bucket_keys {
            let remaining = match self.shared.get(&key).await? {
                Some(raw) => serde_json::from_str::<Bucket>(&raw)
                    .map(|b| b.tokens.max(0.0) as u32)
                    .unwrap_or(0),
                None => 0,
            };
            stats.push(BucketStats { key, remaining });
        }
        Ok(stats)
    }
}

/// Short stable hash keeping bucket-key cardinality bounded for long paths.
fn endpoint_hash(endpoint: &str) -> String {
    let digest = Sha256::digest(endpoint.as_bytes());
    hex::encode(&digest[..4])
}

#[cfg(test)]
mod tests {
    use super::*;
    use subtext_cache::testing::MemoryShared;

    fn limiter(per_minute: u32, burst: u32, shared: Arc<MemoryShared>) -> RateLimiter {
        RateLimiter::new(
            shared,
            RateLimitConfig {
                per_minute,
                burst,
                fail_open: false,
            },
        )
    }

    #[tokio::test]
    async fn allows_up_to_capacity_then_denies() {
        let shared = Arc::new(MemoryShared::new());
        let limiter = limiter(30, 5, Arc::clone(&shared));

        let mut allowed = 0;
        let mut denied = 0;
        for _ in 0..40 {
            match limiter.check("client-1", "/subtitles", 1).await {
                RateLimitDecision::Allowed(_) => allowed += 1,
                RateLimitDecision::Denied {
                    retry_after_seconds,
                    info,
                } => {
                    denied += 1;
                    assert!(retry_after_seconds > 0);
                    assert!(info.reset_at > Utc::now());
                }
            }
        }
        // Capacity 35 and negligible refill inside the loop.
        assert_eq!(allowed, 35);
        assert_eq!(denied, 5);
    }

    #[tokio::test]
    async fn principals_have_independent_buckets() {
        let shared = Arc::new(MemoryShared::new());
        let limiter = limiter(1, 0, Arc::clone(&shared));

        assert!(limiter.check("a", "/x", 1).await.is_allowed());
        assert!(!limiter.check("a", "/x", 1).await.is_allowed());
        assert!(limiter.check("b", "/x", 1).await.is_allowed());
    }

    #[tokio::test]
    async fn endpoints_have_independent_buckets() {
        let shared = Arc::new(MemoryShared::new());
        let limiter = limiter(1, 0, Arc::clone(&shared));

        assert!(limiter.check("a", "/x", 1).await.is_allowed());
        assert!(limiter.check("a", "/y", 1).await.is_allowed());
    }

    #[tokio::test]
    async fn batch_cost_spends_multiple_tokens() {
        let shared = Arc::new(MemoryShared::new());
        let limiter = limiter(10, 0, Arc::clone(&shared));

        assert!(limiter.check("a", "/batch", 8).await.is_allowed());
        // Two tokens left; a 3-cost batch must be denied.
        assert!(!limiter.check("a", "/batch", 3).await.is_allowed());
        assert!(limiter.check("a", "/batch", 2).await.is_allowed());
    }

    #[tokio::test]
    async fn fails_closed_by_default_and_open_when_configured() {
        let shared = Arc::new(MemoryShared::new());
        shared.set_unavailable(true);

        let closed = limiter(30, 5, Arc::clone(&shared));
        assert!(!closed.check("a", "/x", 1).await.is_allowed());

        let open = RateLimiter::new(
            Arc::clone(&shared) as Arc<dyn SharedCache>,
            RateLimitConfig {
                per_minute: 30,
                burst: 5,
                fail_open: true,
            },
        );
        assert!(open.check("a", "/x", 1).await.is_allowed());
    }

    #[tokio::test]
    async fn concurrent_checks_never_overspend() {
        let shared = Arc::new(MemoryShared::new());
        let limiter = Arc::new(limiter(10, 0, Arc::clone(&shared)));

        let mut handles = Vec::new();
        for _ in 0..30 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.check("swarm", "/x", 1).await.is_allowed()
            }));
        }
        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert!(allowed <= 10, "allowed {allowed} > capacity 10");
    }

    #[tokio::test]
    async fn reset_and_stats() {
        let shared = Arc::new(MemoryShared::new());
        let limiter = limiter(5, 0, Arc::clone(&shared));

        limiter.check("a", "/x", 1).await;
        let stats = limiter.stats("a").await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].remaining, 4);

        let deleted = limiter.reset("a").await.unwrap();
        assert_eq!(deleted, 1);
        assert!(limiter.stats("a").await.unwrap().is_empty());
    }
}
