//! The shared cache abstraction (Tier 2).
//!
//! The coordinator, queue, and rate limiter all talk to the shared tier
//! through this trait so tests can substitute an in-memory fake. The
//! production implementation is [`crate::redis::RedisTier`].

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;

/// Operations the core requires from the shared key/value tier.
///
/// Every method is a suspension point; implementations must be safe to call
/// concurrently from many tasks and processes.
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Get a string value.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Get several values in one round-trip. The result is positionally
    /// aligned with `keys`.
    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>>;

    /// Set a string value with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Delete a key. Returns whether it existed.
    async fn del(&self, key: &str) -> CacheResult<bool>;

    /// Atomically increment a counter, refreshing its TTL.
    async fn incr(&self, key: &str, ttl: Duration) -> CacheResult<i64>;

    /// Set a value only if the key does not exist (atomic compare-and-set).
    /// Returns true when the write won.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    /// Atomically replace the value only if the key currently holds
    /// `expected` (`None` = key absent). Returns true when the swap won.
    /// Values must be non-empty; the empty string is reserved as the
    /// absent sentinel on backends that need one.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
        ttl: Duration,
    ) -> CacheResult<bool>;

    /// Delete a key only if it still holds `value`. Used to release locks
    /// without clobbering a successor's lock after TTL expiry.
    async fn del_if_equals(&self, key: &str, value: &str) -> CacheResult<bool>;

    /// Append to the tail of a list.
    async fn push_back(&self, key: &str, value: &str) -> CacheResult<()>;

    /// Pop from the head of a list, blocking up to `timeout`.
    async fn pop_front(&self, key: &str, timeout: Duration) -> CacheResult<Option<String>>;

    /// Length of a list.
    async fn list_len(&self, key: &str) -> CacheResult<u64>;

    /// Delete all keys matching a glob pattern using cursor-based
    /// iteration. Returns the number of keys deleted.
    async fn scan_delete(&self, pattern: &str) -> CacheResult<u64>;

    /// Collect up to `limit` keys matching a glob pattern, cursor-based.
    async fn scan_keys(&self, pattern: &str, limit: usize) -> CacheResult<Vec<String>>;
}
