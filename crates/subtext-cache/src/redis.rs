//! Redis implementation of the shared tier.

use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use tracing::debug;

use crate::error::CacheResult;
use crate::shared::SharedCache;

/// Deletion batch size for pattern operations.
const SCAN_DELETE_BATCH: usize = 500;

/// Shared tier backed by Redis.
///
/// Connections are multiplexed and obtained per operation; the client is
/// cheap to clone and share.
#[derive(Clone)]
pub struct RedisTier {
    client: redis::Client,
}

impl RedisTier {
    /// Create a tier from a Redis URL.
    pub fn new(redis_url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Create from the `REDIS_URL` environment variable.
    pub fn from_env() -> CacheResult<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::new(&url)
    }

    async fn conn(&self) -> CacheResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl SharedCache for RedisTier {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        // MGET: one round-trip for the whole batch.
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        let deleted: i64 = conn.del(key).await?;
        Ok(deleted > 0)
    }

    async fn incr(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        let mut conn = self.conn().await?;
        let value: i64 = conn.incr(key, 1).await?;
        conn.expire::<_, ()>(key, ttl.as_secs().max(1) as i64).await?;
        Ok(value)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        // SET key value NX EX ttl: atomic acquire.
        let acquired: bool = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(acquired)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
        ttl: Duration,
    ) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        // Empty ARGV[1] encodes "expect absent".
        let script = Script::new(
            r#"
            local current = redis.call('GET', KEYS[1])
            if (current == false and ARGV[1] == '') or current == ARGV[1] then
                redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
                return 1
            end
            return 0
            "#,
        );
        let swapped: i32 = script
            .key(key)
            .arg(expected.unwrap_or(""))
            .arg(new)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped > 0)
    }

    async fn del_if_equals(&self, key: &str, value: &str) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        let script = Script::new(
            r#"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            else
                return 0
            end
            "#,
        );
        let deleted: i32 = script.key(key).arg(value).invoke_async(&mut conn).await?;
        Ok(deleted > 0)
    }

    async fn push_back(&self, key: &str, value: &str) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        conn.rpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn pop_front(&self, key: &str, timeout: Duration) -> CacheResult<Option<String>> {
        let mut conn = self.conn().await?;
        // BLPOP returns (key, value) on success, nil on timeout.
        let popped: Option<(String, String)> =
            conn.blpop(key, timeout.as_secs_f64()).await?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn list_len(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.llen(key).await?;
        Ok(len)
    }

    async fn scan_delete(&self, pattern: &str) -> CacheResult<u64> {
        let keys = self.scan_keys(pattern, usize::MAX).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn().await?;
        let mut deleted = 0u64;
        for chunk in keys.chunks(SCAN_DELETE_BATCH) {
            let count: u64 = conn.del(chunk).await?;
            deleted += count;
        }
        debug!(pattern = pattern, deleted = deleted, "Deleted keys by pattern");
        Ok(deleted)
    }

    async fn scan_keys(&self, pattern: &str, limit: usize) -> CacheResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut keys = Vec::new();
        // Cursor-based SCAN; never a full keyspace snapshot.
        let mut iter = conn.scan_match::<_, String>(pattern).await?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
            if keys.len() >= limit {
                break;
            }
        }
        Ok(keys)
    }
}
