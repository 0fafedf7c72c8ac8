//! Process-local hot tier (Tier 1).
//!
//! A bounded LRU with TTL in front of the shared tier. Not shared across
//! workers; correctness never depends on it. Hit/miss counters are exposed
//! for the stats endpoints.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use subtext_models::{Artifact, Fingerprint};

/// Configuration of the local tier.
#[derive(Debug, Clone)]
pub struct MemoryTierConfig {
    /// Maximum number of cached artifacts
    pub capacity: u64,
    /// Entry time-to-live
    pub ttl: Duration,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// The process-local artifact cache.
#[derive(Clone)]
pub struct MemoryTier {
    cache: Cache<String, Arc<Artifact>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl MemoryTier {
    pub fn new(config: MemoryTierConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.capacity)
            .time_to_live(config.ttl)
            .build();
        Self {
            cache,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn get(&self, fp: &Fingerprint) -> Option<Arc<Artifact>> {
        match self.cache.get(&fp.encode()).await {
            Some(artifact) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(artifact)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put(&self, artifact: Arc<Artifact>) {
        self.cache
            .insert(artifact.fingerprint.encode(), artifact)
            .await;
    }

    pub async fn invalidate(&self, fp: &Fingerprint) {
        self.cache.invalidate(&fp.encode()).await;
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
        // run_pending_tasks makes the eviction visible to entry_count()
        self.cache.run_pending_tasks().await;
    }

    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
