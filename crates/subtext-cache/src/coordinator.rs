//! The cache coordinator: one interface over all three tiers.
//!
//! Read path: local tier, shared tier, durable store, promoting on each hit
//! so hot fingerprints migrate toward the process. Write path: durable store
//! first (authoritative), then shared, then local, so readers never observe
//! a cache entry the store contradicts.
//!
//! Reservation implements single-flight per fingerprint: one leader per miss
//! window acquires the lock and enqueues the extraction; every concurrent
//! admitter becomes a follower and receives the in-flight job id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use subtext_models::{Artifact, ErrorKind, Fingerprint, JobId};

use crate::error::{CacheError, CacheResult};
use crate::keys;
use crate::memory::MemoryTier;
use crate::shared::SharedCache;

/// Durable-store operations the coordinator depends on.
///
/// Implemented by the Postgres store; tests substitute an in-memory fake.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch the stored artifact for a fingerprint, if any.
    async fn fetch(&self, fp: &Fingerprint) -> CacheResult<Option<Artifact>>;

    /// Upsert the artifact row (single-row, keyed by the fingerprint).
    async fn upsert(&self, artifact: &Artifact) -> CacheResult<()>;

    /// Record a terminal extraction failure for the fingerprint.
    async fn mark_failed(&self, fp: &Fingerprint, kind: ErrorKind, message: &str)
        -> CacheResult<()>;

    /// Delete the artifact row. Returns the number of rows removed.
    async fn delete(&self, fp: &Fingerprint) -> CacheResult<u64>;
}

/// Which tier served a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierOrigin {
    Local,
    Shared,
    Durable,
}

impl TierOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierOrigin::Local => "local",
            TierOrigin::Shared => "shared",
            TierOrigin::Durable => "durable",
        }
    }
}

/// Outcome of a read-through lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// An artifact was found (and promoted)
    Ready {
        artifact: Arc<Artifact>,
        tier: TierOrigin,
    },
    /// No usable artifact in any tier
    Miss,
}

/// Outcome of a single-flight reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// This caller owns the miss window; it must enqueue the job whose id it
    /// offered and then bind it via [`CacheCoordinator::bind_job`].
    Leader,
    /// Another caller already owns the window; its job id is returned.
    Follower(JobId),
}

/// Scope of an invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidateScope {
    /// Local tier only
    Local,
    /// Local and shared tiers
    Shared,
    /// All tiers including the durable store
    All,
}

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// TTL for artifacts in the shared tier
    pub shared_ttl: Duration,
    /// Single-flight lock TTL; should exceed the extraction budget so a
    /// crashed leader cannot wedge the fingerprint for long
    pub lock_ttl: Duration,
    /// How many times a loser of the lock race re-checks before giving up
    pub reserve_attempts: u32,
    /// Delay between reservation re-checks
    pub reserve_retry_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            shared_ttl: Duration::from_secs(86_400),
            lock_ttl: Duration::from_secs(40),
            reserve_attempts: 10,
            reserve_retry_delay: Duration::from_millis(50),
        }
    }
}

/// Read-through/write-through coordination across the three tiers.
pub struct CacheCoordinator {
    memory: MemoryTier,
    shared: Arc<dyn SharedCache>,
    store: Arc<dyn ArtifactStore>,
    config: CoordinatorConfig,
}

impl CacheCoordinator {
    pub fn new(
        memory: MemoryTier,
        shared: Arc<dyn SharedCache>,
        store: Arc<dyn ArtifactStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            memory,
            shared,
            store,
            config,
        }
    }

    /// Walk the tiers for `fp`, promoting on hit.
    pub async fn lookup(&self, fp: &Fingerprint) -> CacheResult<Lookup> {
        if let Some(artifact) = self.memory.get(fp).await {
            return Ok(Lookup::Ready {
                artifact,
                tier: TierOrigin::Local,
            });
        }

        if let Some(raw) = self.shared.get(&keys::artifact(fp)).await? {
            match serde_json::from_str::<Artifact>(&raw) {
                Ok(artifact) => {
                    let artifact = Arc::new(artifact);
                    self.memory.put(Arc::clone(&artifact)).await;
                    return Ok(Lookup::Ready {
                        artifact,
                        tier: TierOrigin::Shared,
                    });
                }
                Err(e) => {
                    // Undecodable entries are dropped, never surfaced.
                    warn!(fingerprint = %fp, error = %e, "Dropping corrupt shared cache entry");
                    self.shared.del(&keys::artifact(fp)).await.ok();
                }
            }
        }

        match self.store.fetch(fp).await? {
            Some(artifact) if !artifact.is_expired(Utc::now()) => {
                let artifact = Arc::new(artifact);
                self.promote_to_caches(&artifact).await;
                Ok(Lookup::Ready {
                    artifact,
                    tier: TierOrigin::Durable,
                })
            }
            Some(_) => {
                // Past retention: treat as a miss so admission refreshes it.
                debug!(fingerprint = %fp, "Durable artifact expired, refreshing");
                Ok(Lookup::Miss)
            }
            None => Ok(Lookup::Miss),
        }
    }

    /// Cache-tier batch lookup: local tier per fingerprint, then one
    /// round-trip against the shared tier for the rest. The durable store
    /// is not consulted; callers fall back to [`Self::lookup`] per miss.
    /// The result is positionally aligned with `fps`.
    pub async fn lookup_cached_batch(
        &self,
        fps: &[Fingerprint],
    ) -> CacheResult<Vec<Option<(Arc<Artifact>, TierOrigin)>>> {
        let mut results: Vec<Option<(Arc<Artifact>, TierOrigin)>> = Vec::with_capacity(fps.len());
        let mut shared_lookups: Vec<(usize, String)> = Vec::new();

        for (i, fp) in fps.iter().enumerate() {
            match self.memory.get(fp).await {
                Some(artifact) => results.push(Some((artifact, TierOrigin::Local))),
                None => {
                    shared_lookups.push((i, keys::artifact(fp)));
                    results.push(None);
                }
            }
        }
        if shared_lookups.is_empty() {
            return Ok(results);
        }

        let shared_keys: Vec<String> = shared_lookups.iter().map(|(_, k)| k.clone()).collect();
        let values = self.shared.get_many(&shared_keys).await?;
        for ((slot, key), value) in shared_lookups.into_iter().zip(values) {
            let Some(raw) = value else { continue };
            match serde_json::from_str::<Artifact>(&raw) {
                Ok(artifact) => {
                    let artifact = Arc::new(artifact);
                    self.memory.put(Arc::clone(&artifact)).await;
                    results[slot] = Some((artifact, TierOrigin::Shared));
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Dropping corrupt shared cache entry");
                    self.shared.del(&key).await.ok();
                }
            }
        }
        Ok(results)
    }

    /// Attempt to become the single-flight leader for `fp`.
    ///
    /// `candidate` is the id of the job this caller will enqueue if it wins;
    /// it becomes the lock value so the eventual owner can release the lock
    /// with a compare-and-delete.
    pub async fn reserve(&self, fp: &Fingerprint, candidate: &JobId) -> CacheResult<Reservation> {
        let lock_key = keys::lock(fp);
        let index_key = keys::job_index(fp);

        for attempt in 0..self.config.reserve_attempts {
            if self
                .shared
                .set_nx(&lock_key, candidate.as_str(), self.config.lock_ttl)
                .await?
            {
                debug!(fingerprint = %fp, job_id = %candidate, "Acquired extraction lock");
                return Ok(Reservation::Leader);
            }

            // Lost the race: the leader publishes its job id under the index
            // key right after enqueueing. A brief window exists where the
            // lock is held but the index is not yet written.
            if let Some(existing) = self.shared.get(&index_key).await? {
                return Ok(Reservation::Follower(JobId::from_string(existing)));
            }

            debug!(
                fingerprint = %fp,
                attempt = attempt + 1,
                "Lock held but job index absent; retrying"
            );
            tokio::time::sleep(self.config.reserve_retry_delay).await;
        }

        Err(CacheError::contended(format!(
            "no job id observable for in-flight extraction of {fp}"
        )))
    }

    /// Publish the leader's job id so followers can find it.
    pub async fn bind_job(&self, fp: &Fingerprint, job_id: &JobId) -> CacheResult<()> {
        self.shared
            .set(&keys::job_index(fp), job_id.as_str(), self.config.lock_ttl)
            .await
    }

    /// Release the single-flight lock without committing (leader failed to
    /// enqueue). The compare-and-delete never clobbers a successor's lock.
    pub async fn release(&self, fp: &Fingerprint, owner: &JobId) -> CacheResult<()> {
        self.shared
            .del_if_equals(&keys::lock(fp), owner.as_str())
            .await?;
        self.shared.del(&keys::job_index(fp)).await?;
        Ok(())
    }

    /// Commit a successful extraction.
    ///
    /// Write order is durable store, shared tier, local tier; the cache
    /// writes are best-effort once the store accepted the artifact.
    pub async fn commit_ready(&self, artifact: &Artifact, owner: &JobId) -> CacheResult<()> {
        self.store.upsert(artifact).await?;

        let artifact = Arc::new(artifact.clone());
        self.promote_to_caches(&artifact).await;
        self.finish_flight(&artifact.fingerprint, owner).await;
        Ok(())
    }

    /// Commit a terminal failure: the store records the failed state and all
    /// cached entries for the fingerprint are dropped.
    pub async fn commit_failure(
        &self,
        fp: &Fingerprint,
        kind: ErrorKind,
        message: &str,
        owner: &JobId,
    ) -> CacheResult<()> {
        self.store.mark_failed(fp, kind, message).await?;

        self.memory.invalidate(fp).await;
        if let Err(e) = self.shared.del(&keys::artifact(fp)).await {
            warn!(fingerprint = %fp, error = %e, "Failed to drop shared entry on failure commit");
        }
        self.finish_flight(fp, owner).await;
        Ok(())
    }

    /// Evict `fp` across the requested tiers.
    pub async fn invalidate(&self, fp: &Fingerprint, scope: InvalidateScope) -> CacheResult<()> {
        self.memory.invalidate(fp).await;
        if matches!(scope, InvalidateScope::Shared | InvalidateScope::All) {
            self.shared.del(&keys::artifact(fp)).await?;
        }
        if matches!(scope, InvalidateScope::All) {
            self.store.delete(fp).await?;
        }
        Ok(())
    }

    /// The local tier, for stats and admin clears.
    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    /// Write the artifact into both cache tiers (best effort).
    async fn promote_to_caches(&self, artifact: &Arc<Artifact>) {
        let key = keys::artifact(&artifact.fingerprint);
        match serde_json::to_string(artifact.as_ref()) {
            Ok(json) => {
                if let Err(e) = self.shared.set(&key, &json, self.config.shared_ttl).await {
                    warn!(key = %key, error = %e, "Failed to write shared cache entry");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "Failed to encode artifact"),
        }
        self.memory.put(Arc::clone(artifact)).await;
    }

    /// Clear the in-flight markers once a job reaches a terminal state.
    async fn finish_flight(&self, fp: &Fingerprint, owner: &JobId) {
        if let Err(e) = self.shared.del(&keys::job_index(fp)).await {
            warn!(fingerprint = %fp, error = %e, "Failed to clear job index");
        }
        match self
            .shared
            .del_if_equals(&keys::lock(fp), owner.as_str())
            .await
        {
            Ok(true) => debug!(fingerprint = %fp, "Released extraction lock"),
            Ok(false) => {
                // Lock expired and possibly re-acquired by a newer leader.
                debug!(fingerprint = %fp, "Extraction lock already superseded");
            }
            Err(e) => warn!(fingerprint = %fp, error = %e, "Failed to release extraction lock"),
        }
    }
}
