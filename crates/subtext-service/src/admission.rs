//! The admission orchestrator.
//!
//! Binds a request to the pipeline: canonicalise, rate-limit, tiered
//! lookup, and on miss the single-flight reservation plus enqueue. Also
//! hosts the admin operations (cache clearing, queue stats, rate-limit
//! management).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use subtext_cache::{
    keys, CacheCoordinator, InvalidateScope, Lookup, Reservation, SharedCache, TierOrigin,
};
use subtext_models::{
    validate_webhook_url, Artifact, ErrorKind, Fingerprint, JobId, JobRecord, JobStatus,
    WebhookDeliveryStatus,
};
use subtext_queue::{JobCounts, JobQueue};

use crate::error::{ServiceError, ServiceResult};
use crate::metrics;
use crate::rate_limit::{RateLimitDecision, RateLimiter};

/// Admission tuning.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Maximum fingerprints per batch request
    pub batch_limit: usize,
    /// Rounds of supersede-and-retry when a job index is stale
    pub supersede_rounds: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            supersede_rounds: 2,
        }
    }
}

/// One admission request.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Bare video id or YouTube URL
    pub video_ref: String,
    /// Requested caption language; defaults to `en`
    pub language: Option<String>,
    /// Clean segment text for AI consumption; defaults to true
    pub clean: Option<bool>,
    /// Optional completion webhook
    pub webhook_url: Option<String>,
    /// Opaque caller identity (already hashed by the ingress layer)
    pub principal: String,
    /// Logical endpoint for rate limiting
    pub endpoint: String,
}

/// Outcome of an admission.
#[derive(Debug, Clone)]
pub enum Submission {
    /// Served from cache
    Ready {
        artifact: Arc<Artifact>,
        tier: TierOrigin,
    },
    /// Queued for extraction; poll the job or wait for the webhook
    Queued { job_id: JobId },
}

/// Outcome of a batch admission.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Jobs enqueued (or joined) for fingerprints that missed
    pub queued: Vec<JobId>,
    /// Video ids served from cache
    pub cached: Vec<String>,
}

/// Client-facing job status projection.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobErrorView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Artifact>,
    pub webhook_delivery_status: WebhookDeliveryStatus,
    pub attempts: u32,
}

/// Error detail inside a job status.
#[derive(Debug, Clone, Serialize)]
pub struct JobErrorView {
    pub kind: ErrorKind,
    pub message: String,
    pub hint: &'static str,
}

/// Scope of an admin cache clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheClearScope {
    /// Local tier only
    Local,
    /// Local and shared tiers
    Shared,
    /// All tiers including durable rows
    All,
}

impl From<CacheClearScope> for InvalidateScope {
    fn from(scope: CacheClearScope) -> Self {
        match scope {
            CacheClearScope::Local => InvalidateScope::Local,
            CacheClearScope::Shared => InvalidateScope::Shared,
            CacheClearScope::All => InvalidateScope::All,
        }
    }
}

/// What an admin cache clear removed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheClearOutcome {
    pub dropped_shared_entries: u64,
    pub purged_durable_rows: u64,
    pub dropped_job_indexes: u64,
}

/// Aggregate stats for the admin endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub queue_depth: u64,
    pub jobs_queued: u64,
    pub jobs_running: u64,
    pub jobs_finished: u64,
    pub jobs_failed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Bulk durable-purge operations, kept behind a seam so admission logic is
/// testable without Postgres.
#[async_trait]
pub trait ArtifactPurge: Send + Sync {
    /// Delete every artifact row. Returns the number removed.
    async fn purge_all(&self) -> ServiceResult<u64>;
}

#[async_trait]
impl ArtifactPurge for subtext_store::ArtifactRepo {
    async fn purge_all(&self) -> ServiceResult<u64> {
        self.delete_all()
            .await
            .map_err(|e| ServiceError::unavailable(e.to_string()))
    }
}

/// The admission orchestrator.
pub struct Admission {
    coordinator: Arc<CacheCoordinator>,
    queue: JobQueue,
    limiter: RateLimiter,
    shared: Arc<dyn SharedCache>,
    purge: Arc<dyn ArtifactPurge>,
    config: AdmissionConfig,
}

impl Admission {
    pub fn new(
        coordinator: Arc<CacheCoordinator>,
        queue: JobQueue,
        limiter: RateLimiter,
        shared: Arc<dyn SharedCache>,
        purge: Arc<dyn ArtifactPurge>,
        config: AdmissionConfig,
    ) -> Self {
        Self {
            coordinator,
            queue,
            limiter,
            shared,
            purge,
            config,
        }
    }

    /// Admit one request: cached artifact or a job handle.
    pub async fn submit(&self, req: SubmitRequest) -> ServiceResult<Submission> {
        let fp = self.canonicalise(&req.video_ref, req.language.as_deref(), req.clean)?;
        if let Some(url) = &req.webhook_url {
            validate_webhook_url(url).map_err(ServiceError::invalid_input)?;
        }

        self.enforce_rate_limit(&req.principal, &req.endpoint, 1)
            .await?;

        if let Lookup::Ready { artifact, tier } = self.coordinator.lookup(&fp).await? {
            metrics::record_cache_hit(tier.as_str());
            metrics::record_admission("ready");
            return Ok(Submission::Ready { artifact, tier });
        }
        metrics::record_cache_miss();

        self.admit_miss(fp, req.webhook_url.clone()).await
    }

    /// Cache-only lookup: never enqueues.
    pub async fn lookup_cached(
        &self,
        video_ref: &str,
        language: Option<&str>,
        clean: Option<bool>,
    ) -> ServiceResult<Option<Submission>> {
        let fp = self.canonicalise(video_ref, language, clean)?;
        match self.coordinator.lookup(&fp).await? {
            Lookup::Ready { artifact, tier } => {
                metrics::record_cache_hit(tier.as_str());
                Ok(Some(Submission::Ready { artifact, tier }))
            }
            Lookup::Miss => Ok(None),
        }
    }

    /// Batch admission: per-fingerprint admission with intra-batch
    /// deduplication. The rate limiter is charged one token per unique
    /// fingerprint, so a batch cannot outspend the same requests sent
    /// individually.
    pub async fn submit_batch(
        &self,
        video_refs: &[String],
        language: Option<&str>,
        clean: Option<bool>,
        webhook_url: Option<String>,
        principal: &str,
        endpoint: &str,
    ) -> ServiceResult<BatchOutcome> {
        if video_refs.is_empty() {
            return Err(ServiceError::invalid_input("batch must not be empty"));
        }
        if video_refs.len() > self.config.batch_limit {
            return Err(ServiceError::invalid_input(format!(
                "batch exceeds {} items",
                self.config.batch_limit
            )));
        }
        if let Some(url) = &webhook_url {
            validate_webhook_url(url).map_err(ServiceError::invalid_input)?;
        }

        // Canonicalise everything first; one bad reference fails the batch.
        let mut fingerprints = Vec::with_capacity(video_refs.len());
        let mut invalid = Vec::new();
        for video_ref in video_refs {
            match self.canonicalise(video_ref, language, clean) {
                Ok(fp) => fingerprints.push(fp),
                Err(_) => invalid.push(video_ref.clone()),
            }
        }
        if !invalid.is_empty() {
            invalid.truncate(5);
            return Err(ServiceError::invalid_input(format!(
                "invalid video references: {}",
                invalid.join(", ")
            )));
        }

        // Intra-batch dedup: the first occurrence wins, duplicates share it.
        let mut seen = HashSet::new();
        fingerprints.retain(|fp| seen.insert(fp.encode()));

        self.enforce_rate_limit(principal, endpoint, fingerprints.len() as u32)
            .await?;

        // One round-trip covers the cache tiers for the whole batch; only
        // the leftovers pay a per-fingerprint walk that includes the
        // durable store.
        let cache_hits = self.coordinator.lookup_cached_batch(&fingerprints).await?;

        let mut outcome = BatchOutcome::default();
        for (fp, hit) in fingerprints.into_iter().zip(cache_hits) {
            if let Some((_, tier)) = hit {
                metrics::record_cache_hit(tier.as_str());
                outcome.cached.push(fp.video_id.to_string());
                continue;
            }
            if let Lookup::Ready { tier, .. } = self.coordinator.lookup(&fp).await? {
                metrics::record_cache_hit(tier.as_str());
                outcome.cached.push(fp.video_id.to_string());
                continue;
            }
            metrics::record_cache_miss();
            match self.admit_miss(fp, webhook_url.clone()).await? {
                Submission::Queued { job_id } => outcome.queued.push(job_id),
                Submission::Ready { .. } => unreachable!("admit_miss never returns Ready"),
            }
        }
        Ok(outcome)
    }

    /// Project a job record for clients.
    pub async fn job_status(&self, job_id: &JobId) -> ServiceResult<JobStatusView> {
        let record = self
            .queue
            .fetch(job_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("job {job_id}")))?;

        // Finished jobs carry their artifact when it is still cached.
        let result = if record.status == JobStatus::Finished {
            match self.coordinator.lookup(&record.fingerprint).await {
                Ok(Lookup::Ready { artifact, .. }) => Some(artifact.as_ref().clone()),
                _ => None,
            }
        } else {
            None
        };

        Ok(JobStatusView {
            job_id: record.job_id.clone(),
            status: record.status,
            enqueued_at: record.enqueued_at,
            started_at: record.started_at,
            ended_at: record.ended_at,
            error: record.error_kind.map(|kind| JobErrorView {
                kind,
                message: record
                    .error_message
                    .clone()
                    .unwrap_or_else(|| kind.hint().to_string()),
                hint: kind.hint(),
            }),
            result,
            webhook_delivery_status: record.webhook_delivery_status,
            attempts: record.attempts,
        })
    }

    // ========================================================================
    // Admin operations
    // ========================================================================

    /// Clear cached state.
    ///
    /// With a fingerprint, eviction is scoped to it. Without one, the whole
    /// tier(s) are cleared; `All` also purges durable rows. Purging never
    /// cancels in-flight jobs; `drop_job_indexes` additionally drops the
    /// fingerprint-to-job index entries so followers stop joining jobs whose
    /// artifacts were just purged.
    pub async fn clear_cache(
        &self,
        scope: CacheClearScope,
        fingerprint: Option<&Fingerprint>,
        drop_job_indexes: bool,
    ) -> ServiceResult<CacheClearOutcome> {
        let mut outcome = CacheClearOutcome::default();

        match fingerprint {
            Some(fp) => {
                self.coordinator.invalidate(fp, scope.into()).await?;
                if drop_job_indexes && self.shared.del(&keys::job_index(fp)).await? {
                    outcome.dropped_job_indexes = 1;
                }
            }
            None => {
                self.coordinator.memory().clear().await;
                if matches!(scope, CacheClearScope::Shared | CacheClearScope::All) {
                    outcome.dropped_shared_entries =
                        self.shared.scan_delete(&keys::artifact_pattern()).await?;
                }
                if matches!(scope, CacheClearScope::All) {
                    outcome.purged_durable_rows = self.purge.purge_all().await?;
                }
                if drop_job_indexes {
                    outcome.dropped_job_indexes =
                        self.shared.scan_delete("job:index:*").await?;
                }
            }
        }

        info!(?scope, ?outcome, "Cache cleared");
        Ok(outcome)
    }

    /// Queue and cache statistics.
    pub async fn stats(&self) -> ServiceResult<ServiceStats> {
        let queue_stats = self.queue.stats().await?;
        let counts: JobCounts = self.queue.jobs().counts().await?;
        metrics::set_queue_depth(queue_stats.depth);

        let memory = self.coordinator.memory().stats();
        Ok(ServiceStats {
            queue_depth: queue_stats.depth,
            jobs_queued: counts.queued,
            jobs_running: counts.running,
            jobs_finished: counts.finished,
            jobs_failed: counts.failed,
            cache_hits: memory.hits,
            cache_misses: memory.misses,
        })
    }

    /// Remaining-token stats for a principal.
    pub async fn rate_limit_stats(
        &self,
        principal: &str,
    ) -> ServiceResult<Vec<crate::rate_limit::BucketStats>> {
        Ok(self.limiter.stats(principal).await?)
    }

    /// Drop all buckets of a principal.
    pub async fn rate_limit_reset(&self, principal: &str) -> ServiceResult<u64> {
        Ok(self.limiter.reset(principal).await?)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn canonicalise(
        &self,
        video_ref: &str,
        language: Option<&str>,
        clean: Option<bool>,
    ) -> ServiceResult<Fingerprint> {
        Fingerprint::canonicalise(video_ref, language, clean.unwrap_or(true)).map_err(|kind| {
            ServiceError::invalid_input(format!("{}: {}", kind.as_str(), kind.hint()))
        })
    }

    async fn enforce_rate_limit(
        &self,
        principal: &str,
        endpoint: &str,
        cost: u32,
    ) -> ServiceResult<()> {
        match self.limiter.check(principal, endpoint, cost).await {
            RateLimitDecision::Allowed(_) => Ok(()),
            RateLimitDecision::Denied {
                retry_after_seconds,
                info,
            } => {
                metrics::record_rate_limit_denial(endpoint);
                Err(ServiceError::rate_limited(retry_after_seconds, info.reset_at))
            }
        }
    }

    /// Single-flight admission of a cache miss.
    async fn admit_miss(
        &self,
        fp: Fingerprint,
        webhook_url: Option<String>,
    ) -> ServiceResult<Submission> {
        for round in 0..self.config.supersede_rounds {
            let candidate = JobRecord::new(fp.clone(), webhook_url.clone());

            match self.coordinator.reserve(&fp, &candidate.job_id).await? {
                Reservation::Leader => {
                    if let Err(e) = self.queue.enqueue(&candidate).await {
                        // Leader without a job would wedge followers until
                        // the lock TTL; release eagerly.
                        warn!(fingerprint = %fp, error = %e, "Enqueue failed; releasing lock");
                        self.coordinator.release(&fp, &candidate.job_id).await.ok();
                        return Err(e.into());
                    }
                    if let Err(e) = self.coordinator.bind_job(&fp, &candidate.job_id).await {
                        // Followers fall back to their bounded retry; the
                        // job itself is already safely queued.
                        warn!(fingerprint = %fp, error = %e, "Failed to bind job index");
                    }
                    metrics::record_admission("queued");
                    info!(fingerprint = %fp, job_id = %candidate.job_id, "Queued extraction");
                    return Ok(Submission::Queued {
                        job_id: candidate.job_id,
                    });
                }
                Reservation::Follower(job_id) => {
                    match self.queue.fetch(&job_id).await? {
                        Some(record) if !record.is_terminal() => {
                            metrics::record_admission("followed");
                            return Ok(Submission::Queued { job_id });
                        }
                        _ => {
                            // Stale index: the snapshot vanished (flushed
                            // tier) or the job already terminated while the
                            // index lingered. Drop the stale flight markers
                            // and contend again.
                            debug!(
                                fingerprint = %fp,
                                stale_job = %job_id,
                                round = round,
                                "Superseding stale job index"
                            );
                            self.coordinator.release(&fp, &job_id).await.ok();
                        }
                    }
                }
            }
        }

        Err(ServiceError::unavailable(format!(
            "could not admit {fp}: in-flight job not observable"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RateLimitConfig;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use subtext_cache::testing::{FakeStore, MemoryShared};
    use subtext_cache::{ArtifactStore, CoordinatorConfig, MemoryTier, MemoryTierConfig};
    use subtext_models::{Engine, Segment};
    use subtext_queue::testing::FakeJobStore;
    use subtext_queue::{JobStore, QueueConfig};

    struct NullPurge;

    #[async_trait]
    impl ArtifactPurge for NullPurge {
        async fn purge_all(&self) -> ServiceResult<u64> {
            Ok(0)
        }
    }

    struct Harness {
        admission: Arc<Admission>,
        shared: Arc<MemoryShared>,
        store: Arc<FakeStore>,
        jobs: Arc<FakeJobStore>,
        queue: JobQueue,
    }

    fn harness_with_limit(per_minute: u32, burst: u32) -> Harness {
        let shared = Arc::new(MemoryShared::new());
        let store = Arc::new(FakeStore::new());
        let jobs = Arc::new(FakeJobStore::new());

        let queue = JobQueue::new(
            Arc::clone(&shared) as Arc<dyn SharedCache>,
            Arc::clone(&jobs) as Arc<dyn JobStore>,
            QueueConfig::default(),
        );
        let coordinator = Arc::new(CacheCoordinator::new(
            MemoryTier::new(MemoryTierConfig::default()),
            Arc::clone(&shared) as Arc<dyn SharedCache>,
            Arc::clone(&store) as Arc<dyn subtext_cache::ArtifactStore>,
            CoordinatorConfig {
                reserve_retry_delay: Duration::from_millis(10),
                ..Default::default()
            },
        ));
        let limiter = RateLimiter::new(
            Arc::clone(&shared) as Arc<dyn SharedCache>,
            RateLimitConfig {
                per_minute,
                burst,
                fail_open: false,
            },
        );

        let admission = Arc::new(Admission::new(
            coordinator,
            queue.clone(),
            limiter,
            Arc::clone(&shared) as Arc<dyn SharedCache>,
            Arc::new(NullPurge),
            AdmissionConfig::default(),
        ));
        Harness {
            admission,
            shared,
            store,
            jobs,
            queue,
        }
    }

    fn harness() -> Harness {
        harness_with_limit(600, 100)
    }

    fn request(video_ref: &str) -> SubmitRequest {
        SubmitRequest {
            video_ref: video_ref.to_string(),
            language: Some("en".to_string()),
            clean: Some(true),
            webhook_url: None,
            principal: "client-1".to_string(),
            endpoint: "/subtitles".to_string(),
        }
    }

    fn artifact_for(fp: &Fingerprint) -> Artifact {
        let segments = vec![Segment::new("cached text", 0.0, 1.5)];
        let integrity = Artifact::integrity_of(&segments);
        let now = Utc::now();
        Artifact {
            fingerprint: fp.clone(),
            title: Some("Cached".to_string()),
            engine_used: Engine::Primary,
            plain_text: Some("cached text".to_string()),
            segments,
            extraction_duration_ms: 10,
            proxy_used: None,
            created_at: now,
            expires_at: now + ChronoDuration::days(30),
            integrity,
        }
    }

    #[tokio::test]
    async fn cache_hit_is_served_synchronously_and_promoted() {
        let h = harness();
        let fp = Fingerprint::canonicalise("dQw4w9WgXcQ", Some("en"), true).unwrap();
        let seeded = artifact_for(&fp);
        h.store.insert(seeded.clone()).await;

        match h.admission.submit(request("dQw4w9WgXcQ")).await.unwrap() {
            Submission::Ready { artifact, tier } => {
                assert_eq!(tier, TierOrigin::Durable);
                assert_eq!(artifact.integrity, seeded.integrity);
            }
            Submission::Queued { .. } => panic!("expected cache hit"),
        }

        // Promotion: a cache-only lookup now hits the local tier.
        match h
            .admission
            .lookup_cached("https://youtu.be/dQw4w9WgXcQ", Some("en"), Some(true))
            .await
            .unwrap()
            .unwrap()
        {
            Submission::Ready { tier, .. } => assert_eq!(tier, TierOrigin::Local),
            Submission::Queued { .. } => unreachable!(),
        }
    }

    #[tokio::test]
    async fn invalid_input_is_synchronous() {
        let h = harness();
        let err = h.admission.submit(request("definitely not a video")).await;
        assert!(matches!(err, Err(ServiceError::InvalidInput { .. })));

        let err = h
            .admission
            .submit(SubmitRequest {
                webhook_url: Some("ftp://example.com".to_string()),
                ..request("dQw4w9WgXcQ")
            })
            .await;
        assert!(matches!(err, Err(ServiceError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn miss_enqueues_and_repeat_submits_share_the_job() {
        let h = harness();

        let first = h.admission.submit(request("dQw4w9WgXcQ")).await.unwrap();
        let Submission::Queued { job_id } = first else {
            panic!("expected queued");
        };

        // Same fingerprint while the job is in flight: same handle.
        let second = h.admission.submit(request("dQw4w9WgXcQ")).await.unwrap();
        let Submission::Queued { job_id: second_id } = second else {
            panic!("expected queued");
        };
        assert_eq!(job_id, second_id);

        // Exactly one queue entry and one job row exist.
        assert_eq!(h.queue.stats().await.unwrap().depth, 1);
        assert_eq!(h.jobs.counts().await.unwrap().queued, 1);
    }

    #[tokio::test]
    async fn thundering_herd_yields_one_job() {
        let h = harness();
        let mut handles = Vec::new();
        for i in 0..50 {
            let admission = Arc::clone(&h.admission);
            handles.push(tokio::spawn(async move {
                // Distinct principals: the property under test is the
                // single-flight reservation, not the rate limiter.
                let req = SubmitRequest {
                    principal: format!("client-{i}"),
                    ..request("dQw4w9WgXcQ")
                };
                match admission.submit(req).await.unwrap() {
                    Submission::Queued { job_id } => job_id,
                    Submission::Ready { .. } => panic!("nothing cached"),
                }
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().to_string());
        }
        assert_eq!(ids.len(), 1, "all 50 admissions must share one job id");
        assert_eq!(h.queue.stats().await.unwrap().depth, 1);
        assert_eq!(h.jobs.counts().await.unwrap().queued, 1);
    }

    #[tokio::test]
    async fn rate_limit_boundary() {
        let h = harness_with_limit(30, 5);

        let mut allowed = 0;
        let mut denied = 0;
        for _ in 0..40 {
            match h.admission.submit(request("dQw4w9WgXcQ")).await {
                Ok(_) => allowed += 1,
                Err(ServiceError::RateLimited {
                    retry_after_seconds,
                    reset_at,
                    ..
                }) => {
                    denied += 1;
                    assert!(retry_after_seconds > 0);
                    assert!(reset_at > Utc::now());
                    assert!(reset_at < Utc::now() + ChronoDuration::seconds(61));
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(allowed, 35);
        assert_eq!(denied, 5);
    }

    #[tokio::test]
    async fn batch_dedups_and_splits_cached_from_queued() {
        let h = harness();

        // Seed one cached fingerprint.
        let cached_fp = Fingerprint::canonicalise("dQw4w9WgXcQ", Some("en"), true).unwrap();
        h.store.insert(artifact_for(&cached_fp)).await;

        let refs = vec![
            "dQw4w9WgXcQ".to_string(),                     // cached
            "oHg5SJYRHA0".to_string(),                     // fresh
            "https://youtu.be/oHg5SJYRHA0".to_string(),    // duplicate of fresh
            "xvFZjo5PgG0".to_string(),                     // fresh
        ];
        let outcome = h
            .admission
            .submit_batch(&refs, Some("en"), Some(true), None, "client-1", "/batch")
            .await
            .unwrap();

        assert_eq!(outcome.cached, vec!["dQw4w9WgXcQ".to_string()]);
        assert_eq!(outcome.queued.len(), 2, "duplicates must not enqueue twice");
        assert_eq!(h.jobs.counts().await.unwrap().queued, 2);
    }

    #[tokio::test]
    async fn batch_rejects_invalid_and_oversized_input() {
        let h = harness();

        let err = h
            .admission
            .submit_batch(
                &["dQw4w9WgXcQ".to_string(), "bogus!".to_string()],
                None,
                None,
                None,
                "p",
                "/batch",
            )
            .await;
        assert!(matches!(err, Err(ServiceError::InvalidInput { .. })));

        let too_many: Vec<String> = (0..101).map(|i| format!("{i:011}")).collect();
        let err = h
            .admission
            .submit_batch(&too_many, None, None, None, "p", "/batch")
            .await;
        assert!(matches!(err, Err(ServiceError::InvalidInput { .. })));

        let err = h
            .admission
            .submit_batch(&[], None, None, None, "p", "/batch")
            .await;
        assert!(matches!(err, Err(ServiceError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn stale_job_index_is_superseded() {
        let h = harness();
        let fp = Fingerprint::canonicalise("dQw4w9WgXcQ", Some("en"), true).unwrap();

        // A dangling flight: lock and index point at a job that has no
        // record anywhere (e.g. the shared tier was flushed mid-flight).
        h.shared
            .set(&keys::lock(&fp), "ghost-job", Duration::from_secs(60))
            .await
            .unwrap();
        h.shared
            .set(&keys::job_index(&fp), "ghost-job", Duration::from_secs(60))
            .await
            .unwrap();

        match h.admission.submit(request("dQw4w9WgXcQ")).await.unwrap() {
            Submission::Queued { job_id } => assert_ne!(job_id.as_str(), "ghost-job"),
            Submission::Ready { .. } => panic!("nothing cached"),
        }
        assert_eq!(h.jobs.counts().await.unwrap().queued, 1);
    }

    #[tokio::test]
    async fn job_status_views() {
        let h = harness();
        let Submission::Queued { job_id } =
            h.admission.submit(request("dQw4w9WgXcQ")).await.unwrap()
        else {
            panic!("expected queued");
        };

        let view = h.admission.job_status(&job_id).await.unwrap();
        assert_eq!(view.status, JobStatus::Queued);
        assert!(view.error.is_none());
        assert!(view.result.is_none());

        let missing = h
            .admission
            .job_status(&JobId::from_string("nope"))
            .await;
        assert!(matches!(missing, Err(ServiceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn clear_cache_scopes() {
        let h = harness();
        let fp = Fingerprint::canonicalise("dQw4w9WgXcQ", Some("en"), true).unwrap();
        h.store.insert(artifact_for(&fp)).await;

        // Populate caches via a submit hit.
        h.admission.submit(request("dQw4w9WgXcQ")).await.unwrap();
        assert!(h.shared.get(&keys::artifact(&fp)).await.unwrap().is_some());

        h.admission
            .clear_cache(CacheClearScope::All, Some(&fp), false)
            .await
            .unwrap();
        assert!(h.shared.get(&keys::artifact(&fp)).await.unwrap().is_none());
        assert!(h.store.fetch(&fp).await.unwrap().is_none());

        // The next submit re-queues an extraction.
        match h.admission.submit(request("dQw4w9WgXcQ")).await.unwrap() {
            Submission::Queued { .. } => {}
            Submission::Ready { .. } => panic!("cache should be empty"),
        }
    }

    #[tokio::test]
    async fn stats_reflect_queue_depth() {
        let h = harness();
        h.admission.submit(request("dQw4w9WgXcQ")).await.unwrap();
        h.admission.submit(request("oHg5SJYRHA0")).await.unwrap();

        let stats = h.admission.stats().await.unwrap();
        assert_eq!(stats.queue_depth, 2);
        assert_eq!(stats.jobs_queued, 2);
    }
}
