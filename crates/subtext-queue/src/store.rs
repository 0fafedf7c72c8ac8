//! The durable job-row seam.
//!
//! The queue mutates job rows through this trait so the Postgres repository
//! stays swappable for an in-memory fake in tests. Every transition method
//! returns whether the guarded UPDATE took effect; callers must treat a
//! false return as "someone else owns this row now".

use std::time::Duration;

use async_trait::async_trait;

use subtext_models::{ErrorKind, JobId, JobRecord, WebhookDeliveryStatus};

use crate::error::QueueResult;

/// Per-status job counts, surfaced by the stats endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub queued: u64,
    pub running: u64,
    pub finished: u64,
    pub failed: u64,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a freshly queued job row.
    async fn create(&self, record: &JobRecord) -> QueueResult<()>;

    /// Fetch a job row by id.
    async fn fetch(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>>;

    /// Guarded `queued -> running` transition.
    async fn mark_running(&self, job_id: &JobId) -> QueueResult<bool>;

    /// Guarded `running -> finished` transition.
    async fn mark_finished(&self, job_id: &JobId) -> QueueResult<bool>;

    /// Guarded `running -> failed` transition.
    async fn mark_failed(&self, job_id: &JobId, kind: ErrorKind, message: &str)
        -> QueueResult<bool>;

    /// Guarded `running -> queued` reset (lease reclaim).
    async fn requeue(&self, job_id: &JobId) -> QueueResult<bool>;

    /// Running jobs whose lease expired.
    async fn expired_leases(&self, lease: Duration, limit: i64) -> QueueResult<Vec<JobRecord>>;

    /// Per-status counts across all rows.
    async fn counts(&self) -> QueueResult<JobCounts>;

    /// Record a webhook delivery outcome.
    async fn set_webhook_delivery(
        &self,
        job_id: &JobId,
        status: WebhookDeliveryStatus,
        attempts: u32,
        error: Option<&str>,
    ) -> QueueResult<()>;
}
