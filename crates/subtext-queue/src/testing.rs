//! In-memory fake of the durable job store, for tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use subtext_models::{ErrorKind, JobId, JobRecord, JobStatus, WebhookDeliveryStatus};

use crate::error::QueueResult;
use crate::store::JobStore;

/// A `JobStore` over process memory with the same transition guards as the
/// Postgres repository.
#[derive(Default)]
pub struct FakeJobStore {
    rows: Mutex<HashMap<String, JobRecord>>,
}

impl FakeJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift a running job's lease start into the past (test helper).
    pub async fn backdate_started_at(&self, job_id: &JobId, by: ChronoDuration) {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.get_mut(job_id.as_str()) {
            if let Some(started) = row.started_at {
                row.started_at = Some(started - by);
            }
        }
    }
}

#[async_trait]
impl JobStore for FakeJobStore {
    async fn create(&self, record: &JobRecord) -> QueueResult<()> {
        let mut rows = self.rows.lock().await;
        rows.insert(record.job_id.as_str().to_string(), record.clone());
        Ok(())
    }

    async fn fetch(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        let rows = self.rows.lock().await;
        Ok(rows.get(job_id.as_str()).cloned())
    }

    async fn mark_running(&self, job_id: &JobId) -> QueueResult<bool> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(job_id.as_str()) {
            Some(row) if row.status == JobStatus::Queued => {
                *row = row.clone().start();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_finished(&self, job_id: &JobId) -> QueueResult<bool> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(job_id.as_str()) {
            Some(row) if row.status == JobStatus::Running => {
                *row = row.clone().finish();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(
        &self,
        job_id: &JobId,
        kind: ErrorKind,
        message: &str,
    ) -> QueueResult<bool> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(job_id.as_str()) {
            Some(row) if row.status == JobStatus::Running => {
                *row = row.clone().fail(kind, message);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue(&self, job_id: &JobId) -> QueueResult<bool> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(job_id.as_str()) {
            Some(row) if row.status == JobStatus::Running => {
                *row = row.clone().requeue();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expired_leases(&self, lease: Duration, limit: i64) -> QueueResult<Vec<JobRecord>> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(lease).unwrap_or_else(|_| ChronoDuration::seconds(60));
        let rows = self.rows.lock().await;
        let mut expired: Vec<JobRecord> = rows
            .values()
            .filter(|row| {
                row.status == JobStatus::Running
                    && row.started_at.map(|t| t < cutoff).unwrap_or(false)
            })
            .cloned()
            .collect();
        expired.sort_by_key(|row| row.started_at);
        expired.truncate(limit as usize);
        Ok(expired)
    }

    async fn counts(&self) -> QueueResult<crate::store::JobCounts> {
        let rows = self.rows.lock().await;
        let mut counts = crate::store::JobCounts::default();
        for row in rows.values() {
            match row.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Finished => counts.finished += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn set_webhook_delivery(
        &self,
        job_id: &JobId,
        status: WebhookDeliveryStatus,
        attempts: u32,
        error: Option<&str>,
    ) -> QueueResult<()> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.get_mut(job_id.as_str()) {
            row.webhook_delivery_status = status;
            row.webhook_attempts = attempts;
            row.webhook_delivery_error = error.map(|e| e.to_string());
        }
        Ok(())
    }
}
