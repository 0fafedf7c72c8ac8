//! Job repository.
//!
//! Job rows are written by admission (create) and by the owning worker
//! (running/terminal transitions). Status guards in the UPDATE statements
//! keep the lifecycle monotonic even if two writers race: an UPDATE whose
//! guard no longer matches affects zero rows and is reported to the caller.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::debug;

use subtext_models::{
    ErrorKind, Fingerprint, JobId, JobRecord, JobStatus, Language, VideoId,
    WebhookDeliveryStatus,
};

use subtext_queue::JobCounts;

use crate::error::{StoreError, StoreResult};

/// Repository over the `jobs` table.
#[derive(Clone)]
pub struct JobRepo {
    pool: PgPool,
}

impl JobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a freshly queued job row.
    pub async fn create(&self, record: &JobRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, video_id, language, clean, status, enqueued_at,
                webhook_url, webhook_delivery_status, attempts
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.job_id.as_str())
        .bind(record.fingerprint.video_id.as_str())
        .bind(record.fingerprint.language.as_str())
        .bind(record.fingerprint.clean)
        .bind(record.status.as_str())
        .bind(record.enqueued_at)
        .bind(&record.webhook_url)
        .bind(record.webhook_delivery_status.as_str())
        .bind(record.attempts as i32)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %record.job_id, fingerprint = %record.fingerprint, "Created job row");
        Ok(())
    }

    /// Fetch a job by id.
    pub async fn fetch(&self, job_id: &JobId) -> StoreResult<Option<JobRecord>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = $1")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(decode_job).transpose()
    }

    /// The most recent non-terminal job for a fingerprint, if any.
    pub async fn active_for(&self, fp: &Fingerprint) -> StoreResult<Option<JobRecord>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE video_id = $1 AND language = $2 AND clean = $3
              AND status IN ('queued', 'running')
            ORDER BY enqueued_at DESC
            LIMIT 1
            "#,
        )
        .bind(fp.video_id.as_str())
        .bind(fp.language.as_str())
        .bind(fp.clean)
        .fetch_optional(&self.pool)
        .await?;
        row.map(decode_job).transpose()
    }

    /// Transition `queued -> running`, stamping the lease start.
    /// Returns false when the row was not in `queued` (already claimed or
    /// terminal), which the caller must treat as "do not process".
    pub async fn mark_running(&self, job_id: &JobId) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'running', started_at = now(), attempts = attempts + 1
            WHERE job_id = $1 AND status = 'queued'
            "#,
        )
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Transition `running -> finished`.
    pub async fn mark_finished(&self, job_id: &JobId) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'finished', ended_at = now()
            WHERE job_id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Transition `running -> failed` with the classified error.
    pub async fn mark_failed(
        &self,
        job_id: &JobId,
        kind: ErrorKind,
        message: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', ended_at = now(), error_kind = $2, error_message = $3
            WHERE job_id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id.as_str())
        .bind(kind.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record the webhook delivery outcome for a terminal job.
    pub async fn set_webhook_delivery(
        &self,
        job_id: &JobId,
        status: WebhookDeliveryStatus,
        attempts: u32,
        error: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET webhook_delivery_status = $2, webhook_attempts = $3,
                webhook_delivery_error = $4
            WHERE job_id = $1
            "#,
        )
        .bind(job_id.as_str())
        .bind(status.as_str())
        .bind(attempts as i32)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Jobs whose lease expired: still `running`, but their worker has not
    /// finished within the extraction budget plus grace.
    pub async fn expired_leases(
        &self,
        lease: Duration,
        limit: i64,
    ) -> StoreResult<Vec<JobRecord>> {
        let cutoff: DateTime<Utc> = Utc::now()
            - ChronoDuration::from_std(lease).unwrap_or_else(|_| ChronoDuration::seconds(60));
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE status = 'running' AND started_at IS NOT NULL AND started_at < $1
            ORDER BY started_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(decode_job).collect()
    }

    /// Reset a reclaimed job back to `queued` (lease expiry only).
    pub async fn requeue(&self, job_id: &JobId) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued', started_at = NULL
            WHERE job_id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Per-status counts.
    pub async fn counts(&self) -> StoreResult<JobCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = JobCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            match status.as_str() {
                "queued" => counts.queued = n as u64,
                "running" => counts.running = n as u64,
                "finished" => counts.finished = n as u64,
                "failed" => counts.failed = n as u64,
                _ => {}
            }
        }
        Ok(counts)
    }
}

#[async_trait::async_trait]
impl subtext_queue::JobStore for JobRepo {
    async fn create(&self, record: &JobRecord) -> subtext_queue::QueueResult<()> {
        JobRepo::create(self, record)
            .await
            .map_err(|e| subtext_queue::QueueError::store(e.to_string()))
    }

    async fn fetch(&self, job_id: &JobId) -> subtext_queue::QueueResult<Option<JobRecord>> {
        JobRepo::fetch(self, job_id)
            .await
            .map_err(|e| subtext_queue::QueueError::store(e.to_string()))
    }

    async fn mark_running(&self, job_id: &JobId) -> subtext_queue::QueueResult<bool> {
        JobRepo::mark_running(self, job_id)
            .await
            .map_err(|e| subtext_queue::QueueError::store(e.to_string()))
    }

    async fn mark_finished(&self, job_id: &JobId) -> subtext_queue::QueueResult<bool> {
        JobRepo::mark_finished(self, job_id)
            .await
            .map_err(|e| subtext_queue::QueueError::store(e.to_string()))
    }

    async fn mark_failed(
        &self,
        job_id: &JobId,
        kind: ErrorKind,
        message: &str,
    ) -> subtext_queue::QueueResult<bool> {
        JobRepo::mark_failed(self, job_id, kind, message)
            .await
            .map_err(|e| subtext_queue::QueueError::store(e.to_string()))
    }

    async fn requeue(&self, job_id: &JobId) -> subtext_queue::QueueResult<bool> {
        JobRepo::requeue(self, job_id)
            .await
            .map_err(|e| subtext_queue::QueueError::store(e.to_string()))
    }

    async fn expired_leases(
        &self,
        lease: Duration,
        limit: i64,
    ) -> subtext_queue::QueueResult<Vec<JobRecord>> {
        JobRepo::expired_leases(self, lease, limit)
            .await
            .map_err(|e| subtext_queue::QueueError::store(e.to_string()))
    }

    async fn counts(&self) -> subtext_queue::QueueResult<JobCounts> {
        JobRepo::counts(self)
            .await
            .map_err(|e| subtext_queue::QueueError::store(e.to_string()))
    }

    async fn set_webhook_delivery(
        &self,
        job_id: &JobId,
        status: WebhookDeliveryStatus,
        attempts: u32,
        error: Option<&str>,
    ) -> subtext_queue::QueueResult<()> {
        JobRepo::set_webhook_delivery(self, job_id, status, attempts, error)
            .await
            .map_err(|e| subtext_queue::QueueError::store(e.to_string()))
    }
}

fn decode_job(row: PgRow) -> StoreResult<JobRecord> {
    let video_id: String = row.try_get("video_id")?;
    let language: String = row.try_get("language")?;
    let clean: bool = row.try_get("clean")?;
    let fingerprint = Fingerprint {
        video_id: VideoId::from_trusted(video_id),
        language: Language::parse(&language)
            .map_err(|_| StoreError::decode(format!("bad stored language: {language}")))?,
        clean,
    };

    let status_raw: String = row.try_get("status")?;
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::decode(format!("bad job status: {status_raw}")))?;

    let delivery_raw: String = row.try_get("webhook_delivery_status")?;
    let webhook_delivery_status = WebhookDeliveryStatus::parse(&delivery_raw)
        .ok_or_else(|| StoreError::decode(format!("bad delivery status: {delivery_raw}")))?;

    let error_kind = row
        .try_get::<Option<String>, _>("error_kind")?
        .as_deref()
        .and_then(ErrorKind::parse);

    Ok(JobRecord {
        job_id: JobId::from_string(row.try_get::<String, _>("job_id")?),
        fingerprint,
        status,
        enqueued_at: row.try_get("enqueued_at")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        error_kind,
        error_message: row.try_get("error_message")?,
        webhook_url: row.try_get("webhook_url")?,
        webhook_delivery_status,
        webhook_delivery_error: row.try_get("webhook_delivery_error")?,
        webhook_attempts: row.try_get::<i32, _>("webhook_attempts")? as u32,
        attempts: row.try_get::<i32, _>("attempts")? as u32,
    })
}
