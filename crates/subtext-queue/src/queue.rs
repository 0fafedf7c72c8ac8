//! The durable FIFO.
//!
//! Enqueue pushes the job id onto the shared list and writes both the
//! snapshot key and the durable row. The two writes are not atomic; the
//! dequeue side tolerates a list entry whose records have vanished by
//! dropping it as an orphan.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use subtext_cache::{keys, SharedCache};
use subtext_models::{ErrorKind, JobId, JobRecord, JobStatus};

use crate::error::{QueueError, QueueResult};
use crate::store::JobStore;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Name of the queue list (`queue:<name>`)
    pub name: String,
    /// TTL for job snapshots in the shared tier
    pub snapshot_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "extract".to_string(),
            snapshot_ttl: Duration::from_secs(86_400),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            name: std::env::var("QUEUE_NAME").unwrap_or_else(|_| "extract".to_string()),
            snapshot_ttl: Duration::from_secs(
                std::env::var("QUEUE_SNAPSHOT_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(86_400),
            ),
        }
    }
}

/// Aggregate queue statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    /// Entries waiting in the list
    pub depth: u64,
}

/// Durable FIFO of extraction jobs.
#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<dyn SharedCache>,
    jobs: Arc<dyn JobStore>,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(shared: Arc<dyn SharedCache>, jobs: Arc<dyn JobStore>, config: QueueConfig) -> Self {
        Self {
            shared,
            jobs,
            config,
        }
    }

    fn list_key(&self) -> String {
        keys::queue(&self.config.name)
    }

    /// Enqueue a queued job record.
    ///
    /// Writes the durable row first so a crash between the writes leaves a
    /// recoverable record rather than an untracked list entry.
    pub async fn enqueue(&self, record: &JobRecord) -> QueueResult<()> {
        if record.status != JobStatus::Queued {
            return Err(QueueError::enqueue_failed(format!(
                "job {} is {}, only queued jobs can be enqueued",
                record.job_id, record.status
            )));
        }

        self.jobs.create(record).await?;
        self.write_snapshot(record).await?;
        self.shared
            .push_back(&self.list_key(), record.job_id.as_str())
            .await?;

        info!(job_id = %record.job_id, fingerprint = %record.fingerprint, "Enqueued job");
        Ok(())
    }

    /// Blocking dequeue with a bounded timeout.
    ///
    /// Returns the job already transitioned to `running`, or `None` when the
    /// timeout elapsed or the popped entry was unusable (orphan or already
    /// claimed); callers simply loop.
    pub async fn dequeue(&self, timeout: Duration) -> QueueResult<Option<JobRecord>> {
        let popped = self.shared.pop_front(&self.list_key(), timeout).await?;
        let Some(raw_id) = popped else {
            return Ok(None);
        };
        let job_id = JobId::from_string(raw_id);

        // Orphan tolerance: a list entry without a job row is dropped.
        let Some(record) = self.jobs.fetch(&job_id).await? else {
            warn!(job_id = %job_id, "Dropping orphan queue entry (no job row)");
            self.shared.del(&keys::job(&job_id)).await.ok();
            return Ok(None);
        };

        if !self.jobs.mark_running(&job_id).await? {
            // Already claimed or terminal; nothing to process.
            debug!(job_id = %job_id, status = %record.status, "Skipping already-claimed job");
            return Ok(None);
        }

        let running = record.start();
        self.write_snapshot(&running).await.ok();
        debug!(job_id = %running.job_id, "Dequeued job");
        Ok(Some(running))
    }

    /// Record a terminal outcome for a job the caller dequeued.
    pub async fn complete(
        &self,
        job_id: &JobId,
        outcome: Result<(), (ErrorKind, String)>,
    ) -> QueueResult<JobRecord> {
        let applied = match &outcome {
            Ok(()) => self.jobs.mark_finished(job_id).await?,
            Err((kind, message)) => self.jobs.mark_failed(job_id, *kind, message).await?,
        };
        if !applied {
            warn!(job_id = %job_id, "Terminal transition did not apply (lease reclaimed?)");
        }

        let record = self
            .jobs
            .fetch(job_id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        self.write_snapshot(&record).await.ok();
        Ok(record)
    }

    /// Fetch a job, preferring the shared-tier snapshot.
    pub async fn fetch(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        if let Some(raw) = self.shared.get(&keys::job(job_id)).await? {
            match serde_json::from_str::<JobRecord>(&raw) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Dropping corrupt job snapshot");
                    self.shared.del(&keys::job(job_id)).await.ok();
                }
            }
        }
        self.jobs.fetch(job_id).await
    }

    /// Push a reclaimed job id back onto the list.
    pub async fn requeue(&self, record: &JobRecord) -> QueueResult<()> {
        self.write_snapshot(record).await?;
        self.shared
            .push_back(&self.list_key(), record.job_id.as_str())
            .await?;
        Ok(())
    }

    /// Aggregate statistics.
    pub async fn stats(&self) -> QueueResult<QueueStats> {
        let depth = self.shared.list_len(&self.list_key()).await?;
        Ok(QueueStats { depth })
    }

    /// The durable row store, for callers that need row-level operations.
    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    async fn write_snapshot(&self, record: &JobRecord) -> QueueResult<()> {
        let json = serde_json::to_string(record)?;
        self.shared
            .set(&keys::job(&record.job_id), &json, self.config.snapshot_ttl)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeJobStore;
    use subtext_cache::testing::MemoryShared;
    use subtext_models::Fingerprint;

    fn queue_with_fakes() -> (JobQueue, Arc<MemoryShared>, Arc<FakeJobStore>) {
        let shared = Arc::new(MemoryShared::new());
        let jobs = Arc::new(FakeJobStore::new());
        let queue = JobQueue::new(
            Arc::clone(&shared) as Arc<dyn SharedCache>,
            Arc::clone(&jobs) as Arc<dyn JobStore>,
            QueueConfig::default(),
        );
        (queue, shared, jobs)
    }

    fn record(id: &str) -> JobRecord {
        let fp = Fingerprint::canonicalise(id, Some("en"), true).unwrap();
        JobRecord::new(fp, None)
    }

    #[tokio::test]
    async fn enqueue_dequeue_is_fifo() {
        let (queue, _, _) = queue_with_fakes();
        let a = record("dQw4w9WgXcQ");
        let b = record("oHg5SJYRHA0");
        queue.enqueue(&a).await.unwrap();
        queue.enqueue(&b).await.unwrap();

        let first = queue
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        let second = queue
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.job_id, a.job_id);
        assert_eq!(second.job_id, b.job_id);
        assert_eq!(first.status, JobStatus::Running);
        assert_eq!(first.attempts, 1);
    }

    #[tokio::test]
    async fn dequeue_times_out_on_empty_queue() {
        let (queue, _, _) = queue_with_fakes();
        let start = std::time::Instant::now();
        let popped = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        assert!(popped.is_none());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn orphan_list_entries_are_dropped() {
        let (queue, shared, _) = queue_with_fakes();
        // List entry with no job row anywhere.
        shared.push_back("queue:extract", "ghost-job").await.unwrap();
        let popped = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn complete_records_outcome_and_snapshot() {
        let (queue, shared, _) = queue_with_fakes();
        let rec = record("dQw4w9WgXcQ");
        queue.enqueue(&rec).await.unwrap();
        let running = queue
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        let done = queue.complete(&running.job_id, Ok(())).await.unwrap();
        assert_eq!(done.status, JobStatus::Finished);
        assert!(done.ended_at.is_some());

        // Snapshot reflects the terminal state.
        let snapshot: JobRecord = serde_json::from_str(
            &shared
                .get(&keys::job(&running.job_id))
                .await
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(snapshot.status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn complete_with_failure_persists_kind() {
        let (queue, _, jobs) = queue_with_fakes();
        let rec = record("dQw4w9WgXcQ");
        queue.enqueue(&rec).await.unwrap();
        let running = queue
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        let failed = queue
            .complete(
                &running.job_id,
                Err((ErrorKind::SubtitlesDisabled, "captions off".to_string())),
            )
            .await
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_kind, Some(ErrorKind::SubtitlesDisabled));

        let row = jobs.fetch(&running.job_id).await.unwrap().unwrap();
        assert_eq!(row.error_kind, Some(ErrorKind::SubtitlesDisabled));
    }

    #[tokio::test]
    async fn rejects_non_queued_records() {
        let (queue, _, _) = queue_with_fakes();
        let running = record("dQw4w9WgXcQ").start();
        assert!(matches!(
            queue.enqueue(&running).await,
            Err(QueueError::EnqueueFailed(_))
        ));
    }

    #[tokio::test]
    async fn fetch_prefers_snapshot_then_row() {
        let (queue, shared, _) = queue_with_fakes();
        let rec = record("dQw4w9WgXcQ");
        queue.enqueue(&rec).await.unwrap();

        // Snapshot present.
        assert!(queue.fetch(&rec.job_id).await.unwrap().is_some());

        // Snapshot gone: falls back to the durable row.
        shared.del(&keys::job(&rec.job_id)).await.unwrap();
        assert!(queue.fetch(&rec.job_id).await.unwrap().is_some());
    }
}
