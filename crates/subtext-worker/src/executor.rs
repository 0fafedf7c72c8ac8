//! The job executor.
//!
//! Dequeue -> extract -> commit -> webhook hand-off, with concurrency
//! bounded by a semaphore and a deadline on every job. The terminal state
//! must reach the durable store before the job is considered done; when the
//! store is unreachable the job is deliberately left `running` so the lease
//! reaper returns it to the queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use subtext_cache::CacheCoordinator;
use subtext_extractor::{Extraction, Extractor};
use subtext_models::{Artifact, ErrorKind, Fingerprint, JobRecord};
use subtext_queue::JobQueue;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::webhook::WebhookHandle;

/// Consumes extraction jobs until shutdown.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: JobQueue,
    coordinator: Arc<CacheCoordinator>,
    extractor: Arc<Extractor>,
    webhooks: WebhookHandle,
    semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(
        config: WorkerConfig,
        queue: JobQueue,
        coordinator: Arc<CacheCoordinator>,
        extractor: Arc<Extractor>,
        webhooks: WebhookHandle,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            queue,
            coordinator,
            extractor,
            webhooks,
            semaphore,
            shutdown,
        }
    }

    /// A receiver other background loops (reaper, sweeper) can watch.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// The coordinator this executor commits through.
    pub fn coordinator(&self) -> &Arc<CacheCoordinator> {
        &self.coordinator
    }

    /// Signal shutdown: stop dequeuing and let in-flight jobs drain.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Main loop: runs until shutdown, then drains in-flight jobs bounded
    /// by the graceful timeout.
    pub async fn run(self: Arc<Self>) -> WorkerResult<()> {
        info!(concurrency = self.config.concurrency, "Job executor starting");
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // Capacity first, then the blocking pop, so a job is never held
            // while every slot is busy.
            let permit = tokio::select! {
                permit = Arc::clone(&self.semaphore).acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    }
                }
                _ = shutdown_rx.changed() => continue,
            };

            let job = tokio::select! {
                result = self.queue.dequeue(self.config.dequeue_timeout) => {
                    match result {
                        Ok(Some(job)) => job,
                        Ok(None) => continue, // timeout, orphan, or already claimed
                        Err(e) => {
                            warn!(error = %e, "Dequeue failed; backing off");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            continue;
                        }
                    }
                }
                _ = shutdown_rx.changed() => continue,
            };

            let executor = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                executor.process(job).await;
            });
        }

        info!("Waiting for in-flight jobs to complete");
        let drained = tokio::time::timeout(self.config.graceful_timeout, self.drain()).await;
        if drained.is_err() {
            warn!(
                "Graceful timeout elapsed with jobs in flight; the lease reaper will reclaim them"
            );
        }
        info!("Job executor stopped");
        Ok(())
    }

    async fn drain(&self) {
        loop {
            if self.semaphore.available_permits() == self.config.concurrency {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Process one accepted job to a terminal state.
    ///
    /// Exactly one of `commit_ready`/`commit_failure` + `complete` runs per
    /// accepted job, except when the backing stores are down, in which case
    /// the job stays `running` for the reaper.
    pub async fn process(&self, job: JobRecord) {
        let job_id = job.job_id.clone();
        let fp = job.fingerprint.clone();
        debug!(job_id = %job_id, fingerprint = %fp, "Processing job");

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(
            self.config.job_deadline,
            self.extractor.extract(&fp),
        )
        .await
        .unwrap_or_else(|_| {
            Err(subtext_extractor::ExtractError::transient(
                "job deadline elapsed",
            ))
        });

        match outcome {
            Ok(extraction) => self.commit_success(&job, extraction).await,
            Err(e) => self.commit_failure(&job, e.kind, &e.message).await,
        }

        let labels = [("worker", "extract".to_string())];
        metrics::histogram!("subtext_job_duration_seconds", &labels)
            .record(started.elapsed().as_secs_f64());
    }

    async fn commit_success(&self, job: &JobRecord, extraction: Extraction) {
        let artifact = self.build_artifact(&job.fingerprint, extraction);

        if let Err(e) = self.coordinator.commit_ready(&artifact, &job.job_id).await {
            // The durable store did not accept the artifact: leave the job
            // running so the reaper retries it.
            error!(
                job_id = %job.job_id,
                error = %e,
                "Commit failed; leaving job for the lease reaper"
            );
            return;
        }

        match self.queue.complete(&job.job_id, Ok(())).await {
            Ok(terminal) => {
                let labels = [("engine", artifact.engine_used.as_str().to_string())];
                metrics::counter!("subtext_extractions_total", &labels).increment(1);
                info!(
                    job_id = %job.job_id,
                    fingerprint = %job.fingerprint,
                    engine = %artifact.engine_used,
                    segments = artifact.segments.len(),
                    "Job finished"
                );
                let result = serde_json::to_value(&artifact).ok();
                self.webhooks.dispatch(terminal, result).await;
            }
            Err(e) => {
                error!(job_id = %job.job_id, error = %e, "Failed to record job completion");
            }
        }
    }

    async fn commit_failure(&self, job: &JobRecord, kind: ErrorKind, message: &str) {
        if kind == ErrorKind::DependencyDown {
            // Not a verdict on the video: leave the job running for the
            // reaper instead of burning a terminal state.
            warn!(job_id = %job.job_id, "Dependencies down; leaving job for the lease reaper");
            return;
        }

        if let Err(e) = self
            .coordinator
            .commit_failure(&job.fingerprint, kind, message, &job.job_id)
            .await
        {
            error!(
                job_id = %job.job_id,
                error = %e,
                "Failure commit did not reach the store; leaving job for the lease reaper"
            );
            return;
        }

        match self
            .queue
            .complete(&job.job_id, Err((kind, message.to_string())))
            .await
        {
            Ok(terminal) => {
                let labels = [("kind", kind.as_str().to_string())];
                metrics::counter!("subtext_extraction_failures_total", &labels).increment(1);
                info!(
                    job_id = %job.job_id,
                    fingerprint = %job.fingerprint,
                    kind = %kind,
                    "Job failed terminally"
                );
                self.webhooks.dispatch(terminal, None).await;
            }
            Err(e) => {
                error!(job_id = %job.job_id, error = %e, "Failed to record job failure");
            }
        }
    }

    /// Apply tier policy to an extraction: timestamps, retention, integrity.
    fn build_artifact(&self, fp: &Fingerprint, extraction: Extraction) -> Artifact {
        let now = Utc::now();
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::days(30));
        let integrity = Artifact::integrity_of(&extraction.segments);
        Artifact {
            fingerprint: fp.clone(),
            title: extraction.title,
            engine_used: extraction.engine_used,
            segments: extraction.segments,
            plain_text: extraction.plain_text,
            extraction_duration_ms: extraction.duration_ms,
            proxy_used: extraction.proxy_used,
            created_at: now,
            expires_at: now + retention,
            integrity,
        }
    }
}
