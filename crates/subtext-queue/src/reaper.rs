//! Lease reaper: crash recovery for running jobs.
//!
//! A worker that dies mid-extraction leaves its job `running` with an
//! expired lease. The reaper resets such jobs to `queued` and pushes them
//! back onto the list so another worker picks them up. The guarded UPDATE
//! makes concurrent reapers safe.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::queue::JobQueue;

/// Reaper tuning.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// How often to scan for expired leases
    pub interval: Duration,
    /// Lease duration: extraction budget plus grace
    pub lease: Duration,
    /// Maximum jobs reclaimed per scan
    pub batch: i64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            lease: Duration::from_secs(90),
            batch: 50,
        }
    }
}

/// Background reclaim of expired-lease jobs.
pub struct LeaseReaper {
    queue: JobQueue,
    config: ReaperConfig,
}

impl LeaseReaper {
    pub fn new(queue: JobQueue, config: ReaperConfig) -> Self {
        Self { queue, config }
    }

    /// Run until the shutdown signal flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Lease reaper stopping");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.reclaim_once().await {
                        warn!(error = %e, "Lease reclaim scan failed");
                    }
                }
            }
        }
    }

    /// One reclaim pass. Public so tests can drive it directly.
    pub async fn reclaim_once(&self) -> crate::error::QueueResult<usize> {
        let expired = self
            .queue
            .jobs()
            .expired_leases(self.config.lease, self.config.batch)
            .await?;

        let mut reclaimed = 0;
        for record in expired {
            if !self.queue.jobs().requeue(&record.job_id).await? {
                // The worker finished in the window between the scan and the
                // reset; leave its terminal state alone.
                continue;
            }
            let requeued = record.requeue();
            self.queue.requeue(&requeued).await?;
            info!(
                job_id = %requeued.job_id,
                attempts = requeued.attempts,
                "Reclaimed expired-lease job"
            );
            reclaimed += 1;
        }
        Ok(reclaimed)
    }
}
