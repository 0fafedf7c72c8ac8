//! Retention sweeper.
//!
//! Periodically deletes artifacts that outlived the retention window. Runs
//! in any worker process; the DELETE is idempotent so multiple concurrent
//! sweepers are harmless.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::artifacts::ArtifactRepo;

/// Sweeper tuning.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often to sweep
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
        }
    }
}

/// Background retention sweep over the artifact table.
pub struct RetentionSweeper {
    repo: ArtifactRepo,
    config: SweeperConfig,
}

impl RetentionSweeper {
    pub fn new(repo: ArtifactRepo, config: SweeperConfig) -> Self {
        Self { repo, config }
    }

    /// Run until the shutdown signal flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        // The immediate first tick would sweep at startup; skip it so boot
        // is not delayed behind a potentially large DELETE.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Retention sweeper stopping");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    match self.repo.sweep_expired(Utc::now()).await {
                        Ok(0) => {}
                        Ok(deleted) => info!(deleted = deleted, "Swept expired artifacts"),
                        Err(e) => warn!(error = %e, "Retention sweep failed"),
                    }
                }
            }
        }
    }
}
