//! Worker configuration.

use std::time::Duration;

use subtext_service::ServiceConfig;

/// Margin on top of the extraction budget before the worker abandons a job
/// locally. The lease reaper covers anything that slips past it.
const JOB_DEADLINE_MARGIN: Duration = Duration::from_secs(15);

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs per worker process
    pub concurrency: usize,
    /// Blocking-dequeue timeout per poll
    pub dequeue_timeout: Duration,
    /// Per-job deadline: extraction budget plus commit grace
    pub job_deadline: Duration,
    /// Graceful shutdown: how long to wait for in-flight jobs
    pub graceful_timeout: Duration,
    /// Durable retention for committed artifacts
    pub retention: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            dequeue_timeout: Duration::from_secs(1),
            job_deadline: Duration::from_secs(45),
            graceful_timeout: Duration::from_secs(30),
            retention: Duration::from_secs(30 * 86_400),
        }
    }
}

impl WorkerConfig {
    /// Derive the worker's knobs from the shared service configuration, so
    /// one configuration surface drives both the admission side and the
    /// worker side.
    pub fn from_service(config: &ServiceConfig) -> Self {
        Self {
            concurrency: config.worker_concurrency,
            dequeue_timeout: Duration::from_secs(1),
            job_deadline: config.extraction_timeout + JOB_DEADLINE_MARGIN,
            graceful_timeout: config.graceful_timeout,
            retention: config.c4_retention,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_service_maps_the_shared_knobs() {
        let service = ServiceConfig {
            worker_concurrency: 8,
            extraction_timeout: Duration::from_secs(20),
            graceful_timeout: Duration::from_secs(5),
            c4_retention: Duration::from_secs(7 * 86_400),
            ..ServiceConfig::default()
        };
        let config = WorkerConfig::from_service(&service);

        assert_eq!(config.concurrency, 8);
        assert_eq!(config.graceful_timeout, Duration::from_secs(5));
        assert_eq!(config.retention, Duration::from_secs(7 * 86_400));
        assert!(config.job_deadline > service.extraction_timeout);
    }
}
