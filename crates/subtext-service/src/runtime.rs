//! Runtime wiring.
//!
//! One value owning every pipeline component, constructed at process start
//! and passed to whatever hosts the ingress surface. No component reaches
//! for globals; everything flows through here.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use subtext_cache::{
    CacheCoordinator, CoordinatorConfig, MemoryTier, MemoryTierConfig, RedisTier, SharedCache,
};
use subtext_extractor::{
    BackoffPolicy, Extractor, ExtractorConfig, PoolHealth, ProxyRotator, RotatorConfig,
};
use subtext_queue::{JobQueue, JobStore, QueueConfig};
use subtext_store::{ArtifactRepo, JobRepo};

use crate::admission::{Admission, AdmissionConfig};
use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::rate_limit::{RateLimitConfig, RateLimiter};

/// Build the proxy rotator from the service configuration: the configured
/// pool file first, then the `PROXY_URLS` list, otherwise an empty pool.
/// Shared by the runtime and the worker binary so both read the same knobs.
pub fn build_rotator(config: &ServiceConfig) -> ServiceResult<ProxyRotator> {
    let rotator_config = RotatorConfig {
        max_failures: config.proxy_max_failures,
        cooldown: config.proxy_cooldown,
    };
    let shared_auth = std::env::var("PROXY_AUTH").ok();

    if let Some(path) = &config.proxy_pool_path {
        return ProxyRotator::from_file(
            &PathBuf::from(path),
            shared_auth.as_deref(),
            rotator_config,
        )
        .map_err(|e| ServiceError::internal(format!("failed to load proxy pool {path}: {e}")));
    }
    if let Ok(list) = std::env::var("PROXY_URLS") {
        return Ok(ProxyRotator::from_list(
            &list,
            shared_auth.as_deref(),
            rotator_config,
        ));
    }
    Ok(ProxyRotator::empty())
}

/// The assembled pipeline.
pub struct Runtime {
    config: ServiceConfig,
    pool: sqlx::PgPool,
    shared: Arc<dyn SharedCache>,
    coordinator: Arc<CacheCoordinator>,
    queue: JobQueue,
    extractor: Arc<Extractor>,
    rotator: Arc<ProxyRotator>,
    artifacts: ArtifactRepo,
    admission: Arc<Admission>,
}

impl Runtime {
    /// Connect every backing service and assemble the pipeline.
    pub async fn connect(config: ServiceConfig) -> ServiceResult<Self> {
        let shared: Arc<dyn SharedCache> = Arc::new(
            RedisTier::new(&config.redis_url)
                .map_err(|e| ServiceError::unavailable(e.to_string()))?,
        );

        let database_url = config
            .database_url
            .as_deref()
            .ok_or_else(|| ServiceError::internal("DATABASE_URL is not configured"))?;
        let pool = subtext_store::connect(database_url, 10)
            .await
            .map_err(|e| ServiceError::unavailable(e.to_string()))?;
        subtext_store::bootstrap_schema(&pool)
            .await
            .map_err(|e| ServiceError::unavailable(e.to_string()))?;

        let artifacts = ArtifactRepo::new(pool.clone());
        let jobs: Arc<dyn JobStore> = Arc::new(JobRepo::new(pool.clone()));

        let coordinator = Arc::new(CacheCoordinator::new(
            MemoryTier::new(MemoryTierConfig {
                capacity: config.c2_capacity,
                ttl: config.c2_ttl,
            }),
            Arc::clone(&shared),
            Arc::new(artifacts.clone()),
            CoordinatorConfig {
                shared_ttl: config.c3_ttl,
                lock_ttl: config.lock_ttl(),
                ..Default::default()
            },
        ));

        let queue = JobQueue::new(Arc::clone(&shared), jobs, QueueConfig::from_env());

        let rotator = Arc::new(build_rotator(&config)?);
        let extractor = Arc::new(
            Extractor::new(
                Arc::clone(&rotator),
                ExtractorConfig {
                    budget: config.extraction_timeout,
                    backoff: BackoffPolicy::new(
                        config.backoff_base,
                        config.backoff_cap,
                        config.extraction_max_attempts,
                    ),
                    ..Default::default()
                },
            )
            .map_err(|e| ServiceError::internal(e.to_string()))?,
        );

        let limiter = RateLimiter::new(
            Arc::clone(&shared),
            RateLimitConfig {
                per_minute: config.rate_limit_per_minute,
                burst: config.rate_limit_burst,
                fail_open: config.rate_limit_fail_open,
            },
        );

        let admission = Arc::new(Admission::new(
            Arc::clone(&coordinator),
            queue.clone(),
            limiter,
            Arc::clone(&shared),
            Arc::new(artifacts.clone()),
            AdmissionConfig::default(),
        ));

        info!("Runtime assembled");
        Ok(Self {
            config,
            pool,
            shared,
            coordinator,
            queue,
            extractor,
            rotator,
            artifacts,
            admission,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn admission(&self) -> &Arc<Admission> {
        &self.admission
    }

    pub fn coordinator(&self) -> &Arc<CacheCoordinator> {
        &self.coordinator
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn extractor(&self) -> &Arc<Extractor> {
        &self.extractor
    }

    pub fn shared(&self) -> &Arc<dyn SharedCache> {
        &self.shared
    }

    pub fn artifacts(&self) -> &ArtifactRepo {
        &self.artifacts
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    /// Proxy pool health, for ops surfaces.
    pub fn proxy_health(&self) -> PoolHealth {
        self.rotator.health()
    }

    /// Close backing connections. The shared-tier client closes with its
    /// last clone; the database pool is closed explicitly.
    pub async fn shutdown(self) {
        info!("Runtime shutting down");
        self.pool.close().await;
    }
}
