//! Extraction worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use subtext_cache::{
    CacheCoordinator, CoordinatorConfig, MemoryTier, MemoryTierConfig, RedisTier, SharedCache,
};
use subtext_extractor::{BackoffPolicy, Extractor, ExtractorConfig};
use subtext_queue::{JobQueue, JobStore, LeaseReaper, QueueConfig, ReaperConfig};
use subtext_service::{build_rotator, ServiceConfig};
use subtext_store::{ArtifactRepo, JobRepo, RetentionSweeper, SweeperConfig};
use subtext_worker::{JobExecutor, WebhookClient, WebhookConfig, WebhookDispatcher, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // JSON logs in production, colored output for dev.
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,subtext=debug"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    info!("Starting subtext-worker");

    // One configuration surface drives admission and workers alike.
    let service_config = ServiceConfig::from_env();
    let config = WorkerConfig::from_service(&service_config);
    info!(
        concurrency = config.concurrency,
        extraction_timeout_secs = service_config.extraction_timeout.as_secs(),
        graceful_timeout_secs = config.graceful_timeout.as_secs(),
        "Worker config loaded"
    );

    let shared: Arc<dyn SharedCache> = match RedisTier::new(&service_config.redis_url) {
        Ok(tier) => Arc::new(tier),
        Err(e) => {
            error!(error = %e, "Failed to connect to the shared cache");
            std::process::exit(1);
        }
    };

    let Some(database_url) = service_config.database_url.clone() else {
        error!("DATABASE_URL is not configured");
        std::process::exit(1);
    };
    let pool = match subtext_store::connect(&database_url, 10).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "Failed to connect to the durable store");
            std::process::exit(1);
        }
    };
    if let Err(e) = subtext_store::bootstrap_schema(&pool).await {
        error!(error = %e, "Failed to bootstrap the database schema");
        std::process::exit(1);
    }
    let artifacts = ArtifactRepo::new(pool.clone());
    let jobs: Arc<dyn JobStore> = Arc::new(JobRepo::new(pool.clone()));

    let queue = JobQueue::new(
        Arc::clone(&shared),
        Arc::clone(&jobs),
        QueueConfig::from_env(),
    );

    let coordinator = Arc::new(CacheCoordinator::new(
        MemoryTier::new(MemoryTierConfig {
            capacity: service_config.c2_capacity,
            ttl: service_config.c2_ttl,
        }),
        Arc::clone(&shared),
        Arc::new(artifacts.clone()),
        CoordinatorConfig {
            shared_ttl: service_config.c3_ttl,
            lock_ttl: service_config.lock_ttl(),
            ..Default::default()
        },
    ));

    let rotator = match build_rotator(&service_config) {
        Ok(rotator) => Arc::new(rotator),
        Err(e) => {
            error!(error = %e, "Failed to load proxy pool");
            std::process::exit(1);
        }
    };
    let extractor = match Extractor::new(
        rotator,
        ExtractorConfig {
            budget: service_config.extraction_timeout,
            backoff: BackoffPolicy::new(
                service_config.backoff_base,
                service_config.backoff_cap,
                service_config.extraction_max_attempts,
            ),
            ..Default::default()
        },
    ) {
        Ok(extractor) => Arc::new(extractor),
        Err(e) => {
            error!(error = %e, "Failed to build extractor");
            std::process::exit(1);
        }
    };

    let webhook_client = match WebhookClient::new(WebhookConfig::from_service(&service_config)) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to build webhook client");
            std::process::exit(1);
        }
    };
    let dispatcher = WebhookDispatcher::spawn(webhook_client, Arc::clone(&jobs), 256, 4);

    let executor = Arc::new(JobExecutor::new(
        config,
        queue.clone(),
        coordinator,
        extractor,
        dispatcher.handle(),
    ));

    // Background loops share the executor's shutdown signal.
    let reaper = LeaseReaper::new(
        queue.clone(),
        ReaperConfig {
            lease: service_config.job_lease(),
            ..Default::default()
        },
    );
    let reaper_shutdown = executor.shutdown_receiver();
    let reaper_task = tokio::spawn(async move { reaper.run(reaper_shutdown).await });

    let sweeper = RetentionSweeper::new(artifacts, SweeperConfig::default());
    let sweeper_shutdown = executor.shutdown_receiver();
    let sweeper_task = tokio::spawn(async move { sweeper.run(sweeper_shutdown).await });

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!(error = %e, "Executor error");
        std::process::exit(1);
    }

    reaper_task.await.ok();
    sweeper_task.await.ok();
    dispatcher.shutdown().await;
    info!("Worker shutdown complete");
}
