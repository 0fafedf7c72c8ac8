//! Service configuration.
//!
//! One flat struct covering every knob the core recognises, loaded from
//! environment variables with defaults matching the documented contract.

use std::time::Duration;

/// Full pipeline configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Shared tier URL
    pub redis_url: String,
    /// Durable store URL
    pub database_url: Option<String>,

    /// Extraction wall-clock budget
    pub extraction_timeout: Duration,
    /// Total ladder attempts
    pub extraction_max_attempts: u32,
    /// Backoff base delay
    pub backoff_base: Duration,
    /// Backoff delay cap
    pub backoff_cap: Duration,

    /// Local tier capacity (entries)
    pub c2_capacity: u64,
    /// Local tier TTL
    pub c2_ttl: Duration,
    /// Shared tier TTL for artifacts
    pub c3_ttl: Duration,
    /// Durable retention window
    pub c4_retention: Duration,

    /// Rate limit: sustained allowance per minute
    pub rate_limit_per_minute: u32,
    /// Rate limit: burst headroom
    pub rate_limit_burst: u32,
    /// Allow requests when the shared tier is down
    pub rate_limit_fail_open: bool,

    /// Concurrent jobs per worker
    pub worker_concurrency: usize,
    /// Shutdown drain bound
    pub graceful_timeout: Duration,

    /// Webhook per-attempt timeout
    pub webhook_timeout: Duration,
    /// Webhook delivery attempts
    pub webhook_max_retries: u32,
    /// Webhook HMAC secret
    pub webhook_secret: Option<String>,

    /// Proxy pool file (one URL per line)
    pub proxy_pool_path: Option<String>,
    /// Failures before a proxy cools down
    pub proxy_max_failures: u32,
    /// Proxy cooldown length
    pub proxy_cooldown: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            database_url: None,
            extraction_timeout: Duration::from_secs(30),
            extraction_max_attempts: 4,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(8),
            c2_capacity: 1024,
            c2_ttl: Duration::from_secs(300),
            c3_ttl: Duration::from_secs(86_400),
            c4_retention: Duration::from_secs(30 * 86_400),
            rate_limit_per_minute: 30,
            rate_limit_burst: 5,
            rate_limit_fail_open: false,
            worker_concurrency: 2,
            graceful_timeout: Duration::from_secs(30),
            webhook_timeout: Duration::from_secs(10),
            webhook_max_retries: 3,
            webhook_secret: None,
            proxy_pool_path: None,
            proxy_max_failures: 3,
            proxy_cooldown: Duration::from_secs(60),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(env_u64(name, default))
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

impl ServiceConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            database_url: std::env::var("DATABASE_URL").ok(),
            extraction_timeout: env_secs("EXTRACTION_TIMEOUT_SECS", 30),
            extraction_max_attempts: env_u64("EXTRACTION_MAX_ATTEMPTS", 4) as u32,
            backoff_base: env_secs("BACKOFF_BASE_SECS", 1),
            backoff_cap: env_secs("BACKOFF_CAP_SECS", 8),
            c2_capacity: env_u64("C2_CAPACITY", 1024),
            c2_ttl: env_secs("C2_TTL_SECS", 300),
            c3_ttl: env_secs("C3_TTL_SECS", 86_400),
            c4_retention: Duration::from_secs(env_u64("RETENTION_DAYS", 30) * 86_400),
            rate_limit_per_minute: env_u64("RATE_LIMIT_PER_MINUTE", 30) as u32,
            rate_limit_burst: env_u64("RATE_LIMIT_BURST", 5) as u32,
            rate_limit_fail_open: env_bool("RATE_LIMIT_FAIL_OPEN", false),
            worker_concurrency: env_u64("WORKER_CONCURRENCY", 2) as usize,
            graceful_timeout: env_secs("GRACEFUL_TIMEOUT_SECS", 30),
            webhook_timeout: env_secs("WEBHOOK_TIMEOUT_SECS", 10),
            webhook_max_retries: env_u64("WEBHOOK_MAX_RETRIES", 3) as u32,
            webhook_secret: std::env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
            proxy_pool_path: std::env::var("PROXY_POOL_PATH").ok(),
            proxy_max_failures: env_u64("PROXY_MAX_FAILURES", 3) as u32,
            proxy_cooldown: env_secs("PROXY_COOLDOWN_SECS", 60),
        }
    }

    /// Single-flight lock TTL: the extraction budget plus commit margin.
    pub fn lock_ttl(&self) -> Duration {
        self.extraction_timeout + Duration::from_secs(10)
    }

    /// Job lease: budget plus reaper grace.
    pub fn job_lease(&self) -> Duration {
        self.extraction_timeout + Duration::from_secs(60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = ServiceConfig::default();
        assert_eq!(config.extraction_timeout, Duration::from_secs(30));
        assert_eq!(config.extraction_max_attempts, 4);
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert_eq!(config.backoff_cap, Duration::from_secs(8));
        assert_eq!(config.rate_limit_per_minute, 30);
        assert_eq!(config.rate_limit_burst, 5);
        assert!(!config.rate_limit_fail_open);
        assert_eq!(config.webhook_timeout, Duration::from_secs(10));
        assert_eq!(config.webhook_max_retries, 3);
        assert_eq!(config.c4_retention, Duration::from_secs(30 * 86_400));
        assert_eq!(config.proxy_max_failures, 3);
        assert_eq!(config.proxy_cooldown, Duration::from_secs(60));
    }

    #[test]
    fn derived_ttls_exceed_the_budget() {
        let config = ServiceConfig::default();
        assert!(config.lock_ttl() > config.extraction_timeout);
        assert!(config.job_lease() > config.lock_ttl());
    }
}
