//! Durable persistence (Tier 3) for subtext.
//!
//! Postgres-backed repositories for artifacts and jobs, plus the retention
//! sweeper. The store is authoritative: cache tiers are only ever written
//! after a store write has succeeded.

pub mod artifacts;
pub mod error;
pub mod jobs;
pub mod schema;
pub mod sweeper;

pub use artifacts::ArtifactRepo;
pub use error::{StoreError, StoreResult};
pub use jobs::JobRepo;
pub use schema::bootstrap_schema;
pub use sweeper::{RetentionSweeper, SweeperConfig};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Connect a pool from a database URL.
pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;
    Ok(pool)
}
