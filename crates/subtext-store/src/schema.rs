//! Schema bootstrap.
//!
//! Idempotent table creation for dev and test deployments. Production
//! deployments are expected to manage the same schema with their own
//! migration tooling.

use sqlx::PgPool;
use tracing::info;

use crate::error::StoreResult;

/// Create tables and indexes if they do not exist.
pub async fn bootstrap_schema(pool: &PgPool) -> StoreResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artifacts (
            video_id                TEXT NOT NULL,
            language                TEXT NOT NULL,
            clean                   BOOLEAN NOT NULL,
            title                   TEXT,
            engine_used             TEXT,
            segments                JSONB,
            plain_text              TEXT,
            proxy_used              TEXT,
            extraction_duration_ms  BIGINT NOT NULL DEFAULT 0,
            status                  TEXT NOT NULL DEFAULT 'ready',
            error_kind              TEXT,
            error_message           TEXT,
            integrity               TEXT,
            created_at              TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at              TIMESTAMPTZ NOT NULL DEFAULT now(),
            expires_at              TIMESTAMPTZ,
            PRIMARY KEY (video_id, language, clean)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS ix_artifacts_expires_at ON artifacts (expires_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS ix_artifacts_status ON artifacts (status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id                   TEXT PRIMARY KEY,
            video_id                 TEXT NOT NULL,
            language                 TEXT NOT NULL,
            clean                    BOOLEAN NOT NULL,
            status                   TEXT NOT NULL DEFAULT 'queued',
            error_kind               TEXT,
            error_message            TEXT,
            enqueued_at              TIMESTAMPTZ NOT NULL DEFAULT now(),
            started_at               TIMESTAMPTZ,
            ended_at                 TIMESTAMPTZ,
            webhook_url              TEXT,
            webhook_delivery_status  TEXT NOT NULL DEFAULT 'none',
            webhook_delivery_error   TEXT,
            webhook_attempts         INTEGER NOT NULL DEFAULT 0,
            attempts                 INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS ix_jobs_fingerprint ON jobs (video_id, language, clean)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS ix_jobs_status ON jobs (status)")
        .execute(pool)
        .await?;

    info!("Database schema ready");
    Ok(())
}
