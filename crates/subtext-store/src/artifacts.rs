//! Artifact repository.
//!
//! Single-row upserts keyed by the unique `(video_id, language, clean)`
//! index. Concurrent commits for the same fingerprint converge by
//! last-writer-wins; the single-flight lock upstream ensures only one
//! committer per fingerprint in practice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

use subtext_cache::{ArtifactStore, CacheResult};
use subtext_models::{Artifact, Engine, ErrorKind, Fingerprint, Language, Segment, VideoId};

use crate::error::{StoreError, StoreResult};

/// Repository over the `artifacts` table.
#[derive(Clone)]
pub struct ArtifactRepo {
    pool: PgPool,
}

impl ArtifactRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch the artifact for a fingerprint. Rows whose last extraction
    /// failed yield `None`; the failure is visible through the job record.
    pub async fn fetch_ready(&self, fp: &Fingerprint) -> StoreResult<Option<Artifact>> {
        let row = sqlx::query(
            r#"
            SELECT video_id, language, clean, title, engine_used, segments,
                   plain_text, proxy_used, extraction_duration_ms, integrity,
                   created_at, expires_at
            FROM artifacts
            WHERE video_id = $1 AND language = $2 AND clean = $3
              AND status = 'ready'
            "#,
        )
        .bind(fp.video_id.as_str())
        .bind(fp.language.as_str())
        .bind(fp.clean)
        .fetch_optional(&self.pool)
        .await?;

        row.map(decode_artifact).transpose()
    }

    /// Upsert the committed artifact.
    pub async fn upsert_ready(&self, artifact: &Artifact) -> StoreResult<()> {
        let segments = serde_json::to_value(&artifact.segments)?;
        sqlx::query(
            r#"
            INSERT INTO artifacts (
                video_id, language, clean, title, engine_used, segments,
                plain_text, proxy_used, extraction_duration_ms, status,
                error_kind, error_message, integrity, created_at, updated_at,
                expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'ready',
                    NULL, NULL, $10, $11, now(), $12)
            ON CONFLICT (video_id, language, clean) DO UPDATE SET
                title = EXCLUDED.title,
                engine_used = EXCLUDED.engine_used,
                segments = EXCLUDED.segments,
                plain_text = EXCLUDED.plain_text,
                proxy_used = EXCLUDED.proxy_used,
                extraction_duration_ms = EXCLUDED.extraction_duration_ms,
                status = 'ready',
                error_kind = NULL,
                error_message = NULL,
                integrity = EXCLUDED.integrity,
                created_at = EXCLUDED.created_at,
                updated_at = now(),
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(artifact.fingerprint.video_id.as_str())
        .bind(artifact.fingerprint.language.as_str())
        .bind(artifact.fingerprint.clean)
        .bind(&artifact.title)
        .bind(artifact.engine_used.as_str())
        .bind(segments)
        .bind(&artifact.plain_text)
        .bind(&artifact.proxy_used)
        .bind(artifact.extraction_duration_ms as i64)
        .bind(&artifact.integrity)
        .bind(artifact.created_at)
        .bind(artifact.expires_at)
        .execute(&self.pool)
        .await?;

        debug!(fingerprint = %artifact.fingerprint, "Upserted artifact");
        Ok(())
    }

    /// Record a terminal extraction failure for the fingerprint.
    pub async fn upsert_failed(
        &self,
        fp: &Fingerprint,
        kind: ErrorKind,
        message: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO artifacts (
                video_id, language, clean, status, error_kind, error_message,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, 'failed', $4, $5, now(), now())
            ON CONFLICT (video_id, language, clean) DO UPDATE SET
                status = 'failed',
                error_kind = EXCLUDED.error_kind,
                error_message = EXCLUDED.error_message,
                updated_at = now()
            "#,
        )
        .bind(fp.video_id.as_str())
        .bind(fp.language.as_str())
        .bind(fp.clean)
        .bind(kind.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete the row for one fingerprint.
    pub async fn delete_one(&self, fp: &Fingerprint) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM artifacts WHERE video_id = $1 AND language = $2 AND clean = $3",
        )
        .bind(fp.video_id.as_str())
        .bind(fp.language.as_str())
        .bind(fp.clean)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete every row for a video id (admin purge).
    pub async fn delete_video(&self, video_id: &VideoId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM artifacts WHERE video_id = $1")
            .bind(video_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete all rows (admin purge).
    pub async fn delete_all(&self) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM artifacts").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Delete artifacts whose retention window has passed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM artifacts WHERE expires_at IS NOT NULL AND expires_at < $1")
                .bind(now)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ArtifactStore for ArtifactRepo {
    async fn fetch(&self, fp: &Fingerprint) -> CacheResult<Option<Artifact>> {
        Ok(self.fetch_ready(fp).await?)
    }

    async fn upsert(&self, artifact: &Artifact) -> CacheResult<()> {
        Ok(self.upsert_ready(artifact).await?)
    }

    async fn mark_failed(
        &self,
        fp: &Fingerprint,
        kind: ErrorKind,
        message: &str,
    ) -> CacheResult<()> {
        Ok(self.upsert_failed(fp, kind, message).await?)
    }

    async fn delete(&self, fp: &Fingerprint) -> CacheResult<u64> {
        Ok(self.delete_one(fp).await?)
    }
}

fn decode_artifact(row: PgRow) -> StoreResult<Artifact> {
    let video_id: String = row.try_get("video_id")?;
    let language: String = row.try_get("language")?;
    let clean: bool = row.try_get("clean")?;

    let fingerprint = Fingerprint {
        video_id: VideoId::from_trusted(video_id),
        language: Language::parse(&language)
            .map_err(|_| StoreError::decode(format!("bad stored language: {language}")))?,
        clean,
    };

    let engine: String = row
        .try_get::<Option<String>, _>("engine_used")?
        .unwrap_or_else(|| "primary".to_string());
    let engine_used = match engine.as_str() {
        "fallback" => Engine::Fallback,
        _ => Engine::Primary,
    };

    let segments: Vec<Segment> = row
        .try_get::<Option<serde_json::Value>, _>("segments")?
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();

    Ok(Artifact {
        fingerprint,
        title: row.try_get("title")?,
        engine_used,
        segments,
        plain_text: row.try_get("plain_text")?,
        extraction_duration_ms: row.try_get::<i64, _>("extraction_duration_ms")? as u64,
        proxy_used: row.try_get("proxy_used")?,
        created_at: row.try_get("created_at")?,
        expires_at: row
            .try_get::<Option<DateTime<Utc>>, _>("expires_at")?
            .unwrap_or_else(Utc::now),
        integrity: row
            .try_get::<Option<String>, _>("integrity")?
            .unwrap_or_default(),
    })
}
