//! The extraction ladder.
//!
//! Runs the engine/proxy rungs in order under one wall-clock budget, with
//! bounded attempts and full-jitter backoff between failures. Terminal
//! classifications stop the ladder immediately; everything else falls
//! through to the next rung.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use subtext_models::{clean_segments, Engine, Fingerprint, Segment};

use crate::engine::{CaptionEngine, PlayerEngine, TimedtextEngine};
use crate::error::{ExtractError, ExtractResult};
use crate::proxy::{ProxyEndpoint, ProxyRotator};
use crate::retry::BackoffPolicy;

/// Extractor tuning.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Wall-clock budget for the whole ladder
    pub budget: Duration,
    /// Attempt schedule shared across all rungs
    pub backoff: BackoffPolicy,
    /// Proxy rungs per engine
    pub proxy_attempts: usize,
    /// Budget for the best-effort title fetch; zero disables it
    pub title_timeout: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
            proxy_attempts: 2,
            title_timeout: Duration::from_secs(5),
        }
    }
}

/// The outcome of a successful ladder run. The worker turns this into an
/// artifact by applying tier policy (timestamps, retention).
#[derive(Debug, Clone)]
pub struct Extraction {
    pub title: Option<String>,
    pub engine_used: Engine,
    pub segments: Vec<Segment>,
    pub plain_text: Option<String>,
    pub proxy_used: Option<String>,
    pub duration_ms: u64,
}

/// Dual-engine extractor with proxy rotation.
pub struct Extractor {
    engines: Vec<Arc<dyn CaptionEngine>>,
    rotator: Arc<ProxyRotator>,
    config: ExtractorConfig,
    client: reqwest::Client,
}

impl Extractor {
    /// Production extractor: timedtext primary, player-response fallback.
    pub fn new(rotator: Arc<ProxyRotator>, config: ExtractorConfig) -> ExtractResult<Self> {
        let engines: Vec<Arc<dyn CaptionEngine>> = vec![
            Arc::new(TimedtextEngine::new()),
            Arc::new(PlayerEngine::new()),
        ];
        Self::with_engines(engines, rotator, config)
    }

    /// Build with explicit engines (tests and alternative deployments).
    pub fn with_engines(
        engines: Vec<Arc<dyn CaptionEngine>>,
        rotator: Arc<ProxyRotator>,
        config: ExtractorConfig,
    ) -> ExtractResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.budget)
            .build()
            .map_err(|e| ExtractError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            engines,
            rotator,
            config,
            client,
        })
    }

    /// Run the ladder for a fingerprint.
    pub async fn extract(&self, fp: &Fingerprint) -> ExtractResult<Extraction> {
        let started = Instant::now();
        let deadline = started + self.config.budget;
        let mut attempts: u32 = 0;
        let mut last_error: Option<ExtractError> = None;

        'ladder: for engine in &self.engines {
            // Rung 0 is direct; the rest go through rotated proxies.
            for rung in 0..=self.config.proxy_attempts {
                if !self.config.backoff.allows_another(attempts) {
                    debug!(attempts = attempts, "Attempt budget exhausted");
                    break 'ladder;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    last_error =
                        Some(ExtractError::transient("extraction budget exhausted"));
                    break 'ladder;
                }

                let proxy = if rung == 0 {
                    None
                } else {
                    match self.rotator.select() {
                        Some(proxy) => Some(proxy),
                        // No pool configured: skip to the next engine.
                        None => break,
                    }
                };

                attempts += 1;
                match self
                    .attempt(engine.as_ref(), fp, proxy.as_ref(), remaining)
                    .await
                {
                    Ok(output) => {
                        if let Some(proxy) = &proxy {
                            self.rotator.mark_success(proxy);
                        }
                        return Ok(self
                            .finish(fp, engine.kind(), output, proxy, started)
                            .await);
                    }
                    Err(e) => {
                        if let Some(proxy) = &proxy {
                            self.rotator.mark_failure(proxy);
                        }
                        if !e.is_retryable() {
                            info!(
                                fingerprint = %fp,
                                engine = %engine.kind(),
                                kind = %e.kind,
                                "Extraction failed terminally"
                            );
                            return Err(e);
                        }
                        warn!(
                            fingerprint = %fp,
                            engine = %engine.kind(),
                            proxied = proxy.is_some(),
                            attempt = attempts,
                            error = %e,
                            "Extraction attempt failed"
                        );
                        last_error = Some(e);

                        let pause = self.config.backoff.jittered_delay(attempts - 1);
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if !remaining.is_zero() {
                            tokio::time::sleep(pause.min(remaining)).await;
                        }
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ExtractError::internal("extraction ladder made no attempts")))
    }

    /// One rung: build the (possibly proxied) client and race the engine
    /// against the remaining budget.
    async fn attempt(
        &self,
        engine: &dyn CaptionEngine,
        fp: &Fingerprint,
        proxy: Option<&ProxyEndpoint>,
        remaining: Duration,
    ) -> ExtractResult<crate::engine::EngineOutput> {
        let client = match proxy {
            Some(proxy) => reqwest::Client::builder()
                .timeout(remaining)
                .proxy(proxy.to_reqwest()?)
                .build()
                .map_err(|e| {
                    ExtractError::internal(format!("failed to build proxied client: {e}"))
                })?,
            None => self.client.clone(),
        };

        match tokio::time::timeout(
            remaining,
            engine.fetch(&client, &fp.video_id, &fp.language),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExtractError::transient(
                "attempt cancelled at extraction deadline",
            )),
        }
    }

    /// Apply cleaning and compose the extraction result.
    async fn finish(
        &self,
        fp: &Fingerprint,
        engine_used: Engine,
        output: crate::engine::EngineOutput,
        proxy: Option<ProxyEndpoint>,
        started: Instant,
    ) -> Extraction {
        let (segments, plain_text) = if fp.clean {
            let cleaned = clean_segments(&output.segments);
            (cleaned.segments, Some(cleaned.plain_text))
        } else {
            (output.segments, None)
        };

        let title = match output.title {
            Some(title) => Some(title),
            None => self.fetch_title(&fp.video_id).await,
        };

        let extraction = Extraction {
            title,
            engine_used,
            segments,
            plain_text,
            proxy_used: proxy.map(|p| p.endpoint),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            fingerprint = %fp,
            engine = %engine_used,
            segments = extraction.segments.len(),
            duration_ms = extraction.duration_ms,
            proxied = extraction.proxy_used.is_some(),
            "Extraction succeeded"
        );
        extraction
    }

    /// Best-effort title lookup via the oEmbed endpoint.
    async fn fetch_title(&self, video_id: &subtext_models::VideoId) -> Option<String> {
        if self.config.title_timeout.is_zero() {
            return None;
        }
        let url = format!(
            "https://www.youtube.com/oembed?url=https://www.youtube.com/watch?v={video_id}&format=json"
        );
        let response = tokio::time::timeout(
            self.config.title_timeout,
            self.client.get(&url).send(),
        )
        .await
        .ok()?
        .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: serde_json::Value = response.json().await.ok()?;
        body.get("title")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    }

    /// Rotator health, surfaced through the admin stats.
    pub fn pool_health(&self) -> crate::proxy::PoolHealth {
        self.rotator.health()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineOutput;
    use crate::proxy::RotatorConfig;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use subtext_models::{ErrorKind, Language, VideoId};

    /// Engine that replays a scripted sequence of outcomes.
    struct ScriptedEngine {
        kind: Engine,
        script: Mutex<VecDeque<ExtractResult<EngineOutput>>>,
        calls: AtomicU32,
    }

    impl ScriptedEngine {
        fn new(kind: Engine, script: Vec<ExtractResult<EngineOutput>>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CaptionEngine for ScriptedEngine {
        fn kind(&self) -> Engine {
            self.kind
        }

        async fn fetch(
            &self,
            _client: &reqwest::Client,
            _video_id: &VideoId,
            _language: &Language,
        ) -> ExtractResult<EngineOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ExtractError::transient("script exhausted")))
        }
    }

    /// Engine that never returns within any reasonable budget.
    struct StallingEngine;

    #[async_trait]
    impl CaptionEngine for StallingEngine {
        fn kind(&self) -> Engine {
            Engine::Primary
        }

        async fn fetch(
            &self,
            _client: &reqwest::Client,
            _video_id: &VideoId,
            _language: &Language,
        ) -> ExtractResult<EngineOutput> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("stalling engine must be cancelled")
        }
    }

    fn fingerprint() -> Fingerprint {
        Fingerprint::canonicalise("dQw4w9WgXcQ", Some("en"), true).unwrap()
    }

    fn fast_config() -> ExtractorConfig {
        ExtractorConfig {
            budget: Duration::from_secs(5),
            backoff: BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 4),
            proxy_attempts: 1,
            title_timeout: Duration::ZERO,
        }
    }

    fn output(texts: &[&str]) -> EngineOutput {
        EngineOutput {
            title: None,
            segments: texts
                .iter()
                .enumerate()
                .map(|(i, t)| Segment::new(*t, i as f64, 1.0))
                .collect(),
        }
    }

    fn one_proxy_rotator() -> Arc<ProxyRotator> {
        Arc::new(ProxyRotator::new(
            vec![ProxyEndpoint::parse("proxy.example.com:8080", None).unwrap()],
            RotatorConfig::default(),
        ))
    }

    #[tokio::test]
    async fn direct_primary_success_is_cleaned() {
        let primary = ScriptedEngine::new(
            Engine::Primary,
            vec![Ok(output(&["[Music]", "hello there", "hello there"]))],
        );
        let fallback = ScriptedEngine::new(Engine::Fallback, vec![]);
        let extractor = Extractor::with_engines(
            vec![primary.clone(), fallback.clone()],
            Arc::new(ProxyRotator::empty()),
            fast_config(),
        )
        .unwrap();

        let extraction = extractor.extract(&fingerprint()).await.unwrap();
        assert_eq!(extraction.engine_used, Engine::Primary);
        assert!(extraction.proxy_used.is_none());
        // Cleaning dropped the cue tag and the plain text deduplicated the run.
        assert_eq!(extraction.segments.len(), 2);
        assert_eq!(extraction.plain_text.as_deref(), Some("hello there"));
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn terminal_failure_short_circuits_the_ladder() {
        let primary = ScriptedEngine::new(
            Engine::Primary,
            vec![Err(ExtractError::video_unavailable("gone"))],
        );
        let fallback = ScriptedEngine::new(Engine::Fallback, vec![Ok(output(&["x"]))]);
        let extractor = Extractor::with_engines(
            vec![primary.clone(), fallback.clone()],
            one_proxy_rotator(),
            fast_config(),
        )
        .unwrap();

        let err = extractor.extract(&fingerprint()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::VideoUnavailable);
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 0, "fallback must not run after terminal kinds");
    }

    #[tokio::test]
    async fn blocked_primary_falls_through_to_proxied_fallback() {
        // Primary blocked direct and via proxy; fallback blocked direct,
        // succeeds via proxy. Four attempts, engine_used = fallback.
        let primary = ScriptedEngine::new(
            Engine::Primary,
            vec![
                Err(ExtractError::blocked("429 direct")),
                Err(ExtractError::blocked("429 proxied")),
            ],
        );
        let fallback = ScriptedEngine::new(
            Engine::Fallback,
            vec![
                Err(ExtractError::blocked("403 direct")),
                Ok(output(&["made it"])),
            ],
        );
        let extractor = Extractor::with_engines(
            vec![primary.clone(), fallback.clone()],
            one_proxy_rotator(),
            fast_config(),
        )
        .unwrap();

        let extraction = extractor.extract(&fingerprint()).await.unwrap();
        assert_eq!(extraction.engine_used, Engine::Fallback);
        assert_eq!(
            extraction.proxy_used.as_deref(),
            Some("http://proxy.example.com:8080")
        );
        assert_eq!(primary.calls(), 2);
        assert_eq!(fallback.calls(), 2);
    }

    #[tokio::test]
    async fn attempts_are_bounded_across_all_rungs() {
        let failures = || {
            (0..8)
                .map(|i| Err(ExtractError::blocked(format!("blocked {i}"))))
                .collect::<Vec<_>>()
        };
        let primary = ScriptedEngine::new(Engine::Primary, failures());
        let fallback = ScriptedEngine::new(Engine::Fallback, failures());
        let extractor = Extractor::with_engines(
            vec![primary.clone(), fallback.clone()],
            one_proxy_rotator(),
            fast_config(),
        )
        .unwrap();

        let err = extractor.extract(&fingerprint()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamBlocked);
        assert_eq!(primary.calls() + fallback.calls(), 4, "max 4 attempts total");
    }

    #[tokio::test]
    async fn without_proxies_the_ladder_is_direct_only() {
        let primary = ScriptedEngine::new(
            Engine::Primary,
            vec![Err(ExtractError::transient("down"))],
        );
        let fallback = ScriptedEngine::new(
            Engine::Fallback,
            vec![Err(ExtractError::transient("down too"))],
        );
        let extractor = Extractor::with_engines(
            vec![primary.clone(), fallback.clone()],
            Arc::new(ProxyRotator::empty()),
            fast_config(),
        )
        .unwrap();

        let err = extractor.extract(&fingerprint()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamTransient);
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn stalled_attempts_are_cancelled_at_the_deadline() {
        let extractor = Extractor::with_engines(
            vec![Arc::new(StallingEngine)],
            Arc::new(ProxyRotator::empty()),
            ExtractorConfig {
                budget: Duration::from_millis(30),
                ..fast_config()
            },
        )
        .unwrap();

        let started = Instant::now();
        let err = extractor.extract(&fingerprint()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamTransient);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn raw_fingerprint_skips_cleaning() {
        let fp = Fingerprint::canonicalise("dQw4w9WgXcQ", Some("en"), false).unwrap();
        let primary = ScriptedEngine::new(Engine::Primary, vec![Ok(output(&["[Music] raw"]))]);
        let extractor = Extractor::with_engines(
            vec![primary],
            Arc::new(ProxyRotator::empty()),
            fast_config(),
        )
        .unwrap();

        let extraction = extractor.extract(&fp).await.unwrap();
        assert_eq!(extraction.segments[0].text, "[Music] raw");
        assert!(extraction.plain_text.is_none());
    }
}
