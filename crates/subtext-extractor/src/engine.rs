//! The two caption engines.
//!
//! Both engines speak to the upstream source over a caller-supplied HTTP
//! client, so proxy routing is decided per attempt by the ladder, not here.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use subtext_models::{Engine, Language, Segment, VideoId};

use crate::error::{ExtractError, ExtractResult};
use crate::json3;

/// What an engine produces on success.
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    /// Video title, when the engine happens to learn it
    pub title: Option<String>,
    /// Raw caption segments (uncleaned)
    pub segments: Vec<Segment>,
}

/// A caption extraction strategy.
#[async_trait]
pub trait CaptionEngine: Send + Sync {
    /// Which ladder slot this engine occupies.
    fn kind(&self) -> Engine;

    /// Fetch the caption track for a video/language pair.
    async fn fetch(
        &self,
        client: &reqwest::Client,
        video_id: &VideoId,
        language: &Language,
    ) -> ExtractResult<EngineOutput>;
}

// ============================================================================
// Primary engine: the timedtext track API
// ============================================================================

/// Fetches caption tracks straight from the timedtext endpoint. Fast and
/// cheap, but refuses auto-generated-only videos behind some front-ends and
/// returns empty bodies instead of errors for missing tracks.
pub struct TimedtextEngine {
    base_url: String,
}

impl TimedtextEngine {
    pub fn new() -> Self {
        Self {
            base_url: "https://www.youtube.com".to_string(),
        }
    }

    /// Override the upstream base URL (tests).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    async fn fetch_track(
        &self,
        client: &reqwest::Client,
        video_id: &VideoId,
        language: &Language,
        auto_generated: bool,
    ) -> ExtractResult<Vec<Segment>> {
        let mut url = format!(
            "{}/api/timedtext?v={}&lang={}&fmt=json3",
            self.base_url, video_id, language
        );
        if auto_generated {
            url.push_str("&kind=asr");
        }

        let response = client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ExtractError::from_status(response.status()));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            // The endpoint answers 200 with an empty body for absent tracks.
            return Ok(Vec::new());
        }
        Ok(json3::parse_body(&body)?)
    }
}

impl Default for TimedtextEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptionEngine for TimedtextEngine {
    fn kind(&self) -> Engine {
        Engine::Primary
    }

    async fn fetch(
        &self,
        client: &reqwest::Client,
        video_id: &VideoId,
        language: &Language,
    ) -> ExtractResult<EngineOutput> {
        // Manually created track first, then the auto-generated one.
        let segments = self
            .fetch_track(client, video_id, language, false)
            .await?;
        if !segments.is_empty() {
            return Ok(EngineOutput {
                title: None,
                segments,
            });
        }

        debug!(video_id = %video_id, language = %language, "No manual track, trying asr");
        let segments = self.fetch_track(client, video_id, language, true).await?;
        if segments.is_empty() {
            return Err(ExtractError::language_unavailable(format!(
                "no caption track for language {language}"
            )));
        }
        Ok(EngineOutput {
            title: None,
            segments,
        })
    }
}

// ============================================================================
// Fallback engine: player-response discovery
// ============================================================================

/// Discovers caption tracks from the player endpoint. Slower and heavier
/// than the track API, but sees videos the primary engine is refused on and
/// can tell "captions disabled" apart from "language missing".
pub struct PlayerEngine {
    base_url: String,
}

/// Client identity presented to the player endpoint. The Android client
/// shape receives plain JSON without web-specific throttling tokens.
const PLAYER_CLIENT_NAME: &str = "ANDROID";
const PLAYER_CLIENT_VERSION: &str = "19.09.37";

impl PlayerEngine {
    pub fn new() -> Self {
        Self {
            base_url: "https://www.youtube.com".to_string(),
        }
    }

    /// Override the upstream base URL (tests).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    async fn player_response(
        &self,
        client: &reqwest::Client,
        video_id: &VideoId,
    ) -> ExtractResult<Value> {
        let url = format!("{}/youtubei/v1/player", self.base_url);
        let body = serde_json::json!({
            "context": {
                "client": {
                    "clientName": PLAYER_CLIENT_NAME,
                    "clientVersion": PLAYER_CLIENT_VERSION,
                    "androidSdkVersion": 30,
                }
            },
            "videoId": video_id.as_str(),
        });

        let response = client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(ExtractError::from_status(response.status()));
        }
        Ok(response.json().await?)
    }

    fn check_playability(response: &Value) -> ExtractResult<()> {
        let status = response
            .pointer("/playabilityStatus/status")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN");
        if status == "OK" {
            return Ok(());
        }

        let reason = response
            .pointer("/playabilityStatus/reason")
            .and_then(Value::as_str)
            .unwrap_or("no reason given");
        Err(ExtractError::video_unavailable(format!(
            "playability {status}: {reason}"
        )))
    }

    /// Choose the track for the requested language: a manually created
    /// track wins over the auto-generated one.
    fn select_track<'a>(tracks: &'a [Value], language: &Language) -> Option<&'a Value> {
        let matches_language = |track: &&Value| {
            track
                .get("languageCode")
                .and_then(Value::as_str)
                .map(|code| code.eq_ignore_ascii_case(language.as_str()))
                .unwrap_or(false)
        };
        let is_asr = |track: &&Value| {
            track
                .get("kind")
                .and_then(Value::as_str)
                .map(|kind| kind == "asr")
                .unwrap_or(false)
        };

        tracks
            .iter()
            .filter(matches_language)
            .find(|t| !is_asr(t))
            .or_else(|| tracks.iter().filter(matches_language).find(is_asr))
    }
}

impl Default for PlayerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptionEngine for PlayerEngine {
    fn kind(&self) -> Engine {
        Engine::Fallback
    }

    async fn fetch(
        &self,
        client: &reqwest::Client,
        video_id: &VideoId,
        language: &Language,
    ) -> ExtractResult<EngineOutput> {
        let response = self.player_response(client, video_id).await?;
        Self::check_playability(&response)?;

        let title = response
            .pointer("/videoDetails/title")
            .and_then(Value::as_str)
            .map(str::to_string);

        let tracks = response
            .pointer("/captions/playerCaptionsTracklistRenderer/captionTracks")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if tracks.is_empty() {
            return Err(ExtractError::subtitles_disabled(
                "player response lists no caption tracks",
            ));
        }

        let track = Self::select_track(&tracks, language).ok_or_else(|| {
            ExtractError::language_unavailable(format!("no caption track for language {language}"))
        })?;
        let base_url = track
            .get("baseUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| ExtractError::transient("caption track without baseUrl"))?;

        let separator = if base_url.contains('?') { '&' } else { '?' };
        let track_url = format!("{base_url}{separator}fmt=json3");
        let response = client.get(&track_url).send().await?;
        if !response.status().is_success() {
            return Err(ExtractError::from_status(response.status()));
        }
        let segments = json3::parse_body(&response.text().await?)?;
        if segments.is_empty() {
            return Err(ExtractError::language_unavailable(format!(
                "caption track for {language} is empty"
            )));
        }

        Ok(EngineOutput { title, segments })
    }
}
