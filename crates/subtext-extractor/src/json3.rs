//! Parsing of the `json3` caption format.
//!
//! The format is a list of events; caption events carry `segs` with utf8
//! fragments plus start/duration in milliseconds. Events without `segs`
//! (window definitions, styling) are skipped.

use serde::Deserialize;

use subtext_models::Segment;

#[derive(Debug, Deserialize)]
pub struct Json3Payload {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
struct Json3Event {
    #[serde(default, rename = "tStartMs")]
    t_start_ms: f64,
    #[serde(default, rename = "dDurationMs")]
    d_duration_ms: f64,
    segs: Option<Vec<Json3Seg>>,
}

#[derive(Debug, Deserialize)]
struct Json3Seg {
    #[serde(default)]
    utf8: String,
}

/// Convert a json3 payload into caption segments.
pub fn parse_segments(payload: &Json3Payload) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(payload.events.len());
    for event in &payload.events {
        let Some(segs) = &event.segs else {
            continue;
        };
        let text: String = segs.iter().map(|s| s.utf8.as_str()).collect();
        let text = text.replace('\n', " ").trim().to_string();
        if text.is_empty() {
            continue;
        }
        segments.push(Segment {
            text,
            start_seconds: event.t_start_ms / 1000.0,
            duration_seconds: event.d_duration_ms / 1000.0,
        });
    }
    segments
}

/// Parse a raw json3 body into segments.
pub fn parse_body(body: &str) -> Result<Vec<Segment>, serde_json::Error> {
    let payload: Json3Payload = serde_json::from_str(body)?;
    Ok(parse_segments(&payload))
}
