//! YouTube video reference parsing and validation.
//!
//! Accepts either a bare 11-character video id or a URL on a recognised
//! YouTube host. URLs are treated as untrusted input: only whitelisted hosts
//! are accepted and ids are strictly validated (11 chars, alphanumeric plus
//! `-` and `_`).

/// Errors that can occur while resolving a video reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoRefError {
    /// The URL host is not a recognised YouTube domain
    UnsupportedHost,
    /// The video id is present but malformed
    InvalidVideoId,
    /// No video id could be located in the input
    VideoIdNotFound,
}

impl std::fmt::Display for VideoRefError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoRefError::UnsupportedHost => write!(f, "URL is not a recognised YouTube URL"),
            VideoRefError::InvalidVideoId => {
                write!(f, "video id must be 11 characters of [A-Za-z0-9_-]")
            }
            VideoRefError::VideoIdNotFound => write!(f, "no video id found in input"),
        }
    }
}

impl std::error::Error for VideoRefError {}

/// Hosts we accept video URLs from. Anything else is rejected outright,
/// including look-alike domains embedding "youtube" in a query string.
const RECOGNISED_HOSTS: &[&str] = &["youtube.com", "youtu.be", "youtube-nocookie.com"];

/// Resolve a video reference (bare id or URL) to a validated 11-char id.
pub fn extract_video_id(input: &str) -> Result<String, VideoRefError> {
    let input = input.trim();

    // Bare id short-circuit: exactly 11 valid characters, no URL structure.
    if input.len() == 11 && is_valid_id_chars(input) {
        return Ok(input.to_string());
    }

    let host = host_of(input).ok_or(VideoRefError::VideoIdNotFound)?;
    if !is_recognised_host(&host) {
        return Err(VideoRefError::UnsupportedHost);
    }

    // Strategies in order of how common the shape is in the wild.
    if let Some(id) = from_watch_query(input) {
        return validate_id(id);
    }
    if host == "youtu.be" {
        if let Some(id) = after_segment(input, "youtu.be/") {
            return validate_id(id);
        }
    }
    for marker in ["/shorts/", "/embed/", "/v/", "/live/"] {
        if let Some(id) = after_segment(input, marker) {
            return validate_id(id);
        }
    }

    Err(VideoRefError::VideoIdNotFound)
}

/// Extract the lowercased host portion of a URL-ish string.
fn host_of(input: &str) -> Option<String> {
    let rest = input
        .strip_prefix("https://")
        .or_else(|| input.strip_prefix("http://"))
        .unwrap_or(input);

    let host = rest.split(['/', '?', '#']).next()?;
    if host.is_empty() {
        return None;
    }
    // Strip any userinfo and port.
    let host = host.rsplit('@').next().unwrap_or(host);
    let host = host.split(':').next().unwrap_or(host);
    Some(host.to_ascii_lowercase())
}

/// Check the host against the whitelist, allowing common subdomains.
fn is_recognised_host(host: &str) -> bool {
    RECOGNISED_HOSTS
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{h}")))
}

/// Extract the id from a `v=` query parameter.
fn from_watch_query(url: &str) -> Option<String> {
    let pos = url.find("?v=").or_else(|| url.find("&v="))?;
    take_id_segment(&url[pos + 3..])
}

/// Extract the id following a path marker such as `/embed/`.
fn after_segment(url: &str, marker: &str) -> Option<String> {
    let pos = url.find(marker)?;
    let start = pos + marker.len();
    if start >= url.len() {
        return None;
    }
    take_id_segment(&url[start..])
}

/// Take characters up to the next delimiter.
fn take_id_segment(segment: &str) -> Option<String> {
    let end = segment
        .find(['&', '#', '?', '/'])
        .unwrap_or(segment.len());
    let id = segment[..end].trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Validate a caller-supplied webhook URL: http(s) scheme and a host.
pub fn validate_webhook_url(url: &str) -> Result<(), String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| "webhook URL must use http or https".to_string())?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() {
        return Err("webhook URL must have a host".to_string());
    }
    Ok(())
}

fn is_valid_id_chars(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn validate_id(id: String) -> Result<String, VideoRefError> {
    if id.len() != 11 || !is_valid_id_chars(&id) {
        return Err(VideoRefError::InvalidVideoId);
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_id() {
        assert_eq!(extract_video_id("dQw4w9WgXcQ").unwrap(), "dQw4w9WgXcQ");
        assert_eq!(extract_video_id("  dQw4w9WgXcQ  ").unwrap(), "dQw4w9WgXcQ");
    }

    #[test]
    fn accepts_watch_urls() {
        for url in [
            "https://youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
            "http://youtube.com/watch?v=dQw4w9WgXcQ&list=PLx",
            "youtube.com/watch?v=dQw4w9WgXcQ",
        ] {
            assert_eq!(extract_video_id(url).unwrap(), "dQw4w9WgXcQ", "{url}");
        }
    }

    #[test]
    fn accepts_short_embed_and_shorts_urls() {
        for url in [
            "https://youtu.be/dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?t=30",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/v/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube-nocookie.com/embed/dQw4w9WgXcQ",
        ] {
            assert_eq!(extract_video_id(url).unwrap(), "dQw4w9WgXcQ", "{url}");
        }
    }

    #[test]
    fn rejects_foreign_hosts() {
        assert_eq!(
            extract_video_id("https://vimeo.com/123456789"),
            Err(VideoRefError::UnsupportedHost)
        );
        assert_eq!(
            extract_video_id("https://evil-youtube.com/watch?v=dQw4w9WgXcQ"),
            Err(VideoRefError::UnsupportedHost)
        );
        // Redirect with an embedded YouTube URL in the query must not pass.
        assert_eq!(
            extract_video_id("https://example.com/r?u=https://youtube.com/watch?v=dQw4w9WgXcQ"),
            Err(VideoRefError::UnsupportedHost)
        );
    }

    #[test]
    fn rejects_malformed_ids() {
        assert_eq!(
            extract_video_id("https://youtube.com/watch?v=abc123"),
            Err(VideoRefError::InvalidVideoId)
        );
        assert_eq!(
            extract_video_id("https://youtu.be/abc123def456789"),
            Err(VideoRefError::InvalidVideoId)
        );
        assert_eq!(
            extract_video_id("https://youtube.com/watch?v=abc!!123def"),
            Err(VideoRefError::InvalidVideoId)
        );
    }

    #[test]
    fn rejects_urls_without_id() {
        assert_eq!(
            extract_video_id("https://youtube.com"),
            Err(VideoRefError::VideoIdNotFound)
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/playlist?list=PLx"),
            Err(VideoRefError::VideoIdNotFound)
        );
        assert_eq!(
            extract_video_id("https://youtu.be/"),
            Err(VideoRefError::VideoIdNotFound)
        );
    }

    #[test]
    fn webhook_url_validation() {
        assert!(validate_webhook_url("https://example.com/hook").is_ok());
        assert!(validate_webhook_url("http://10.0.0.5:8080/x").is_ok());
        assert!(validate_webhook_url("ftp://example.com").is_err());
        assert!(validate_webhook_url("https://").is_err());
        assert!(validate_webhook_url("example.com/hook").is_err());
    }

    #[test]
    fn case_insensitive_host() {
        assert_eq!(
            extract_video_id("https://YOUTUBE.COM/watch?v=dQw4w9WgXcQ").unwrap(),
            "dQw4w9WgXcQ"
        );
    }
}
