//! Fingerprints: the cache identity of an extraction request.
//!
//! A fingerprint is the tuple `(video_id, language, clean)`. It is the sole
//! cache key of the pipeline; every tier derives its keys from the stable
//! string encoding produced by [`Fingerprint::encode`]. Two fingerprints that
//! compare equal always encode byte-for-byte identically.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::url::extract_video_id;

/// A validated 11-character YouTube video id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    /// Parse and validate a bare id or URL.
    pub fn parse(video_ref: &str) -> Result<Self, ErrorKind> {
        extract_video_id(video_ref)
            .map(Self)
            .map_err(|_| ErrorKind::InvalidInput)
    }

    /// Wrap a string that is already known to be a valid id (e.g. read back
    /// from the durable store, which only ever persists validated ids).
    pub fn from_trusted(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A normalised BCP-47-ish language code.
///
/// Normalisation lowercases the tag except for a 4-letter script subtag,
/// which is titlecased (`zh-hans` becomes `zh-Hans`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Language(String);

impl Language {
    pub const DEFAULT: &'static str = "en";

    /// Normalise and validate a language tag.
    pub fn parse(raw: &str) -> Result<Self, ErrorKind> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        if trimmed.len() > 16
            || !trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ErrorKind::InvalidInput);
        }

        let normalised = trimmed
            .split('-')
            .map(|part| {
                if part.len() == 4 && part.chars().all(|c| c.is_ascii_alphabetic()) {
                    // Script subtag: titlecase (Hans, Latn, ...)
                    let mut out = String::with_capacity(4);
                    let mut chars = part.chars();
                    if let Some(first) = chars.next() {
                        out.push(first.to_ascii_uppercase());
                    }
                    out.extend(chars.map(|c| c.to_ascii_lowercase()));
                    out
                } else {
                    part.to_ascii_lowercase()
                }
            })
            .collect::<Vec<_>>()
            .join("-");

        Ok(Self(normalised))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Language {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity of a single extraction result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Fingerprint {
    /// Validated video id
    pub video_id: VideoId,
    /// Normalised language tag
    pub language: Language,
    /// Whether segment text is cleaned for AI consumption
    pub clean: bool,
}

impl Fingerprint {
    /// Canonicalise arbitrary caller input into a fingerprint.
    ///
    /// `video_ref` may be a bare 11-char id or a URL on a recognised YouTube
    /// host. `language` defaults to `"en"` when absent; `clean` defaults to
    /// true at the call sites that admit requests.
    pub fn canonicalise(
        video_ref: &str,
        language: Option<&str>,
        clean: bool,
    ) -> Result<Self, ErrorKind> {
        let video_id = VideoId::parse(video_ref)?;
        let language = match language {
            Some(raw) => Language::parse(raw)?,
            None => Language::default(),
        };
        Ok(Self {
            video_id,
            language,
            clean,
        })
    }

    /// Stable string encoding, used to derive all tier keys.
    pub fn encode(&self) -> String {
        format!(
            "{}:{}:{}",
            self.video_id,
            self.language,
            if self.clean { 1 } else { 0 }
        )
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalise_from_url_and_id_agree() {
        let a = Fingerprint::canonicalise("dQw4w9WgXcQ", Some("en"), true).unwrap();
        let b =
            Fingerprint::canonicalise("https://youtu.be/dQw4w9WgXcQ", Some("EN "), true).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.encode(), b.encode());
    }

    #[test]
    fn encoding_is_stable() {
        let f = Fingerprint::canonicalise("dQw4w9WgXcQ", Some("en"), true).unwrap();
        assert_eq!(f.encode(), "dQw4w9WgXcQ:en:1");

        let raw = Fingerprint::canonicalise("dQw4w9WgXcQ", None, false).unwrap();
        assert_eq!(raw.encode(), "dQw4w9WgXcQ:en:0");
    }

    #[test]
    fn language_normalisation() {
        assert_eq!(Language::parse("EN").unwrap().as_str(), "en");
        assert_eq!(Language::parse(" pt-BR ").unwrap().as_str(), "pt-br");
        assert_eq!(Language::parse("zh-hans").unwrap().as_str(), "zh-Hans");
        assert_eq!(Language::parse("ZH-HANS").unwrap().as_str(), "zh-Hans");
        assert_eq!(Language::parse("").unwrap().as_str(), "en");
    }

    #[test]
    fn language_rejects_garbage() {
        assert!(Language::parse("not a language").is_err());
        assert!(Language::parse("waaaaaaaaaaaaaaaytoolong").is_err());
        assert!(Language::parse("en_US").is_err());
    }

    #[test]
    fn invalid_refs_are_invalid_input() {
        assert_eq!(
            Fingerprint::canonicalise("not-an-id", None, true).unwrap_err(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            Fingerprint::canonicalise("https://vimeo.com/1", None, true).unwrap_err(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn clean_flag_is_part_of_identity() {
        let clean = Fingerprint::canonicalise("dQw4w9WgXcQ", None, true).unwrap();
        let raw = Fingerprint::canonicalise("dQw4w9WgXcQ", None, false).unwrap();
        assert_ne!(clean, raw);
        assert_ne!(clean.encode(), raw.encode());
    }
}
