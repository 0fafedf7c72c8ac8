//! Caption text cleaning for AI consumption.
//!
//! Pure functions over segments: no I/O, no state. Cleaning strips cue
//! markup and speaker labels, collapses whitespace, and composes a plain
//! text body from the surviving segments. Auto-generated captions often
//! repeat short word runs across cue boundaries; the composer removes
//! adjacent duplicate runs as a final pass.

use std::sync::LazyLock;

use regex_lite::Regex;

use crate::artifact::Segment;

static MARKUP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("static regex"));
static BRACKETED_CUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]|\([^)]*\)").expect("static regex"));
static SPEAKER_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(SPEAKER_\d+:|>>>?\s*)").expect("static regex"));

/// Output of cleaning a segment sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanOutput {
    /// Segments with cleaned text; emptied segments are dropped
    pub segments: Vec<Segment>,
    /// Cleaned segment texts joined with single spaces
    pub plain_text: String,
}

/// Clean a single cue text.
///
/// Removes markup tags, bracketed cue annotations (`[Music]`, `(laughs)`),
/// speaker prefixes, and collapses runs of whitespace (including soft line
/// breaks) into single spaces.
pub fn clean_text(text: &str) -> String {
    let text = MARKUP_TAG.replace_all(text, "");
    let text = SPEAKER_PREFIX.replace(&text, "");
    let text = BRACKETED_CUE.replace_all(&text, "");
    collapse_whitespace(&text)
}

/// Clean all segments and compose the plain-text body.
pub fn clean_segments(segments: &[Segment]) -> CleanOutput {
    let mut cleaned = Vec::with_capacity(segments.len());
    let mut parts: Vec<String> = Vec::with_capacity(segments.len());

    for segment in segments {
        let text = clean_text(&segment.text);
        if text.is_empty() {
            continue;
        }
        parts.push(text.clone());
        cleaned.push(Segment {
            text,
            start_seconds: segment.start_seconds,
            duration_seconds: segment.duration_seconds,
        });
    }

    let plain_text = remove_adjacent_duplicate_runs(&parts.join(" "));

    CleanOutput {
        segments: cleaned,
        plain_text,
    }
}

/// Compose plain text from raw (uncleaned) segments, whitespace-normalised.
pub fn plain_text_of(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| collapse_whitespace(&s.text))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove immediately repeated word runs (windows of 4, 3, then 2 words,
/// compared case-insensitively). Single repeated words are left alone:
/// "very very" is usually intentional, "never gonna never gonna" is not.
fn remove_adjacent_duplicate_runs(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < 4 {
        return words.join(" ");
    }

    let mut result: Vec<&str> = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        let mut matched = false;
        for run in [4usize, 3, 2] {
            if i + run * 2 <= words.len() {
                let a = &words[i..i + run];
                let b = &words[i + run..i + run * 2];
                if runs_equal_ignore_case(a, b) {
                    result.extend_from_slice(a);
                    i += run * 2;
                    matched = true;
                    break;
                }
            }
        }
        if !matched {
            result.push(words[i]);
            i += 1;
        }
    }
    result.join(" ")
}

fn runs_equal_ignore_case(a: &[&str], b: &[&str]) -> bool {
    a.iter()
        .zip(b.iter())
        .all(|(x, y)| x.eq_ignore_ascii_case(y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markup_and_cues() {
        assert_eq!(clean_text("<c>hello</c> world"), "hello world");
        assert_eq!(clean_text("[Music] hello"), "hello");
        assert_eq!(clean_text("(laughs) very funny"), "very funny");
        assert_eq!(clean_text("[Applause]"), "");
    }

    #[test]
    fn strips_speaker_prefixes() {
        assert_eq!(clean_text("SPEAKER_0: hello there"), "hello there");
        assert_eq!(clean_text(">> welcome back"), "welcome back");
        assert_eq!(clean_text(">>> and now"), "and now");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(clean_text("soft\nbroken   line\t end"), "soft broken line end");
    }

    #[test]
    fn drops_emptied_segments() {
        let segments = vec![
            Segment::new("[Music]", 0.0, 1.0),
            Segment::new("hello", 1.0, 1.0),
            Segment::new("   ", 2.0, 1.0),
        ];
        let out = clean_segments(&segments);
        assert_eq!(out.segments.len(), 1);
        assert_eq!(out.segments[0].text, "hello");
        assert_eq!(out.plain_text, "hello");
    }

    #[test]
    fn plain_text_is_normalised_concatenation() {
        let segments = vec![
            Segment::new("never  gonna", 0.0, 1.0),
            Segment::new("give you up", 1.0, 1.0),
        ];
        let out = clean_segments(&segments);
        assert_eq!(out.plain_text, "never gonna give you up");
    }

    #[test]
    fn removes_adjacent_duplicate_runs() {
        assert_eq!(
            remove_adjacent_duplicate_runs("never gonna never gonna give you up"),
            "never gonna give you up"
        );
        assert_eq!(
            remove_adjacent_duplicate_runs("so what do we do so what do we do next"),
            "so what do we do next"
        );
        // Case-insensitive comparison keeps the first spelling.
        assert_eq!(
            remove_adjacent_duplicate_runs("Never Gonna never gonna stop"),
            "Never Gonna stop"
        );
    }

    #[test]
    fn keeps_intentional_single_repeats() {
        assert_eq!(
            remove_adjacent_duplicate_runs("it was very very good indeed"),
            "it was very very good indeed"
        );
        assert_eq!(remove_adjacent_duplicate_runs("one two three"), "one two three");
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let out = clean_segments(&[]);
        assert!(out.segments.is_empty());
        assert!(out.plain_text.is_empty());
    }
}
