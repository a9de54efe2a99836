//! Pre-synthesis text sanitization
//!
//! Subtitle tracks carry markup the speech backend would read aloud: HTML
//! tags (`<i>`, `<font>`), ASS-style override blocks, markdown emphasis.
//! Sanitization strips these and collapses whitespace so the backend gets
//! plain speakable text. Runs synchronously on the rendering hot path.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Sanitization errors
#[derive(Error, Debug)]
pub enum SanitizeError {
    #[error("no speakable text after sanitization")]
    Empty,
}

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][^>]*>").unwrap());

static ASS_OVERRIDE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[^}]*\}").unwrap());

// The regex crate has no backreferences, so each delimiter gets its own rule.
static MARKDOWN_STARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*{1,2}([^*]+)\*{1,2}").unwrap());
static MARKDOWN_UNDERSCORES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b_{1,2}([^_]+)_{1,2}\b").unwrap());
static MARKDOWN_BACKTICKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").unwrap());

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Strip markup from cue text and collapse whitespace.
///
/// Errors when nothing speakable remains; at the batch level this is
/// indistinguishable from a synthesis failure for the same cue.
pub fn sanitize(text: &str) -> Result<String, SanitizeError> {
    let stripped = HTML_TAG.replace_all(text, " ");
    let stripped = ASS_OVERRIDE.replace_all(&stripped, " ");
    let stripped = MARKDOWN_STARS.replace_all(&stripped, "$1");
    let stripped = MARKDOWN_UNDERSCORES.replace_all(&stripped, "$1");
    let stripped = MARKDOWN_BACKTICKS.replace_all(&stripped, "$1");
    let collapsed = WHITESPACE.replace_all(&stripped, " ");

    let cleaned = collapsed.trim().to_string();
    if cleaned.is_empty() {
        return Err(SanitizeError::Empty);
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_html_tags() {
        assert_eq!(sanitize("<i>Hello</i> world").unwrap(), "Hello world");
        assert_eq!(
            sanitize(r##"<font color="#fff">styled</font>"##).unwrap(),
            "styled"
        );
    }

    #[test]
    fn test_strips_ass_overrides() {
        assert_eq!(sanitize(r"{\an8}On top").unwrap(), "On top");
    }

    #[test]
    fn test_strips_markdown_emphasis() {
        assert_eq!(sanitize("this is **bold** text").unwrap(), "this is bold text");
        assert_eq!(sanitize("and _italic_ too").unwrap(), "and italic too");
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(sanitize("line one\nline  two").unwrap(), "line one line two");
    }

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(sanitize("Hello, world!").unwrap(), "Hello, world!");
    }

    #[test]
    fn test_empty_after_sanitize() {
        assert!(matches!(sanitize("<i></i>"), Err(SanitizeError::Empty)));
        assert!(matches!(sanitize("   "), Err(SanitizeError::Empty)));
    }
}
