//! Extraction of the learner's understanding summary.
//!
//! A summary is the text between `<IS>` and `</IS>`. Matching is
//! case-insensitive, spans newlines and takes the first, shortest match.

use once_cell::sync::Lazy;
use regex::Regex;

/// Opening delimiter, as shown to the model and the learner.
pub const OPEN_TAG: &str = "<IS>";

/// Closing delimiter.
pub const CLOSE_TAG: &str = "</IS>";

#[allow(clippy::expect_used)]
static SUMMARY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<IS>(.*?)</IS>").expect("summary pattern is valid"));

/// Returns the trimmed text of the first `<IS>…</IS>` span, if any.
///
/// An empty span still counts as a match and yields an empty string.
#[must_use]
pub fn extract(text: &str) -> Option<String> {
    SUMMARY_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Returns `true` if the text carries a complete summary span.
#[must_use]
pub fn contains_summary(text: &str) -> bool {
    SUMMARY_PATTERN.is_match(text)
}

/// Wraps a summary in the delimiters.
#[must_use]
pub fn wrap(summary: &str) -> String {
    format!("{OPEN_TAG}{summary}{CLOSE_TAG}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_trims_first_span() {
        let text = "I think <IS>  Option holds Some or None \n</IS> and <IS>second</IS>";
        assert_eq!(extract(text).as_deref(), Some("Option holds Some or None"));
    }

    #[test]
    fn test_extract_is_case_insensitive_and_multiline() {
        let text = "<is>line one\nline two</Is>";
        assert_eq!(extract(text).as_deref(), Some("line one\nline two"));
    }

    #[test]
    fn test_extract_without_delimiters() {
        assert_eq!(extract("what is Option?"), None);
        assert_eq!(extract("<IS>unterminated"), None);
        assert!(!contains_summary("</IS> backwards <IS>"));
    }

    #[test]
    fn test_empty_span_matches() {
        assert_eq!(extract("<IS>   </IS>").as_deref(), Some(""));
        assert!(contains_summary("<IS></IS>"));
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap("x"), "<IS>x</IS>");
    }
}
