//! Unwanted-script detection and removal for model output.
//!
//! The filter counts characters of two configured scripts: the script answers
//! are expected in and the script treated as contamination. Code is never
//! touched: fenced blocks and inline spans pass through byte-identical.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;

/// Fenced blocks first, then inline spans; leftmost match wins.
#[allow(clippy::expect_used)]
static CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```.*?```|`[^`]+`").expect("code pattern is valid"));

#[allow(clippy::expect_used)]
static FENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```.*?```").expect("fence pattern is valid"));

// ============================================================================
// Script
// ============================================================================

/// A writing system identified by Unicode block ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Hangul syllables, jamo and compatibility jamo.
    Hangul,
    /// CJK unified ideographs, extension A and compatibility ideographs.
    Han,
    /// Hiragana and katakana.
    Kana,
    /// Basic Cyrillic.
    Cyrillic,
}

impl Script {
    /// Default expected script.
    #[must_use]
    pub const fn expected_default() -> Self {
        Self::Hangul
    }

    /// Default unwanted script.
    #[must_use]
    pub const fn unwanted_default() -> Self {
        Self::Han
    }

    /// Inclusive code point ranges of the script.
    #[must_use]
    pub const fn ranges(self) -> &'static [(char, char)] {
        match self {
            Self::Hangul => &[
                ('\u{AC00}', '\u{D7AF}'),
                ('\u{1100}', '\u{11FF}'),
                ('\u{3130}', '\u{318F}'),
            ],
            Self::Han => &[
                ('\u{4E00}', '\u{9FFF}'),
                ('\u{3400}', '\u{4DBF}'),
                ('\u{F900}', '\u{FAFF}'),
            ],
            Self::Kana => &[('\u{3040}', '\u{309F}'), ('\u{30A0}', '\u{30FF}')],
            Self::Cyrillic => &[('\u{0400}', '\u{04FF}')],
        }
    }

    /// Returns `true` if the character belongs to the script.
    #[must_use]
    pub fn contains(self, ch: char) -> bool {
        self.ranges()
            .iter()
            .any(|&(lo, hi)| (lo..=hi).contains(&ch))
    }

    /// Counts the script's characters in `text`.
    #[must_use]
    pub fn count(self, text: &str) -> usize {
        text.chars().filter(|&c| self.contains(c)).count()
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Hangul => "hangul",
            Self::Han => "han",
            Self::Kana => "kana",
            Self::Cyrillic => "cyrillic",
        }
    }

    /// Parses a string into a `Script`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "hangul" | "korean" => Some(Self::Hangul),
            "han" | "chinese" => Some(Self::Han),
            "kana" | "japanese" => Some(Self::Kana),
            "cyrillic" => Some(Self::Cyrillic),
            _ => None,
        }
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid script '{s}': expected one of 'hangul', 'han', 'kana', 'cyrillic'"
            ))
        })
    }
}

impl Serialize for Script {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Results
// ============================================================================

/// Character counts over a text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptCounts {
    /// Characters of the expected script.
    pub expected_count: usize,
    /// Characters of the unwanted script.
    pub unwanted_count: usize,
    /// All characters.
    pub total_chars: usize,
}

impl ScriptCounts {
    /// Share of characters outside the unwanted script; 1.0 for empty text.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn purity(&self) -> f64 {
        if self.total_chars == 0 {
            return 1.0;
        }
        1.0 - self.unwanted_count as f64 / self.total_chars as f64
    }
}

/// Outcome of [`LanguageFilter::clean`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanResult {
    /// Sanitized text.
    pub cleaned: String,
    /// Whether unwanted characters remain (inside code, typically).
    pub still_contaminated: bool,
    /// 1.0 when nothing unwanted remains, otherwise the clean share.
    pub confidence: f64,
    /// Unwanted characters left in `cleaned`.
    pub remaining_count: usize,
}

/// Diagnostic score of a cleaned response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityReport {
    /// 0 to 100.
    pub score: u8,
    /// Human-readable deductions and notes.
    pub issues: Vec<String>,
}

// ============================================================================
// LanguageFilter
// ============================================================================

/// Pure text transform that removes unwanted-script characters.
#[derive(Debug, Clone)]
pub struct LanguageFilter {
    expected: Script,
    unwanted: Script,
    retry_threshold: f64,
}

impl Default for LanguageFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

impl LanguageFilter {
    /// Creates a filter from configuration.
    #[must_use]
    pub const fn new(config: &FilterConfig) -> Self {
        Self {
            expected: config.expected_script,
            unwanted: config.unwanted_script,
            retry_threshold: config.retry_threshold,
        }
    }

    /// The script treated as contamination.
    #[must_use]
    pub const fn unwanted_script(&self) -> Script {
        self.unwanted
    }

    /// Counts expected and unwanted characters in the raw text.
    #[must_use]
    pub fn analyze(&self, text: &str) -> ScriptCounts {
        let mut counts = ScriptCounts {
            expected_count: 0,
            unwanted_count: 0,
            total_chars: 0,
        };
        for ch in text.chars() {
            counts.total_chars += 1;
            if self.expected.contains(ch) {
                counts.expected_count += 1;
            } else if self.unwanted.contains(ch) {
                counts.unwanted_count += 1;
            }
        }
        counts
    }

    /// Removes unwanted characters outside code blocks and inline code.
    #[must_use]
    pub fn strip(&self, text: &str) -> String {
        let mut output = String::with_capacity(text.len());
        let mut last = 0;
        for code in CODE_PATTERN.find_iter(text) {
            self.push_stripped(&mut output, &text[last..code.start()]);
            output.push_str(code.as_str());
            last = code.end();
        }
        self.push_stripped(&mut output, &text[last..]);
        output
    }

    fn push_stripped(&self, output: &mut String, prose: &str) {
        output.extend(prose.chars().filter(|&c| !self.unwanted.contains(c)));
    }

    /// Paragraph-scoped strip followed by whitespace normalization.
    ///
    /// Only paragraphs containing unwanted characters are rewritten;
    /// paragraphs left blank are dropped.
    #[must_use]
    pub fn clean(&self, text: &str) -> CleanResult {
        let paragraphs: Vec<String> = split_paragraphs(text)
            .into_iter()
            .filter_map(|paragraph| {
                let paragraph = if self.unwanted.count(&paragraph) > 0 {
                    self.strip(&paragraph)
                } else {
                    paragraph
                };
                (!paragraph.trim().is_empty()).then_some(paragraph)
            })
            .collect();

        let cleaned = normalize_whitespace(&paragraphs.join("\n\n"));
        let counts = self.analyze(&cleaned);

        CleanResult {
            still_contaminated: counts.unwanted_count > 0,
            confidence: counts.purity(),
            remaining_count: counts.unwanted_count,
            cleaned,
        }
    }

    /// Returns `true` if the unwanted share of the raw text exceeds the
    /// retry threshold.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn should_retry(&self, text: &str) -> bool {
        let counts = self.analyze(text);
        if counts.total_chars == 0 {
            return false;
        }
        counts.unwanted_count as f64 > self.retry_threshold * counts.total_chars as f64
    }

    /// Scores a cleaned response for diagnostics.
    #[must_use]
    pub fn quality_score(&self, cleaned: &str, original: &str) -> QualityReport {
        let counts = self.analyze(cleaned);
        let mut score: usize = 100;
        let mut issues = Vec::new();

        if counts.unwanted_count > 0 {
            score = score.saturating_sub((counts.unwanted_count * 2).min(30));
            issues.push(format!(
                "{} {} characters remain",
                counts.unwanted_count, self.unwanted
            ));
        }

        if counts.expected_count < 10 {
            score = score.saturating_sub(20);
            issues.push(format!("little {} content", self.expected));
        }

        if counts.total_chars < 50 {
            score = score.saturating_sub(15);
            issues.push("response is very short".to_string());
        }

        let removed = self.unwanted.count(original).saturating_sub(counts.unwanted_count);
        if removed > 0 {
            issues.push(format!("stripped {removed} {} characters", self.unwanted));
        }

        QualityReport {
            score: u8::try_from(score).unwrap_or(100),
            issues,
        }
    }
}

/// Splits on blank lines, keeping fenced code blocks whole.
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut last = 0;

    let mut push_prose = |prose: &str, current: &mut String| {
        let mut parts = prose.split("\n\n");
        if let Some(first) = parts.next() {
            current.push_str(first);
        }
        for part in parts {
            paragraphs.push(std::mem::take(current));
            current.push_str(part);
        }
    };

    for fence in FENCE_PATTERN.find_iter(text) {
        push_prose(&text[last..fence.start()], &mut current);
        current.push_str(fence.as_str());
        last = fence.end();
    }
    push_prose(&text[last..], &mut current);
    paragraphs.push(current);
    paragraphs
}

/// Strips trailing line whitespace, collapses runs of three or more newlines
/// to one blank line, and trims the text.
#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut newlines = 0;

    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            newlines += 1;
        }
        let line = line.trim_end_matches([' ', '\t', '\r']);
        if line.is_empty() {
            continue;
        }
        for _ in 0..newlines.min(2) {
            output.push('\n');
        }
        newlines = 0;
        output.push_str(line);
    }

    output.trim().to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn filter() -> LanguageFilter {
        LanguageFilter::default()
    }

    #[test]
    fn test_script_ranges() {
        assert!(Script::Hangul.contains('한'));
        assert!(Script::Hangul.contains('ㄱ'));
        assert!(Script::Han.contains('漢'));
        assert!(!Script::Han.contains('한'));
        assert!(!Script::Hangul.contains('a'));
        assert!(Script::Kana.contains('カ'));
        assert!(Script::Cyrillic.contains('ж'));
    }

    #[test]
    fn test_script_deserialization_case_insensitive() {
        let script: Script = serde_json::from_str(r#""HANGUL""#).unwrap();
        assert_eq!(script, Script::Hangul);
        let script: Script = serde_json::from_str(r#""Chinese""#).unwrap();
        assert_eq!(script, Script::Han);

        let err = serde_json::from_str::<Script>(r#""latin""#).unwrap_err();
        assert!(err.to_string().contains("invalid script"));
    }

    #[test]
    fn test_analyze_counts_chars_not_bytes() {
        let counts = filter().analyze("한국어 漢字 ok");
        assert_eq!(counts.expected_count, 3);
        assert_eq!(counts.unwanted_count, 2);
        assert_eq!(counts.total_chars, 9);
    }

    #[test]
    fn test_strip_without_unwanted_is_noop() {
        let text = "러스트의 Option은 `Some` 또는 `None`입니다.\n\n```rust\nlet x = 1;\n```";
        assert_eq!(filter().strip(text), text);
    }

    #[test]
    fn test_strip_preserves_code_blocks_byte_identical() {
        let text = "설명 漢字 입니다\n```rust\n// 注释 comment\nlet x = 1;\n```\n끝 `let 变量 = 2;` 字";
        let stripped = filter().strip(text);
        assert_eq!(
            stripped,
            "설명  입니다\n```rust\n// 注释 comment\nlet x = 1;\n```\n끝 `let 变量 = 2;` "
        );
    }

    #[test]
    fn test_strip_unwanted_only_inside_fence_is_identical() {
        let text = "```\n中文\n```";
        assert_eq!(filter().strip(text), text);
    }

    #[test]
    fn test_normalize_whitespace() {
        let text = "  first line   \t\n\n\n\nsecond\t\nthird  \n\n";
        assert_eq!(normalize_whitespace(text), "first line\n\nsecond\nthird");
    }

    #[test]
    fn test_normalize_collapses_whitespace_only_lines() {
        let text = "a\n  \n \t\n\nb";
        assert_eq!(normalize_whitespace(text), "a\n\nb");
    }

    #[test]
    fn test_clean_drops_emptied_paragraphs() {
        let text = "첫 문단입니다.\n\n漢字漢字\n\n마지막 문단 中 입니다.";
        let result = filter().clean(text);

        assert_eq!(result.cleaned, "첫 문단입니다.\n\n마지막 문단  입니다.");
        assert!(!result.still_contaminated);
        assert_eq!(result.remaining_count, 0);
        assert!((result.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clean_keeps_fenced_block_with_blank_lines_whole() {
        let text = "설명\n\n```rust\nfn main() {\n\n    // 中\n}\n```\n\n끝";
        let result = filter().clean(text);

        assert!(result.cleaned.contains("```rust\nfn main() {\n\n    // 中\n}\n```"));
        assert!(result.still_contaminated);
        assert_eq!(result.remaining_count, 1);
        assert!(result.confidence < 1.0);
    }

    #[test]
    fn test_clean_empty_text_has_full_confidence() {
        let result = filter().clean("");
        assert_eq!(result.cleaned, "");
        assert!((result.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_retry_threshold_is_strict() {
        let fifteen = format!("{}{}", "가".repeat(85), "漢".repeat(15));
        let five = format!("{}{}", "가".repeat(95), "漢".repeat(5));
        let ten = format!("{}{}", "가".repeat(90), "漢".repeat(10));

        assert!(filter().should_retry(&fifteen));
        assert!(!filter().should_retry(&five));
        assert!(!filter().should_retry(&ten));
        assert!(!filter().should_retry(""));
    }

    #[test]
    fn test_quality_score_deductions() {
        let filter = filter();

        let good = "러".repeat(60);
        let report = filter.quality_score(&good, &good);
        assert_eq!(report.score, 100);
        assert!(report.issues.is_empty());

        let report = filter.quality_score("short 中", "short 中中");
        // 2 for one remaining char, 20 for thin content, 15 for length
        assert_eq!(report.score, 63);
        assert!(report.issues.iter().any(|i| i.contains("very short")));
        assert!(report.issues.iter().any(|i| i.contains("stripped 1")));
    }

    #[test]
    fn test_custom_scripts() {
        let config = FilterConfig {
            expected_script: Script::Hangul,
            unwanted_script: Script::Kana,
            retry_threshold: 0.5,
        };
        let filter = LanguageFilter::new(&config);
        assert_eq!(filter.strip("한글カタカナ漢"), "한글漢");
        assert_eq!(filter.unwanted_script(), Script::Kana);
    }
}
