//! Study-notes export for tutoring sessions.
//!
//! This crate renders the transcript of a finished (or partially finished)
//! session into a Markdown document the learner can keep. It owns its own
//! data types so that it does not depend on the engine crate; the engine
//! maps its sessions and turns into [`StudyNotes`] before rendering.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use tutor_report::{generate_document, NoteEntry, StudyNotes, TopicNotes, TopicStatus};
//!
//! let notes = StudyNotes {
//!     subject: "Rust programming".to_string(),
//!     topics: vec![TopicNotes {
//!         title: "Ownership".to_string(),
//!         status: TopicStatus::Done,
//!         summary: Some("Each value has one owner.".to_string()),
//!         entries: vec![NoteEntry::feedback("Correct!")],
//!     }],
//!     step_count: 2,
//!     generated_at: Utc::now(),
//! };
//!
//! let markdown = generate_document(&notes);
//! assert!(markdown.contains("Ownership"));
//! ```

mod markdown;

pub use markdown::MarkdownGenerator;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// ============================================================================
// Notes model
// ============================================================================

/// Everything needed to render one session's study notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyNotes {
    /// Subject being taught, used in the document title.
    pub subject: String,
    /// Topics in study order.
    pub topics: Vec<TopicNotes>,
    /// Number of learner messages in the session.
    pub step_count: u32,
    /// When the notes were generated.
    pub generated_at: DateTime<Utc>,
}

impl StudyNotes {
    /// Returns `true` when the session covers more than one topic.
    #[must_use]
    pub fn is_multi_topic(&self) -> bool {
        self.topics.len() > 1
    }
}

/// Notes for a single topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicNotes {
    /// Topic title.
    pub title: String,
    /// Where the learner is relative to this topic.
    pub status: TopicStatus,
    /// The learner's final understanding summary, if one was recorded.
    pub summary: Option<String>,
    /// Transcript entries that belong to this topic, in order.
    pub entries: Vec<NoteEntry>,
}

/// Study status of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    /// The learner has moved past this topic.
    Done,
    /// The topic currently being studied.
    InProgress,
    /// Not reached yet.
    Pending,
}

impl TopicStatus {
    /// Icon shown next to the topic in the document.
    #[must_use]
    pub const fn icon(&self) -> &'static str {
        match self {
            Self::Done => "✅",
            Self::InProgress => "🔄",
            Self::Pending => "⏳",
        }
    }
}

impl std::fmt::Display for TopicStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done => write!(f, "done"),
            Self::InProgress => write!(f, "in progress"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

/// Kind of transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    /// A learner message carrying an understanding summary.
    Understanding,
    /// Any other learner message.
    Question,
    /// A tutor reply.
    Feedback,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEntry {
    /// What the entry is.
    pub kind: NoteKind,
    /// Raw text of the turn.
    pub content: String,
}

impl NoteEntry {
    /// Learner message with a summary.
    pub fn understanding(content: impl Into<String>) -> Self {
        Self {
            kind: NoteKind::Understanding,
            content: content.into(),
        }
    }

    /// Plain learner message.
    pub fn question(content: impl Into<String>) -> Self {
        Self {
            kind: NoteKind::Question,
            content: content.into(),
        }
    }

    /// Tutor reply.
    pub fn feedback(content: impl Into<String>) -> Self {
        Self {
            kind: NoteKind::Feedback,
            content: content.into(),
        }
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Renders the notes as a Markdown document.
#[must_use]
pub fn generate_document(notes: &StudyNotes) -> String {
    MarkdownGenerator::new(notes).generate()
}

static UNSAFE_FILENAME_CHARS: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"[^a-zA-Z0-9_-]").expect("filename pattern is valid")
});

static DASH_RUNS: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"-+").expect("dash pattern is valid")
});

/// Replaces everything outside `[a-zA-Z0-9_-]` with `-`, collapses dash
/// runs, and lowercases.
#[must_use]
pub fn sanitize_filename_part(raw: &str) -> String {
    let replaced = UNSAFE_FILENAME_CHARS.replace_all(raw, "-");
    DASH_RUNS.replace_all(&replaced, "-").to_lowercase()
}

/// Builds the download filename `{prefix}-{topic}-{timestamp_ms}.md`.
///
/// The prefix is the first word of the subject followed by `-study`
/// (`"Rust programming"` gives `rust-study`), or `study` when the subject
/// has no usable characters.
#[must_use]
pub fn export_filename(subject: &str, topic: &str, timestamp_ms: i64) -> String {
    let first_word = subject.split_whitespace().next().unwrap_or_default();
    let prefix = sanitize_filename_part(first_word);
    let prefix = prefix.trim_matches('-');
    let prefix = if prefix.is_empty() {
        "study".to_string()
    } else {
        format!("{prefix}-study")
    };

    let name = format!("{prefix}-{topic}-{timestamp_ms}");
    format!("{}.md", sanitize_filename_part(&name))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename_part() {
        assert_eq!(sanitize_filename_part("Option → Result"), "option-result");
        assert_eq!(sanitize_filename_part("a__b--c"), "a__b-c");
        assert_eq!(sanitize_filename_part("? operator"), "-operator");
    }

    #[test]
    fn test_export_filename_uses_subject_prefix() {
        let name = export_filename("Rust programming", "Option → Result", 1_700_000_000_000);
        assert_eq!(name, "rust-study-option-result-1700000000000.md");
    }

    #[test]
    fn test_export_filename_falls_back_to_study_prefix() {
        assert_eq!(export_filename("", "Traits", 5), "study-traits-5.md");
        assert_eq!(export_filename("한국어", "Traits", 5), "study-traits-5.md");
    }

    #[test]
    fn test_export_filename_only_safe_chars() {
        let name = export_filename("Rust", "Box<dyn Error> & friends!", 42);
        assert!(name
            .trim_end_matches(".md")
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'));
        assert!(!name.contains("--"));
    }

    #[test]
    fn test_topic_status_icons() {
        assert_eq!(TopicStatus::Done.icon(), "✅");
        assert_eq!(TopicStatus::InProgress.icon(), "🔄");
        assert_eq!(TopicStatus::Pending.icon(), "⏳");
        assert_eq!(TopicStatus::InProgress.to_string(), "in progress");
    }

    #[test]
    fn test_notes_serialize_camel_case() {
        let notes = StudyNotes {
            subject: "Rust".to_string(),
            topics: vec![],
            step_count: 3,
            generated_at: Utc::now(),
        };
        let json = serde_json::to_string(&notes).unwrap();
        assert!(json.contains("\"stepCount\":3"));
        assert!(!notes.is_multi_topic());
    }
}
