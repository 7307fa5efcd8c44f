//! Markdown rendering of [`StudyNotes`].
//!
//! The document has a header (title, topic list, date, step count), one
//! section per topic with the learner's final summary and the transcript,
//! and a closing banner listing every topic's summary.

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::{NoteEntry, NoteKind, StudyNotes, TopicNotes};

/// Maximum number of characters of a summary shown in the closing banner.
const MAX_BANNER_SUMMARY_LENGTH: usize = 100;

/// Generates the study-notes Markdown document.
pub struct MarkdownGenerator<'a> {
    notes: &'a StudyNotes,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a generator for the given notes.
    #[must_use]
    pub const fn new(notes: &'a StudyNotes) -> Self {
        Self { notes }
    }

    /// Generates the complete document.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_header(&mut output);

        for (index, topic) in self.notes.topics.iter().enumerate() {
            self.write_topic_section(&mut output, index, topic);
        }

        self.write_banner(&mut output);

        output
    }

    fn write_title(&self, output: &mut String) {
        let suffix = if self.notes.is_multi_topic() {
            " (Multi-Objective)"
        } else {
            ""
        };
        let _ = writeln!(
            output,
            "# 📘 {} Study Notes{suffix}",
            escape_heading(&self.notes.subject)
        );
        output.push('\n');
    }

    fn write_header(&self, output: &mut String) {
        if self.notes.is_multi_topic() {
            output.push_str("## 📚 Topics\n\n");
            for (index, topic) in self.notes.topics.iter().enumerate() {
                let _ = writeln!(
                    output,
                    "{}. {} {}",
                    index + 1,
                    topic.status.icon(),
                    escape_heading(&topic.title)
                );
            }
            output.push('\n');
        } else if let Some(topic) = self.notes.topics.first() {
            let _ = writeln!(output, "**Topic**: {}", escape_heading(&topic.title));
            output.push('\n');
        }

        let _ = writeln!(
            output,
            "**Date**: {}  ",
            format_timestamp(&self.notes.generated_at)
        );
        let _ = writeln!(output, "**Total steps**: {}", self.notes.step_count);
        output.push_str("\n---\n\n");
    }

    fn write_topic_section(&self, output: &mut String, index: usize, topic: &TopicNotes) {
        if self.notes.is_multi_topic() {
            let _ = writeln!(
                output,
                "## 📖 Topic {}: {} {}",
                index + 1,
                escape_heading(&topic.title),
                topic.status.icon()
            );
        } else {
            let _ = writeln!(output, "## 📖 {}", escape_heading(&topic.title));
        }
        output.push('\n');

        if let Some(summary) = &topic.summary {
            output.push_str("### ✅ Final understanding summary\n\n");
            let _ = writeln!(output, "<IS>\n{summary}\n</IS>");
            output.push('\n');
        }

        write_entries(output, &topic.entries);
        output.push_str("---\n\n");
    }

    fn write_banner(&self, output: &mut String) {
        output.push_str("## 🎉 Study complete!\n\n");

        let topics = self.notes.topics.len();
        if self.notes.is_multi_topic() {
            let _ = writeln!(
                output,
                "You studied {topics} topics in {} steps.",
                self.notes.step_count
            );
        } else {
            let _ = writeln!(output, "You completed {} steps.", self.notes.step_count);
        }
        output.push('\n');

        output.push_str("**What you learned**:\n\n");
        for (index, topic) in self.notes.topics.iter().enumerate() {
            let summary = topic.summary.as_deref().map_or_else(
                || "(no summary)".to_string(),
                |s| truncate_summary(s, MAX_BANNER_SUMMARY_LENGTH),
            );
            let _ = writeln!(
                output,
                "{}. **{}**: {summary}",
                index + 1,
                escape_heading(&topic.title)
            );
        }
        output.push('\n');

        output.push_str("Great work. Keep building on what you learned! 🚀\n");
    }
}

/// Writes transcript entries. Understanding steps are numbered per topic.
fn write_entries(output: &mut String, entries: &[NoteEntry]) {
    let mut step = 0usize;
    for entry in entries {
        match entry.kind {
            NoteKind::Understanding => {
                step += 1;
                let _ = writeln!(output, "#### Step {step}: My understanding\n");
            }
            NoteKind::Question => {
                output.push_str("#### 💬 Question\n\n");
            }
            NoteKind::Feedback => {
                output.push_str("**Tutor feedback**:\n\n");
            }
        }
        let _ = writeln!(output, "{}", entry.content.trim());
        output.push('\n');
    }
}

/// Formats a timestamp for display.
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Escapes characters that would change the meaning of a heading or list item.
fn escape_heading(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '\\' | '<' | '>' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push(' '),
            _ => result.push(ch),
        }
    }

    result
}

/// Collapses a summary onto one line and cuts it to `max_chars` characters,
/// adding an ellipsis when anything was cut.
fn truncate_summary(summary: &str, max_chars: usize) -> String {
    let flat = summary.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}
