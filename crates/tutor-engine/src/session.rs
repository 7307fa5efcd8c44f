//! Session data model for the tutoring engine.
//!
//! This module defines the persisted records (sessions, turns and topic
//! summaries) and the derived state machine used to reason about progress.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator used when a session title is built from its topics.
pub const TITLE_SEPARATOR: &str = " → ";

// ============================================================================
// SessionState
// ============================================================================

/// Position of a session in the topic state machine.
///
/// The transitions are:
/// - `Active(i)` -> `Active(i + 1)` when a summary is accepted and the learner
///   advances from a non-final topic
/// - `Active(N - 1)` -> `Complete` when a summary is accepted on the final topic
///
/// `Complete` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "index")]
pub enum SessionState {
    /// Working on the topic at this index.
    Active(usize),
    /// Every topic has an accepted summary.
    Complete,
}

impl SessionState {
    /// Returns `true` if no further advancement is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active(index) => write!(f, "active({index})"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// One learner's run through an ordered list of topics.
///
/// Invariants: `topics` is non-empty and never changes after creation,
/// `topic_index < topics.len()` and never decreases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session key.
    pub id: String,

    /// Topics joined with [`TITLE_SEPARATOR`].
    pub title: String,

    /// Ordered topics to study.
    pub topics: Vec<String>,

    /// Index of the active topic.
    pub topic_index: usize,

    /// Latest extracted summary for the active topic; empty until extracted.
    pub current_summary: String,

    /// Number of accepted summaries over the whole session.
    pub step_count: u32,

    /// Whether trigger phrases request dramatized examples.
    pub roleplay_mode: bool,

    /// Latest assistant text.
    #[serde(default)]
    pub last_response: String,

    /// When the session was created.
    pub created_at: DateTime<Utc>,

    /// When the session was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session positioned on the first topic.
    #[must_use]
    pub fn new(id: impl Into<String>, topics: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: topics.join(TITLE_SEPARATOR),
            topics,
            topic_index: 0,
            current_summary: String::new(),
            step_count: 0,
            roleplay_mode: false,
            last_response: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The active topic.
    #[must_use]
    pub fn active_topic(&self) -> &str {
        self.topics
            .get(self.topic_index)
            .map_or("", String::as_str)
    }

    /// The topic before the active one, if any.
    #[must_use]
    pub fn previous_topic(&self) -> Option<&str> {
        self.topic_index
            .checked_sub(1)
            .and_then(|i| self.topics.get(i))
            .map(String::as_str)
    }

    /// Returns `true` if the active topic is the last one.
    #[must_use]
    pub fn is_last_topic(&self) -> bool {
        self.topic_index + 1 >= self.topics.len()
    }

    /// Returns `true` if the active topic has an accepted summary.
    #[must_use]
    pub fn has_summary(&self) -> bool {
        !self.current_summary.is_empty()
    }

    /// Derives the state machine position.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.is_last_topic() && self.has_summary() {
            SessionState::Complete
        } else {
            SessionState::Active(self.topic_index)
        }
    }

    /// Updates the `updated_at` timestamp to the current time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Listing projection of this session.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            topics: self.topics.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Applies a partial update and touches the timestamp.
    pub fn apply(&mut self, patch: SessionPatch) {
        if let Some(index) = patch.topic_index {
            // never move backwards
            self.topic_index = self.topic_index.max(index);
        }
        if let Some(summary) = patch.current_summary {
            self.current_summary = summary;
        }
        if let Some(step_count) = patch.step_count {
            self.step_count = step_count;
        }
        if let Some(mode) = patch.roleplay_mode {
            self.roleplay_mode = mode;
        }
        if let Some(response) = patch.last_response {
            self.last_response = response;
        }
        self.touch();
    }
}

/// Partial update of the mutable session fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    /// New active topic index.
    pub topic_index: Option<usize>,
    /// New current summary.
    pub current_summary: Option<String>,
    /// New step count.
    pub step_count: Option<u32>,
    /// New role-play flag.
    pub roleplay_mode: Option<bool>,
    /// New latest assistant text.
    pub last_response: Option<String>,
}

/// Listing projection of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session key.
    pub id: String,
    /// Topics joined with [`TITLE_SEPARATOR`].
    pub title: String,
    /// Ordered topics.
    pub topics: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Turns and Topic Summaries
// ============================================================================

/// Author of a conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instruction block sent to the model. Never persisted as a turn.
    System,
    /// The learner.
    User,
    /// The tutor.
    Assistant,
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who wrote the turn.
    pub role: Role,
    /// Turn text.
    pub content: String,
    /// Active topic when the turn was recorded.
    pub topic_index: usize,
    /// When the turn was recorded.
    pub created_at: DateTime<Utc>,
}

/// Distilled summary of a vacated topic. Written once per (session, topic).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSummaryRecord {
    /// Owning session.
    pub session_id: String,
    /// The vacated topic.
    pub topic: String,
    /// The learner's accepted summary.
    pub summary: String,
    /// When the topic was vacated.
    pub completed_at: DateTime<Utc>,
}

/// Read-only progress snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// The active topic.
    pub topic: String,
    /// Index of the active topic.
    pub index: usize,
    /// Number of topics.
    pub total: usize,
    /// Topics vacated with a summary, in completion order.
    pub completed_topics: Vec<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_new_session_defaults() {
        let session = Session::new("s1", topics(&["Option", "Result"]));

        assert_eq!(session.title, "Option → Result");
        assert_eq!(session.topic_index, 0);
        assert_eq!(session.step_count, 0);
        assert!(!session.roleplay_mode);
        assert!(session.current_summary.is_empty());
        assert_eq!(session.active_topic(), "Option");
        assert_eq!(session.previous_topic(), None);
        assert_eq!(session.state(), SessionState::Active(0));
    }

    #[test]
    fn test_state_complete_only_on_last_topic_with_summary() {
        let mut session = Session::new("s1", topics(&["A", "B"]));
        session.current_summary = "got it".to_string();
        assert_eq!(session.state(), SessionState::Active(0));

        session.topic_index = 1;
        session.current_summary.clear();
        assert_eq!(session.state(), SessionState::Active(1));
        assert_eq!(session.previous_topic(), Some("A"));

        session.current_summary = "done".to_string();
        assert_eq!(session.state(), SessionState::Complete);
        assert!(session.state().is_terminal());
    }

    #[test]
    fn test_single_topic_session_is_last() {
        let session = Session::new("s1", topics(&["Only"]));
        assert!(session.is_last_topic());
    }

    #[test]
    fn test_apply_patch_never_decreases_index() {
        let mut session = Session::new("s1", topics(&["A", "B", "C"]));
        session.apply(SessionPatch {
            topic_index: Some(2),
            ..Default::default()
        });
        assert_eq!(session.topic_index, 2);

        session.apply(SessionPatch {
            topic_index: Some(1),
            step_count: Some(4),
            ..Default::default()
        });
        assert_eq!(session.topic_index, 2);
        assert_eq!(session.step_count, 4);
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Active(3).to_string(), "active(3)");
        assert_eq!(SessionState::Complete.to_string(), "complete");
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), r#""user""#);
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            r#""assistant""#
        );
        let role: Role = serde_json::from_str(r#""system""#).unwrap();
        assert_eq!(role, Role::System);
    }

    #[test]
    fn test_session_serialization_roundtrip() {
        let mut session = Session::new("s1", topics(&["A"]));
        session.last_response = "hello".to_string();

        let json = serde_json::to_string(&session).unwrap();
        let restored: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn test_summary_projection_uses_camel_case() {
        let session = Session::new("s1", topics(&["A", "B"]));
        let json = serde_json::to_value(session.summary()).unwrap();
        assert_eq!(json["title"], "A → B");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
    }
}
