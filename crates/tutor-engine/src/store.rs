//! Authoritative per-session state over a [`Persistence`] backend.
//!
//! Mutations of one session are serialized by an async lock owned by the
//! store and keyed by session id. Different sessions never contend, and
//! reads go straight to persistence snapshots without taking a lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Result, TutorError};
use crate::persistence::Persistence;
use crate::session::{
    Progress, Role, Session, SessionPatch, SessionSummary, TopicSummaryRecord, Turn,
};
use crate::summary;

type SessionLock = Arc<tokio::sync::Mutex<()>>;

/// Result of a gated advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The active topic has no accepted summary; nothing changed.
    SummaryRequired {
        /// The topic still waiting for a summary.
        topic: String,
    },
    /// Moved from one topic to the next.
    Advanced {
        /// The vacated topic.
        from: String,
        /// The new active topic.
        to: String,
    },
    /// The final topic is summarized; the session is complete.
    Completed,
}

/// Session state machine with per-session mutual exclusion.
pub struct SessionStore {
    persistence: Arc<dyn Persistence>,
    locks: Mutex<HashMap<String, SessionLock>>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("locked_sessions", &self.locks.lock().len())
            .finish_non_exhaustive()
    }
}

/// Holds one session's lock. Dropping it removes the table entry once no
/// other task holds or waits for the same lock.
struct SessionGuard<'a> {
    locks: &'a Mutex<HashMap<String, SessionLock>>,
    id: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        // release first so the table holds the last reference if nobody waits
        drop(self.guard.take());
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

impl SessionStore {
    /// Creates a store over the given backend.
    #[must_use]
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_session(&self, id: &str) -> SessionGuard<'_> {
        let lock = Arc::clone(
            self.locks
                .lock()
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        );
        SessionGuard {
            locks: &self.locks,
            id: id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn require(&self, id: &str) -> Result<Session> {
        self.persistence
            .find(id)
            .await?
            .ok_or_else(|| TutorError::not_found(id))
    }

    // ========================================================================
    // State transitions
    // ========================================================================

    /// Creates (or restarts) a session positioned on the first topic.
    ///
    /// Topics are trimmed; an empty list or a blank topic is rejected.
    pub async fn create_session(&self, id: &str, topics: Vec<String>) -> Result<Session> {
        if id.trim().is_empty() {
            return Err(TutorError::invalid_argument("session id must not be empty"));
        }
        if topics.is_empty() {
            return Err(TutorError::invalid_argument("at least one topic is required"));
        }
        let topics: Vec<String> = topics.iter().map(|t| t.trim().to_string()).collect();
        if topics.iter().any(String::is_empty) {
            return Err(TutorError::invalid_argument("topics must not be blank"));
        }

        let _guard = self.lock_session(id).await;

        let session = Session::new(id, topics);
        self.persistence.save(&session).await?;
        info!(session_id = %id, title = %session.title, "Session created");
        Ok(session)
    }

    /// Extracts the first `<IS>…</IS>` span from `raw_text`.
    ///
    /// On a match the trimmed span becomes the active topic's
    /// `current_summary` and `step_count` is incremented, even when the span
    /// is empty. An empty summary still leaves the gate closed. Without a
    /// match nothing changes.
    pub async fn extract_summary(&self, id: &str, raw_text: &str) -> Result<bool> {
        let _guard = self.lock_session(id).await;
        let session = self.require(id).await?;
        self.apply_summary(&session, raw_text).await
    }

    /// Records a learner message and extracts its summary as one step, so
    /// the summary always lands on the topic the message was written for.
    pub async fn record_user_turn(&self, id: &str, content: &str) -> Result<bool> {
        let _guard = self.lock_session(id).await;
        let session = self.require(id).await?;
        self.persistence
            .save_message(id, Role::User, content, session.topic_index)
            .await?;
        self.apply_summary(&session, content).await
    }

    async fn apply_summary(&self, session: &Session, raw_text: &str) -> Result<bool> {
        let Some(extracted) = summary::extract(raw_text) else {
            return Ok(false);
        };

        let updated = self
            .persistence
            .update(
                &session.id,
                SessionPatch {
                    current_summary: Some(extracted),
                    step_count: Some(session.step_count + 1),
                    ..Default::default()
                },
            )
            .await?;

        debug!(
            session_id = %session.id,
            topic = %updated.active_topic(),
            step_count = updated.step_count,
            empty = !updated.has_summary(),
            "Summary extracted"
        );
        Ok(true)
    }

    /// Vacates the active topic.
    ///
    /// A non-empty summary is recorded for the topic (insert-or-ignore).
    /// Returns `true` if the session moved to the next topic and `false` if
    /// the active topic was already the last one.
    pub async fn advance_topic(&self, id: &str) -> Result<bool> {
        let _guard = self.lock_session(id).await;
        let session = self.require(id).await?;
        Ok(self.vacate(&session).await?.is_some())
    }

    /// Advances only if the active topic has an accepted summary.
    ///
    /// The check and the transition happen under the session lock, so two
    /// concurrent calls can never move past a topic nobody summarized.
    pub async fn advance_if_summarized(&self, id: &str) -> Result<AdvanceOutcome> {
        let _guard = self.lock_session(id).await;
        let session = self.require(id).await?;

        if !session.has_summary() {
            return Ok(AdvanceOutcome::SummaryRequired {
                topic: session.active_topic().to_string(),
            });
        }

        Ok(match self.vacate(&session).await? {
            Some(updated) => AdvanceOutcome::Advanced {
                from: session.active_topic().to_string(),
                to: updated.active_topic().to_string(),
            },
            None => AdvanceOutcome::Completed,
        })
    }

    /// Records the active topic's summary and moves on. Returns the updated
    /// session, or `None` when the active topic is the last one.
    async fn vacate(&self, session: &Session) -> Result<Option<Session>> {
        let id = session.id.as_str();
        if session.has_summary() {
            let inserted = self
                .persistence
                .save_topic_summary(id, session.active_topic(), &session.current_summary)
                .await?;
            debug!(session_id = %id, topic = %session.active_topic(), inserted, "Topic summary recorded");
        }

        if session.is_last_topic() {
            info!(session_id = %id, state = %session.state(), "No further topics");
            return Ok(None);
        }

        let updated = self
            .persistence
            .update(
                id,
                SessionPatch {
                    topic_index: Some(session.topic_index + 1),
                    current_summary: Some(String::new()),
                    ..Default::default()
                },
            )
            .await?;

        info!(
            session_id = %id,
            from = %session.active_topic(),
            to = %updated.active_topic(),
            "Advanced topic"
        );
        Ok(Some(updated))
    }

    /// Flips role-play mode and returns the new value.
    pub async fn toggle_mode(&self, id: &str) -> Result<bool> {
        let _guard = self.lock_session(id).await;

        let session = self.require(id).await?;
        let updated = self
            .persistence
            .update(
                id,
                SessionPatch {
                    roleplay_mode: Some(!session.roleplay_mode),
                    ..Default::default()
                },
            )
            .await?;
        info!(session_id = %id, roleplay = updated.roleplay_mode, "Role-play mode toggled");
        Ok(updated.roleplay_mode)
    }

    /// Appends a turn tagged with the active topic.
    pub async fn record_turn(&self, id: &str, role: Role, content: &str) -> Result<Turn> {
        let _guard = self.lock_session(id).await;

        let session = self.require(id).await?;
        self.persistence
            .save_message(id, role, content, session.topic_index)
            .await
    }

    /// Appends an assistant turn and stores it as the latest response.
    pub async fn record_response(&self, id: &str, text: &str) -> Result<Turn> {
        let _guard = self.lock_session(id).await;

        let session = self.require(id).await?;
        let turn = self
            .persistence
            .save_message(id, Role::Assistant, text, session.topic_index)
            .await?;
        self.persistence
            .update(
                id,
                SessionPatch {
                    last_response: Some(text.to_string()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(turn)
    }

    /// Deletes a session and its records. Returns `false` if absent.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.lock_session(id).await;
        let removed = self.persistence.delete(id).await?;
        if removed {
            info!(session_id = %id, "Session deleted");
        }
        Ok(removed)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Returns the session or `NotFound`.
    pub async fn get(&self, id: &str) -> Result<Session> {
        self.require(id).await
    }

    /// Read-only progress snapshot; `None` if the session does not exist.
    pub async fn progress(&self, id: &str) -> Result<Option<Progress>> {
        let Some(session) = self.persistence.find(id).await? else {
            return Ok(None);
        };
        let completed_topics = self
            .persistence
            .list_topic_summaries(id)
            .await?
            .into_iter()
            .map(|record| record.topic)
            .collect();

        Ok(Some(Progress {
            topic: session.active_topic().to_string(),
            index: session.topic_index,
            total: session.topics.len(),
            completed_topics,
        }))
    }

    /// The session's turns in creation order.
    pub async fn turns(&self, id: &str) -> Result<Vec<Turn>> {
        self.persistence.list_messages(id).await
    }

    /// The session's topic summaries in completion order.
    pub async fn topic_summaries(&self, id: &str) -> Result<Vec<TopicSummaryRecord>> {
        self.persistence.list_topic_summaries(id).await
    }

    /// Lists sessions, most recently updated first.
    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        self.persistence.list_all().await
    }
}
