//! Durable storage behind the session store.
//!
//! [`Persistence`] is the seam between the state machine and whatever keeps
//! records. Two implementations ship: [`InMemoryPersistence`] and
//! [`JsonFilePersistence`], which mirrors the in-memory state into a single
//! JSON snapshot written atomically after every mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TutorError};
use crate::session::{Role, Session, SessionPatch, SessionSummary, TopicSummaryRecord, Turn};

/// Storage operations the session store relies on.
///
/// Every read returns a whole snapshot; partial updates are never visible.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Inserts a session, replacing any existing one with the same id along
    /// with its turns and topic summaries.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Looks up a session.
    async fn find(&self, id: &str) -> Result<Option<Session>>;

    /// Applies a partial update and returns the updated session.
    async fn update(&self, id: &str, patch: SessionPatch) -> Result<Session>;

    /// Removes a session and everything it owns. Returns `false` if absent.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Lists sessions, most recently updated first.
    async fn list_all(&self) -> Result<Vec<SessionSummary>>;

    /// Appends a turn to the session's log.
    async fn save_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        topic_index: usize,
    ) -> Result<Turn>;

    /// Returns the session's turns in creation order.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<Turn>>;

    /// Records the summary of a vacated topic unless one already exists.
    /// Returns `true` if a record was inserted.
    async fn save_topic_summary(&self, session_id: &str, topic: &str, summary: &str)
        -> Result<bool>;

    /// Returns the session's topic summaries in completion order.
    async fn list_topic_summaries(&self, session_id: &str) -> Result<Vec<TopicSummaryRecord>>;
}

// ============================================================================
// Snapshot model
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRecord {
    session: Session,
    #[serde(default)]
    turns: Vec<Turn>,
    #[serde(default)]
    topic_summaries: Vec<TopicSummaryRecord>,
}

/// Whole persisted state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    sessions: BTreeMap<String, SessionRecord>,
}

impl Snapshot {
    fn record_mut(&mut self, id: &str) -> Result<&mut SessionRecord> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| TutorError::not_found(id))
    }

    fn record(&self, id: &str) -> Result<&SessionRecord> {
        self.sessions.get(id).ok_or_else(|| TutorError::not_found(id))
    }

    fn save(&mut self, session: &Session) {
        self.sessions.insert(
            session.id.clone(),
            SessionRecord {
                session: session.clone(),
                turns: Vec::new(),
                topic_summaries: Vec::new(),
            },
        );
    }

    fn update(&mut self, id: &str, patch: SessionPatch) -> Result<Session> {
        let record = self.record_mut(id)?;
        record.session.apply(patch);
        Ok(record.session.clone())
    }

    fn delete(&mut self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    fn save_message(
        &mut self,
        session_id: &str,
        role: Role,
        content: &str,
        topic_index: usize,
    ) -> Result<Turn> {
        let turn = Turn {
            role,
            content: content.to_string(),
            topic_index,
            created_at: Utc::now(),
        };
        let record = self.record_mut(session_id)?;
        record.turns.push(turn.clone());
        record.session.touch();
        Ok(turn)
    }

    fn save_topic_summary(&mut self, session_id: &str, topic: &str, summary: &str) -> Result<bool> {
        let record = self.record_mut(session_id)?;
        if record.topic_summaries.iter().any(|r| r.topic == topic) {
            return Ok(false);
        }
        record.topic_summaries.push(TopicSummaryRecord {
            session_id: session_id.to_string(),
            topic: topic.to_string(),
            summary: summary.to_string(),
            completed_at: Utc::now(),
        });
        Ok(true)
    }

    fn list_all(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .values()
            .map(|record| record.session.summary())
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }
}

// ============================================================================
// InMemoryPersistence
// ============================================================================

/// Process-local persistence.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    state: RwLock<Snapshot>,
}

impl InMemoryPersistence {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn save(&self, session: &Session) -> Result<()> {
        self.state.write().save(session);
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<Session>> {
        Ok(self
            .state
            .read()
            .sessions
            .get(id)
            .map(|record| record.session.clone()))
    }

    async fn update(&self, id: &str, patch: SessionPatch) -> Result<Session> {
        self.state.write().update(id, patch)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.state.write().delete(id))
    }

    async fn list_all(&self) -> Result<Vec<SessionSummary>> {
        Ok(self.state.read().list_all())
    }

    async fn save_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        topic_index: usize,
    ) -> Result<Turn> {
        self.state
            .write()
            .save_message(session_id, role, content, topic_index)
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Turn>> {
        Ok(self.state.read().record(session_id)?.turns.clone())
    }

    async fn save_topic_summary(
        &self,
        session_id: &str,
        topic: &str,
        summary: &str,
    ) -> Result<bool> {
        self.state
            .write()
            .save_topic_summary(session_id, topic, summary)
    }

    async fn list_topic_summaries(&self, session_id: &str) -> Result<Vec<TopicSummaryRecord>> {
        Ok(self.state.read().record(session_id)?.topic_summaries.clone())
    }
}

// ============================================================================
// JsonFilePersistence
// ============================================================================

/// In-memory persistence mirrored to a JSON file.
///
/// The file is loaded once on open. Each mutation is applied to a copy of
/// the state, the copy is written to a sibling temp file and renamed over
/// the target, and only then does it replace the in-memory state. A failed
/// write leaves memory and file unchanged.
#[derive(Debug)]
pub struct JsonFilePersistence {
    state: RwLock<Snapshot>,
    path: PathBuf,
    // serializes commits so a newer snapshot is never overwritten
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFilePersistence {
    /// Opens the state file, starting empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::StateFileCorrupted` if the file exists but does
    /// not hold a valid snapshot.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str::<Snapshot>(&contents)
                .map_err(|e| TutorError::state_corrupted(&path, e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            sessions = snapshot.sessions.len(),
            "Loaded session state"
        );

        Ok(Self {
            state: RwLock::new(snapshot),
            path,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Path of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `mutate` to a copy of the state and publishes the copy once
    /// it is on disk. `mutate` reports whether anything changed; unchanged
    /// state is not written.
    async fn commit<T: Send>(
        &self,
        mutate: impl FnOnce(&mut Snapshot) -> Result<(T, bool)> + Send,
    ) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.state.read().clone();
        let (value, changed) = mutate(&mut next)?;
        if changed {
            self.write(&next).await?;
            *self.state.write() = next;
        }
        Ok(value)
    }

    async fn write(&self, snapshot: &Snapshot) -> Result<()> {
        let contents = serde_json::to_string_pretty(snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "state".into(), |n| n.to_string_lossy().into_owned());
        let temp_path = self.path.with_file_name(format!("{file_name}.tmp"));

        tokio::fs::write(&temp_path, contents).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!(path = %self.path.display(), "Wrote session state");
        Ok(())
    }
}

#[async_trait]
impl Persistence for JsonFilePersistence {
    async fn save(&self, session: &Session) -> Result<()> {
        self.commit(|state| {
            state.save(session);
            Ok(((), true))
        })
        .await
    }

    async fn find(&self, id: &str) -> Result<Option<Session>> {
        Ok(self
            .state
            .read()
            .sessions
            .get(id)
            .map(|record| record.session.clone()))
    }

    async fn update(&self, id: &str, patch: SessionPatch) -> Result<Session> {
        self.commit(|state| state.update(id, patch).map(|session| (session, true)))
            .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.commit(|state| {
            let removed = state.delete(id);
            Ok((removed, removed))
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<SessionSummary>> {
        Ok(self.state.read().list_all())
    }

    async fn save_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        topic_index: usize,
    ) -> Result<Turn> {
        self.commit(|state| {
            state
                .save_message(session_id, role, content, topic_index)
                .map(|turn| (turn, true))
        })
        .await
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Turn>> {
        Ok(self.state.read().record(session_id)?.turns.clone())
    }

    async fn save_topic_summary(
        &self,
        session_id: &str,
        topic: &str,
        summary: &str,
    ) -> Result<bool> {
        self.commit(|state| {
            let inserted = state.save_topic_summary(session_id, topic, summary)?;
            Ok((inserted, inserted))
        })
        .await
    }

    async fn list_topic_summaries(&self, session_id: &str) -> Result<Vec<TopicSummaryRecord>> {
        Ok(self.state.read().record(session_id)?.topic_summaries.clone())
    }
}
