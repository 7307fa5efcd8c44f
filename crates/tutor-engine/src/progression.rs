//! Topic progression and the per-turn chat flow.
//!
//! [`ProgressionController`] ties the store, the compactor and the retry
//! orchestrator together. It owns the advancement gate: a learner moves on
//! only after an understanding summary was accepted for the active topic.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};
use tutor_report::{NoteEntry, StudyNotes, TopicNotes, TopicStatus};

use crate::cache::ResponseCache;
use crate::compactor::{ContextCompactor, PromptKind, TurnPrompt};
use crate::config::Config;
use crate::error::{Result, TutorError};
use crate::model::{ChatMessage, ModelClient};
use crate::orchestrator::{ContaminationAdvisory, Reply, RetryOrchestrator};
use crate::persistence::Persistence;
use crate::session::{Progress, Role, Session, SessionSummary};
use crate::store::{AdvanceOutcome, SessionStore};
use crate::summary;

const START_INSTRUCTION: &str =
    "Read the explanation, then write what you learned as <IS>your summary</IS>.";
const START_FALLBACK: &str =
    "The explanation could not be generated. Ask the tutor about the topic directly.";
const NEXT_TOPIC_FALLBACK: &str = "The explanation for the new topic could not be generated.";
const SCENARIO_FALLBACK: &str =
    "The role-play scenario could not be generated. Please try again.";
const COMPLETED_MESSAGE: &str = "🎉 All topics complete!\n\n\
    Everything you learned is connected.\n\
    Download the Markdown notes to review your study record!";

// ============================================================================
// Outcomes
// ============================================================================

/// Result of starting a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    /// Session key.
    pub session_id: String,
    /// Topics joined with the title separator.
    pub title: String,
    /// Ordered topics.
    pub topics: Vec<String>,
    /// Number of topics.
    pub total_topics: usize,
    /// Whether more than one topic was requested.
    pub multi_objective: bool,
    /// Greeting shown to the learner.
    pub message: String,
    /// What the learner should do next.
    pub instruction: String,
    /// Opening explanation of the first topic.
    pub explanation: String,
}

/// Result of one chat turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOutcome {
    /// Sanitized tutor reply.
    pub response: String,
    /// Whether this message carried an accepted summary.
    pub has_summary: bool,
    /// Role-play mode at the time of the turn.
    pub roleplay: bool,
    /// Hint for the learner's next action.
    pub tip: String,
    /// Accepted summaries so far.
    pub step_count: u32,
    /// Progress after the turn.
    pub progress: Progress,
    /// Template used for the reply.
    pub kind: PromptKind,
    /// Whether the reply came from the response cache.
    pub from_cache: bool,
    /// Contamination left in the reply, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisory: Option<ContaminationAdvisory>,
}

/// Result of asking to move to the next topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NextTopic {
    /// The active topic has no accepted summary yet.
    #[serde(rename_all = "camelCase")]
    SummaryRequired {
        /// The topic still waiting for a summary.
        topic: String,
        /// Current progress.
        progress: Progress,
    },
    /// Moved to the next topic.
    #[serde(rename_all = "camelCase")]
    Advanced {
        /// The vacated topic.
        from: String,
        /// The new active topic.
        to: String,
        /// Announcement shown to the learner.
        message: String,
        /// Opening explanation of the new topic.
        explanation: String,
        /// How the two topics relate.
        transition_tip: String,
        /// Progress after advancing.
        progress: Progress,
    },
    /// The final topic is done.
    Completed {
        /// Congratulation shown to the learner.
        message: String,
        /// Final progress.
        progress: Progress,
    },
}

/// Rendered study notes ready for download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Export {
    /// Suggested download filename.
    pub filename: String,
    /// Markdown document.
    pub content: String,
}

struct PreparedTurn {
    prompt: TurnPrompt,
    has_summary: bool,
    roleplay: bool,
}

// ============================================================================
// ProgressionController
// ============================================================================

/// Drives sessions through their topics.
#[derive(Debug)]
pub struct ProgressionController {
    store: Arc<SessionStore>,
    compactor: ContextCompactor,
    orchestrator: RetryOrchestrator,
    subject: String,
}

impl ProgressionController {
    /// Wires a controller over the given collaborators with a fresh cache.
    #[must_use]
    pub fn new(
        config: &Config,
        persistence: Arc<dyn Persistence>,
        client: Arc<dyn ModelClient>,
    ) -> Self {
        let store = Arc::new(SessionStore::new(persistence));
        let cache = Arc::new(ResponseCache::new(&config.cache));
        Self {
            compactor: ContextCompactor::new(Arc::clone(&store), config),
            orchestrator: RetryOrchestrator::new(client, cache, config),
            store,
            subject: config.subject.clone(),
        }
    }

    /// The underlying session store.
    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// The underlying model orchestrator.
    #[must_use]
    pub const fn orchestrator(&self) -> &RetryOrchestrator {
        &self.orchestrator
    }

    /// Creates (or restarts) a session and explains its first topic.
    ///
    /// A model failure does not fail the start: the learner gets a fallback
    /// text and can ask the tutor directly.
    #[instrument(skip(self, topics))]
    pub async fn start(&self, id: &str, topics: Vec<String>) -> Result<StartOutcome> {
        let session = self.store.create_session(id, topics).await?;

        let explanation = match self.explain_active_topic(id).await {
            Ok(text) => text,
            Err(e) if e.is_model_error() => {
                warn!(session_id = %id, error = %e, "Opening explanation failed, using fallback");
                START_FALLBACK.to_string()
            }
            Err(e) => return Err(e),
        };

        let multi_objective = session.topics.len() > 1;
        let message = format!("Starting \"{}\"!", session.title);

        Ok(StartOutcome {
            session_id: session.id,
            title: session.title,
            total_topics: session.topics.len(),
            topics: session.topics,
            multi_objective,
            message,
            instruction: START_INSTRUCTION.to_string(),
            explanation,
        })
    }

    /// Handles one learner message.
    ///
    /// The message is recorded, its summary (if any) extracted, and the
    /// reply generated from the compacted prompt. No session lock is held
    /// while the model runs.
    #[instrument(skip(self, message))]
    pub async fn chat(&self, id: &str, message: &str) -> Result<ChatOutcome> {
        let prepared = self.prepare_turn(id, message).await?;

        let reply = match self.orchestrator.send(&prepared.prompt.messages).await {
            Ok(reply) => reply,
            Err(e) if e.is_model_error() && prepared.prompt.kind == PromptKind::Scenario => {
                warn!(session_id = %id, error = %e, "Scenario generation failed, using fallback");
                return self.fallback_outcome(id, &prepared, SCENARIO_FALLBACK).await;
            }
            Err(e) => return Err(e),
        };

        self.finish_turn(id, &prepared, reply).await
    }

    /// Like [`chat`](Self::chat) but forwards raw model fragments to
    /// `on_token` while the reply is generated.
    pub async fn chat_streaming<F, Fut>(
        &self,
        id: &str,
        message: &str,
        on_token: F,
    ) -> Result<ChatOutcome>
    where
        F: FnMut(String) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let prepared = self.prepare_turn(id, message).await?;
        let reply = self
            .orchestrator
            .send_streaming(&prepared.prompt.messages, on_token)
            .await?;
        self.finish_turn(id, &prepared, reply).await
    }

    /// Moves to the next topic if the active one has an accepted summary.
    #[instrument(skip(self))]
    pub async fn next_topic(&self, id: &str) -> Result<NextTopic> {
        let (from, to) = match self.store.advance_if_summarized(id).await? {
            AdvanceOutcome::SummaryRequired { topic } => {
                info!(session_id = %id, topic = %topic, "Advance refused, summary required");
                return Ok(NextTopic::SummaryRequired {
                    topic,
                    progress: self.require_progress(id).await?,
                });
            }
            AdvanceOutcome::Completed => {
                return Ok(NextTopic::Completed {
                    message: COMPLETED_MESSAGE.to_string(),
                    progress: self.require_progress(id).await?,
                });
            }
            AdvanceOutcome::Advanced { from, to } => (from, to),
        };

        let explanation = match self.explain_active_topic(id).await {
            Ok(text) => text,
            Err(e) if e.is_model_error() => {
                warn!(session_id = %id, error = %e, "Topic explanation failed, using fallback");
                NEXT_TOPIC_FALLBACK.to_string()
            }
            Err(e) => return Err(e),
        };

        Ok(NextTopic::Advanced {
            message: advance_message(&from, &to),
            transition_tip: transition_tip(&from, &to),
            from,
            to,
            explanation,
            progress: self.require_progress(id).await?,
        })
    }

    /// Flips role-play mode and returns the new value.
    pub async fn toggle_roleplay(&self, id: &str) -> Result<bool> {
        self.store.toggle_mode(id).await
    }

    /// Progress snapshot, `None` for an unknown session.
    pub async fn progress(&self, id: &str) -> Result<Option<Progress>> {
        self.store.progress(id).await
    }

    /// Sessions, most recently updated first.
    pub async fn sessions(&self) -> Result<Vec<SessionSummary>> {
        self.store.list().await
    }

    /// Deletes a session. Returns `false` if it did not exist.
    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        self.store.delete(id).await
    }

    /// Renders the session's study notes.
    pub async fn export(&self, id: &str) -> Result<Export> {
        let session = self.store.get(id).await?;
        let notes = self.study_notes(&session).await?;
        let filename = tutor_report::export_filename(
            &self.subject,
            session.active_topic(),
            Utc::now().timestamp_millis(),
        );

        info!(session_id = %id, filename = %filename, "Study notes exported");
        Ok(Export {
            filename,
            content: tutor_report::generate_document(&notes),
        })
    }

    /// Whether the model endpoint answers.
    pub async fn health(&self) -> bool {
        self.orchestrator.health().await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn explain_active_topic(&self, id: &str) -> Result<String> {
        let messages: Vec<ChatMessage> = self.compactor.build_opening_prompt(id).await?;
        let reply = self.orchestrator.send(&messages).await?;
        self.store.record_response(id, &reply.text).await?;
        Ok(reply.text)
    }

    async fn prepare_turn(&self, id: &str, message: &str) -> Result<PreparedTurn> {
        if message.trim().is_empty() {
            return Err(TutorError::invalid_argument("message must not be empty"));
        }

        let has_summary = self.store.record_user_turn(id, message).await?;
        let prompt = self.compactor.build_turn_prompt(id, message).await?;
        let roleplay = self.store.get(id).await?.roleplay_mode;

        Ok(PreparedTurn {
            prompt,
            has_summary,
            roleplay,
        })
    }

    async fn finish_turn(
        &self,
        id: &str,
        prepared: &PreparedTurn,
        reply: Reply,
    ) -> Result<ChatOutcome> {
        self.store.record_response(id, &reply.text).await?;
        let session = self.store.get(id).await?;

        Ok(ChatOutcome {
            response: reply.text,
            has_summary: prepared.has_summary,
            roleplay: prepared.roleplay,
            tip: learner_tip(prepared.has_summary, session.is_last_topic()).to_string(),
            step_count: session.step_count,
            progress: self.require_progress(id).await?,
            kind: prepared.prompt.kind,
            from_cache: reply.from_cache,
            advisory: reply.advisory,
        })
    }

    async fn fallback_outcome(
        &self,
        id: &str,
        prepared: &PreparedTurn,
        text: &str,
    ) -> Result<ChatOutcome> {
        let session = self.store.get(id).await?;
        Ok(ChatOutcome {
            response: text.to_string(),
            has_summary: prepared.has_summary,
            roleplay: prepared.roleplay,
            tip: learner_tip(prepared.has_summary, session.is_last_topic()).to_string(),
            step_count: session.step_count,
            progress: self.require_progress(id).await?,
            kind: prepared.prompt.kind,
            from_cache: false,
            advisory: None,
        })
    }

    async fn require_progress(&self, id: &str) -> Result<Progress> {
        self.store
            .progress(id)
            .await?
            .ok_or_else(|| TutorError::not_found(id))
    }

    async fn study_notes(&self, session: &Session) -> Result<StudyNotes> {
        let turns = self.store.turns(&session.id).await?;
        let records = self.store.topic_summaries(&session.id).await?;
        let complete = session.state().is_terminal();

        let topics = session
            .topics
            .iter()
            .enumerate()
            .map(|(index, title)| {
                let status = match index.cmp(&session.topic_index) {
                    std::cmp::Ordering::Less => TopicStatus::Done,
                    std::cmp::Ordering::Equal if complete => TopicStatus::Done,
                    std::cmp::Ordering::Equal => TopicStatus::InProgress,
                    std::cmp::Ordering::Greater => TopicStatus::Pending,
                };

                let summary = records
                    .iter()
                    .find(|record| &record.topic == title)
                    .map(|record| record.summary.clone())
                    .or_else(|| {
                        (index == session.topic_index && session.has_summary())
                            .then(|| session.current_summary.clone())
                    });

                let entries = turns
                    .iter()
                    .filter(|turn| turn.topic_index == index)
                    .filter_map(|turn| match turn.role {
                        Role::User if summary::contains_summary(&turn.content) => {
                            Some(NoteEntry::understanding(&turn.content))
                        }
                        Role::User => Some(NoteEntry::question(&turn.content)),
                        Role::Assistant => Some(NoteEntry::feedback(&turn.content)),
                        Role::System => None,
                    })
                    .collect();

                TopicNotes {
                    title: title.clone(),
                    status,
                    summary,
                    entries,
                }
            })
            .collect();

        Ok(StudyNotes {
            subject: self.subject.clone(),
            topics,
            step_count: session.step_count,
            generated_at: Utc::now(),
        })
    }
}

// ============================================================================
// Learner-facing text
// ============================================================================

/// Hint shown after a chat turn.
#[must_use]
pub const fn learner_tip(has_summary: bool, is_last_topic: bool) -> &'static str {
    match (has_summary, is_last_topic) {
        (true, false) => "✅ Well done! Say \"next topic\" to move on.",
        (true, true) => "✅ All topics complete! Download your Markdown notes.",
        (false, _) => "💡 Summarize with the <IS> tag to unlock the next step.",
    }
}

fn advance_message(from: &str, to: &str) -> String {
    format!(
        "✨ Moving from \"{from}\" to \"{to}\"!\n\n\
         📌 **Note**:\n\
         What you learned in \"{from}\" is the foundation for \"{to}\".\n\
         Refer back to it while you study the new topic."
    )
}

/// Authored explanation of how two consecutive topics relate.
///
/// Lookups ignore case and a trailing " type"; unknown pairs get a generic
/// text.
#[must_use]
pub fn transition_tip(from: &str, to: &str) -> String {
    let authored = match (topic_key(from).as_str(), topic_key(to).as_str()) {
        ("option", "result") => Some(
            "✅ Option only says whether a value **exists**.\n\
             ✅ Result carries **success or failure** together with **error details**.\n\n\
             → Reach for Result when you need richer error handling than Option gives you!",
        ),
        ("option", "? operator") => Some(
            "✅ Handling every Option or Result with match gets long.\n\
             ✅ The ? operator propagates None or Err for you.\n\n\
             → Use it to keep Option and Result handling short inside a function!",
        ),
        ("result", "? operator") => Some(
            "✅ Result separates Ok(T) from Err(E) explicitly.\n\
             ✅ The ? operator returns the Err to the caller automatically.\n\n\
             → Error handling gets much more efficient!",
        ),
        ("result", "error handling") => Some(
            "✅ Result expresses success and failure in the type.\n\
             ✅ Error handling builds advanced patterns on top of Result.\n\n\
             → Handle complex error scenarios gracefully!",
        ),
        _ => None,
    };

    authored.map_or_else(
        || {
            format!(
                "✅ Building on what you learned in \"{from}\",\n\
                 ✅ you now study \"{to}\".\n\n\
                 → Look for the links between the topics as you go!"
            )
        },
        str::to_string,
    )
}

fn topic_key(topic: &str) -> String {
    let lower = topic.trim().to_lowercase();
    lower
        .strip_suffix(" type")
        .map_or_else(|| lower.clone(), str::to_string)
}

// ============================================================================
// Tests
// ============================================================================
