//! Prompt assembly under a bounded context.
//!
//! Every request carries exactly one instruction message followed by a small
//! set of conversational turns. Completed topics contribute only their
//! distilled summaries, never their transcripts.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::config::{Config, ContextConfig};
use crate::error::Result;
use crate::filter::Script;
use crate::model::ChatMessage;
use crate::session::{Role, Session, TopicSummaryRecord, Turn, TITLE_SEPARATOR};
use crate::store::SessionStore;
use crate::summary;
use crate::triggers::find_trigger;

/// Which template a turn prompt uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Evaluation of the learner's message with recent context.
    Turn,
    /// Dramatized worked example for the active topic.
    Scenario,
}

/// Messages for one turn plus the template that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnPrompt {
    /// Template used.
    pub kind: PromptKind,
    /// Instruction first, then turns in chronological order.
    pub messages: Vec<ChatMessage>,
}

/// Builds opening and turn prompts from session state.
#[derive(Debug)]
pub struct ContextCompactor {
    store: Arc<SessionStore>,
    subject: String,
    response_language: String,
    unwanted_script: Script,
    context: ContextConfig,
    triggers: Vec<String>,
}

impl ContextCompactor {
    /// Creates a compactor reading from `store`.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, config: &Config) -> Self {
        Self {
            store,
            subject: config.subject.clone(),
            response_language: config.response_language.clone(),
            unwanted_script: config.filter.unwanted_script,
            context: config.context.clone(),
            triggers: config.roleplay.triggers.clone(),
        }
    }

    /// Instruction plus request to explain the active topic.
    ///
    /// From the second topic on, the instruction lists every recorded topic
    /// summary and connects the previous topic to the active one.
    pub async fn build_opening_prompt(&self, id: &str) -> Result<Vec<ChatMessage>> {
        let session = self.store.get(id).await?;
        let topic = session.active_topic();

        let mut instruction = self.preamble();
        let _ = writeln!(instruction, "Explain the topic \"{topic}\" clearly.");
        let _ = writeln!(instruction, "- Focus on the core concepts (150-250 words).");
        let _ = writeln!(instruction, "- Include 2-3 real use cases.");
        let _ = write!(
            instruction,
            "- Use plain, easy-to-follow {}.",
            self.response_language
        );

        if session.topic_index > 0 {
            let records = self.store.topic_summaries(id).await?;
            let _ = write!(
                instruction,
                "\n- Connect the explanation to what the learner already studied:\n{}",
                previous_topics_block(&session, &records)
            );
        }

        debug!(session_id = %id, topic = %topic, "Built opening prompt");

        Ok(vec![
            ChatMessage::system(instruction),
            ChatMessage::user(format!("Explain \"{topic}\".")),
        ])
    }

    /// Instruction plus the bounded recent window for a learner message.
    ///
    /// With role-play mode on, a message that matches a trigger phrase and
    /// carries no summary switches to the scenario template.
    pub async fn build_turn_prompt(&self, id: &str, user_message: &str) -> Result<TurnPrompt> {
        let session = self.store.get(id).await?;

        if self.wants_scenario(&session, user_message) {
            debug!(session_id = %id, "Built scenario prompt");
            return Ok(TurnPrompt {
                kind: PromptKind::Scenario,
                messages: self.scenario_messages(&session),
            });
        }

        let records = if self.context.strategy.includes_summaries() && session.topic_index > 0 {
            self.store.topic_summaries(id).await?
        } else {
            Vec::new()
        };

        let window = if self.context.strategy.includes_window() {
            let turns = self.store.turns(id).await?;
            recent_window(
                &turns,
                session.topic_index,
                user_message,
                self.context.recent_window,
                self.context.max_window_chars,
            )
        } else {
            vec![ChatMessage::user(user_message)]
        };

        let mut messages = Vec::with_capacity(window.len() + 1);
        messages.push(ChatMessage::system(self.turn_instruction(&session, &records)));
        messages.extend(window);

        debug!(
            session_id = %id,
            strategy = ?self.context.strategy,
            messages = messages.len(),
            "Built turn prompt"
        );

        Ok(TurnPrompt {
            kind: PromptKind::Turn,
            messages,
        })
    }

    fn wants_scenario(&self, session: &Session, user_message: &str) -> bool {
        session.roleplay_mode
            && find_trigger(&self.triggers, user_message).is_some()
            && !summary::contains_summary(user_message)
    }

    // ========================================================================
    // Templates
    // ========================================================================

    fn preamble(&self) -> String {
        let mut text = String::new();
        let _ = writeln!(
            text,
            "You are a {} tutor for learners who speak {}.\n",
            self.subject, self.response_language
        );
        let _ = writeln!(text, "Language rules (very important):");
        let _ = writeln!(text, "- Answer only in {}.", self.response_language);
        let _ = writeln!(
            text,
            "- Keywords, function names and identifiers from {} may stay as written (e.g. Option, Result, unwrap).",
            self.subject
        );
        let _ = writeln!(
            text,
            "- Never use characters of the {} script.",
            self.unwanted_script
        );
        let _ = writeln!(
            text,
            "- Never write whole sentences in any language other than {}.\n",
            self.response_language
        );
        text
    }

    fn turn_instruction(&self, session: &Session, records: &[TopicSummaryRecord]) -> String {
        let open = summary::OPEN_TAG;
        let accepted = if session.is_last_topic() {
            "\"Complete! Congratulations\""
        } else {
            "\"Move on to the next topic\""
        };

        let mut text = self.preamble();
        let _ = writeln!(text, "Core rules:");
        let _ = writeln!(
            text,
            "1. Evaluate the learner's summary inside the {open} tag."
        );
        let _ = writeln!(text, "2. If it is accurate: praise it and say {accepted}.");
        let _ = writeln!(
            text,
            "3. If it falls short: explain specifically what is missing and ask for a new summary."
        );
        let _ = write!(
            text,
            "4. If there is no {open} tag: ask the learner to summarize with the {open} tag."
        );

        if session.roleplay_mode {
            text.push_str(&self.roleplay_guidance());
        }

        if session.topics.len() > 1 {
            let _ = write!(
                text,
                "\n\nProgress: {}/{} ({})",
                session.topic_index + 1,
                session.topics.len(),
                session.topics.join(TITLE_SEPARATOR)
            );
        }

        if self.context.strategy.includes_summaries() && session.topic_index > 0 {
            let _ = write!(
                text,
                "\n\n{}\n\nImportant: take the previously studied material and the connection \
                 between topics into account. When evaluating the answer, relate it to the \
                 previous topic and explain in an integrated way.",
                previous_topics_block(session, records)
            );
        }

        text
    }

    fn roleplay_guidance(&self) -> String {
        format!(
            "\n\nRole-play mode is on.\n\n\
             When the learner asks how or when to use something, or asks for a real example:\n\
             1. Turn it into a role-play set in a real development situation.\n\
             2. Introduce at most two characters (e.g. a junior and a senior developer).\n\
             3. Unfold the situation as a concrete dialogue.\n\
             4. Show why the concept is needed and how it solves the problem.\n\
             5. Include exactly one runnable code example.\n\
             Write the whole scenario in {}.",
            self.response_language
        )
    }

    fn scenario_messages(&self, session: &Session) -> Vec<ChatMessage> {
        let topic = session.active_topic();
        let instruction = format!(
            "You are a {subject} tutor.\n\n\
             The learner is asking when and how \"{topic}\" is used in practice.\n\n\
             Write a vivid development scenario in this format:\n\n\
             🎬 **Situation**: [a concrete development situation]\n\n\
             👤 **Characters**:\n\
             - [name] ([role]): [description]\n\
             - [name] ([role]): [description]\n\n\
             💬 **Dialogue**:\n\
             [a natural conversation between the two characters, 3-5 exchanges]\n\n\
             💻 **Code example**:\n\
             ```\n\
             // the problem\n\
             [code]\n\n\
             // the fix\n\
             [code]\n\
             ```\n\n\
             🎯 **Key point**: [one sentence on why the concept matters]\n\n\
             Use at most two characters and exactly one code example. Write only in {language}.",
            subject = self.subject,
            language = self.response_language,
        );

        vec![
            ChatMessage::system(instruction),
            ChatMessage::user(format!(
                "Show me a development scenario where \"{topic}\" is used in a real project."
            )),
        ]
    }
}

/// Lists recorded summaries and connects the previous topic to the active one.
fn previous_topics_block(session: &Session, records: &[TopicSummaryRecord]) -> String {
    let mut text = String::from("Previously studied (must be taken into account):");
    for record in records {
        let _ = write!(text, "\n▪️ **{}**: {}", record.topic, record.summary);
    }
    if let Some(previous) = session.previous_topic() {
        let _ = write!(
            text,
            "\n\nConnection between topics:\n\"{previous}\"{TITLE_SEPARATOR}\"{}\"\n\
             Build on the previous topic when explaining the current one.",
            session.active_topic()
        );
    }
    text
}

/// Most recent turns of the active topic, oldest first.
///
/// At most `max_turns` entries, trimmed oldest-first to `max_chars`. The
/// submitted message is appended unless an identical user turn is already in
/// the window, and is never trimmed away.
fn recent_window(
    turns: &[Turn],
    topic_index: usize,
    user_message: &str,
    max_turns: usize,
    max_chars: usize,
) -> Vec<ChatMessage> {
    let active: Vec<&Turn> = turns
        .iter()
        .filter(|t| t.topic_index == topic_index && t.role != Role::System)
        .collect();
    let start = active.len().saturating_sub(max_turns);
    let mut window: Vec<ChatMessage> = active[start..]
        .iter()
        .map(|t| ChatMessage::new(t.role, t.content.clone()))
        .collect();

    let is_submitted = |m: &ChatMessage| m.role == Role::User && m.content == user_message;
    if !window.iter().any(is_submitted) {
        window.push(ChatMessage::user(user_message));
        if window.len() > max_turns.max(1) {
            window.remove(0);
        }
    }

    let mut keep = window
        .iter()
        .rposition(is_submitted)
        .unwrap_or(window.len().saturating_sub(1));
    while keep > 0 && window_chars(&window) > max_chars {
        window.remove(0);
        keep -= 1;
    }
    window
}

fn window_chars(window: &[ChatMessage]) -> usize {
    window.iter().map(|m| m.content.chars().count()).sum()
}
