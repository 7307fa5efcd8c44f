//! End-to-end tests of the topic state machine, prompt compaction and
//! study-notes export.

mod common;

use std::sync::Arc;

use common::{controller, controller_with, topics, ScriptedModel};
use tutor_engine::{JsonFilePersistence, NextTopic, Role, SessionState};

/// Walks a two-topic session to completion with the store operations and
/// checks the exported notes.
#[tokio::test]
async fn test_two_topic_session_completes_and_exports() {
    let controller = controller(ScriptedModel::new());
    let store = Arc::clone(controller.store());

    store.create_session("s", topics(&["A", "B"])).await.unwrap();

    store
        .record_turn("s", Role::User, "I think <IS>A is the first letter</IS>")
        .await
        .unwrap();
    assert!(store
        .extract_summary("s", "I think <IS>A is the first letter</IS>")
        .await
        .unwrap());
    assert!(store.advance_topic("s").await.unwrap());

    let session = store.get("s").await.unwrap();
    assert_eq!(session.active_topic(), "B");
    let records = store.topic_summaries("s").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].topic, "A");
    assert_eq!(records[0].summary, "A is the first letter");

    store
        .record_turn("s", Role::User, "<IS>B follows A</IS>")
        .await
        .unwrap();
    assert!(store.extract_summary("s", "<IS>B follows A</IS>").await.unwrap());
    assert!(!store.advance_topic("s").await.unwrap());

    let session = store.get("s").await.unwrap();
    assert_eq!(session.state(), SessionState::Complete);
    assert_eq!(session.step_count, 2);

    let export = controller.export("s").await.unwrap();
    let md = &export.content;

    assert!(md.contains("## 📖 Topic 1: A ✅"));
    assert!(md.contains("## 📖 Topic 2: B ✅"));
    assert_eq!(md.matches("### ✅ Final understanding summary").count(), 2);
    assert!(md.contains("<IS>\nA is the first letter\n</IS>"));
    assert!(md.contains("<IS>\nB follows A\n</IS>"));
    assert!(md.contains("You studied 2 topics in 2 steps."));
    assert!(md.contains("1. **A**: A is the first letter\n"));
    assert!(md.contains("2. **B**: B follows A\n"));
    assert_eq!(md.matches("#### Step 1: My understanding").count(), 2);
}

/// The same journey through the controller, the way the HTTP surface
/// drives it.
#[tokio::test]
async fn test_controller_journey() {
    let model = ScriptedModel::new();
    let controller = controller(Arc::clone(&model));

    let start = controller.start("s", topics(&["Option", "Result"])).await.unwrap();
    assert_eq!(start.title, "Option → Result");

    let refused = controller.next_topic("s").await.unwrap();
    assert!(matches!(refused, NextTopic::SummaryRequired { .. }));

    let chat = controller
        .chat("s", "<IS>Option is Some or None</IS>")
        .await
        .unwrap();
    assert!(chat.has_summary);

    let advanced = controller.next_topic("s").await.unwrap();
    match advanced {
        NextTopic::Advanced { to, progress, .. } => {
            assert_eq!(to, "Result");
            assert_eq!(progress.completed_topics, vec!["Option".to_string()]);
        }
        other => panic!("expected to advance, got {other:?}"),
    }

    controller
        .chat("s", "<IS>Result is Ok or Err</IS>")
        .await
        .unwrap();
    let done = controller.next_topic("s").await.unwrap();
    assert!(matches!(done, NextTopic::Completed { .. }));

    let progress = controller.progress("s").await.unwrap().unwrap();
    assert_eq!(progress.index, 1);
    assert_eq!(
        progress.completed_topics,
        vec!["Option".to_string(), "Result".to_string()]
    );
}

/// Requests for a later topic carry earlier summaries but never earlier
/// transcripts.
#[tokio::test]
async fn test_completed_topic_transcript_never_reaches_the_model() {
    let model = ScriptedModel::new();
    let controller = controller(Arc::clone(&model));

    controller.start("s", topics(&["A", "B"])).await.unwrap();
    controller
        .chat("s", "a very specific question about A")
        .await
        .unwrap();
    controller.chat("s", "<IS>summary of A</IS>").await.unwrap();
    controller.next_topic("s").await.unwrap();
    controller.chat("s", "now a question about B").await.unwrap();

    let last = model.requests().pop().unwrap();
    let all_text: String = last.iter().map(|m| m.content.as_str()).collect();

    assert!(all_text.contains("summary of A"));
    assert!(all_text.contains("now a question about B"));
    assert!(!all_text.contains("a very specific question about A"));
}

/// Topic index never decreases, whatever the operation order.
#[tokio::test]
async fn test_topic_index_is_monotonic() {
    let controller = controller(ScriptedModel::new());
    let store = Arc::clone(controller.store());
    store.create_session("s", topics(&["A", "B", "C"])).await.unwrap();

    let mut last_index = 0;
    let steps: [&str; 7] = [
        "<IS>a</IS>",
        "advance",
        "advance",
        "toggle",
        "<IS>b</IS>",
        "advance",
        "advance",
    ];
    for step in steps {
        match step {
            "advance" => {
                store.advance_topic("s").await.unwrap();
            }
            "toggle" => {
                store.toggle_mode("s").await.unwrap();
            }
            text => {
                store.extract_summary("s", text).await.unwrap();
            }
        }
        let index = store.get("s").await.unwrap().topic_index;
        assert!(index >= last_index);
        last_index = index;
    }
    assert_eq!(last_index, 2);
}

/// Sessions survive a restart when kept in a JSON state file.
#[tokio::test]
async fn test_sessions_survive_restart_with_state_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    {
        let persistence = JsonFilePersistence::open(&path).await.unwrap();
        let controller = controller_with(ScriptedModel::new(), Arc::new(persistence));
        controller.start("s", topics(&["A", "B"])).await.unwrap();
        controller.chat("s", "<IS>A done</IS>").await.unwrap();
        controller.next_topic("s").await.unwrap();
    }

    let persistence = JsonFilePersistence::open(&path).await.unwrap();
    let controller = controller_with(ScriptedModel::new(), Arc::new(persistence));

    let progress = controller.progress("s").await.unwrap().unwrap();
    assert_eq!(progress.topic, "B");
    assert_eq!(progress.completed_topics, vec!["A".to_string()]);

    let sessions = controller.sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].title, "A → B");

    let export = controller.export("s").await.unwrap();
    assert!(export.content.contains("1. **A**: A done"));
}
