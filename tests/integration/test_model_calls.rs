//! Cache, retry and sanitation behavior of model calls.

mod common;

use std::sync::Arc;

use common::{controller, topics, ScriptedModel, DEFAULT_REPLY};
use tutor_engine::{ChatMessage, Config, ResponseCache, RetryOrchestrator, TutorError};

fn orchestrator(model: Arc<ScriptedModel>) -> RetryOrchestrator {
    let config = Config::default();
    RetryOrchestrator::new(model, Arc::new(ResponseCache::new(&config.cache)), &config)
}

fn prompt(text: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::system("You are a tutor."), ChatMessage::user(text)]
}

/// Mostly Han characters, far above the retry threshold.
const CONTAMINATED: &str = "所有權은 漢字漢字漢字입니다";

#[tokio::test]
async fn test_identical_prompts_hit_the_cache() {
    let model = ScriptedModel::new();
    let orchestrator = orchestrator(Arc::clone(&model));

    let first = orchestrator.send(&prompt("same")).await.unwrap();
    let second = orchestrator.send(&prompt("same")).await.unwrap();

    assert_eq!(model.calls(), 1);
    assert_eq!(first.text, second.text);
    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(second.attempts, 0);

    orchestrator.send(&prompt("different")).await.unwrap();
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn test_contaminated_reply_is_retried_with_correction() {
    let model = ScriptedModel::with(vec![
        Ok(CONTAMINATED.to_string()),
        Ok("소유권은 값의 주인입니다".to_string()),
    ]);
    let orchestrator = orchestrator(Arc::clone(&model));

    let reply = orchestrator.send(&prompt("explain ownership")).await.unwrap();

    assert_eq!(reply.attempts, 2);
    assert_eq!(reply.text, "소유권은 값의 주인입니다");
    assert!(reply.advisory.is_none());

    let requests = model.requests();
    assert_eq!(requests[0][1].content, "explain ownership");
    assert!(requests[1][1].content.starts_with("explain ownership"));
    assert!(requests[1][1].content.contains("answer only in Korean"));
}

#[tokio::test]
async fn test_retry_budget_is_bounded_and_reported() {
    let model = ScriptedModel::with(vec![
        Ok(CONTAMINATED.to_string()),
        Ok(CONTAMINATED.to_string()),
        Ok(CONTAMINATED.to_string()),
        Ok(CONTAMINATED.to_string()),
    ]);
    let orchestrator = orchestrator(Arc::clone(&model));

    let reply = orchestrator.send(&prompt("explain ownership")).await.unwrap();

    // one call plus max_retries (2) corrections
    assert_eq!(model.calls(), 3);
    assert_eq!(reply.attempts, 3);
    assert!(!reply.text.contains('漢'));
    let advisory = reply.advisory.unwrap();
    assert!(advisory.budget_exhausted);
}

#[tokio::test]
async fn test_code_blocks_survive_cleaning() {
    let reply_text = "설명입니다\n\n```rust\n// 漢字 in a comment\nlet x = 1;\n```";
    let model = ScriptedModel::with(vec![Ok(reply_text.to_string())]);
    let orchestrator = orchestrator(Arc::clone(&model));

    let reply = orchestrator.send(&prompt("show code")).await.unwrap();

    assert!(reply.text.contains("// 漢字 in a comment"));
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_model_errors_propagate_without_retry() {
    let model = ScriptedModel::with(vec![Err(TutorError::upstream(Some(500), "boom"))]);
    let orchestrator = orchestrator(Arc::clone(&model));

    let err = orchestrator.send(&prompt("anything")).await.unwrap_err();

    assert!(matches!(err, TutorError::UpstreamError { status: Some(500), .. }));
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_streaming_reply_is_cleaned_and_cached() {
    let model = ScriptedModel::streaming(&["소유권", "所有", "입니다"]);
    let orchestrator = orchestrator(Arc::clone(&model));

    let mut seen = Vec::new();
    let reply = orchestrator
        .send_streaming(&prompt("stream it"), |token| {
            seen.push(token);
            async {}
        })
        .await
        .unwrap();

    assert_eq!(seen.concat(), "소유권所有입니다");
    assert_eq!(reply.text, "소유권입니다");

    let cached = orchestrator.send(&prompt("stream it")).await.unwrap();
    assert!(cached.from_cache);
    assert_eq!(cached.text, "소유권입니다");
}

#[tokio::test]
async fn test_chat_replies_come_back_sanitized() {
    let model = ScriptedModel::with(vec![
        Ok(DEFAULT_REPLY.to_string()),
        Ok(CONTAMINATED.to_string()),
        Ok("깨끗한 답변입니다".to_string()),
    ]);
    let controller = controller(Arc::clone(&model));
    controller.start("s", topics(&["Ownership"])).await.unwrap();

    let outcome = controller.chat("s", "what is ownership?").await.unwrap();

    assert_eq!(outcome.response, "깨끗한 답변입니다");
    let turns = controller.store().turns("s").await.unwrap();
    assert_eq!(turns.last().unwrap().content, "깨끗한 답변입니다");
}
