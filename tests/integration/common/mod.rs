//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tutor_engine::{
    ChatMessage, Config, GenerationParams, InMemoryPersistence, ModelClient, Persistence,
    ProgressionController, Result, TokenStream,
};

/// Reply used once the scripted responses run out.
pub const DEFAULT_REPLY: &str = "잘 이해하셨습니다";

/// Model fake that replays scripted responses and records every request.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String>>>,
    fragments: Vec<String>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    /// A model that always answers with [`DEFAULT_REPLY`].
    pub fn new() -> Arc<Self> {
        Self::with(vec![])
    }

    /// A model that answers with `responses` in order, then the default.
    pub fn with(responses: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            fragments: vec!["러스트는 ".to_string(), "안전합니다".to_string()],
            requests: Mutex::new(Vec::new()),
        })
    }

    /// A model whose streamed replies are the given fragments.
    pub fn streaming(fragments: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            fragments: fragments.iter().map(ToString::to_string).collect(),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Number of requests received.
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request received, oldest first.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage], _params: &GenerationParams) -> Result<String> {
        self.requests.lock().push(messages.to_vec());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(DEFAULT_REPLY.to_string()))
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> Result<TokenStream> {
        self.requests.lock().push(messages.to_vec());
        let fragments: Vec<Result<String>> = self.fragments.iter().cloned().map(Ok).collect();
        Ok(futures::stream::iter(fragments).boxed())
    }

    async fn health(&self) -> bool {
        true
    }
}

/// Controller over in-memory persistence and the given model.
pub fn controller(model: Arc<ScriptedModel>) -> ProgressionController {
    controller_with(model, Arc::new(InMemoryPersistence::new()))
}

/// Controller over the given persistence and model.
pub fn controller_with(
    model: Arc<ScriptedModel>,
    persistence: Arc<dyn Persistence>,
) -> ProgressionController {
    ProgressionController::new(&Config::default(), persistence, model)
}

/// Owned topic list.
pub fn topics(names: &[&str]) -> Vec<String> {
    names.iter().map(ToString::to_string).collect()
}
