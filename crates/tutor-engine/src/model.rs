//! Model endpoint collaborator and its Ollama implementation.
//!
//! The engine only needs three things from a model: a complete answer, a
//! token stream, and a liveness probe. [`OllamaClient`] speaks the Ollama
//! `/api/chat` protocol: a single JSON body when `stream` is false, and
//! newline-delimited JSON chunks ending with `"done": true` otherwise.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::error::{Result, TutorError};
use crate::session::Role;

/// Timeout for the liveness probe.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// One message sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author of the message.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Creates a message with the given role.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Creates an instruction message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Creates a learner message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates a tutor message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Sampling parameters forwarded with every request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling cutoff.
    pub top_p: f32,
    /// Maximum tokens generated.
    #[serde(rename = "num_predict")]
    pub max_output_tokens: u32,
    /// Context window size.
    #[serde(rename = "num_ctx")]
    pub context_window: u32,
    /// Penalty applied to repeated tokens.
    pub repeat_penalty: f32,
}

impl From<&ModelConfig> for GenerationParams {
    fn from(config: &ModelConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            max_output_tokens: config.max_output_tokens,
            context_window: config.context_window,
            repeat_penalty: config.repeat_penalty,
        }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::from(&ModelConfig::default())
    }
}

/// Raw text fragments as the model produces them.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// The inference endpoint.
///
/// Connection failures surface as [`TutorError::ServiceUnavailable`]; every
/// other failure surfaces as [`TutorError::UpstreamError`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Returns the full response text.
    async fn complete(&self, messages: &[ChatMessage], params: &GenerationParams)
        -> Result<String>;

    /// Returns the response as a stream of raw fragments.
    async fn stream(&self, messages: &[ChatMessage], params: &GenerationParams)
        -> Result<TokenStream>;

    /// Returns `true` if the endpoint answers.
    async fn health(&self) -> bool;
}

// ============================================================================
// Ollama wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: &'a GenerationParams,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

impl ChatChunk {
    fn into_content(self) -> Result<(String, bool)> {
        if let Some(error) = self.error {
            return Err(TutorError::upstream(None, error));
        }
        let content = self.message.map(|m| m.content).unwrap_or_default();
        Ok((content, self.done))
    }
}

// ============================================================================
// OllamaClient
// ============================================================================

/// HTTP client for an Ollama-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    /// Creates a client from configuration.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                TutorError::config_validation(
                    format!("failed to build HTTP client: {e}"),
                    "Check the model section of your tutor.json",
                )
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    /// Base URL of the endpoint.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_transport_error(&self, e: &reqwest::Error) -> TutorError {
        if e.is_connect() {
            TutorError::service_unavailable(&self.base_url, e.to_string())
        } else if e.is_timeout() {
            TutorError::upstream(None, format!("request timed out: {e}"))
        } else {
            TutorError::upstream(e.status().map(|s| s.as_u16()), e.to_string())
        }
    }

    async fn post_chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream,
            options: params,
        };

        debug!(url = %url, messages = messages.len(), stream, "Sending model request");

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Model endpoint returned an error");
            return Err(TutorError::upstream(Some(status.as_u16()), body));
        }

        Ok(response)
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<String> {
        let response = self.post_chat(messages, params, false).await?;
        let chunk: ChatChunk = response
            .json()
            .await
            .map_err(|e| TutorError::upstream(None, format!("invalid response body: {e}")))?;
        let (content, _) = chunk.into_content()?;
        Ok(content)
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<TokenStream> {
        let response = self.post_chat(messages, params, true).await?;
        Ok(ndjson_tokens(response.bytes_stream().boxed()))
    }

    async fn health(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.http.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Model health probe failed");
                false
            }
        }
    }
}

// ============================================================================
// NDJSON decoding
// ============================================================================

struct NdjsonState {
    bytes: BoxStream<'static, reqwest::Result<Bytes>>,
    buffer: Vec<u8>,
    finished: bool,
}

/// Decodes an NDJSON body into content fragments, skipping empty ones.
fn ndjson_tokens(bytes: BoxStream<'static, reqwest::Result<Bytes>>) -> TokenStream {
    let state = NdjsonState {
        bytes,
        buffer: Vec::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            if let Some(pos) = state.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                match parse_line(&line) {
                    Ok(None) => continue,
                    Ok(Some((content, done))) => {
                        state.finished = done;
                        if content.is_empty() {
                            continue;
                        }
                        return Some((Ok(content), state));
                    }
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
            }

            match state.bytes.next().await {
                Some(Ok(bytes)) => state.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    state.finished = true;
                    let err = TutorError::upstream(None, format!("stream interrupted: {e}"));
                    return Some((Err(err), state));
                }
                None => {
                    state.finished = true;
                    let rest = std::mem::take(&mut state.buffer);
                    return match parse_line(&rest) {
                        Ok(Some((content, _))) if !content.is_empty() => {
                            Some((Ok(content), state))
                        }
                        Ok(_) => None,
                        Err(e) => Some((Err(e), state)),
                    };
                }
            }
        }
    })
    .boxed()
}

/// Parses one NDJSON line; blank lines yield `None`.
fn parse_line(line: &[u8]) -> Result<Option<(String, bool)>> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let chunk: ChatChunk = serde_json::from_str(text)
        .map_err(|e| TutorError::upstream(None, format!("invalid stream chunk: {e}")))?;
    chunk.into_content().map(Some)
}
