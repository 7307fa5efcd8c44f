//! WebSocket chat with streamed model tokens.
//!
//! The client sends a [`ChatRequest`] as a text frame. The server answers
//! with a sequence of [`StreamEvent`]s: one `token` per raw model fragment,
//! then a single `complete` carrying the sanitized [`ChatOutcome`], or an
//! `error`. A connection may carry any number of requests, one at a time.
//!
//! # Event Types
//!
//! - `token` - Raw fragment as produced by the model
//! - `complete` - The turn finished; payload is the chat outcome
//! - `error` - The request failed
//!
//! Tokens are unsanitized. Clients should replace the streamed text with
//! the `complete` payload's `response`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::{AppState, ChatRequest};
use crate::progression::ChatOutcome;

/// Capacity of the per-connection event channel.
const EVENT_BUFFER: usize = 64;

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

// ============================================================================
// Events
// ============================================================================

/// Payload for the `token` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenPayload {
    /// Raw model fragment.
    pub content: String,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    /// Human-readable error message.
    pub message: String,
}

/// Events sent to a streaming chat client.
///
/// Serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A raw fragment of the reply.
    Token(TokenPayload),
    /// The turn finished.
    Complete(Box<ChatOutcome>),
    /// The request failed.
    Error(ErrorPayload),
}

impl StreamEvent {
    /// Creates a `Token` event.
    #[must_use]
    pub fn token(content: impl Into<String>) -> Self {
        Self::Token(TokenPayload {
            content: content.into(),
        })
    }

    /// Creates a `Complete` event.
    #[must_use]
    pub fn complete(outcome: ChatOutcome) -> Self {
        Self::Complete(Box::new(outcome))
    }

    /// Creates an `Error` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Token(_) => "token",
            Self::Complete(_) => "complete",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// WebSocket upgrade handler for `GET /api/tutor/chat/stream`.
pub async fn chat_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("New streaming chat connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Runs one chat request and pushes its events into `events`.
///
/// Token sends wait for channel capacity, so a slow client slows the
/// producer down instead of growing a buffer.
async fn run_request(state: Arc<AppState>, request: ChatRequest, events: mpsc::Sender<StreamEvent>) {
    let token_events = events.clone();
    let result = state
        .controller
        .chat_streaming(&request.session_id, &request.message, move |fragment| {
            let token_events = token_events.clone();
            async move {
                // a closed channel means the client went away
                let _ = token_events.send(StreamEvent::token(fragment)).await;
            }
        })
        .await;

    let event = match result {
        Ok(outcome) => StreamEvent::complete(outcome),
        Err(e) => {
            warn!(session_id = %request.session_id, error = %e, "Streaming chat failed");
            StreamEvent::error(e.to_string())
        }
    };
    let _ = events.send(event).await;
}

/// Serializes and sends one event. Returns `false` once the client is gone.
async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &StreamEvent) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            warn!(event = event.event_name(), "Failed to serialize event: {}", e);
            return true;
        }
    };

    if sender.send(Message::Text(json)).await.is_err() {
        debug!("Failed to send event, client disconnected");
        return false;
    }
    true
}

/// Handles a single WebSocket connection.
///
/// - Parses each text frame as a chat request and runs it in a task
/// - Rejects new requests while one is in flight
/// - Forwards that task's events to the client
/// - Sends heartbeat pings every 30 seconds
/// - Closes the connection after 3 missed pongs
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (events_tx, mut events_rx) = mpsc::channel::<StreamEvent>(EVENT_BUFFER);

    let mut heartbeat_interval = interval(Duration::from_secs(30));
    let mut missed_pongs = 0u8;
    // cleared when the task's final event is forwarded
    let mut busy = false;
    let mut in_flight: Option<tokio::task::JoinHandle<()>> = None;

    info!("Streaming chat client connected");

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let rejection = if busy {
                            Some(StreamEvent::error("a request is already in progress"))
                        } else {
                            match serde_json::from_str::<ChatRequest>(&text) {
                                Ok(request) => {
                                    debug!(session_id = %request.session_id, "Streaming chat request");
                                    busy = true;
                                    in_flight = Some(tokio::spawn(run_request(
                                        Arc::clone(&state),
                                        request,
                                        events_tx.clone(),
                                    )));
                                    None
                                }
                                Err(e) => Some(StreamEvent::error(format!("invalid request: {e}"))),
                            }
                        };
                        if let Some(event) = rejection {
                            if !send_event(&mut sender, &event).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            debug!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Ignoring binary message from client");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client requested close");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            Some(event) = events_rx.recv() => {
                if matches!(event, StreamEvent::Complete(_) | StreamEvent::Error(_)) {
                    debug!(event = event.event_name(), "Request finished");
                    busy = false;
                }
                if !send_event(&mut sender, &event).await {
                    break;
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    debug!("Failed to send ping, client disconnected");
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!("Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
            }
        }
    }

    if let Some(task) = in_flight {
        task.abort();
    }
    info!("Streaming chat client disconnected");
}

// ============================================================================
// Tests
// ============================================================================
