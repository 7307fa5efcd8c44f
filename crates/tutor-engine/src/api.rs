//! HTTP API for tutoring sessions.
//!
//! A thin adapter: every handler forwards to the [`ProgressionController`]
//! and maps engine errors onto status codes.
//!
//! # Endpoints
//!
//! - `POST /api/tutor/start` - Create (or restart) a session
//! - `POST /api/tutor/chat` - Send a learner message
//! - `GET /api/tutor/chat/stream` - WebSocket chat with streamed tokens
//! - `POST /api/tutor/next-topic` - Advance past the active topic
//! - `POST /api/tutor/toggle-roleplay` - Flip role-play mode
//! - `GET /api/tutor/progress/:id` - Progress snapshot
//! - `GET /api/tutor/export/:id` - Study notes as a Markdown download
//! - `GET /api/tutor/sessions` - List sessions
//! - `DELETE /api/tutor/sessions/:id` - Delete a session
//! - `GET /api/tutor/health` - Model endpoint health
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tutor_engine::{create_router, AppState, Config, InMemoryPersistence, OllamaClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let client = OllamaClient::new(&config.model)?;
//! let state = AppState::new(config, Arc::new(InMemoryPersistence::new()), Arc::new(client));
//!
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3001").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::TutorError;
use crate::model::ModelClient;
use crate::persistence::Persistence;
use crate::progression::{ChatOutcome, NextTopic, ProgressionController, StartOutcome};
use crate::session::{Progress, SessionSummary};
use crate::stream;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Topics given either as a single string or as a list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TopicsInput {
    /// One topic.
    One(String),
    /// Ordered topics.
    Many(Vec<String>),
}

impl TopicsInput {
    /// The topics as a list.
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(topic) => vec![topic],
            Self::Many(topics) => topics,
        }
    }
}

/// Request body for the start endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    /// Session key chosen by the client.
    pub session_id: String,
    /// Topics to study.
    pub topics: TopicsInput,
}

/// Request body for chat, over HTTP and over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Session key.
    pub session_id: String,
    /// The learner's message.
    pub message: String,
}

/// Request body for endpoints that only need the session key.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    /// Session key.
    pub session_id: String,
}

/// Response body for the toggle-roleplay endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleRoleplayResponse {
    /// Always `true` when the toggle happened.
    pub success: bool,
    /// The new mode.
    #[serde(rename = "rolePlayMode")]
    pub roleplay_mode: bool,
    /// Message for the learner.
    pub message: String,
}

/// Response body for session deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    /// Whether a session was removed.
    pub deleted: bool,
}

/// Response body for the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` or `error`.
    pub status: String,
    /// `connected` or `disconnected`.
    pub model: String,
    /// When the probe ran.
    pub timestamp: DateTime<Utc>,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Effective configuration.
    pub config: Config,
    /// The engine behind every route.
    pub controller: Arc<ProgressionController>,
}

impl AppState {
    /// Wires the engine over the given collaborators.
    #[must_use]
    pub fn new(
        config: Config,
        persistence: Arc<dyn Persistence>,
        client: Arc<dyn ModelClient>,
    ) -> Self {
        let controller = Arc::new(ProgressionController::new(&config, persistence, client));
        Self { config, controller }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
enum ApiError {
    /// Unknown session.
    NotFound(String),
    /// Malformed request.
    BadRequest(String),
    /// The model endpoint cannot be reached.
    Unavailable(String),
    /// The model endpoint answered with a failure.
    Upstream(String),
    /// Anything else.
    Internal(String),
}

impl From<TutorError> for ApiError {
    fn from(error: TutorError) -> Self {
        let message = error.to_string();
        match error {
            TutorError::NotFound { .. } => Self::NotFound(message),
            TutorError::InvalidArgument { .. } => Self::BadRequest(message),
            TutorError::ServiceUnavailable { .. } => Self::Unavailable(message),
            TutorError::UpstreamError { .. } => Self::Upstream(message),
            _ => Self::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            Self::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            warn!(status = %status, error = %message, "Request failed");
        }

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all API endpoints.
///
/// Routes live under `/api/tutor`, with permissive CORS for local
/// front-ends and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let tutor_routes = Router::new()
        .route("/start", post(handle_start))
        .route("/chat", post(handle_chat))
        .route("/chat/stream", get(stream::chat_stream_handler))
        .route("/next-topic", post(handle_next_topic))
        .route("/toggle-roleplay", post(handle_toggle_roleplay))
        .route("/progress/:id", get(handle_progress))
        .route("/export/:id", get(handle_export))
        .route("/sessions", get(handle_list_sessions))
        .route("/sessions/:id", delete(handle_delete_session))
        .route("/health", get(handle_health));

    Router::new()
        .nest("/api/tutor", tutor_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `POST /api/tutor/start`.
async fn handle_start(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartOutcome>, ApiError> {
    let topics = request.topics.into_vec();
    info!(session_id = %request.session_id, topics = topics.len(), "Start requested");

    let outcome = state.controller.start(&request.session_id, topics).await?;
    Ok(Json(outcome))
}

/// Handler for `POST /api/tutor/chat`.
async fn handle_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatOutcome>, ApiError> {
    let outcome = state
        .controller
        .chat(&request.session_id, &request.message)
        .await?;
    Ok(Json(outcome))
}

/// Handler for `POST /api/tutor/next-topic`.
async fn handle_next_topic(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<NextTopic>, ApiError> {
    let next = state.controller.next_topic(&request.session_id).await?;
    Ok(Json(next))
}

/// Handler for `POST /api/tutor/toggle-roleplay`.
async fn handle_toggle_roleplay(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<ToggleRoleplayResponse>, ApiError> {
    let enabled = state.controller.toggle_roleplay(&request.session_id).await?;
    let message = if enabled {
        "🎭 Role-play mode is on!"
    } else {
        "📚 Back to normal mode."
    };

    Ok(Json(ToggleRoleplayResponse {
        success: true,
        roleplay_mode: enabled,
        message: message.to_string(),
    }))
}

/// Handler for `GET /api/tutor/progress/:id`.
async fn handle_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Progress>, ApiError> {
    state
        .controller
        .progress(&id)
        .await?
        .map(Json)
        .ok_or_else(|| TutorError::not_found(id).into())
}

/// Handler for `GET /api/tutor/export/:id`.
///
/// Returns the Markdown document as an attachment.
async fn handle_export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let export = state.controller.export(&id).await?;
    let disposition = format!("attachment; filename=\"{}\"", export.filename);

    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        export.content,
    )
        .into_response())
}

/// Handler for `GET /api/tutor/sessions`.
async fn handle_list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    Ok(Json(state.controller.sessions().await?))
}

/// Handler for `DELETE /api/tutor/sessions/:id`.
async fn handle_delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    if state.controller.delete_session(&id).await? {
        Ok(Json(DeleteResponse { deleted: true }))
    } else {
        Err(TutorError::not_found(id).into())
    }
}

/// Handler for `GET /api/tutor/health`.
async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let healthy = state.controller.health().await;
    let (status, model) = if healthy {
        ("ok", "connected")
    } else {
        ("error", "disconnected")
    };
    Json(HealthResponse {
        status: status.to_string(),
        model: model.to_string(),
        timestamp: Utc::now(),
    })
}

// ============================================================================
// Tests
// ============================================================================
