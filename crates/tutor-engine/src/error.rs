//! Error types for the tutoring engine.
//!
//! This module defines the error hierarchy for all engine operations,
//! including configuration loading, session state transitions, persistence
//! and calls to the model endpoint.

use std::path::PathBuf;

/// A specialized `Result` type for tutoring engine operations.
pub type Result<T> = std::result::Result<T, TutorError>;

/// Errors that can occur while running a tutoring session.
///
/// Variants carry an actionable suggestion where one exists. Session-level
/// violations (`NotFound`, `InvalidArgument`) are never retried.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    // ========================================================================
    // Session Errors
    // ========================================================================
    /// The referenced session does not exist.
    #[error("Session not found: '{session_id}'\n\nSuggestion: Start a learning session first")]
    NotFound {
        /// The session key that was looked up.
        session_id: String,
    },

    /// An operation received an argument it cannot accept.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of what was wrong.
        message: String,
    },

    // ========================================================================
    // Model Endpoint Errors
    // ========================================================================
    /// The model endpoint could not be reached at all.
    #[error("Model service unavailable at '{endpoint}': {message}\n\nSuggestion: Check that the inference service is running and reachable")]
    ServiceUnavailable {
        /// Base URL of the endpoint.
        endpoint: String,
        /// Transport-level failure description.
        message: String,
    },

    /// The model endpoint answered, but the call failed.
    #[error("Model call failed{}: {message}", .status.map_or_else(String::new, |s| format!(" (HTTP {s})")))]
    UpstreamError {
        /// HTTP status, when the endpoint returned one.
        status: Option<u16>,
        /// Failure description from the endpoint or the client.
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your tutor.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // State Persistence Errors
    // ========================================================================
    /// State file contains malformed JSON that cannot be recovered.
    #[error("Corrupted state file '{path}': {message}\n\nSuggestion: Remove the state file to start fresh, or restore from backup")]
    StateFileCorrupted {
        /// Path to the corrupted state file.
        path: PathBuf,
        /// Description of the corruption.
        message: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TutorError {
    /// Creates a new `NotFound` error for the given session key.
    #[must_use]
    pub fn not_found(session_id: impl Into<String>) -> Self {
        Self::NotFound {
            session_id: session_id.into(),
        }
    }

    /// Creates a new `InvalidArgument` error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a new `ServiceUnavailable` error.
    #[must_use]
    pub fn service_unavailable(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a new `UpstreamError` with an optional HTTP status.
    #[must_use]
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::UpstreamError {
            status,
            message: message.into(),
        }
    }

    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `StateFileCorrupted` error.
    #[must_use]
    pub fn state_corrupted(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StateFileCorrupted {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if the error came from the model endpoint.
    #[must_use]
    pub const fn is_model_error(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable { .. } | Self::UpstreamError { .. }
        )
    }

    /// Returns `true` if a later, identical request may succeed.
    ///
    /// The engine itself never retries these; the classification is for
    /// callers that wrap a whole request.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::ServiceUnavailable { .. } => true,
            Self::UpstreamError { status, .. } => match status {
                Some(code) => *code >= 500 || *code == 429,
                None => true,
            },
            _ => false,
        }
    }

    /// Returns `true` if this error is fatal for the process.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::StateFileCorrupted { .. }
        )
    }
}
