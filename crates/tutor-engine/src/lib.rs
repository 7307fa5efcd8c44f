//! Tutor Loop engine
//!
//! Drives multi-topic tutoring sessions against a language model. Learners
//! advance only after writing an understanding summary (`<IS>…</IS>`), and
//! each request to the model carries the distilled summaries of earlier
//! topics instead of their transcripts. Model output is cleaned of
//! unwanted-script characters, retried when contaminated, and cached.

pub mod api;
pub mod cache;
pub mod compactor;
pub mod config;
pub mod error;
pub mod filter;
pub mod model;
pub mod orchestrator;
pub mod persistence;
pub mod progression;
pub mod session;
pub mod store;
pub mod stream;
pub mod summary;
pub mod triggers;

pub use api::{create_router, AppState, ChatRequest, ErrorResponse, HealthResponse, StartRequest};
pub use cache::{cache_key, ResponseCache};
pub use compactor::{ContextCompactor, PromptKind, TurnPrompt};
pub use config::{
    CacheConfig, Config, ContextConfig, ContextStrategy, FilterConfig, ModelConfig, RetryConfig,
    RoleplayConfig,
};
pub use error::{Result, TutorError};
pub use filter::{normalize_whitespace, CleanResult, LanguageFilter, Script, ScriptCounts};
pub use model::{ChatMessage, GenerationParams, ModelClient, OllamaClient, TokenStream};
pub use orchestrator::{ContaminationAdvisory, Reply, RetryOrchestrator};
pub use persistence::{InMemoryPersistence, JsonFilePersistence, Persistence};
pub use progression::{ChatOutcome, Export, NextTopic, ProgressionController, StartOutcome};
pub use session::{
    Progress, Role, Session, SessionPatch, SessionState, SessionSummary, TopicSummaryRecord, Turn,
};
pub use store::{AdvanceOutcome, SessionStore};
pub use stream::StreamEvent;
