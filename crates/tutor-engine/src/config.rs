//! Configuration types for the tutoring engine.
//!
//! This module provides all configuration structures used to control the
//! engine: the model endpoint and its generation parameters, the language
//! filter, the retry budget, the response cache, context compaction and the
//! role-play trigger list.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};
use crate::filter::Script;
use crate::triggers::default_triggers;

/// The default config file name.
const CONFIG_FILE_NAME: &str = "tutor.json";

fn default_subject() -> String {
    "Rust programming".to_string()
}

fn default_response_language() -> String {
    "Korean".to_string()
}

const fn default_port() -> u16 {
    3001
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "qwen2.5:7b".to_string()
}

const fn default_temperature() -> f32 {
    0.6
}

const fn default_top_p() -> f32 {
    0.85
}

const fn default_max_output_tokens() -> u32 {
    1200
}

const fn default_context_window() -> u32 {
    2048
}

const fn default_repeat_penalty() -> f32 {
    1.1
}

/// Request timeout for a single model call, in seconds.
const fn default_timeout_secs() -> u64 {
    90
}

const fn default_retry_threshold() -> f64 {
    0.1
}

/// Extra model calls allowed when output is contaminated.
const fn default_max_retries() -> u32 {
    2
}

const fn default_cache_ttl_secs() -> u64 {
    3600
}

const fn default_cache_max_entries() -> usize {
    100
}

/// Number of most recent turns carried into a turn prompt.
const fn default_recent_window() -> usize {
    4
}

const fn default_max_window_chars() -> usize {
    6000
}

/// Main configuration for the tutoring engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// What the tutor teaches; used in every instruction block.
    #[serde(default = "default_subject")]
    pub subject: String,

    /// Natural language the tutor must answer in.
    #[serde(default = "default_response_language")]
    pub response_language: String,

    /// Model endpoint and generation parameters.
    #[serde(default)]
    pub model: ModelConfig,

    /// Language filter settings.
    #[serde(default)]
    pub filter: FilterConfig,

    /// Contamination retry budget.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Response cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Context compaction settings.
    #[serde(default)]
    pub context: ContextConfig,

    /// Role-play scenario settings.
    #[serde(default)]
    pub roleplay: RoleplayConfig,

    /// Path of the JSON state file. Sessions live in memory only when unset.
    #[serde(default)]
    pub state_file: Option<String>,

    /// Port for the HTTP API server.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            subject: default_subject(),
            response_language: default_response_language(),
            model: ModelConfig::default(),
            filter: FilterConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            context: ContextConfig::default(),
            roleplay: RoleplayConfig::default(),
            state_file: None,
            port: default_port(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `tutor.json` in the current directory. If not found, returns
    /// the default configuration.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TutorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `tutor.json` in a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        Self::load_from_file(&config_path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigParseError` if the file exists but contains
    /// invalid JSON or invalid enum values, and
    /// `TutorError::ConfigValidationError` if the values are out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(TutorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TutorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.subject.trim().is_empty() {
            return Err(TutorError::config_validation(
                "subject must not be empty",
                "Set subject to what the tutor teaches, e.g. \"Rust programming\"",
            ));
        }

        if self.response_language.trim().is_empty() {
            return Err(TutorError::config_validation(
                "responseLanguage must not be empty",
                "Set responseLanguage in your tutor.json, e.g. \"Korean\"",
            ));
        }

        self.model.validate()?;

        if !(self.filter.retry_threshold > 0.0 && self.filter.retry_threshold < 1.0) {
            return Err(TutorError::config_validation(
                "filter.retryThreshold must be between 0 and 1 (exclusive)",
                "Set filter.retryThreshold to a fraction such as 0.1 in your tutor.json",
            ));
        }

        if self.filter.expected_script == self.filter.unwanted_script {
            return Err(TutorError::config_validation(
                "filter.expectedScript and filter.unwantedScript must differ",
                "Pick a different unwantedScript in your tutor.json",
            ));
        }

        if self.cache.max_entries == 0 {
            return Err(TutorError::config_validation(
                "cache.maxEntries must be greater than 0",
                "Set cache.maxEntries to at least 1 in your tutor.json",
            ));
        }

        if self.cache.ttl_secs == 0 {
            return Err(TutorError::config_validation(
                "cache.ttlSecs must be greater than 0",
                "Set cache.ttlSecs to at least 1 second in your tutor.json",
            ));
        }

        if self.context.recent_window == 0 {
            return Err(TutorError::config_validation(
                "context.recentWindow must be greater than 0",
                "Set context.recentWindow to at least 1 in your tutor.json",
            ));
        }

        if self.context.max_window_chars == 0 {
            return Err(TutorError::config_validation(
                "context.maxWindowChars must be greater than 0",
                "Set context.maxWindowChars to a positive size in your tutor.json",
            ));
        }

        if let Some(state_file) = &self.state_file {
            if state_file.trim().is_empty() {
                return Err(TutorError::config_validation(
                    "stateFile must not be empty when set",
                    "Remove stateFile from your tutor.json to keep sessions in memory",
                ));
            }
        }

        Ok(())
    }
}

/// Model endpoint and generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// Base URL of the Ollama-compatible endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name passed with every request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling cutoff.
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Maximum tokens generated per response.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Context window size requested from the model.
    #[serde(default = "default_context_window")]
    pub context_window: u32,

    /// Penalty applied to repeated tokens.
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,

    /// Timeout for a single model call in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_output_tokens: default_max_output_tokens(),
            context_window: default_context_window(),
            repeat_penalty: default_repeat_penalty(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ModelConfig {
    fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(TutorError::config_validation(
                "model.baseUrl must not be empty",
                "Set model.baseUrl to your inference endpoint, e.g. http://localhost:11434",
            ));
        }

        if self.model.trim().is_empty() {
            return Err(TutorError::config_validation(
                "model.model must not be empty",
                "Set model.model to a model the endpoint serves, e.g. qwen2.5:7b",
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(TutorError::config_validation(
                "model.temperature must be between 0 and 2",
                "Set model.temperature to a value such as 0.6 in your tutor.json",
            ));
        }

        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(TutorError::config_validation(
                "model.topP must be in (0, 1]",
                "Set model.topP to a value such as 0.85 in your tutor.json",
            ));
        }

        if self.max_output_tokens == 0 {
            return Err(TutorError::config_validation(
                "model.maxOutputTokens must be greater than 0",
                "Set model.maxOutputTokens to at least 1 in your tutor.json",
            ));
        }

        if self.timeout_secs == 0 {
            return Err(TutorError::config_validation(
                "model.timeoutSecs must be greater than 0",
                "Set model.timeoutSecs to at least 1 second in your tutor.json",
            ));
        }

        Ok(())
    }
}

/// Language filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    /// Script the responses are expected to be written in.
    #[serde(default = "Script::expected_default")]
    pub expected_script: Script,

    /// Script treated as contamination.
    #[serde(default = "Script::unwanted_default")]
    pub unwanted_script: Script,

    /// Fraction of unwanted characters in a raw response above which the
    /// call is re-issued.
    #[serde(default = "default_retry_threshold")]
    pub retry_threshold: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            expected_script: Script::expected_default(),
            unwanted_script: Script::unwanted_default(),
            retry_threshold: default_retry_threshold(),
        }
    }
}

/// Contamination retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum extra model calls per request.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Freshness window of a cached response in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum number of cached responses before FIFO eviction.
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            max_entries: default_cache_max_entries(),
        }
    }
}

/// Context compaction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextConfig {
    /// Which prior material turn prompts carry.
    #[serde(default)]
    pub strategy: ContextStrategy,

    /// Maximum number of recent turns in a turn prompt.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,

    /// Character budget for the recent-turn window.
    #[serde(default = "default_max_window_chars")]
    pub max_window_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            strategy: ContextStrategy::default(),
            recent_window: default_recent_window(),
            max_window_chars: default_max_window_chars(),
        }
    }
}

/// Prior material carried into turn prompts.
///
/// Opening prompts always carry the distilled summaries of earlier topics;
/// the strategy only affects turn prompts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContextStrategy {
    /// Distilled summaries in the instruction plus the recent-turn window.
    #[default]
    Combined,
    /// Distilled summaries plus only the submitted message.
    Summaries,
    /// The recent-turn window without any summary block.
    RecentWindow,
}

impl ContextStrategy {
    /// Returns `true` if prior-topic summaries go into turn prompts.
    #[must_use]
    pub const fn includes_summaries(self) -> bool {
        matches!(self, Self::Combined | Self::Summaries)
    }

    /// Returns `true` if recent turns go into turn prompts.
    #[must_use]
    pub const fn includes_window(self) -> bool {
        matches!(self, Self::Combined | Self::RecentWindow)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Combined => "combined",
            Self::Summaries => "summaries",
            Self::RecentWindow => "recent_window",
        }
    }

    /// Parses a string into a `ContextStrategy`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "combined" => Some(Self::Combined),
            "summaries" => Some(Self::Summaries),
            "recent_window" | "recentwindow" => Some(Self::RecentWindow),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for ContextStrategy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid context strategy '{s}': expected one of 'combined', 'summaries', 'recent_window'"
            ))
        })
    }
}

impl Serialize for ContextStrategy {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Role-play scenario settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleplayConfig {
    /// Phrases that request a dramatized example while role-play mode is on.
    /// Matched as case-sensitive substrings.
    #[serde(default = "default_triggers")]
    pub triggers: Vec<String>,
}

impl Default for RoleplayConfig {
    fn default() -> Self {
        Self {
            triggers: default_triggers(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.subject, "Rust programming");
        assert_eq!(config.response_language, "Korean");
        assert_eq!(config.port, 3001);
        assert!(config.state_file.is_none());
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.cache.max_entries, 100);
        assert_eq!(config.context.strategy, ContextStrategy::Combined);
        assert_eq!(config.filter.expected_script, Script::Hangul);
        assert_eq!(config.filter.unwanted_script, Script::Han);
    }

    #[test]
    fn test_model_config_default_values() {
        let model = ModelConfig::default();

        assert_eq!(model.base_url, "http://localhost:11434");
        assert_eq!(model.model, "qwen2.5:7b");
        assert!((model.temperature - 0.6).abs() < f32::EPSILON);
        assert!((model.top_p - 0.85).abs() < f32::EPSILON);
        assert_eq!(model.max_output_tokens, 1200);
        assert_eq!(model.context_window, 2048);
        assert_eq!(model.timeout_secs, 90);
    }

    #[test]
    fn test_config_deserialization_with_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(config.subject, "Rust programming");
        assert_eq!(config.context.recent_window, 4);
        assert!(!config.roleplay.triggers.is_empty());
    }

    #[test]
    fn test_config_deserialization_with_overrides() {
        let json = r#"{
            "subject": "Go programming",
            "model": { "model": "llama3:8b", "temperature": 0.2 },
            "filter": { "unwantedScript": "cyrillic", "retryThreshold": 0.25 },
            "context": { "strategy": "summaries", "recentWindow": 2 },
            "roleplay": { "triggers": ["show me"] },
            "stateFile": ".tutor/state.json"
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.subject, "Go programming");
        assert_eq!(config.model.model, "llama3:8b");
        assert_eq!(config.model.base_url, "http://localhost:11434");
        assert_eq!(config.filter.unwanted_script, Script::Cyrillic);
        assert_eq!(config.context.strategy, ContextStrategy::Summaries);
        assert_eq!(config.context.recent_window, 2);
        assert_eq!(config.roleplay.triggers, vec!["show me"]);
        assert_eq!(config.state_file.as_deref(), Some(".tutor/state.json"));
    }

    #[test]
    fn test_context_strategy_case_insensitive() {
        let config: Config =
            serde_json::from_str(r#"{"context": {"strategy": "RECENT-WINDOW"}}"#).unwrap();
        assert_eq!(config.context.strategy, ContextStrategy::RecentWindow);

        let config: Config =
            serde_json::from_str(r#"{"context": {"strategy": "Combined"}}"#).unwrap();
        assert_eq!(config.context.strategy, ContextStrategy::Combined);
    }

    #[test]
    fn test_invalid_context_strategy_error() {
        let result: std::result::Result<Config, _> =
            serde_json::from_str(r#"{"context": {"strategy": "everything"}}"#);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("invalid context strategy"));
        assert!(err.contains("everything"));
    }

    #[test]
    fn test_context_strategy_flags() {
        assert!(ContextStrategy::Combined.includes_summaries());
        assert!(ContextStrategy::Combined.includes_window());
        assert!(ContextStrategy::Summaries.includes_summaries());
        assert!(!ContextStrategy::Summaries.includes_window());
        assert!(!ContextStrategy::RecentWindow.includes_summaries());
        assert!(ContextStrategy::RecentWindow.includes_window());
    }

    #[test]
    fn test_load_from_file_nonexistent_returns_default() {
        let config = Config::load_from_file(&PathBuf::from("/nonexistent/path/tutor.json")).unwrap();
        assert_eq!(config.subject, "Rust programming");
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tutor.json");
        std::fs::write(&config_path, "{ not valid json }").unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, TutorError::ConfigParseError { path, message } if *path == config_path && !message.is_empty()),
            "Expected ConfigParseError with correct path, got: {err:?}"
        );
    }

    #[test]
    fn test_load_from_dir_finds_tutor_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tutor.json"), r#"{"port": 8088}"#).unwrap();

        let config = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.port, 8088);
    }

    #[test]
    fn test_load_from_file_validates_after_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tutor.json");
        std::fs::write(&config_path, r#"{"cache": {"maxEntries": 0}}"#).unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, TutorError::ConfigValidationError { .. }),
            "Expected ConfigValidationError, got: {err:?}"
        );
    }

    #[test]
    fn test_validation_rejects_out_of_range_values() {
        let mut config = Config::default();
        config.filter.retry_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.model.top_p = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.model.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.context.recent_window = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.filter.unwanted_script = Script::Hangul;
        let err = config.validate().unwrap_err();
        assert!(
            matches!(&err, TutorError::ConfigValidationError { message, .. } if message.contains("must differ"))
        );
    }

    #[test]
    fn test_validation_rejects_blank_state_file() {
        let config = Config {
            state_file: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_passes_validation() {
        assert!(Config::default().validate().is_ok());
    }
}
