//! Cached, sanitized model calls with a bounded contamination retry.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{cache_key, ResponseCache};
use crate::config::Config;
use crate::error::Result;
use crate::filter::{CleanResult, LanguageFilter};
use crate::model::{ChatMessage, GenerationParams, ModelClient};

/// Contamination left after the retry budget ran out. Not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContaminationAdvisory {
    /// Unwanted characters left in the returned text.
    pub remaining_count: usize,
    /// Clean share of the returned text.
    pub confidence: f64,
    /// Whether the last raw response was still above the retry threshold.
    pub budget_exhausted: bool,
}

/// A sanitized model response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    /// Cleaned text.
    pub text: String,
    /// Model calls made; 0 for a cache hit.
    pub attempts: u32,
    /// Whether the text came from the cache.
    pub from_cache: bool,
    /// Present when contamination survived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisory: Option<ContaminationAdvisory>,
}

/// Wraps a [`ModelClient`] with the response cache and language filter.
pub struct RetryOrchestrator {
    client: Arc<dyn ModelClient>,
    cache: Arc<ResponseCache>,
    filter: LanguageFilter,
    params: GenerationParams,
    max_retries: u32,
    correction: String,
}

impl std::fmt::Debug for RetryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOrchestrator")
            .field("cache_entries", &self.cache.len())
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl RetryOrchestrator {
    /// Creates an orchestrator sharing `cache` with other users.
    #[must_use]
    pub fn new(client: Arc<dyn ModelClient>, cache: Arc<ResponseCache>, config: &Config) -> Self {
        let correction = format!(
            "\n\n(Important: answer only in {}. Do not use any characters of the {} script.)",
            config.response_language, config.filter.unwanted_script
        );
        Self {
            client,
            cache,
            filter: LanguageFilter::new(&config.filter),
            params: GenerationParams::from(&config.model),
            max_retries: config.retry.max_retries,
            correction,
        }
    }

    /// The shared response cache.
    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Probes the model endpoint.
    pub async fn health(&self) -> bool {
        self.client.health().await
    }

    /// Returns a cached reply or calls the model, cleaning and retrying on
    /// contamination.
    ///
    /// A raw response above the retry threshold is re-requested with a
    /// corrective instruction appended to the last message, at most
    /// `max_retries` extra times. Model errors propagate unchanged.
    pub async fn send(&self, messages: &[ChatMessage]) -> Result<Reply> {
        let key = cache_key(messages);
        if let Some(text) = self.cache.get(&key) {
            debug!(key = %key, "Cache hit");
            return Ok(Reply {
                text,
                attempts: 0,
                from_cache: true,
                advisory: None,
            });
        }

        let mut request = messages.to_vec();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let raw = self.client.complete(&request, &self.params).await?;
            let contaminated = self.filter.should_retry(&raw);

            if contaminated && attempts <= self.max_retries {
                warn!(
                    attempt = attempts,
                    max_retries = self.max_retries,
                    "Response contaminated, retrying with correction"
                );
                request = self.with_correction(messages);
                continue;
            }

            let cleaned = self.filter.clean(&raw);
            let reply = self.accept(&key, &raw, cleaned, attempts, contaminated);
            return Ok(reply);
        }
    }

    /// Streams raw fragments to `on_token`, then cleans the whole response
    /// once and caches it under the request's key.
    ///
    /// Always calls the model; never retries.
    pub async fn send_streaming<F, Fut>(
        &self,
        messages: &[ChatMessage],
        mut on_token: F,
    ) -> Result<Reply>
    where
        F: FnMut(String) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let key = cache_key(messages);
        let mut stream = self.client.stream(messages, &self.params).await?;
        let mut raw = String::new();

        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            raw.push_str(&fragment);
            on_token(fragment).await;
        }

        let contaminated = self.filter.should_retry(&raw);
        let cleaned = self.filter.clean(&raw);
        Ok(self.accept(&key, &raw, cleaned, 1, contaminated))
    }

    fn with_correction(&self, messages: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut request = messages.to_vec();
        if let Some(last) = request.last_mut() {
            last.content.push_str(&self.correction);
        }
        request
    }

    fn accept(
        &self,
        key: &str,
        raw: &str,
        cleaned: CleanResult,
        attempts: u32,
        budget_exhausted: bool,
    ) -> Reply {
        let quality = self.filter.quality_score(&cleaned.cleaned, raw);
        debug!(
            score = quality.score,
            issues = ?quality.issues,
            attempts,
            "Response quality"
        );

        let advisory = (cleaned.still_contaminated || budget_exhausted).then(|| {
            info!(
                remaining = cleaned.remaining_count,
                confidence = cleaned.confidence,
                "Contamination survived the retry budget"
            );
            ContaminationAdvisory {
                remaining_count: cleaned.remaining_count,
                confidence: cleaned.confidence,
                budget_exhausted,
            }
        });

        self.cache.put(key, cleaned.cleaned.clone());

        Reply {
            text: cleaned.cleaned,
            attempts,
            from_cache: false,
            advisory,
        }
    }
}
