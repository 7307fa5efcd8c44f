//! Process-local cache of sanitized model responses.
//!
//! Keys are derived from the exact outbound message list, so two requests
//! share an entry only when every role and every byte of content match.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::model::ChatMessage;

/// Derives the cache key for a message list.
///
/// SHA-256 over each message's role and content, encoded as unpadded
/// URL-safe base64 (43 characters).
#[must_use]
pub fn cache_key(messages: &[ChatMessage]) -> String {
    let mut hasher = Sha256::new();
    for message in messages {
        hasher.update(message.role.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(message.content.as_bytes());
        hasher.update([0u8]);
    }
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

#[derive(Debug)]
struct CacheEntry {
    value: String,
    stored_at: Instant,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    // insertion order, oldest first
    order: VecDeque<String>,
}

impl CacheInner {
    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}

/// TTL + FIFO bounded response cache.
#[derive(Debug)]
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            ttl: Duration::from_secs(config.ttl_secs),
            max_entries: config.max_entries.max(1),
        }
    }

    /// Returns the live value for `key`. Expired entries are dropped.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        let fresh = inner
            .entries
            .get(key)
            .map(|entry| entry.stored_at.elapsed() < self.ttl)?;
        if fresh {
            return inner.entries.get(key).map(|entry| entry.value.clone());
        }
        inner.remove(key);
        None
    }

    /// Stores `value` and evicts the oldest entries above capacity.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&key) {
            inner.remove(&key);
        }
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                value: value.into(),
                stored_at: Instant::now(),
            },
        );
        inner.order.push_back(key);

        while inner.entries.len() > self.max_entries {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
