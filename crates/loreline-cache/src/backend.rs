use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Pluggable cache storage. The in-memory backend ships with the core; a
/// shared backend (e.g. a networked store) implements the same trait.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;
    /// Delete every key matching `pattern` (a literal with an optional
    /// trailing `*`). Returns the number of deleted entries.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// Process-wide in-memory backend with per-entry TTL.
///
/// Expired entries are dropped lazily on read and swept opportunistically on
/// writes once the map grows past `sweep_threshold`.
pub struct InMemoryBackend {
    entries: DashMap<String, Entry>,
    sweep_threshold: usize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            sweep_threshold: 4096,
        }
    }

    fn sweep_if_needed(&self) {
        if self.entries.len() < self.sweep_threshold {
            return;
        }
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Drop the expired entry outside the read guard.
        self.entries
            .remove_if(key, |_, e| e.expires_at <= Instant::now());
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        self.sweep_if_needed();
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut deleted = 0u64;
        match pattern.strip_suffix('*') {
            Some(prefix) => {
                let keys: Vec<String> = self
                    .entries
                    .iter()
                    .filter(|e| e.key().starts_with(prefix))
                    .map(|e| e.key().clone())
                    .collect();
                for key in keys {
                    if self.entries.remove(&key).is_some() {
                        deleted += 1;
                    }
                }
            }
            None => {
                if self.entries.remove(pattern).is_some() {
                    deleted = 1;
                }
            }
        }
        Ok(deleted)
    }
}
