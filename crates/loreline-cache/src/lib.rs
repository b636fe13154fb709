//! Advisory, key-scoped value cache with TTL.
//!
//! The cache never fails a caller: backend errors are logged, counted in the
//! statistics, and reported as a miss (`get` → `None`, `set` → `false`).
//! Cache unavailability changes performance, never functional outcomes.

pub mod backend;
pub mod keys;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

pub use backend::{CacheBackend, CacheError, InMemoryBackend};
pub use keys::{CacheKeyBuilder, CacheResource};

/// Hit/miss/error counters, cheap enough to keep always-on.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStatsSnapshot {
            hits,
            misses,
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

/// The process-wide cache capability.
///
/// Constructed with `disabled()` when no backend is configured; every
/// operation then degrades to a no-op miss.
pub struct Cache {
    backend: Option<Arc<dyn CacheBackend>>,
    pub stats: CacheStats,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend: Some(backend),
            stats: CacheStats::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()))
    }

    pub fn disabled() -> Self {
        Self {
            backend: None,
            stats: CacheStats::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let backend = self.backend.as_ref()?;
        match backend.get(key).await {
            Ok(Some(value)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %e, "cache get failed");
                None
            }
        }
    }

    /// Returns `false` when the write was skipped or failed. Callers never
    /// treat that as an error.
    pub async fn set(&self, key: &str, value: Value, ttl: Duration) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };
        match backend.set(key, value, ttl).await {
            Ok(()) => true,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %e, "cache set failed");
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };
        match backend.delete(key).await {
            Ok(deleted) => deleted,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %e, "cache delete failed");
                false
            }
        }
    }

    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        let Some(backend) = self.backend.as_ref() else {
            return 0;
        };
        match backend.delete_pattern(pattern).await {
            Ok(n) => n,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(pattern, error = %e, "cache delete_pattern failed");
                0
            }
        }
    }

    /// Wipe everything cached for one site.
    pub async fn invalidate_site(&self, builder: &CacheKeyBuilder, scope: &loreline_core::Scope) -> u64 {
        self.delete_pattern(&builder.site_pattern(scope)).await
    }

    /// Read-through: on a miss, run `factory` and cache its value.
    ///
    /// A `None` from the factory is not cached.
    pub async fn get_or_set<F, Fut>(&self, key: &str, ttl: Duration, factory: F) -> Option<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<Value>>,
    {
        if let Some(hit) = self.get(key).await {
            return Some(hit);
        }
        let value = factory().await?;
        self.set(key, value.clone(), ttl).await;
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreline_core::Scope;
    use serde_json::json;

    #[tokio::test]
    async fn get_returns_written_value_before_ttl() {
        let cache = Cache::in_memory();
        cache
            .set("k1", json!({"a": 1}), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("k1").await, Some(json!({"a": 1})));
        assert_eq!(cache.stats.snapshot().hits, 1);
    }

    #[tokio::test]
    async fn expired_entry_reads_as_miss() {
        let cache = Cache::in_memory();
        cache.set("k1", json!(1), Duration::from_millis(0)).await;
        assert_eq!(cache.get("k1").await, None);
        assert_eq!(cache.stats.snapshot().misses, 1);
    }

    #[tokio::test]
    async fn disabled_cache_is_a_silent_miss() {
        let cache = Cache::disabled();
        assert!(!cache.set("k1", json!(1), Duration::from_secs(60)).await);
        assert_eq!(cache.get("k1").await, None);
    }

    #[tokio::test]
    async fn site_invalidation_only_touches_one_site() {
        let cache = Cache::in_memory();
        let builder = CacheKeyBuilder::default();
        let s1 = Scope::new("t1", "s1");
        let s2 = Scope::new("t1", "s2");
        let ttl = Duration::from_secs(60);

        cache.set(&builder.npc_profile(&s1, "a"), json!(1), ttl).await;
        cache.set(&builder.prompt_active(&s1, "a"), json!(2), ttl).await;
        cache.set(&builder.npc_profile(&s2, "a"), json!(3), ttl).await;

        let deleted = cache.invalidate_site(&builder, &s1).await;
        assert_eq!(deleted, 2);
        assert_eq!(cache.get(&builder.npc_profile(&s1, "a")).await, None);
        assert_eq!(cache.get(&builder.npc_profile(&s2, "a")).await, Some(json!(3)));
    }

    #[tokio::test]
    async fn get_or_set_runs_factory_once() {
        let cache = Cache::in_memory();
        let v = cache
            .get_or_set("k", Duration::from_secs(60), || async { Some(json!(42)) })
            .await;
        assert_eq!(v, Some(json!(42)));
        // Second read must come from the cache, not the factory.
        let v = cache
            .get_or_set("k", Duration::from_secs(60), || async { Some(json!(0)) })
            .await;
        assert_eq!(v, Some(json!(42)));
    }
}
