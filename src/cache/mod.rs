//! Cache layer: TTL key-value cache with tenant-namespaced invalidation.
//!
//! TTL is enforced here at read time against the entry's insertion instant,
//! so a `CacheStore` never has to expire anything itself. Stale reads within
//! the TTL window are accepted; invalidation and reads are allowed to race.

pub mod keys;
pub mod store;

pub use keys::CacheKey;
pub use store::{CacheEntry, CacheStore, MemoryCacheStore};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::CacheConfig;

/// TTL-enforcing cache over a `CacheStore`.
pub struct Cache {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    /// Process-local cache with the given settings.
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()), config)
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    pub fn list_ttl(&self) -> Duration {
        self.config.list_ttl
    }

    /// Read a value. Expired entries are deleted and reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.store.get(key).await?;
        if entry.is_expired() {
            self.store.delete(key).await;
            debug!(key, "Cache entry expired");
            return None;
        }
        match serde_json::from_value(entry.value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Dropping undecodable cache entry");
                self.store.delete(key).await;
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_value(value) {
            Ok(value) => self.store.set(key, CacheEntry::new(value, ttl)).await,
            Err(e) => warn!(key, error = %e, "Value not cacheable"),
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.store.delete(key).await
    }

    pub async fn list_keys_by_prefix(&self, prefix: &str) -> Vec<String> {
        self.store.list_keys_by_prefix(prefix).await
    }

    /// Read-through helper: return the cached value or load, store, and return it.
    /// Loader errors are passed through and nothing is cached.
    pub async fn get_or_load<T, E, F, Fut>(&self, key: &str, ttl: Duration, load: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            debug!(key, "Cache hit");
            return Ok(hit);
        }
        debug!(key, "Cache miss");
        let value = load().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    /// Delete every key under a prefix. Returns the number removed.
    pub async fn delete_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0;
        for key in self.store.list_keys_by_prefix(prefix).await {
            if self.store.delete(&key).await {
                removed += 1;
            }
        }
        removed
    }

    /// Drop everything cached for a tenant.
    pub async fn invalidate_tenant(&self, user_id: &str) -> usize {
        let mut removed = 0;
        for prefix in CacheKey::tenant_prefixes(user_id) {
            removed += self.delete_prefix(&prefix).await;
        }
        debug!(user_id, removed, "Tenant cache invalidated");
        removed
    }

    /// Drop the entries derived from one call, plus the tenant views that include it.
    pub async fn invalidate_call(&self, user_id: &str, call_id: Uuid) -> usize {
        let mut removed = 0;
        for key in [
            CacheKey::call(user_id, call_id),
            CacheKey::call_analysis(user_id, call_id),
            CacheKey::enrichment(user_id, call_id),
            CacheKey::analysis_summary(user_id),
        ] {
            if self.store.delete(&key).await {
                removed += 1;
            }
        }
        removed += self
            .delete_prefix(&CacheKey::recordings_pages(user_id))
            .await;
        debug!(user_id, call_id = %call_id, removed, "Call cache invalidated");
        removed
    }

    /// Remove all expired entries. Returns the number removed.
    pub async fn sweep(&self) -> usize {
        let mut removed = 0;
        for key in self.store.list_keys_by_prefix("").await {
            if let Some(entry) = self.store.get(&key).await
                && entry.is_expired()
                && self.store.delete(&key).await
            {
                removed += 1;
            }
        }
        removed
    }
}

/// Spawn a background task that periodically sweeps expired entries.
pub fn spawn_sweep_task(cache: Arc<Cache>) -> tokio::task::JoinHandle<()> {
    let period = cache.config.sweep_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let removed = cache.sweep().await;
            if removed > 0 {
                debug!(removed, "Swept expired cache entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> Cache {
        Cache::in_memory(CacheConfig::default())
    }

    #[tokio::test]
    async fn get_returns_typed_value() {
        let cache = cache();
        cache
            .set("call:u1:x", &vec![1u32, 2, 3], Duration::from_secs(60))
            .await;
        let value: Vec<u32> = cache.get("call:u1:x").await.unwrap();
        assert_eq!(value, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss_and_is_removed() {
        let cache = cache();
        cache.set("k", &"v", Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get::<String>("k").await.is_none());
        assert!(cache.list_keys_by_prefix("k").await.is_empty());
    }

    #[tokio::test]
    async fn get_or_load_only_loads_on_miss() {
        let cache = cache();
        let mut calls = 0;
        let first: Result<u32, String> = cache
            .get_or_load("n", Duration::from_secs(60), || {
                calls += 1;
                async { Ok(7) }
            })
            .await;
        assert_eq!(first.unwrap(), 7);

        let second: Result<u32, String> = cache
            .get_or_load("n", Duration::from_secs(60), || async { Ok(99) })
            .await;
        assert_eq!(second.unwrap(), 7);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn loader_errors_are_not_cached() {
        let cache = cache();
        let failed: Result<u32, String> = cache
            .get_or_load("n", Duration::from_secs(60), || async { Err("db down".into()) })
            .await;
        assert!(failed.is_err());
        assert!(cache.get::<u32>("n").await.is_none());
    }

    #[tokio::test]
    async fn tenant_invalidation_clears_namespace_only() {
        let cache = cache();
        let ttl = Duration::from_secs(60);
        let call_id = Uuid::new_v4();
        for key in [
            CacheKey::recordings_page("u1", 1),
            CacheKey::active_calls("u1"),
            CacheKey::call("u1", call_id),
            CacheKey::call_analysis("u1", call_id),
            CacheKey::analysis_summary("u1"),
            CacheKey::enrichment("u1", call_id),
            CacheKey::recordings_page("u2", 1),
        ] {
            cache.set(&key, &1, ttl).await;
        }

        assert_eq!(cache.invalidate_tenant("u1").await, 6);
        assert!(cache.get::<i32>(&CacheKey::call("u1", call_id)).await.is_none());
        assert!(cache.get::<i32>(&CacheKey::analysis_summary("u1")).await.is_none());
        assert_eq!(cache.get::<i32>(&CacheKey::recordings_page("u2", 1)).await, Some(1));
    }

    #[tokio::test]
    async fn call_invalidation_keeps_other_calls() {
        let cache = cache();
        let ttl = Duration::from_secs(60);
        let target = Uuid::new_v4();
        let other = Uuid::new_v4();
        for key in [
            CacheKey::call("u1", target),
            CacheKey::call_analysis("u1", target),
            CacheKey::enrichment("u1", target),
            CacheKey::analysis_summary("u1"),
            CacheKey::recordings_page("u1", 1),
            CacheKey::recordings_page("u1", 2),
            CacheKey::call("u1", other),
            CacheKey::active_calls("u1"),
        ] {
            cache.set(&key, &1, ttl).await;
        }

        assert_eq!(cache.invalidate_call("u1", target).await, 6);
        assert_eq!(cache.get::<i32>(&CacheKey::call("u1", other)).await, Some(1));
        assert_eq!(cache.get::<i32>(&CacheKey::active_calls("u1")).await, Some(1));
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let cache = cache();
        cache.set("short", &1, Duration::from_millis(5)).await;
        cache.set("long", &1, Duration::from_secs(60)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.list_keys_by_prefix("").await, vec!["long".to_string()]);
    }
}
