//! In-memory cache storage.

use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;

use super::{Cache, CacheStorage, CachedResponse};
use crate::error::OfflineResult;
use crate::manifest::ResourceKey;

/// A cache container held in memory.
#[derive(Debug, Default)]
pub struct MemoryCache {
    name: String,
    entries: RwLock<HashMap<ResourceKey, CachedResponse>>,
}

impl MemoryCache {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &ResourceKey) -> OfflineResult<Option<CachedResponse>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &ResourceKey, response: CachedResponse) -> OfflineResult<()> {
        self.entries.write().await.insert(key.clone(), response);
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> OfflineResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn keys(&self) -> OfflineResult<Vec<ResourceKey>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

/// Cache storage kept in process memory.
///
/// Deleting a container drops it from the map; handles opened earlier keep
/// pointing at the detached instance, so their writes are never visible again.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Arc<MemoryCache>>>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> OfflineResult<Arc<dyn Cache>> {
        let mut caches = self.caches.write().await;
        let cache = caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCache::new(name)))
            .clone();
        Ok(cache)
    }

    async fn has(&self, name: &str) -> OfflineResult<bool> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> OfflineResult<bool> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn names(&self) -> OfflineResult<Vec<String>> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn entry(body: &'static str) -> CachedResponse {
        CachedResponse {
            url: "https://example.com/a.js".to_string(),
            status: 200,
            headers: HashMap::new(),
            body: Bytes::from_static(body.as_bytes()),
            cached_at: 0,
        }
    }

    #[tokio::test]
    async fn test_open_creates_lazily() {
        let storage = MemoryCacheStorage::new();
        assert!(!storage.has("v1").await.unwrap());

        storage.open("v1").await.unwrap();
        assert!(storage.has("v1").await.unwrap());
        assert_eq!(storage.names().await.unwrap(), vec!["v1".to_string()]);
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let storage = MemoryCacheStorage::new();
        let cache = storage.open("v1").await.unwrap();
        let key = ResourceKey::from("a.js");

        cache.put(&key, entry("one")).await.unwrap();
        cache.put(&key, entry("two")).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(entry("two")));
        assert_eq!(cache.keys().await.unwrap(), vec![key.clone()]);

        assert!(cache.delete(&key).await.unwrap());
        assert!(!cache.delete(&key).await.unwrap());
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reopen_shares_entries() {
        let storage = MemoryCacheStorage::new();
        let key = ResourceKey::from("a.js");
        storage.open("v1").await.unwrap().put(&key, entry("x")).await.unwrap();

        let again = storage.open("v1").await.unwrap();
        assert!(again.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_orphans_old_handles() {
        let storage = MemoryCacheStorage::new();
        let key = ResourceKey::from("a.js");
        let stale = storage.open("v1").await.unwrap();

        assert!(storage.delete("v1").await.unwrap());
        stale.put(&key, entry("late")).await.unwrap();

        assert!(!storage.has("v1").await.unwrap());
        let fresh = storage.open("v1").await.unwrap();
        assert!(fresh.keys().await.unwrap().is_empty());
    }
}
