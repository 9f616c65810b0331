//! Shared fixtures: a scripted fetcher and a fault-injecting storage.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rustkit_offline::{
    AgentConfig, AssetManifest, Cache, CacheMode, CacheStorage, CachedResponse, CoreSet,
    FetchRequest, FetchResponse, Fetcher, Manifest, MemoryCacheStorage, OfflineAgent,
    OfflineError, OfflineResult, ResourceKey,
};

pub const ORIGIN: &str = "https://app.example.com";

#[derive(Debug, Clone)]
enum Scripted {
    Body(u16, String),
    Fail,
}

/// Fetcher that answers from a script keyed by URL path and records calls.
///
/// Unscripted paths answer 200 with the path as the body.
#[derive(Default)]
pub struct MockFetcher {
    script: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<(String, CacheMode)>>,
    offline: AtomicBool,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, path: &str, body: &str) {
        self.script
            .lock()
            .unwrap()
            .insert(path.to_string(), Scripted::Body(200, body.to_string()));
    }

    pub fn serve_status(&self, path: &str, status: u16) {
        self.script
            .lock()
            .unwrap()
            .insert(path.to_string(), Scripted::Body(status, String::new()));
    }

    pub fn fail(&self, path: &str) {
        self.script
            .lock()
            .unwrap()
            .insert(path.to_string(), Scripted::Fail);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, CacheMode)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> OfflineResult<FetchResponse> {
        let path = request.url.path().to_string();
        self.calls
            .lock()
            .unwrap()
            .push((path.clone(), request.cache_mode));

        if self.offline.load(Ordering::SeqCst) {
            return Err(OfflineError::network(format!("offline: {}", request.url)));
        }

        let scripted = self.script.lock().unwrap().get(&path).cloned();
        match scripted {
            Some(Scripted::Fail) => Err(OfflineError::network(format!(
                "connection reset: {}",
                request.url
            ))),
            Some(Scripted::Body(status, body)) => {
                Ok(FetchResponse::new(request.url.as_str(), status, body))
            }
            None => Ok(FetchResponse::new(request.url.as_str(), 200, path)),
        }
    }
}

/// Memory storage whose `put` fails for one chosen container.
#[derive(Default)]
pub struct FailingStorage {
    inner: MemoryCacheStorage,
    fail_puts_in: Arc<Mutex<Option<String>>>,
}

impl FailingStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_puts_in(&self, name: &str) {
        *self.fail_puts_in.lock().unwrap() = Some(name.to_string());
    }
}

struct FailingCache {
    inner: Arc<dyn Cache>,
    fail_puts_in: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl Cache for FailingCache {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, key: &ResourceKey) -> OfflineResult<Option<CachedResponse>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &ResourceKey, response: CachedResponse) -> OfflineResult<()> {
        let failing = self.fail_puts_in.lock().unwrap().clone();
        if failing.as_deref() == Some(self.inner.name()) {
            return Err(OfflineError::storage("quota exceeded"));
        }
        self.inner.put(key, response).await
    }

    async fn delete(&self, key: &ResourceKey) -> OfflineResult<bool> {
        self.inner.delete(key).await
    }

    async fn keys(&self) -> OfflineResult<Vec<ResourceKey>> {
        self.inner.keys().await
    }
}

#[async_trait]
impl CacheStorage for FailingStorage {
    async fn open(&self, name: &str) -> OfflineResult<Arc<dyn Cache>> {
        let inner = self.inner.open(name).await?;
        Ok(Arc::new(FailingCache {
            inner,
            fail_puts_in: Arc::clone(&self.fail_puts_in),
        }))
    }

    async fn has(&self, name: &str) -> OfflineResult<bool> {
        self.inner.has(name).await
    }

    async fn delete(&self, name: &str) -> OfflineResult<bool> {
        self.inner.delete(name).await
    }

    async fn names(&self) -> OfflineResult<Vec<String>> {
        self.inner.names().await
    }
}

pub fn config() -> AgentConfig {
    AgentConfig::for_origin(ORIGIN).unwrap()
}

pub fn assets(resources: &[(&str, &str)], core: &[&str]) -> AssetManifest {
    AssetManifest::new(
        Manifest::from_pairs(resources.iter().copied()),
        CoreSet::new(core.iter().copied()),
    )
    .unwrap()
}

pub fn agent(
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<MockFetcher>,
    assets: AssetManifest,
) -> OfflineAgent {
    OfflineAgent::new(config(), assets, storage, fetcher).0
}

/// Install and activate a fresh agent for `assets`.
pub async fn deploy(
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<MockFetcher>,
    assets: AssetManifest,
) -> OfflineAgent {
    let agent = agent(storage, fetcher, assets);
    agent.install().await.unwrap();
    agent.activate().await.unwrap();
    agent
}

pub fn request(path: &str) -> FetchRequest {
    FetchRequest::parse(&format!("{}{}", ORIGIN, path)).unwrap()
}

/// Sorted keys of a container, or `None` when it does not exist.
pub async fn keys_of(storage: &dyn CacheStorage, name: &str) -> Option<Vec<String>> {
    if !storage.has(name).await.unwrap() {
        return None;
    }
    let cache = storage.open(name).await.unwrap();
    let mut keys: Vec<String> = cache
        .keys()
        .await
        .unwrap()
        .into_iter()
        .map(|k| k.as_str().to_string())
        .collect();
    keys.sort();
    Some(keys)
}

pub async fn body_of(storage: &dyn CacheStorage, name: &str, key: &str) -> Option<String> {
    let cache = storage.open(name).await.unwrap();
    cache
        .get(&ResourceKey::new(key))
        .await
        .unwrap()
        .and_then(|entry| entry.text().map(str::to_string))
}
