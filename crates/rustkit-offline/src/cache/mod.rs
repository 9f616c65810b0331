//! Named cache containers.
//!
//! ```text
//! CacheStorage
//!     ├── staging        (install-time downloads of the core set)
//!     ├── content        (everything requests are served from)
//!     └── manifest       (one entry: the last applied manifest)
//!             └── ResourceKey → CachedResponse
//! ```
//!
//! Storage is injected into the agent as a trait object so reconciliation can
//! run against the in-memory backend in tests and the disk backend in a host.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::OfflineResult;
use crate::manifest::ResourceKey;
use crate::net::FetchResponse;

pub mod disk;
pub mod memory;

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// URL the response was fetched from.
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CachedResponse {
    /// Snapshot a network response for storage.
    pub fn from_response(response: &FetchResponse) -> Self {
        Self {
            url: response.url.clone(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            cached_at: now_millis(),
        }
    }

    /// Build a synthetic JSON entry, used for the stored manifest.
    pub fn json(url: impl Into<String>, body: String) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            url: url.into(),
            status: 200,
            headers,
            body: Bytes::from(body),
            cached_at: now_millis(),
        }
    }

    /// Check if the stored status is 2xx.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// A single named key → response container.
///
/// Each call is atomic from the caller's point of view. Handles outlive
/// deletion of their container; writes through an orphaned handle are dropped.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Container name.
    fn name(&self) -> &str;

    /// Look up an entry.
    async fn get(&self, key: &ResourceKey) -> OfflineResult<Option<CachedResponse>>;

    /// Insert or overwrite an entry.
    async fn put(&self, key: &ResourceKey, response: CachedResponse) -> OfflineResult<()>;

    /// Remove an entry. Returns whether it existed.
    async fn delete(&self, key: &ResourceKey) -> OfflineResult<bool>;

    /// All keys currently stored.
    async fn keys(&self) -> OfflineResult<Vec<ResourceKey>>;
}

/// The set of named containers.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a container, creating it if it does not exist.
    async fn open(&self, name: &str) -> OfflineResult<Arc<dyn Cache>>;

    /// Check if a container exists.
    async fn has(&self, name: &str) -> OfflineResult<bool>;

    /// Delete a container and all of its entries. Returns whether it existed.
    async fn delete(&self, name: &str) -> OfflineResult<bool>;

    /// Names of all existing containers.
    async fn names(&self) -> OfflineResult<Vec<String>>;
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
