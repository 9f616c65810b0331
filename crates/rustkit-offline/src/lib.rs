//! # RustKit Offline
//!
//! Offline asset agent for the RustKit browser engine: keeps a versioned set
//! of static assets cached on the client and reconciles that cache whenever a
//! new build ships.
//!
//! ## Features
//!
//! - **Install**: stage the core set with cache-busting downloads
//! - **Activate**: diff the applied manifest against the new one, evict stale
//!   entries, merge staged ones, purge everything on failure
//! - **Fetch interception**: cache-first for assets, online-first for `/`
//! - **Commands**: `skipWaiting`, `downloadOffline`
//!
//! ## Architecture
//!
//! ```text
//! AgentRegistration (host)
//!     └── OfflineAgent (one per deployed version)
//!             ├── RequestRouter ── strategy::{cache_first, online_first}
//!             ├── Fetcher (HttpFetcher)
//!             └── CacheStorage (MemoryCacheStorage | DiskCacheStorage)
//!                     ├── staging
//!                     ├── content
//!                     └── manifest
//! ```

pub mod agent;
pub mod cache;
pub mod config;
pub mod error;
pub mod manifest;
pub mod message;
pub mod net;
pub mod registration;
pub mod router;
pub mod strategy;

pub use agent::{
    AgentEvent, AgentId, AgentState, FetchOutcome, OfflineAgent, ProvisionReport,
    ReconcileReport, MANIFEST_ENTRY,
};
pub use cache::{Cache, CacheStorage, CachedResponse, DiskCacheStorage, MemoryCacheStorage};
pub use config::{AgentConfig, CacheNames, FetchConfig};
pub use error::{OfflineError, OfflineResult};
pub use manifest::{AssetManifest, CoreSet, Fingerprint, Manifest, ManifestDiff, ResourceKey};
pub use message::{Command, MessageOutcome};
pub use net::{CacheMode, FetchRequest, FetchResponse, Fetcher, HttpFetcher};
pub use registration::{AgentRegistration, MessageTarget};
pub use router::{RequestRouter, RouteDecision};
