//! Agent configuration

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{OfflineError, OfflineResult};

/// Default name of the staging container filled during install.
pub const TEMP_CACHE: &str = "offline-temp-cache";

/// Default name of the long-lived container requests are served from.
pub const CONTENT_CACHE: &str = "offline-app-cache";

/// Default name of the container holding the last applied manifest.
pub const MANIFEST_CACHE: &str = "offline-app-manifest";

/// Origin used when none is configured.
pub const DEFAULT_ORIGIN: &str = "http://localhost/";

static DEFAULT_ORIGIN_URL: LazyLock<Url> =
    LazyLock::new(|| Url::parse(DEFAULT_ORIGIN).expect("DEFAULT_ORIGIN is a valid URL"));

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Origin the agent serves; keys are resolved relative to it
    pub origin: Url,

    /// Container names
    pub cache_names: CacheNames,

    /// Root directory of the on-disk cache storage
    pub storage_dir: PathBuf,

    /// Request skip-waiting as soon as install starts
    pub skip_waiting_on_install: bool,

    /// Network settings
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheNames {
    /// Transient container filled during install
    pub staging: String,

    /// Persistent container requests are served from
    pub content: String,

    /// Single-entry container holding the applied manifest
    pub manifest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// User agent string
    pub user_agent: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Upper bound on parallel downloads when filling the cache
    pub max_concurrent_fetches: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN_URL.clone(),
            cache_names: CacheNames::default(),
            storage_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("rustkit-offline"),
            skip_waiting_on_install: true,
            fetch: FetchConfig::default(),
        }
    }
}

impl Default for CacheNames {
    fn default() -> Self {
        Self {
            staging: TEMP_CACHE.to_string(),
            content: CONTENT_CACHE.to_string(),
            manifest: MANIFEST_CACHE.to_string(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("RustKit-Offline/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            max_concurrent_fetches: 6,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AgentConfig {
    /// Create a configuration for the given origin with default settings.
    pub fn for_origin(origin: &str) -> OfflineResult<Self> {
        let config = Self {
            origin: Url::parse(origin)?,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_file(path: &Path) -> OfflineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the agent relies on.
    pub fn validate(&self) -> OfflineResult<()> {
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(OfflineError::config(format!(
                "origin must be http or https, got '{}'",
                self.origin.scheme()
            )));
        }
        if self.origin.host_str().is_none() {
            return Err(OfflineError::config("origin has no host"));
        }

        let names = [
            &self.cache_names.staging,
            &self.cache_names.content,
            &self.cache_names.manifest,
        ];
        if names.iter().any(|n| n.is_empty()) {
            return Err(OfflineError::config("cache names must not be empty"));
        }
        if names[0] == names[1] || names[0] == names[2] || names[1] == names[2] {
            return Err(OfflineError::config("cache names must be distinct"));
        }

        if self.fetch.max_concurrent_fetches == 0 {
            return Err(OfflineError::config("max_concurrent_fetches must be at least 1"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(OfflineError::config("timeout_secs must be at least 1"));
        }
        Ok(())
    }
}
