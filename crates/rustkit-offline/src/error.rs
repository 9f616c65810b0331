//! Error types for the offline agent.

use thiserror::Error;

/// Result type alias for offline agent operations.
pub type OfflineResult<T> = Result<T, OfflineError>;

/// Errors that can occur while provisioning, reconciling or serving assets.
#[derive(Error, Debug)]
pub enum OfflineError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Bad response for {url}: status {status}")]
    BadStatus { url: String, status: u16 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OfflineError {
    /// Create a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a manifest error.
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    /// Create a state error.
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the failure came from the network rather than local storage.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::BadStatus { .. })
    }

    /// Short category name, used as a structured log field.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::BadStatus { .. } => "bad_status",
            Self::Storage(_) => "storage",
            Self::Manifest(_) => "manifest",
            Self::State(_) => "state",
            Self::Provisioning(_) => "provisioning",
            Self::Config(_) => "config",
            Self::InvalidUrl(_) => "invalid_url",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}
