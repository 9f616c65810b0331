//! Out-of-band commands posted by the page.

/// Payload asking a waiting agent to take over immediately.
pub const SKIP_WAITING: &str = "skipWaiting";

/// Payload asking the agent to download every resource not yet cached.
pub const DOWNLOAD_OFFLINE: &str = "downloadOffline";

/// A recognized command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Stop waiting for existing clients and activate now.
    ForceActivate,
    /// Fetch and store every manifest resource missing from the content cache.
    FillAllResources,
}

impl Command {
    /// Parse a message payload. Unrecognized payloads yield `None`.
    pub fn parse(payload: &str) -> Option<Self> {
        match payload {
            SKIP_WAITING => Some(Self::ForceActivate),
            DOWNLOAD_OFFLINE => Some(Self::FillAllResources),
            _ => None,
        }
    }

    /// Wire payload for this command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForceActivate => SKIP_WAITING,
            Self::FillAllResources => DOWNLOAD_OFFLINE,
        }
    }
}

/// What handling a message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The agent asked its host to activate it without waiting.
    SkipWaitingRequested,
    /// Missing resources were downloaded into the content cache.
    Filled { fetched: usize },
    /// Unknown payload, or a command not applicable in the current state.
    Ignored,
}
