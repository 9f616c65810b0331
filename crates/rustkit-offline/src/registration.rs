//! Host-side registration: the slots successive agent versions move through.
//!
//! ```text
//! AgentRegistration (one scope)
//!     ├── installing (OfflineAgent)
//!     ├── waiting    (OfflineAgent)
//!     └── active     (OfflineAgent)  ← receives fetches
//! ```

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};
use url::Url;

use crate::agent::{FetchOutcome, OfflineAgent, ReconcileReport};
use crate::error::OfflineResult;
use crate::message::MessageOutcome;
use crate::net::FetchRequest;

/// Which agent a page message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    Waiting,
    Active,
}

/// A scope's agent slots.
pub struct AgentRegistration {
    /// Scope URL.
    pub scope: Url,

    installing: Option<Arc<OfflineAgent>>,
    waiting: Option<Arc<OfflineAgent>>,
    active: Option<Arc<OfflineAgent>>,

    /// Last update time.
    last_update: Option<Instant>,
}

impl AgentRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            last_update: None,
        }
    }

    pub fn installing(&self) -> Option<&Arc<OfflineAgent>> {
        self.installing.as_ref()
    }

    pub fn waiting(&self) -> Option<&Arc<OfflineAgent>> {
        self.waiting.as_ref()
    }

    pub fn active(&self) -> Option<&Arc<OfflineAgent>> {
        self.active.as_ref()
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    /// Install a new version and activate it when nothing is active or it
    /// asked to skip waiting.
    ///
    /// Returns the reconcile report when activation ran.
    pub async fn update(
        &mut self,
        agent: Arc<OfflineAgent>,
    ) -> OfflineResult<Option<ReconcileReport>> {
        self.last_update = Some(Instant::now());
        self.installing = Some(Arc::clone(&agent));

        if let Err(e) = agent.install().await {
            warn!(agent = %agent.id(), error = %e, "Install failed; activation will purge caches");
        }

        if let Some(replaced) = self.waiting.take() {
            replaced.retire().await;
        }
        self.waiting = self.installing.take();

        if self.active.is_none() || agent.skip_waiting_requested() {
            self.activate_waiting().await
        } else {
            info!(agent = %agent.id(), "Installed, waiting for clients to release the active agent");
            Ok(None)
        }
    }

    /// Activate the waiting agent, superseding the active one.
    ///
    /// The new agent becomes active even when reconciliation fails; it is then
    /// purged and passes every request through to the network.
    pub async fn activate_waiting(&mut self) -> OfflineResult<Option<ReconcileReport>> {
        let Some(agent) = self.waiting.take() else {
            return Ok(None);
        };

        let result = agent.activate().await;
        if let Some(previous) = self.active.replace(Arc::clone(&agent)) {
            previous.retire().await;
        }
        result.map(Some)
    }

    /// Route an intercepted request to the active agent.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> OfflineResult<FetchOutcome> {
        match &self.active {
            Some(agent) => agent.handle_fetch(request).await,
            None => Ok(FetchOutcome::Passthrough),
        }
    }

    /// Deliver a page message.
    pub async fn post_message(
        &mut self,
        target: MessageTarget,
        payload: &str,
    ) -> OfflineResult<MessageOutcome> {
        let agent = match target {
            MessageTarget::Waiting => self.waiting.clone(),
            MessageTarget::Active => self.active.clone(),
        };
        let Some(agent) = agent else {
            return Ok(MessageOutcome::Ignored);
        };

        let outcome = agent.handle_message(payload).await?;
        if target == MessageTarget::Waiting && agent.skip_waiting_requested() {
            self.activate_waiting().await?;
        }
        Ok(outcome)
    }

    /// Retire every agent in the registration.
    pub async fn unregister(&mut self) {
        for agent in [
            self.installing.take(),
            self.waiting.take(),
            self.active.take(),
        ]
        .into_iter()
        .flatten()
        {
            agent.retire().await;
        }
    }
}
