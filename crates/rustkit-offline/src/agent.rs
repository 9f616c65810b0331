//! Lifecycle controller for one deployed asset version.
//!
//! ```text
//! Parsed ──install──▶ Provisioning ──▶ Installed ──activate──▶ Reconciling ──▶ Ready
//!                                                                  │
//!                                                                  └──(any error)──▶ Purged
//! ```
//!
//! An agent is built fresh for each version. Nothing is shared between
//! versions except the three named containers in [`CacheStorage`].

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::cache::{Cache, CacheStorage, CachedResponse};
use crate::config::AgentConfig;
use crate::error::{OfflineError, OfflineResult};
use crate::manifest::{AssetManifest, CoreSet, Manifest, ResourceKey};
use crate::message::{Command, MessageOutcome};
use crate::net::{FetchRequest, FetchResponse, Fetcher};
use crate::router::{resource_url, RequestRouter, RouteDecision};
use crate::strategy;

/// Key of the single entry in the manifest container.
pub const MANIFEST_ENTRY: &str = "manifest";

/// Unique identifier for an agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentId(u64);

impl AgentId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

/// Agent lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AgentState {
    /// Constructed, install not started.
    #[default]
    Parsed,
    /// Downloading the core set into staging.
    Provisioning,
    /// Install finished (possibly with a recorded failure).
    Installed,
    /// Diffing and merging into the content cache.
    Reconciling,
    /// Serving requests and commands.
    Ready,
    /// Reconciliation failed and every container was deleted.
    Purged,
    /// Superseded by a newer version.
    Redundant,
}

/// Notifications for the host.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    StateChange { agent: AgentId, state: AgentState },
    /// The agent wants to activate without waiting for clients to close.
    SkipWaiting { agent: AgentId },
    /// The agent now controls all clients.
    ClientsClaimed { agent: AgentId },
    Purged { agent: AgentId, reason: String },
}

/// Result of the install phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub staged: usize,
}

/// Result of the activate phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// No manifest had been applied before.
    pub first_install: bool,
    /// Entries carried over from the previous version.
    pub retained: usize,
    /// Entries deleted as stale.
    pub evicted: usize,
    /// Entries merged in from staging.
    pub staged: usize,
}

/// How an intercepted request was handled.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the host performs the request normally.
    Passthrough,
    /// Answered by the agent.
    Respond(FetchResponse),
}

/// The caching agent for one deployed version.
pub struct OfflineAgent {
    id: AgentId,
    config: Arc<AgentConfig>,
    manifest: Arc<Manifest>,
    core: CoreSet,
    router: RequestRouter,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    state: RwLock<AgentState>,
    skip_waiting: AtomicBool,
    provision_failure: Mutex<Option<String>>,
    event_tx: mpsc::UnboundedSender<AgentEvent>,
}

impl OfflineAgent {
    /// Create an agent for `assets`. Events are delivered on the returned receiver.
    pub fn new(
        config: AgentConfig,
        assets: AssetManifest,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let manifest = Arc::new(assets.resources);
        let router = RequestRouter::new(config.origin.clone(), Arc::clone(&manifest));

        let agent = Self {
            id: AgentId::new(),
            config: Arc::new(config),
            manifest,
            core: assets.core,
            router,
            storage,
            fetcher,
            state: RwLock::new(AgentState::Parsed),
            skip_waiting: AtomicBool::new(false),
            provision_failure: Mutex::new(None),
            event_tx,
        };
        debug!(agent = %agent.id, resources = agent.manifest.len(), core = agent.core.len(), "Agent created");
        (agent, event_rx)
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub async fn state(&self) -> AgentState {
        *self.state.read().await
    }

    /// Whether the agent asked to be activated without waiting.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn set_state(&self, state: AgentState) {
        *self.state.write().await = state;
        info!(agent = %self.id, ?state, "Agent state changed");
        self.emit(AgentEvent::StateChange {
            agent: self.id,
            state,
        });
    }

    /// Move `from` → `to` atomically, failing if the agent is elsewhere.
    async fn transition(&self, from: AgentState, to: AgentState) -> OfflineResult<()> {
        {
            let mut state = self.state.write().await;
            if *state != from {
                return Err(OfflineError::state(format!(
                    "{} is {:?}, expected {:?}",
                    self.id, *state, from
                )));
            }
            *state = to;
        }
        info!(agent = %self.id, state = ?to, "Agent state changed");
        self.emit(AgentEvent::StateChange {
            agent: self.id,
            state: to,
        });
        Ok(())
    }

    fn request_skip_waiting(&self) {
        if !self.skip_waiting.swap(true, Ordering::SeqCst) {
            debug!(agent = %self.id, "Skip waiting requested");
        }
        self.emit(AgentEvent::SkipWaiting { agent: self.id });
    }

    // ==================== Install ====================

    /// Download the core set into the staging cache.
    ///
    /// A failure is returned and also remembered: the following activation
    /// treats it as fatal and purges.
    pub async fn install(&self) -> OfflineResult<ProvisionReport> {
        self.transition(AgentState::Parsed, AgentState::Provisioning)
            .await?;

        if self.config.skip_waiting_on_install {
            self.request_skip_waiting();
        }

        let result = self.provision().await;
        if let Err(e) = &result {
            warn!(agent = %self.id, error = %e, "Provisioning failed");
            *self.provision_failure.lock().await = Some(e.to_string());
        }

        self.set_state(AgentState::Installed).await;
        result
    }

    async fn provision(&self) -> OfflineResult<ProvisionReport> {
        // Staging may still hold a superseded version's core set.
        let name = &self.config.cache_names.staging;
        if self.storage.delete(name).await? {
            debug!(agent = %self.id, cache = %name, "Cleared leftover staging cache");
        }
        let staging = self.storage.open(name).await?;

        let requests = self
            .core
            .iter()
            .map(|key| {
                let url = resource_url(&self.config.origin, key)?;
                Ok((key.clone(), FetchRequest::reload(url)))
            })
            .collect::<OfflineResult<Vec<_>>>()?;

        // All-or-nothing: nothing is staged unless every download succeeded.
        let responses = self.fetch_all(requests).await?;
        for (key, response) in &responses {
            staging
                .put(key, CachedResponse::from_response(response))
                .await?;
        }

        info!(agent = %self.id, staged = responses.len(), "Core resources staged");
        Ok(ProvisionReport {
            staged: responses.len(),
        })
    }

    /// Fetch with bounded concurrency. Every response must be ok.
    async fn fetch_all(
        &self,
        requests: Vec<(ResourceKey, FetchRequest)>,
    ) -> OfflineResult<Vec<(ResourceKey, FetchResponse)>> {
        let fetcher = &self.fetcher;
        stream::iter(requests)
            .map(|(key, request)| async move {
                let response = fetcher.fetch(&request).await?;
                if !response.ok() {
                    return Err(OfflineError::BadStatus {
                        url: request.url.to_string(),
                        status: response.status,
                    });
                }
                Ok((key, response))
            })
            .buffer_unordered(self.config.fetch.max_concurrent_fetches)
            .try_collect()
            .await
    }

    // ==================== Activate ====================

    /// Reconcile the content cache with this version's manifest.
    ///
    /// Runs at most once. On failure every container is deleted and the agent
    /// ends up `Purged`, so the next version starts as a first install.
    pub async fn activate(&self) -> OfflineResult<ReconcileReport> {
        self.transition(AgentState::Installed, AgentState::Reconciling)
            .await?;

        match self.reconcile().await {
            Ok(report) => {
                info!(
                    agent = %self.id,
                    first_install = report.first_install,
                    retained = report.retained,
                    evicted = report.evicted,
                    staged = report.staged,
                    "Cache reconciled"
                );
                self.set_state(AgentState::Ready).await;
                self.emit(AgentEvent::ClientsClaimed { agent: self.id });
                Ok(report)
            }
            Err(e) => {
                error!(agent = %self.id, error = %e, category = e.category(), "Failed to upgrade cache, purging");
                self.purge().await;
                self.set_state(AgentState::Purged).await;
                self.emit(AgentEvent::Purged {
                    agent: self.id,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn reconcile(&self) -> OfflineResult<ReconcileReport> {
        if let Some(failure) = self.provision_failure.lock().await.clone() {
            return Err(OfflineError::Provisioning(failure));
        }

        let names = &self.config.cache_names;
        let mut content = self.storage.open(&names.content).await?;
        let staging = self.storage.open(&names.staging).await?;
        let manifest_store = self.storage.open(&names.manifest).await?;

        let mut report = ReconcileReport::default();
        match load_manifest(manifest_store.as_ref()).await? {
            None => {
                // No record of what is in content: start from nothing.
                report.first_install = true;
                self.storage.delete(&names.content).await?;
                content = self.storage.open(&names.content).await?;
            }
            Some(old) => {
                for key in content.keys().await? {
                    if self.manifest.is_unchanged(&key, &old) {
                        report.retained += 1;
                    } else {
                        trace!(key = %key, "Evicting stale entry");
                        content.delete(&key).await?;
                        report.evicted += 1;
                    }
                }
            }
        }

        // Staged entries overwrite anything retained above.
        for key in staging.keys().await? {
            if !self.core.contains(&key) {
                warn!(agent = %self.id, key = %key, "Ignoring staged entry outside the core set");
                continue;
            }
            if let Some(entry) = staging.get(&key).await? {
                content.put(&key, entry).await?;
                report.staged += 1;
            }
        }

        self.storage.delete(&names.staging).await?;
        manifest_store
            .put(
                &ResourceKey::new(MANIFEST_ENTRY),
                CachedResponse::json(MANIFEST_ENTRY, self.manifest.to_json()?),
            )
            .await?;

        Ok(report)
    }

    async fn purge(&self) {
        let names = &self.config.cache_names;
        for name in [&names.content, &names.staging, &names.manifest] {
            if let Err(e) = self.storage.delete(name).await {
                error!(agent = %self.id, cache = %name, error = %e, "Failed to delete cache during purge");
            }
        }
    }

    /// Resume an agent whose version is already applied, e.g. after a host
    /// restart. Storage is not modified.
    pub async fn resume(&self) -> OfflineResult<()> {
        match self.applied_manifest().await? {
            Some(applied) if applied == *self.manifest => {
                self.transition(AgentState::Parsed, AgentState::Ready)
                    .await
            }
            _ => Err(OfflineError::state(format!(
                "{}: manifest in storage does not match this version",
                self.id
            ))),
        }
    }

    /// The manifest currently recorded in storage, if any.
    pub async fn applied_manifest(&self) -> OfflineResult<Option<Manifest>> {
        let name = &self.config.cache_names.manifest;
        if !self.storage.has(name).await? {
            return Ok(None);
        }
        let store = self.storage.open(name).await?;
        load_manifest(store.as_ref()).await
    }

    /// Stop intercepting; a newer version has taken over.
    pub async fn retire(&self) {
        self.set_state(AgentState::Redundant).await;
    }

    // ==================== Fetch ====================

    /// Handle an intercepted request.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> OfflineResult<FetchOutcome> {
        if self.state().await != AgentState::Ready {
            trace!(agent = %self.id, url = %request.url, "Agent not ready, not intercepting");
            return Ok(FetchOutcome::Passthrough);
        }

        let decision = self.router.route(request);
        if decision == RouteDecision::Passthrough {
            return Ok(FetchOutcome::Passthrough);
        }

        let content = self
            .storage
            .open(&self.config.cache_names.content)
            .await?;
        let fetcher = self.fetcher.as_ref();

        let response = match decision {
            RouteDecision::OnlineFirst => {
                strategy::online_first(content.as_ref(), fetcher, &ResourceKey::root(), request)
                    .await?
            }
            RouteDecision::CacheFirst(key) => {
                strategy::cache_first(content.as_ref(), fetcher, &key, request).await?
            }
            RouteDecision::Passthrough => return Ok(FetchOutcome::Passthrough),
        };
        Ok(FetchOutcome::Respond(response))
    }

    // ==================== Messages ====================

    /// Handle a message posted by the page.
    pub async fn handle_message(&self, payload: &str) -> OfflineResult<MessageOutcome> {
        let Some(command) = Command::parse(payload) else {
            debug!(agent = %self.id, payload, "Ignoring unrecognized message");
            return Ok(MessageOutcome::Ignored);
        };

        let state = self.state().await;
        match command {
            Command::ForceActivate => {
                if matches!(state, AgentState::Purged | AgentState::Redundant) {
                    return Ok(MessageOutcome::Ignored);
                }
                self.request_skip_waiting();
                Ok(MessageOutcome::SkipWaitingRequested)
            }
            Command::FillAllResources => {
                if state != AgentState::Ready {
                    debug!(agent = %self.id, ?state, "Ignoring offline download before activation");
                    return Ok(MessageOutcome::Ignored);
                }
                let fetched = self.fill_all_resources().await?;
                Ok(MessageOutcome::Filled { fetched })
            }
        }
    }

    /// Download every manifest resource missing from the content cache.
    ///
    /// Nothing is stored unless every download succeeds.
    pub async fn fill_all_resources(&self) -> OfflineResult<usize> {
        let content = self
            .storage
            .open(&self.config.cache_names.content)
            .await?;
        let present: HashSet<ResourceKey> = content.keys().await?.into_iter().collect();

        let requests = self
            .manifest
            .keys()
            .filter(|key| !present.contains(*key))
            .map(|key| {
                let url = resource_url(&self.config.origin, key)?;
                Ok((key.clone(), FetchRequest::get(url)))
            })
            .collect::<OfflineResult<Vec<_>>>()?;

        if requests.is_empty() {
            debug!(agent = %self.id, "All resources already cached");
            return Ok(0);
        }

        let responses = self.fetch_all(requests).await?;
        for (key, response) in &responses {
            content
                .put(key, CachedResponse::from_response(response))
                .await?;
        }

        info!(agent = %self.id, fetched = responses.len(), "Offline download complete");
        Ok(responses.len())
    }
}

async fn load_manifest(store: &dyn Cache) -> OfflineResult<Option<Manifest>> {
    let Some(entry) = store.get(&ResourceKey::new(MANIFEST_ENTRY)).await? else {
        return Ok(None);
    };
    let manifest = serde_json::from_slice(&entry.body)
        .map_err(|e| OfflineError::manifest(format!("stored manifest is unreadable: {}", e)))?;
    Ok(Some(manifest))
}
