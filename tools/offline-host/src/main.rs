//! Command-line host for the RustKit offline asset agent.
//!
//! Plays the browser's part: keeps the on-disk containers, creates one agent
//! per deployed asset version, drives install and activation, and forwards
//! fetches and page messages to the active version.
//!
//! ## Usage
//!
//! ```bash
//! # Install and activate a build
//! offline-host --config agent.json --manifest dist/assets.json deploy
//!
//! # Serve a request through the agent
//! offline-host --config agent.json --manifest dist/assets.json fetch /main.js?v=42
//!
//! # Ask the agent to make every resource available offline
//! offline-host --config agent.json --manifest dist/assets.json message downloadOffline
//!
//! # Inspect or wipe the containers
//! offline-host --config agent.json status
//! offline-host --config agent.json purge
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rustkit_offline::{
    AgentConfig, AgentEvent, AgentRegistration, AssetManifest, CacheStorage, DiskCacheStorage,
    FetchOutcome, FetchRequest, Fetcher, HttpFetcher, Manifest, MessageOutcome, OfflineAgent,
    ResourceKey, MANIFEST_ENTRY,
};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use url::Url;

mod logging;

use logging::{LogConfig, LogFormat};

#[derive(Parser)]
#[command(name = "offline-host")]
#[command(about = "Command-line host for the RustKit offline asset agent")]
struct Cli {
    /// Agent configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Asset manifest of the version to run (JSON)
    #[arg(short, long, global = true)]
    manifest: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    /// Log filter directive, overrides RUST_LOG
    #[arg(long, global = true)]
    log_filter: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install and activate the version described by --manifest
    Deploy,

    /// Send a request through the agent
    Fetch {
        /// Absolute URL, or a path resolved against the configured origin
        target: String,
    },

    /// Post a message to the agent (skipWaiting, downloadOffline)
    Message {
        payload: String,
    },

    /// Show container contents and the applied manifest
    Status,

    /// Delete every container
    Purge,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::for_cli(cli.log_format, cli.verbose);
    if let Some(filter) = &cli.log_filter {
        log_config = log_config.with_filter(filter.clone());
    }
    logging::init_logging(&log_config)?;

    let config = load_config(cli.config.as_deref())?;
    let storage: Arc<dyn CacheStorage> = Arc::new(DiskCacheStorage::new(&config.storage_dir));
    debug!(storage = %config.storage_dir.display(), origin = %config.origin, "Host starting");

    match cli.command {
        Commands::Deploy => {
            let assets = load_assets(cli.manifest.as_deref())?;
            deploy(config, assets, storage).await?;
        }

        Commands::Fetch { target } => {
            let assets = load_assets(cli.manifest.as_deref())?;
            let url = resolve_target(&config.origin, &target)?;
            let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.fetch)?);
            let (agent, events) = start_agent(config, assets, storage, Arc::clone(&fetcher)).await?;

            let request = FetchRequest::get(url);
            let response = match agent.handle_fetch(&request).await? {
                FetchOutcome::Respond(response) => response,
                FetchOutcome::Passthrough => {
                    info!(url = %request.url, "Not intercepted, fetching directly");
                    fetcher.fetch(&request).await?
                }
            };
            drain_events(events);

            println!("{} {}", response.status, response.url);
            println!("  from cache: {}", response.from_cache);
            println!("  body:       {} bytes", response.body.len());
        }

        Commands::Message { payload } => {
            let assets = load_assets(cli.manifest.as_deref())?;
            let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.fetch)?);
            let (agent, events) = resume_agent(config, assets, storage, fetcher).await?;

            let outcome = agent.handle_message(&payload).await?;
            drain_events(events);

            match outcome {
                MessageOutcome::SkipWaitingRequested => println!("skip waiting requested"),
                MessageOutcome::Filled { fetched } => println!("downloaded {} resources", fetched),
                MessageOutcome::Ignored => println!("ignored"),
            }
        }

        Commands::Status => {
            let current = match cli.manifest.as_deref() {
                Some(path) => Some(AssetManifest::from_file(path)?.resources),
                None => None,
            };
            let report = status(&config, storage.as_ref(), current.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Purge => {
            let names = &config.cache_names;
            for name in [&names.staging, &names.content, &names.manifest] {
                if storage.delete(name).await? {
                    println!("deleted {}", name);
                }
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AgentConfig> {
    match path {
        Some(path) => AgentConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            warn!("No --config given, using defaults");
            Ok(AgentConfig::default())
        }
    }
}

fn load_assets(path: Option<&Path>) -> anyhow::Result<AssetManifest> {
    let Some(path) = path else {
        bail!("--manifest is required for this command");
    };
    AssetManifest::from_file(path)
        .with_context(|| format!("failed to load asset manifest from {}", path.display()))
}

/// Resolve a command-line target: absolute URLs pass through, anything else
/// is joined onto the origin.
fn resolve_target(origin: &Url, target: &str) -> anyhow::Result<Url> {
    if target.starts_with("http://") || target.starts_with("https://") {
        return Url::parse(target).with_context(|| format!("invalid URL '{}'", target));
    }
    origin
        .join(target)
        .with_context(|| format!("cannot resolve '{}' against {}", target, origin))
}

/// Install and activate a new version through a registration.
async fn deploy(
    config: AgentConfig,
    assets: AssetManifest,
    storage: Arc<dyn CacheStorage>,
) -> anyhow::Result<()> {
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.fetch)?);
    let mut registration = AgentRegistration::new(config.origin.clone());
    let (agent, events) = OfflineAgent::new(config, assets, storage, fetcher);
    let agent = Arc::new(agent);

    let report = registration.update(Arc::clone(&agent)).await;
    drain_events(events);

    match report? {
        Some(report) => {
            println!("{} activated", agent.id());
            println!("  first install: {}", report.first_install);
            println!("  retained:      {}", report.retained);
            println!("  evicted:       {}", report.evicted);
            println!("  staged:        {}", report.staged);
        }
        None => println!("{} installed, waiting", agent.id()),
    }
    Ok(())
}

/// Resume the applied version.
async fn resume_agent(
    config: AgentConfig,
    assets: AssetManifest,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
) -> anyhow::Result<(OfflineAgent, UnboundedReceiver<AgentEvent>)> {
    let (agent, events) = OfflineAgent::new(config, assets, storage, fetcher);
    agent
        .resume()
        .await
        .context("this version is not deployed; run `deploy` first")?;
    Ok((agent, events))
}

/// Resume the applied version, deploying it first if storage holds another.
async fn start_agent(
    config: AgentConfig,
    assets: AssetManifest,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
) -> anyhow::Result<(OfflineAgent, UnboundedReceiver<AgentEvent>)> {
    let (agent, events) = OfflineAgent::new(
        config.clone(),
        assets.clone(),
        Arc::clone(&storage),
        Arc::clone(&fetcher),
    );
    if agent.resume().await.is_ok() {
        return Ok((agent, events));
    }

    info!("Version not applied yet, deploying");
    let (agent, events) = OfflineAgent::new(config, assets, storage, fetcher);
    if let Err(e) = agent.install().await {
        warn!(error = %e, "Install failed");
    }
    agent.activate().await?;
    Ok((agent, events))
}

fn drain_events(mut events: UnboundedReceiver<AgentEvent>) {
    while let Ok(event) = events.try_recv() {
        debug!(?event, "Agent event");
    }
}

#[derive(Debug, Serialize)]
struct ContainerStatus {
    name: String,
    exists: bool,
    entries: usize,
}

#[derive(Debug, Default, Serialize)]
struct PendingChanges {
    added: Vec<String>,
    changed: Vec<String>,
    removed: Vec<String>,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    containers: Vec<ContainerStatus>,
    applied_resources: Option<usize>,
    /// Differences between the applied manifest and `--manifest`.
    pending: Option<PendingChanges>,
}

async fn status(
    config: &AgentConfig,
    storage: &dyn CacheStorage,
    current: Option<&Manifest>,
) -> anyhow::Result<StatusReport> {
    let names = &config.cache_names;
    let mut containers = Vec::new();
    for name in [&names.staging, &names.content, &names.manifest] {
        let exists = storage.has(name).await?;
        let entries = if exists {
            storage.open(name).await?.keys().await?.len()
        } else {
            0
        };
        containers.push(ContainerStatus {
            name: name.clone(),
            exists,
            entries,
        });
    }

    let applied = if storage.has(&names.manifest).await? {
        let store = storage.open(&names.manifest).await?;
        match store.get(&ResourceKey::new(MANIFEST_ENTRY)).await? {
            Some(entry) => {
                let json = entry.text().context("stored manifest is not UTF-8")?;
                Some(Manifest::from_json(json)?)
            }
            None => None,
        }
    } else {
        None
    };

    let pending = current.map(|current| {
        let empty = Manifest::default();
        let diff = current.diff(applied.as_ref().unwrap_or(&empty));
        let strings = |keys: Vec<ResourceKey>| -> Vec<String> {
            keys.iter().map(ToString::to_string).collect()
        };
        PendingChanges {
            added: strings(diff.added),
            changed: strings(diff.changed),
            removed: strings(diff.removed),
        }
    });

    Ok(StatusReport {
        containers,
        applied_resources: applied.as_ref().map(Manifest::len),
        pending,
    })
}
