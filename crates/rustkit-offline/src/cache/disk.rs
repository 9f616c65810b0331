//! File-backed cache storage.
//!
//! Each container is one JSON document `<root>/<name>.json` mapping keys to
//! entries. Mutations rewrite the document through a temp file and a rename,
//! under a storage-wide lock, so every operation is all-or-nothing and
//! containers survive host restarts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::{Cache, CacheStorage, CachedResponse};
use crate::error::{OfflineError, OfflineResult};
use crate::manifest::ResourceKey;

type Entries = BTreeMap<ResourceKey, CachedResponse>;

struct DiskInner {
    root: PathBuf,
    /// Bumped on every container delete; guards IO as well.
    generations: Mutex<HashMap<String, u64>>,
}

impl DiskInner {
    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", name))
    }
}

/// Cache storage persisted under a directory.
#[derive(Clone)]
pub struct DiskCacheStorage {
    inner: Arc<DiskInner>,
}

impl DiskCacheStorage {
    /// Create storage rooted at `root`. The directory is created on first open.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(DiskInner {
                root: root.into(),
                generations: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Storage root directory.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }
}

fn validate_name(name: &str) -> OfflineResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(OfflineError::storage(format!("invalid cache name '{}'", name)))
    }
}

async fn read_entries(path: &Path) -> OfflineResult<Option<Entries>> {
    match fs::read(path).await {
        Ok(bytes) => {
            let entries = serde_json::from_slice(&bytes).map_err(|e| {
                OfflineError::storage(format!("corrupt cache file {}: {}", path.display(), e))
            })?;
            Ok(Some(entries))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(OfflineError::storage(format!(
            "reading {}: {}",
            path.display(),
            e
        ))),
    }
}

async fn write_entries(path: &Path, entries: &Entries) -> OfflineResult<()> {
    let json = serde_json::to_vec(entries)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)
        .await
        .map_err(|e| OfflineError::storage(format!("writing {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| OfflineError::storage(format!("replacing {}: {}", path.display(), e)))?;
    Ok(())
}

/// Handle to one on-disk container.
pub struct DiskCache {
    name: String,
    path: PathBuf,
    generation: u64,
    inner: Arc<DiskInner>,
}

impl DiskCache {
    fn is_current(&self, generations: &HashMap<String, u64>) -> bool {
        generations.get(&self.name).copied().unwrap_or(0) == self.generation
    }

    async fn load(&self) -> OfflineResult<Option<Entries>> {
        let generations = self.inner.generations.lock().await;
        if !self.is_current(&generations) {
            return Ok(None);
        }
        read_entries(&self.path).await
    }

    /// Read-modify-write under the storage lock. Returns `None` when the
    /// handle is orphaned and the mutation was dropped.
    async fn modify<T>(&self, f: impl FnOnce(&mut Entries) -> T) -> OfflineResult<Option<T>> {
        let generations = self.inner.generations.lock().await;
        if !self.is_current(&generations) {
            debug!(cache = %self.name, "Dropping write through deleted cache handle");
            return Ok(None);
        }
        let Some(mut entries) = read_entries(&self.path).await? else {
            debug!(cache = %self.name, "Cache file vanished, dropping write");
            return Ok(None);
        };
        let result = f(&mut entries);
        write_entries(&self.path, &entries).await?;
        Ok(Some(result))
    }
}

#[async_trait]
impl Cache for DiskCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &ResourceKey) -> OfflineResult<Option<CachedResponse>> {
        Ok(self.load().await?.and_then(|mut entries| entries.remove(key)))
    }

    async fn put(&self, key: &ResourceKey, response: CachedResponse) -> OfflineResult<()> {
        trace!(cache = %self.name, key = %key, "put");
        self.modify(|entries| {
            entries.insert(key.clone(), response);
        })
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> OfflineResult<bool> {
        let removed = self
            .modify(|entries| entries.remove(key).is_some())
            .await?;
        Ok(removed.unwrap_or(false))
    }

    async fn keys(&self) -> OfflineResult<Vec<ResourceKey>> {
        Ok(self
            .load()
            .await?
            .map(|entries| entries.into_keys().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> OfflineResult<Arc<dyn Cache>> {
        validate_name(name)?;
        let mut generations = self.inner.generations.lock().await;

        fs::create_dir_all(&self.inner.root).await.map_err(|e| {
            OfflineError::storage(format!("creating {}: {}", self.inner.root.display(), e))
        })?;

        let path = self.inner.path_for(name);
        if read_entries(&path).await?.is_none() {
            debug!(cache = %name, path = %path.display(), "Creating cache file");
            write_entries(&path, &Entries::new()).await?;
        }

        let generation = *generations.entry(name.to_string()).or_insert(0);
        Ok(Arc::new(DiskCache {
            name: name.to_string(),
            path,
            generation,
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn has(&self, name: &str) -> OfflineResult<bool> {
        validate_name(name)?;
        let _guard = self.inner.generations.lock().await;
        Ok(fs::try_exists(self.inner.path_for(name)).await?)
    }

    async fn delete(&self, name: &str) -> OfflineResult<bool> {
        validate_name(name)?;
        let mut generations = self.inner.generations.lock().await;
        *generations.entry(name.to_string()).or_insert(0) += 1;

        match fs::remove_file(self.inner.path_for(name)).await {
            Ok(()) => {
                debug!(cache = %name, "Deleted cache file");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(OfflineError::storage(format!("deleting cache {}: {}", name, e))),
        }
    }

    async fn names(&self) -> OfflineResult<Vec<String>> {
        let _guard = self.inner.generations.lock().await;
        let mut dir = match fs::read_dir(&self.inner.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
