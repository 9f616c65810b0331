//! Build manifest: resource keys, content fingerprints and the core set.
//!
//! The manifest is produced by the asset build and baked into each deployed
//! agent version. It never changes for the lifetime of an agent; a new
//! deployment ships a whole new value.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{OfflineError, OfflineResult};

/// A normalized resource path relative to the origin.
///
/// The root document is always addressed by the sentinel `"/"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Sentinel key for the root document.
    pub const ROOT: &'static str = "/";

    /// Create a key from an already-normalized path.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The root document key.
    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    /// Check if this is the root document key.
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Opaque content hash. Equal fingerprints mean identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mapping from resource key to fingerprint for one deployed version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    resources: BTreeMap<ResourceKey, Fingerprint>,
}

impl Manifest {
    /// Build a manifest from `(key, fingerprint)` pairs.
    pub fn from_pairs<K, F, I>(pairs: I) -> Self
    where
        K: Into<String>,
        F: Into<String>,
        I: IntoIterator<Item = (K, F)>,
    {
        Self {
            resources: pairs
                .into_iter()
                .map(|(k, f)| (ResourceKey::new(k), Fingerprint::new(f)))
                .collect(),
        }
    }

    /// Parse a manifest from its JSON object form.
    pub fn from_json(json: &str) -> OfflineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to the JSON object form.
    pub fn to_json(&self) -> OfflineResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&Fingerprint> {
        self.resources.get(key)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.resources.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.resources.keys()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// True when `key` is listed here with the same fingerprint it had in
    /// `previous`. Anything else (removed, added, changed) is not reusable.
    pub fn is_unchanged(&self, key: &ResourceKey, previous: &Manifest) -> bool {
        match (self.get(key), previous.get(key)) {
            (Some(current), Some(old)) => current == old,
            _ => false,
        }
    }

    /// Compare against the previously applied manifest.
    pub fn diff(&self, previous: &Manifest) -> ManifestDiff {
        let mut diff = ManifestDiff::default();
        for (key, fingerprint) in &self.resources {
            match previous.get(key) {
                None => diff.added.push(key.clone()),
                Some(old) if old != fingerprint => diff.changed.push(key.clone()),
                Some(_) => diff.unchanged.push(key.clone()),
            }
        }
        diff.removed = previous
            .keys()
            .filter(|key| !self.contains(key))
            .cloned()
            .collect();
        diff
    }
}

/// Key-level difference between two manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    pub added: Vec<ResourceKey>,
    pub changed: Vec<ResourceKey>,
    pub removed: Vec<ResourceKey>,
    pub unchanged: Vec<ResourceKey>,
}

impl ManifestDiff {
    /// No key was added, changed or removed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Ordered set of keys needed for first paint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoreSet(Vec<ResourceKey>);

impl CoreSet {
    /// Build a core set, dropping duplicate keys (first occurrence wins).
    pub fn new<K: Into<String>>(keys: impl IntoIterator<Item = K>) -> Self {
        let mut seen = HashSet::new();
        Self(
            keys.into_iter()
                .map(ResourceKey::new)
                .filter(|k| seen.insert(k.clone()))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceKey> {
        self.0.iter()
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.0.contains(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The build artifact shipped with each version: manifest plus core set.
///
/// JSON form: `{"resources": {"key": "hash", ...}, "core": ["key", ...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
    pub resources: Manifest,
    #[serde(default)]
    pub core: CoreSet,
}

impl AssetManifest {
    /// Create and validate an asset manifest.
    pub fn new(resources: Manifest, core: CoreSet) -> OfflineResult<Self> {
        let assets = Self { resources, core };
        assets.validate()?;
        Ok(assets)
    }

    /// Parse and validate from JSON.
    pub fn from_json(json: &str) -> OfflineResult<Self> {
        let assets: Self = serde_json::from_str(json)?;
        Self::new(assets.resources, CoreSet::new(assets.core.0.into_iter().map(|k| k.0)))
    }

    /// Load from a JSON file.
    pub fn from_file(path: &Path) -> OfflineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    fn validate(&self) -> OfflineResult<()> {
        if !self.resources.contains(&ResourceKey::root()) {
            return Err(OfflineError::manifest(
                "manifest has no entry for the root document '/'",
            ));
        }
        if let Some(unknown) = self.core.iter().find(|k| !self.resources.contains(k)) {
            return Err(OfflineError::manifest(format!(
                "core resource '{}' is not listed in the manifest",
                unknown
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_json_roundtrip_shape() {
        let manifest = Manifest::from_json(r#"{"main.js":"abc","/":"h0"}"#).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(
            manifest.get(&ResourceKey::root()).map(|f| f.as_str()),
            Some("h0")
        );
        let value: serde_json::Value = serde_json::from_str(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(value["main.js"], "abc");
    }

    #[test]
    fn test_is_unchanged() {
        let old = Manifest::from_pairs([("a", "h1"), ("b", "h2"), ("/", "h0")]);
        let new = Manifest::from_pairs([("a", "h1"), ("b", "h3"), ("c", "h4"), ("/", "h0")]);

        assert!(new.is_unchanged(&"a".into(), &old));
        assert!(!new.is_unchanged(&"b".into(), &old));
        assert!(!new.is_unchanged(&"c".into(), &old));
        // Removed from the new manifest.
        assert!(!Manifest::default().is_unchanged(&"a".into(), &old));
    }

    #[test]
    fn test_diff() {
        let old = Manifest::from_pairs([("a", "h1"), ("b", "h2"), ("/", "h0")]);
        let new = Manifest::from_pairs([("a", "h1"), ("c", "h4"), ("/", "h9")]);

        let diff = new.diff(&old);
        assert_eq!(diff.added, vec![ResourceKey::from("c")]);
        assert_eq!(diff.changed, vec![ResourceKey::root()]);
        assert_eq!(diff.removed, vec![ResourceKey::from("b")]);
        assert_eq!(diff.unchanged, vec![ResourceKey::from("a")]);
        assert!(!diff.is_empty());
        assert!(new.diff(&new).is_empty());
    }

    #[test]
    fn test_core_set_dedup_keeps_order() {
        let core = CoreSet::new(["main.js", "index.html", "main.js"]);
        let keys: Vec<_> = core.iter().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["main.js", "index.html"]);
    }

    #[test]
    fn test_asset_manifest_from_json() {
        let assets = AssetManifest::from_json(
            r#"{"resources": {"/": "h0", "index.html": "h0", "main.js": "h1"},
                "core": ["main.js", "index.html"]}"#,
        )
        .unwrap();
        assert_eq!(assets.resources.len(), 3);
        assert_eq!(assets.core.len(), 2);
    }

    #[test]
    fn test_asset_manifest_requires_root() {
        let err = AssetManifest::new(Manifest::from_pairs([("a", "h1")]), CoreSet::default())
            .unwrap_err();
        assert!(matches!(err, OfflineError::Manifest(_)));
    }

    #[test]
    fn test_asset_manifest_core_must_be_listed() {
        let err = AssetManifest::new(
            Manifest::from_pairs([("/", "h0")]),
            CoreSet::new(["missing.js"]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing.js"));
    }
}
