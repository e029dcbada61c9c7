use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use serde::de::DeserializeOwned;
use serde::Serialize;
use log::{error, info};

/// Disk-backed memoization cache mapping a string key to a JSON value.
///
/// Loading never fails: an absent or unreadable file yields an empty cache,
/// so first runs and resumed runs share one code path. Entries are never
/// expired; re-running against a stale file silently reuses old values.
/// Every save rewrites the whole file, which is fine at the scale these
/// caches reach (thousands of entries). Single writer only.
pub struct JsonCache<V> {
    path: PathBuf,
    entries: BTreeMap<String, V>,
}

impl<V: Serialize + DeserializeOwned> JsonCache<V> {
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return JsonCache { path, entries: BTreeMap::new() };
        }
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to read cache file {:?}: {}", path, e);
                return JsonCache { path, entries: BTreeMap::new() };
            }
        };
        match serde_json::from_str::<BTreeMap<String, V>>(&content) {
            Ok(entries) => {
                info!("Loaded {} cached entries from {:?}", entries.len(), path);
                JsonCache { path, entries }
            }
            Err(e) => {
                error!("Failed to parse cache file {:?}: {}. Starting empty.", path, e);
                JsonCache { path, entries: BTreeMap::new() }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Records a value without touching disk; pair with [`save`](Self::save).
    pub fn insert(&mut self, key: String, value: V) {
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    /// Rewrites the backing file in full. Errors are logged, not returned:
    /// losing one save degrades to a re-fetch on the next run.
    pub fn save(&self) {
        let json = match serde_json::to_string_pretty(&self.entries) {
            Ok(j) => j,
            Err(e) => {
                error!("Failed to serialize cache for {:?}: {}", self.path, e);
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, json) {
            error!("Failed to write cache file {:?}: {}", self.path, e);
        }
    }
}
