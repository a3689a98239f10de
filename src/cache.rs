//! Renderer-local key/value store.
//!
//! The presentation layer persists small JSON blobs under fixed keys
//! (location cache, timezone cache, language preference). The store is
//! injected behind [`CacheStore`] so tests can swap in [`MemoryStore`];
//! production uses [`JsonFileStore`], a single JSON document on disk.
//! The host side has no knowledge of this store.

use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
    sync::{Mutex, RwLock},
};

use anyhow::{Context, Result};
use log::{error, warn};
use serde::{de::DeserializeOwned, Serialize};

pub const LOCATION_CACHE_KEY: &str = "locationCache";
pub const TIMEZONE_CACHE_KEY: &str = "userTimezoneData";
pub const LANGUAGE_KEY: &str = "userLanguage";

/// Narrow localStorage-shaped contract: string keys, string values.
/// Writes are best-effort; a failing backend logs and keeps going rather
/// than bubbling I/O errors into panel logic.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn delete(&self, key: &str);
}

/// Read a JSON value under `key`. A stored entry that fails to parse is
/// treated as a cache miss and deleted so it cannot wedge future reads.
pub fn get_json<T: DeserializeOwned>(store: &dyn CacheStore, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("discarding corrupt cache entry '{key}': {err}");
            store.delete(key);
            None
        }
    }
}

pub fn set_json<T: Serialize>(store: &dyn CacheStore, key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(raw) => store.set(key, raw),
        Err(err) => error!("failed to serialize cache entry '{key}': {err}"),
    }
}

/// On-disk store: one JSON object mapping keys to raw string values,
/// rewritten on every mutation. Corrupt or missing files fall back to an
/// empty map at load time.
pub struct JsonFileStore {
    path: PathBuf,
    data: RwLock<BTreeMap<String, String>>,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create store directory {}", parent.display()))?;
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("failed to read store from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn persist(&self, data: &BTreeMap<String, String>) {
        let serialized = match serde_json::to_string_pretty(data) {
            Ok(serialized) => serialized,
            Err(err) => {
                error!("failed to serialize store: {err}");
                return;
            }
        };
        if let Err(err) = fs::write(&self.path, serialized) {
            error!("failed to write store to {}: {err}", self.path.display());
        }
    }
}

impl CacheStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data.read().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        let mut guard = self.data.write().unwrap();
        guard.insert(key.to_string(), value);
        self.persist(&guard);
    }

    fn delete(&self, key: &str) {
        let mut guard = self.data.write().unwrap();
        if guard.remove(key).is_some() {
            self.persist(&guard);
        }
    }
}

/// In-memory store for tests and for running without a writable data dir.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.data.lock().unwrap().insert(key.to_string(), value);
    }

    fn delete(&self, key: &str) {
        self.data.lock().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn json_round_trip_through_memory_store() {
        let store = MemoryStore::new();
        let sample = Sample {
            name: "panel".into(),
            count: 3,
        };

        set_json(&store, "sample", &sample);
        let loaded: Sample = get_json(&store, "sample").unwrap();
        assert_eq!(loaded, sample);
    }

    #[test]
    fn corrupt_entry_is_deleted_and_reads_as_miss() {
        let store = MemoryStore::new();
        store.set("sample", "{not json".into());

        let loaded: Option<Sample> = get_json(&store, "sample");
        assert!(loaded.is_none());
        assert!(store.get("sample").is_none(), "corrupt entry should be deleted");
    }

    #[test]
    fn file_store_persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = JsonFileStore::new(path.clone()).unwrap();
            store.set(LANGUAGE_KEY, "de".into());
        }

        let reloaded = JsonFileStore::new(path).unwrap();
        assert_eq!(reloaded.get(LANGUAGE_KEY).as_deref(), Some("de"));
    }

    #[test]
    fn file_store_tolerates_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "]]]").unwrap();

        let store = JsonFileStore::new(path).unwrap();
        assert!(store.get(LANGUAGE_KEY).is_none());
    }

    #[test]
    fn delete_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("store.json")).unwrap();

        store.set("key", "value".into());
        store.delete("key");
        assert!(store.get("key").is_none());
    }
}
