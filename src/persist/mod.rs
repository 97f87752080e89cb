//! Persisted key-value store, standing in for the browser `localStorage`
//! settings are read and written through.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum PersistError {
    Io(String),
    Serialize(String),
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::Io(msg) => write!(f, "persist io error: {}", msg),
            PersistError::Serialize(msg) => write!(f, "persist serialize error: {}", msg),
        }
    }
}

impl std::error::Error for PersistError {}

/// Derive the storage-namespace slug from a page/location path: every
/// non-alphanumeric character becomes `_`.
pub fn derive_slug(location_path: &str) -> String {
    location_path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Key-value persistence abstraction backing the Settings Reconciler.
/// Values are always strings: booleans as `"true"`/`"false"`, integers as
/// decimal strings, matching the browser-side `localStorage` contract this
/// stands in for.
pub trait PersistentStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// In-memory store, used by tests and as a fallback when no durable
/// location is configured.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.lock().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values.lock().remove(key);
    }
}

/// JSON-file-backed store. The whole map is kept in memory and the file is
/// rewritten on every mutation; this crate has no notion of a database and
/// durability at process-crash granularity is not a goal.
pub struct FileStore {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Result<Self, PersistError> {
        std::fs::create_dir_all(&dir).map_err(|e| PersistError::Io(e.to_string()))?;
        let path = dir.join("settings.json");
        let values = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| PersistError::Io(e.to_string()))?;
            serde_json::from_str(&raw).map_err(|e| PersistError::Serialize(e.to_string()))?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn flush(&self, values: &HashMap<String, String>) {
        match serde_json::to_string_pretty(values) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    log::warn!("failed to persist settings to {:?}: {}", self.path, e);
                }
            }
            Err(e) => log::warn!("failed to serialize settings: {}", e),
        }
    }
}

impl PersistentStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value.to_string());
        self.flush(&values);
    }

    fn remove(&self, key: &str) {
        let mut values = self.values.lock();
        values.remove(key);
        self.flush(&values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_maps_non_alphanumeric_to_underscore() {
        assert_eq!(derive_slug("/webrtc/session-1"), "_webrtc_session_1");
    }

    #[test]
    fn memory_store_roundtrips() {
        let store = MemoryStore::new();
        store.set("framerate", "60");
        assert_eq!(store.get("framerate"), Some("60".to_string()));
        store.remove("framerate");
        assert_eq!(store.get("framerate"), None);
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = std::env::temp_dir().join(format!("selkies-persist-test-{}", std::process::id()));
        let store = FileStore::new(dir.clone()).unwrap();
        store.set("video_bitrate", "4000");
        drop(store);

        let reopened = FileStore::new(dir.clone()).unwrap();
        assert_eq!(reopened.get("video_bitrate"), Some("4000".to_string()));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
