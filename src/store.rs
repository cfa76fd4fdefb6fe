//! Persisted key/value store namespaced by an application suite.
//!
//! Values are JSON documents held in memory and written back as a single
//! `preferences.json` on `flush()`. Writes go through one mutex, so each
//! flush encodes a consistent snapshot.

use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const STORE_FILE: &str = "preferences.json";

pub struct PreferenceStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl PreferenceStore {
    /// Open the store for a suite directory. A missing or unreadable file
    /// yields an empty store.
    pub fn open(suite_dir: &Path) -> Self {
        let path = suite_dir.join(STORE_FILE);
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Map<String, Value>>(&content) {
                Ok(map) => map,
                Err(e) => {
                    log::warn!(
                        "[Store] [WARNING] Ignoring unreadable {}: {}",
                        path.display(),
                        e
                    );
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };
        PreferenceStore {
            path,
            values: Mutex::new(values),
        }
    }

    /// In-memory store that is never written to disk.
    pub fn in_memory() -> Self {
        PreferenceStore {
            path: PathBuf::new(),
            values: Mutex::new(Map::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode the value stored under `key`. Undecodable values read as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let values = self.values.lock().ok()?;
        let value = values.get(key)?.clone();
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("[Store] [WARNING] Discarding undecodable '{}': {}", key, e);
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let encoded = serde_json::to_value(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.insert(key.to_string(), encoded);
        Ok(())
    }

    pub fn remove(&self, key: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.remove(key);
        }
    }

    /// Write the current snapshot to disk via a temp file and rename.
    pub fn flush(&self) -> Result<(), StoreError> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        let snapshot = {
            let values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
            serde_json::to_vec_pretty(&*values).map_err(|source| StoreError::Encode {
                key: STORE_FILE.to_string(),
                source,
            })?
        };
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, &snapshot)?;
        tmp.persist(&self.path).map_err(|e| StoreError::IoError(e.error))?;
        Ok(())
    }
}
