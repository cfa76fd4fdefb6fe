//! Scheme list cache keyed by project path and content signature.

use crate::error::StoreError;
use crate::store::PreferenceStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const MAX_ENTRIES: usize = 50;
/// Validity window for entries looked up without a signature
pub const FALLBACK_TTL: Duration = Duration::from_secs(600);
/// Signatures are float seconds; equal within one millisecond
pub const SIGNATURE_TOLERANCE: f64 = 0.001;

const STORE_KEY: &str = "schemeCache";

/// Seconds since the Unix epoch as used for signatures and `cachedAt`.
pub fn epoch_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemeCacheEntry {
    pub schemes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<f64>,
    #[serde(rename = "cachedAt")]
    pub cached_at: f64,
}

impl SchemeCacheEntry {
    /// Hit test; depends only on the arguments and the entry.
    pub fn is_fresh(&self, signature: Option<f64>, now: f64) -> bool {
        match signature {
            Some(sig) => self
                .signature
                .map_or(false, |stored| (stored - sig).abs() <= SIGNATURE_TOLERANCE),
            None => now - self.cached_at < FALLBACK_TTL.as_secs_f64(),
        }
    }
}

/// In-memory cache, serialized as `{ "entries": { path: entry } }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemeCache {
    #[serde(default)]
    entries: HashMap<String, SchemeCacheEntry>,
}

impl SchemeCache {
    pub fn lookup(&self, key: &str, signature: Option<f64>, now: f64) -> Option<&[String]> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_fresh(signature, now))
            .map(|entry| entry.schemes.as_slice())
    }

    pub fn insert(&mut self, key: &str, schemes: Vec<String>, signature: Option<f64>, now: f64) {
        self.entries.insert(
            key.to_string(),
            SchemeCacheEntry {
                schemes,
                signature,
                cached_at: now,
            },
        );
        self.enforce_limit();
    }

    /// Evict oldest `cachedAt` entries until at most `MAX_ENTRIES` remain.
    pub fn enforce_limit(&mut self) {
        if self.entries.len() <= MAX_ENTRIES {
            return;
        }
        let mut by_age: Vec<(String, f64)> = self
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.cached_at))
            .collect();
        by_age.sort_by(|a, b| a.1.total_cmp(&b.1));
        let excess = self.entries.len() - MAX_ENTRIES;
        for (key, _) in by_age.into_iter().take(excess) {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

/// Process-wide scheme cache backed by the preference store. One mutex
/// serializes every mutation and the encode that persists it.
pub struct SchemeCacheStore {
    cache: Mutex<SchemeCache>,
    store: Arc<PreferenceStore>,
}

impl SchemeCacheStore {
    /// Load persisted entries, trimming to the entry cap.
    pub fn load(store: Arc<PreferenceStore>) -> Self {
        let mut cache: SchemeCache = store.get(STORE_KEY).unwrap_or_default();
        cache.enforce_limit();
        log::debug!("[Schemes] [CACHE] Loaded {} cached project(s)", cache.len());
        SchemeCacheStore {
            cache: Mutex::new(cache),
            store,
        }
    }

    pub fn lookup(&self, key: &str, signature: Option<f64>) -> Option<Vec<String>> {
        let now = epoch_seconds(SystemTime::now());
        let cache = self.cache.lock().ok()?;
        cache.lookup(key, signature, now).map(|s| s.to_vec())
    }

    /// Insert and persist. Persistence failures are logged and skipped.
    pub fn store(&self, key: &str, schemes: Vec<String>, signature: Option<f64>) {
        let now = epoch_seconds(SystemTime::now());
        let mut cache = match self.cache.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.insert(key, schemes, signature, now);
        if let Err(e) = self.persist(&cache) {
            log::debug!("[Schemes] [CACHE] Skipping persistence: {}", e);
        }
    }

    /// Write the cache to durable storage.
    pub fn flush(&self) -> Result<(), StoreError> {
        let cache = self.cache.lock().map_err(|_| StoreError::Poisoned)?;
        self.persist(&cache)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn persist(&self, cache: &SchemeCache) -> Result<(), StoreError> {
        self.store.set(STORE_KEY, cache)?;
        self.store.flush()
    }
}
