//! Persistence port
//!
//! The engines persist throttle, snooze, cap, audit and baseline state through a
//! minimal synchronous key-value contract. Key naming and namespacing belong to
//! the engines; adapters only move strings.

use crate::error::StorageError;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Synchronous string key-value store
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Build a namespaced storage key: `<namespace>:<segment>:<segment>...`
///
/// `%` and `:` inside the namespace or a segment are percent-escaped, so two
/// different segment lists never map to the same key.
pub fn namespaced_key(namespace: &str, segments: &[&str]) -> String {
    let mut key = escape_segment(namespace);
    for segment in segments {
        key.push(':');
        key.push_str(&escape_segment(segment));
    }
    key
}

fn escape_segment(segment: &str) -> String {
    let mut escaped = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Fail-soft JSON view over a [`KeyValueStore`] scoped to one namespace.
///
/// Read and write failures (including undecodable values) are logged and
/// swallowed: a failed read behaves like a missing key and a failed write is a
/// no-op. Any such failure latches [`NamespacedStore::is_degraded`] so callers
/// can surface degraded persistence.
pub struct NamespacedStore {
    namespace: String,
    backend: Arc<dyn KeyValueStore>,
    degraded: AtomicBool,
}

impl NamespacedStore {
    pub fn new(namespace: impl Into<String>, backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            namespace: namespace.into(),
            backend,
            degraded: AtomicBool::new(false),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self, segments: &[&str]) -> String {
        namespaced_key(&self.namespace, segments)
    }

    /// Whether any read or write has failed since construction
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key) {
            Ok(raw) => raw?,
            Err(e) => {
                self.degraded.store(true, Ordering::Relaxed);
                tracing::warn!(key, error = %e, "state read failed; treating as absent");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                self.degraded.store(true, Ordering::Relaxed);
                tracing::warn!(key, error = %e, "stored state is not decodable; ignoring");
                None
            }
        }
    }

    /// Returns whether the value was persisted
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> bool {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                self.degraded.store(true, Ordering::Relaxed);
                tracing::warn!(key, error = %e, "state encoding failed; write skipped");
                return false;
            }
        };

        match self.backend.set(key, &json) {
            Ok(()) => true,
            Err(e) => {
                self.degraded.store(true, Ordering::Relaxed);
                tracing::warn!(key, error = %e, "state write failed; continuing without persistence");
                false
            }
        }
    }

    /// Delete `key`; returns whether the backend accepted the removal
    pub fn remove(&self, key: &str) -> bool {
        match self.backend.remove(key) {
            Ok(()) => true,
            Err(e) => {
                self.degraded.store(true, Ordering::Relaxed);
                tracing::warn!(key, error = %e, "state removal failed; stale entry kept");
                false
            }
        }
    }
}

/// In-process store backed by an ordered map
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Keys starting with `prefix`, in order
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Store persisted as a single JSON object on disk.
///
/// The whole map is loaded on open and rewritten on every change. Writes go to a
/// sibling temp file that is renamed over the store, and the in-memory map only
/// changes once that succeeded.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) a store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)
                    .map_err(|e| StorageError::Corrupt(format!("{}: {}", path.display(), e)))?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn temp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let tmp = self.temp_path();
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }
}
