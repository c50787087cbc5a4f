//! Persistent maps: the external key-value stores backing blacklist,
//! cooldown, and stats state, modeled as a trait so the
//! [`crate::pool::Pool`] stays agnostic of whether state is in-memory
//! or file-backed.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{ProxyError, Result};

/// An insertion-ordered key-value store with an auto-save flush
/// contract. Re-inserting an existing key moves it to the end, the
/// same "last-updated-to-end" behavior as the JSON dict this models.
pub trait PersistentOrderedMap<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn put(&self, key: K, value: V);
    fn remove(&self, key: &K) -> Option<V>;
    /// Snapshot of all entries in insertion order.
    fn iter(&self) -> Vec<(K, V)>;
    fn contains_key(&self, key: &K) -> bool;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Persist pending state. A no-op for purely in-memory maps; for
    /// file-backed maps this is called after every mutation, so callers
    /// don't strictly need to invoke it, but may to force a write.
    fn flush(&self) -> Result<()>;
}

/// Pure in-memory ordered map. Never fails to flush.
pub struct InMemoryMap<K, V> {
    inner: Mutex<IndexMap<K, V>>,
}

impl<K, V> Default for InMemoryMap<K, V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(IndexMap::new()),
        }
    }
}

impl<K, V> InMemoryMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K, V> PersistentOrderedMap<K, V> for InMemoryMap<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    fn put(&self, key: K, value: V) {
        let mut guard = self.inner.lock();
        // shift_remove + re-insert to get "moved to end on update"
        // semantics rather than indexmap's default in-place update.
        guard.shift_remove(&key);
        guard.insert(key, value);
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().shift_remove(key)
    }

    fn iter(&self) -> Vec<(K, V)> {
        self.inner
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn contains_key(&self, key: &K) -> bool {
        self.inner.lock().contains_key(key)
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// File-backed JSON map. Every mutation rewrites the whole file — an
/// auto-save-on-write contract.
pub struct JsonFileMap<K, V> {
    path: PathBuf,
    inner: Mutex<IndexMap<K, V>>,
}

impl<K, V> JsonFileMap<K, V>
where
    K: std::hash::Hash + Eq + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Load `path` if it exists, otherwise start empty; the file is
    /// created on first mutation.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ProxyError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
            serde_json::from_str(&content).map_err(|e| ProxyError::Json {
                path: path.display().to_string(),
                source: e,
            })?
        } else {
            IndexMap::new()
        };
        Ok(Self {
            path,
            inner: Mutex::new(inner),
        })
    }

    fn save_locked(&self, guard: &IndexMap<K, V>) -> Result<()> {
        let content = serde_json::to_string_pretty(guard).map_err(|e| ProxyError::Json {
            path: self.path.display().to_string(),
            source: e,
        })?;
        std::fs::write(&self.path, content).map_err(|e| ProxyError::Io {
            path: self.path.display().to_string(),
            source: e,
        })
    }
}

impl<K, V> PersistentOrderedMap<K, V> for JsonFileMap<K, V>
where
    K: std::hash::Hash + Eq + Clone + Serialize + DeserializeOwned + Send + Sync,
    V: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    fn put(&self, key: K, value: V) {
        let mut guard = self.inner.lock();
        guard.shift_remove(&key);
        guard.insert(key, value);
        if let Err(e) = self.save_locked(&guard) {
            tracing::warn!("[PersistentMap] failed to flush {}: {}", self.path.display(), e);
        }
    }

    fn remove(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock();
        let removed = guard.shift_remove(key);
        if removed.is_some() {
            if let Err(e) = self.save_locked(&guard) {
                tracing::warn!("[PersistentMap] failed to flush {}: {}", self.path.display(), e);
            }
        }
        removed
    }

    fn iter(&self) -> Vec<(K, V)> {
        self.inner
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn contains_key(&self, key: &K) -> bool {
        self.inner.lock().contains_key(key)
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }

    fn flush(&self) -> Result<()> {
        let guard = self.inner.lock();
        self.save_locked(&guard)
    }
}
