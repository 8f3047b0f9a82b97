use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage file {path} is not a JSON object: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("storage lock poisoned")]
    Poisoned,
}

/// String key/value storage, the shape of a browser's sessionStorage/localStorage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Read and delete in one step. Backends must make this atomic so a value
    /// is handed out at most once.
    fn take(&self, key: &str) -> Result<Option<String>, StorageError>;
}

/// In-process map. Used as the per-tab ephemeral store and in tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.entries.lock().map_err(|_| StorageError::Poisoned)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn take(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.remove(key))
    }
}

/// JSON object on disk, rewritten whole on every change.
///
/// This is the durable backing used by the CLI, where every invocation is a
/// fresh process and nothing survives in memory.
pub struct FileStore {
    path: PathBuf,
    // serialises read-modify-write cycles within this process
    guard: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Map<String, Value>, StorageError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if raw.trim().is_empty() {
            return Ok(Map::new());
        }

        serde_json::from_str(&raw).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn store(&self, entries: &Map<String, Value>) -> Result<(), StorageError> {
        let io_err = |source| StorageError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        // serializing a Map<String, Value> cannot fail
        let body = serde_json::to_string_pretty(entries).unwrap_or_else(|_| "{}".to_string());
        std::fs::write(&self.path, body).map_err(io_err)
    }

    fn modify<R>(
        &self,
        f: impl FnOnce(&mut Map<String, Value>) -> R,
    ) -> Result<R, StorageError> {
        let _held = self.guard.lock().map_err(|_| StorageError::Poisoned)?;
        let mut entries = self.load()?;
        let out = f(&mut entries);
        self.store(&entries)?;
        Ok(out)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _held = self.guard.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(self
            .load()?
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.modify(|entries| {
            entries.insert(key.to_string(), Value::String(value.to_string()));
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.modify(|entries| {
            entries.remove(key);
        })
    }

    fn take(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.modify(|entries| {
            entries
                .remove(key)
                .and_then(|v| v.as_str().map(str::to_string))
        })
    }
}
