use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

/// Directory name for the on-disk store, under the platform data dir
const APP_DIR: &str = "resepcache";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Synchronous key-value storage shared by every state mirror.
///
/// Values are opaque strings; JSON encoding and decoding happen at the
/// call sites so a malformed value degrades to a typed default there
/// instead of failing the whole store.
pub trait DurableStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store backed by a `HashMap`.
///
/// The default backend for tests; also useful when persistence is
/// handled elsewhere and only the signal plumbing is wanted.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// File-backed store: one file per key under a single directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Open a store under the platform's per-user data directory.
    pub fn open_default() -> Result<Self, StoreError> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| StoreError::Unavailable("could not find data directory".to_string()))?;
        Self::new(data_dir.join(APP_DIR))
    }

    fn key_path(&self, key: &str) -> PathBuf {
        // Keys are well-known constants, but sanitize anyway so an odd
        // key cannot escape the store directory.
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

impl DurableStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(Some(contents))
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.key_path(key);
        std::fs::write(&path, value)?;
        debug!(key, "durable store write");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.key_path(key);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
