//! Key-value persistence collaborator: a byte store addressed by short keys.
//! `FileStore` keeps one file per key under the XDG config dir
//! ($XDG_CONFIG_HOME/obdcore, fallback ~/.config/obdcore).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::PersistError;

/// Minimal byte store contract. Values are already-serialized blobs; the
/// store never interprets them.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistError>;
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.map.lock().expect("store lock").get(key).cloned()
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistError> {
        self.map
            .lock()
            .expect("store lock")
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("obdcore")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("obdcore")
    }
}

/// File-backed store, one `<key>.json` per key.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new() -> Self {
        Self { dir: config_dir() }
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        fs::read(self.path_for(key)).ok()
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(key), value)?;
        Ok(())
    }
}
