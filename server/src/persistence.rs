//! Durable mirror of the shared state
//!
//! The gateway keeps one pretty-printed JSON document under a single key and
//! rewrites it in full after every accepted mutation. Loading is fail-soft:
//! a missing document is created empty, while an unreadable one is left
//! untouched on disk and the server starts from an empty state.

use log::{info, warn};
use shared::AppState;
use std::collections::HashMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Byte-level storage addressed by key
pub trait Storage: Send {
    /// Returns `Ok(None)` when nothing is stored under `key`.
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replaces whatever is stored under `key`.
    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()>;
}

/// Stores each key as a file inside a directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl Storage for FileStorage {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;

        // Write aside and rename so a crash never leaves a truncated document
        let target = self.path(key);
        let staging = self.path(&format!("{}.tmp", key));
        let result = fs::write(&staging, bytes).and_then(|()| fs::rename(&staging, &target));
        if result.is_err() {
            let _ = fs::remove_file(&staging);
        }
        result
    }
}

/// In-process storage, shared between clones
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following write fail until switched back
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn insert(&self, key: &str, bytes: &[u8]) {
        self.lock().insert(key.to_string(), bytes.to_vec());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.get(key))
    }

    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(ErrorKind::Other, "writes disabled"));
        }
        self.insert(key, bytes);
        Ok(())
    }
}

/// Where the state returned by [`PersistenceGateway::load`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    /// Decoded from the durable copy
    Restored,
    /// Nothing was stored; an empty document was created
    Initialized,
    /// The durable copy could not be read or decoded and was left as is
    Unreadable,
}

pub struct PersistenceGateway {
    storage: Box<dyn Storage>,
    key: String,
    saves: u64,
}

impl PersistenceGateway {
    pub fn new(storage: impl Storage + 'static, key: &str) -> Self {
        Self {
            storage: Box::new(storage),
            key: key.to_string(),
            saves: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of successful saves since construction
    pub fn saves(&self) -> u64 {
        self.saves
    }

    /// Restores the state, never failing.
    pub fn load(&mut self) -> (AppState, LoadOrigin) {
        let bytes = match self.storage.read(&self.key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                info!("No stored state at {}, starting empty", self.key);
                let state = AppState::default();
                if let Err(e) = self.save(&state) {
                    warn!("Failed to create initial state at {}: {}", self.key, e);
                }
                return (state, LoadOrigin::Initialized);
            }
            Err(e) => {
                warn!(
                    "Failed to read stored state at {}: {}; starting empty",
                    self.key, e
                );
                return (AppState::default(), LoadOrigin::Unreadable);
            }
        };

        match serde_json::from_slice::<AppState>(&bytes) {
            Ok(state) => {
                info!(
                    "Restored {} classes and {} games from {}",
                    state.classes.len(),
                    state.games.len(),
                    self.key
                );
                (state, LoadOrigin::Restored)
            }
            Err(e) => {
                warn!(
                    "Stored state at {} is corrupt ({}); starting empty and leaving it untouched",
                    self.key, e
                );
                (AppState::default(), LoadOrigin::Unreadable)
            }
        }
    }

    /// Overwrites the durable copy with `state`.
    pub fn save(&mut self, state: &AppState) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        self.storage.write(&self.key, &bytes)?;
        self.saves += 1;
        Ok(())
    }
}
