#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Durable key/value storage for vicalert session state.
//!
//! Values are JSON documents stored under string keys, mirroring the
//! browser local-storage layout the dashboard has always used (see
//! [`keys`]). Readers go through [`load_or_default`], which never fails:
//! a missing key yields the type's default and a corrupt document is
//! logged, discarded, and replaced by the default.

pub mod paths;
pub mod records;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Storage keys shared with the dashboard.
pub mod keys {
    /// Array of `PinnedIncident`.
    pub const PINNED_INCIDENTS: &str = "pinnedIncidents";
    /// Mapping of incident id to the full `Incident` captured at pin time.
    pub const PINNED_INCIDENTS_DATA: &str = "pinnedIncidentsData";
    /// `{ "muted": bool }`.
    pub const AUDIO_SETTINGS: &str = "audioNotificationSettings";
    /// `{ "completed", "lastStep", "timestamp" }`.
    pub const TUTORIAL_PROGRESS: &str = "tutorial-progress";
}

/// Errors that can occur reading or writing the store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored document could not be decoded.
    #[error("Corrupt value for key '{key}': {message}")]
    Corrupt {
        /// The key holding the corrupt document.
        key: String,
        /// Decoder message.
        message: String,
    },
}

/// A string key/value store.
pub trait KeyValueStore: Send + Sync {
    /// Returns the raw document stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backing medium cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Stores `value` under `key`, replacing any previous document.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backing medium cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backing medium cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process store. Contents are lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Store backed by one `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the directory cannot be created.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        paths::ensure_dir(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Opens the store at [`paths::data_dir`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the directory cannot be created.
    pub fn open_default() -> Result<Self, StorageError> {
        Self::open(&paths::data_dir())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        // Write a sibling file, then rename it over the target.
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reads and decodes the document under `key`.
///
/// # Errors
///
/// Returns [`StorageError::Corrupt`] if the document is not valid JSON for
/// `T`, or any error from the underlying store.
pub fn load<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| StorageError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })
}

/// Reads the document under `key`, falling back to `T::default()`.
///
/// A corrupt document is logged and removed so the next write starts
/// clean. Never fails.
pub fn load_or_default<T: DeserializeOwned + Default>(store: &dyn KeyValueStore, key: &str) -> T {
    match load(store, key) {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(StorageError::Corrupt { key, message }) => {
            log::warn!("Discarding corrupt stored value for '{key}': {message}");
            if let Err(e) = store.remove(&key) {
                log::warn!("Failed to remove corrupt key '{key}': {e}");
            }
            T::default()
        }
        Err(e) => {
            log::warn!("Failed to read '{key}' from storage: {e}");
            T::default()
        }
    }
}

/// Encodes `value` and stores it under `key`.
///
/// # Errors
///
/// Returns [`StorageError`] if encoding or the write fails.
pub fn save<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}
