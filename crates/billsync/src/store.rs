//! Local key-value persistence
//!
//! This module provides the [`Store`] struct, a directory of JSON files with
//! one file per [`StoreKey`].
//!
//! ## Features
//!
//! - **Atomic writes**: Values are written to a temp file first, then renamed
//!   to prevent corruption on crash.
//! - **Soft reads**: A missing or unparseable value reads as `None`, so callers
//!   fall back to their defaults instead of failing at startup.
//! - **Synchronous**: Writes complete before the call returns. There are no
//!   transactions across keys.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// The logical keys the terminal persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    /// Login credentials
    Users,
    /// The catalog
    Products,
    /// The invoice log, newest first
    Invoices,
    /// Company directory and active company
    Settings,
    /// The logged-in user, if any
    CurrentUser,
    /// The hub a device last connected to
    LastHubId,
    /// The in-progress cart
    PosCart,
}

impl StoreKey {
    /// Every key, in a stable order.
    pub const ALL: [StoreKey; 7] = [
        StoreKey::Users,
        StoreKey::Products,
        StoreKey::Invoices,
        StoreKey::Settings,
        StoreKey::CurrentUser,
        StoreKey::LastHubId,
        StoreKey::PosCart,
    ];

    /// The logical key name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Products => "products",
            Self::Invoices => "invoices",
            Self::Settings => "settings",
            Self::CurrentUser => "current_user",
            Self::LastHubId => "last_hub_id",
            Self::PosCart => "pos_cart",
        }
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON file store rooted at a directory.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Open a store, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::storage(format!("failed to create store directory: {e}")))?;
        debug!(path = %root.display(), "Store opened");
        Ok(Self { root })
    }

    /// Directory holding the store files
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: StoreKey) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// Read a value.
    ///
    /// Returns `None` when the key was never written or its contents cannot be
    /// parsed as `T`. Corruption is logged, not returned.
    pub fn read<T: DeserializeOwned>(&self, key: StoreKey) -> Option<T> {
        let path = self.path(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(%key, error = %e, "Failed to read store value, using default");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%key, error = %e, "Stored value is corrupt, using default");
                None
            }
        }
    }

    /// Read a value, or produce and persist the default on first run.
    ///
    /// A corrupt value is replaced by the default as well.
    pub fn read_or_seed<T, F>(&self, key: StoreKey, default: F) -> T
    where
        T: DeserializeOwned + Serialize,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.read(key) {
            return value;
        }
        let value = default();
        if let Err(e) = self.write(key, &value) {
            warn!(%key, error = %e, "Failed to persist default value");
        }
        value
    }

    /// Write a value atomically.
    pub fn write<T: Serialize + ?Sized>(&self, key: StoreKey, value: &T) -> Result<()> {
        let path = self.path(key);
        let temp_path = path.with_extension("json.tmp");

        let bytes = serde_json::to_vec(value)
            .map_err(|e| Error::storage(format!("failed to serialize {key}: {e}")))?;

        std::fs::write(&temp_path, &bytes)
            .map_err(|e| Error::storage(format!("failed to write temp file for {key}: {e}")))?;

        std::fs::rename(&temp_path, &path)
            .map_err(|e| Error::storage(format!("failed to rename temp file for {key}: {e}")))?;

        debug!(%key, bytes = bytes.len(), "Store value written");
        Ok(())
    }

    /// Remove a value. Removing a missing key is not an error.
    pub fn remove(&self, key: StoreKey) -> Result<()> {
        match std::fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(format!("failed to remove {key}: {e}"))),
        }
    }

    /// Remove every key.
    pub fn clear(&self) -> Result<()> {
        for key in StoreKey::ALL {
            self.remove(key)?;
        }
        Ok(())
    }
}
