//! Store configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::OpenError;

/// Which backend holds the document. Chosen once at open time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendChoice {
    /// Everything in memory.
    Resident,
    /// An embedded key-value store in this directory.
    Persistent(PathBuf),
}

/// Backend kind of an open store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// [`MemoryBackend`](crate::MemoryBackend).
    Resident,
    /// The on-disk backend.
    Persistent,
}

/// Options passed to [`EntityStore::open`](crate::EntityStore::open).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Reject every mutation. Persistent stores must already exist.
    pub readonly: bool,
    /// Instances kept deserialised by the persistent backend (0 disables).
    pub cache_size: usize,
    /// Pad or truncate records whose attribute count does not match their
    /// declaration instead of rejecting them.
    pub coerce_attribute_count: bool,
    /// Flush every committed write to disk before returning.
    pub sync_on_write: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            readonly: false,
            cache_size: 1024,
            coerce_attribute_count: false,
            sync_on_write: true,
        }
    }
}

impl StoreOptions {
    const MAX_CACHE_SIZE: usize = 1 << 24;

    /// Read-only defaults.
    #[must_use]
    pub fn readonly() -> Self {
        Self {
            readonly: true,
            ..Self::default()
        }
    }

    /// Checks the options are usable.
    ///
    /// # Errors
    /// `InvalidOptions` when `cache_size` is absurdly large.
    pub fn validate(self) -> Result<Self, OpenError> {
        if self.cache_size > Self::MAX_CACHE_SIZE {
            return Err(OpenError::InvalidOptions(format!(
                "cache_size must be at most {} (got {})",
                Self::MAX_CACHE_SIZE,
                self.cache_size
            )));
        }
        Ok(self)
    }
}
