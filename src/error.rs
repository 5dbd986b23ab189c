//! Error types for spfstore.
//!
//! All errors are strongly typed using thiserror. Index-maintenance steps inside
//! the backends never surface their own error type: whatever goes wrong there is
//! mapped into one of the [`StoreError`] kinds before it reaches the caller.

use std::path::PathBuf;

use thiserror::Error;

use crate::id::InstanceId;

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No instance with this id exists.
    #[error("instance #{0} not found")]
    NotFound(InstanceId),

    /// No instance carries this GlobalId.
    #[error("no instance with GlobalId '{0}'")]
    GuidNotFound(String),

    /// The type name is not declared in the schema.
    #[error("unknown type '{0}'")]
    UnknownType(String),

    /// Inserting the instance would give two instances the same GlobalId.
    #[error("GlobalId '{guid}' is already used by instance #{existing}")]
    DuplicateGuid {
        /// The contested GlobalId.
        guid: String,
        /// The instance already holding it.
        existing: InstanceId,
    },

    /// The decoder delivered an id that is present or was deleted.
    #[error("instance #{0} already exists")]
    DuplicateId(InstanceId),

    /// The record does not match the shape its declaration requires.
    #[error("malformed record #{id}: {reason}")]
    MalformedRecord {
        /// The offending instance.
        id: InstanceId,
        /// What is wrong with it.
        reason: String,
    },

    /// The persistent backend could not read or write.
    #[error("storage unavailable ({context}): {message}")]
    StorageUnavailable {
        /// The step that failed.
        context: &'static str,
        /// Message of the underlying error.
        message: String,
    },

    /// A key or record in the persistent backend failed to decode.
    #[error("corrupt index entry {key}: {reason}")]
    CorruptIndex {
        /// Hex encoding of the raw key.
        key: String,
        /// Why it could not be decoded.
        reason: String,
    },

    /// The store was opened read-only.
    #[error("store is read-only")]
    ReadOnly,

    /// Every positive 32-bit identifier has been handed out.
    #[error("instance identifier space exhausted")]
    IdSpaceExhausted,
}

impl StoreError {
    /// True for the recoverable "absent" kinds (`NotFound`, `GuidNotFound`).
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::GuidNotFound(_))
    }

    /// True for failures that leave the current operation unfinishable.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable { .. } | Self::CorruptIndex { .. } | Self::IdSpaceExhausted
        )
    }

    pub(crate) fn malformed(id: InstanceId, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            id,
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(key: &[u8], reason: impl Into<String>) -> Self {
        Self::CorruptIndex {
            key: hex::encode(key),
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable(context: &'static str, message: impl ToString) -> Self {
        Self::StorageUnavailable {
            context,
            message: message.to_string(),
        }
    }
}

/// Errors that prevent a store from being opened.
#[derive(Debug, Error)]
pub enum OpenError {
    /// [`StoreOptions::validate`](crate::StoreOptions::validate) rejected the options.
    #[error("invalid store options: {0}")]
    InvalidOptions(String),

    /// The store directory or lock file could not be prepared.
    #[error("failed to prepare store directory {path}: {source}")]
    Io {
        /// The store directory.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Another handle has the directory open.
    #[error("store at {0} is locked by another process")]
    Locked(PathBuf),

    /// Read-only open of a directory holding no store.
    #[error("no store exists at {0} (read-only open does not create one)")]
    Missing(PathBuf),

    /// The manifest was written for a different schema.
    #[error("store was written for schema '{found}', not '{expected}'")]
    SchemaMismatch {
        /// Schema passed to `open`.
        expected: String,
        /// Schema recorded in the manifest.
        found: String,
    },

    /// The on-disk layout version is not this build's.
    #[error("unsupported store format version {found} (expected {expected})")]
    UnsupportedFormat {
        /// Version this build writes.
        expected: u32,
        /// Version found on disk.
        found: u32,
    },

    /// Built without the `persistent` feature.
    #[error("persistent backend requested but the `persistent` feature is disabled")]
    BackendUnavailable,

    /// Reading existing state failed while opening.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
