//! Persistent storage backend.
//!
//! This module provides durable storage on an embedded ordered key-value store:
//! - One redb table holding primary records and every index as key ranges
//! - Atomic write batches (one write transaction each)
//! - An exclusive directory lock held by every open handle
//! - CRC32 checksums on every record
//! - A bounded LRU of deserialised instances
//!
//! # Layout
//!
//! ```text
//! <dir>/
//! ├── .lock          advisory lock (one open handle at a time)
//! └── store.redb     table "records"
//!                    ├── i…  instances
//!                    ├── t…  type index
//!                    ├── g…  GlobalId index
//!                    ├── v…  inverse-reference index
//!                    ├── d…  ids of deleted instances
//!                    ├── u…  forward references waiting for their target
//!                    └── m…  manifest, id high-water mark, instance count
//! ```

mod backend;
mod cache;
mod codec;
mod cursor;
mod file_lock;
mod keys;

pub use backend::{PersistentBackend, DB_FILE, FORMAT_VERSION};
pub use cursor::{StoredCursor, StoredTypeCursor};
pub use file_lock::{FileLock, LOCK_FILE};
