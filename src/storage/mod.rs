//! Storage backends.
//!
//! [`StorageBackend`] is the contract; [`MemoryBackend`] keeps everything
//! resident and, with the `persistent` feature, [`PersistentBackend`] keeps it in
//! an embedded key-value store.

mod memory;
mod traits;

/// On-disk backend.
#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::MemoryBackend;
#[cfg(feature = "persistent")]
pub use persistent::PersistentBackend;
pub use traits::{IndexOp, InverseKey, StorageBackend, WriteBatch};
