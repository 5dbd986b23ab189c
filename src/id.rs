//! Instance identifiers.
//!
//! Every instance in a document is addressed by a positive 32-bit integer (the
//! `#123` names of a STEP physical file). Identifiers are handed out once and are
//! never reused within the lifetime of a store, even after the instance they named
//! has been deleted.

use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Positive, stable instance identifier.
///
/// # Examples
///
/// ```
/// use spfstore::InstanceId;
///
/// let id = InstanceId::new(7).unwrap();
/// assert_eq!(id.get(), 7);
/// assert!(InstanceId::new(0).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(NonZeroU32);

impl InstanceId {
    /// The smallest valid identifier.
    pub const MIN: Self = Self(NonZeroU32::MIN);

    /// Validates a raw identifier. Returns `None` for zero.
    #[must_use]
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Returns the raw integer.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// The identifier after this one, or `None` at the top of the space.
    #[must_use]
    pub fn successor(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for InstanceId {
    type Error = StoreError;

    fn try_from(raw: u32) -> Result<Self> {
        Self::new(raw).ok_or(StoreError::IdSpaceExhausted)
    }
}

impl From<InstanceId> for u32 {
    fn from(id: InstanceId) -> Self {
        id.get()
    }
}

/// Monotonic identifier allocator.
///
/// `next` is the first identifier that has never been handed out or observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdAllocator {
    next: Option<InstanceId>,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    /// Starts at `#1`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: Some(InstanceId::MIN),
        }
    }

    /// Resumes from a persisted high-water mark (`0` means nothing was allocated).
    #[must_use]
    pub fn resume(high_water: u32) -> Self {
        Self {
            next: high_water.checked_add(1).and_then(InstanceId::new),
        }
    }

    /// The highest identifier handed out or observed so far (`0` if none).
    #[must_use]
    pub fn high_water(&self) -> u32 {
        match self.next {
            Some(next) => next.get() - 1,
            None => u32::MAX,
        }
    }

    /// The identifier the next call to [`allocate`](Self::allocate) would return.
    #[must_use]
    pub const fn peek(&self) -> Option<InstanceId> {
        self.next
    }

    /// Hands out the next identifier.
    ///
    /// # Errors
    /// `IdSpaceExhausted` once `#4294967295` has been used.
    pub fn allocate(&mut self) -> Result<InstanceId> {
        let id = self.next.ok_or(StoreError::IdSpaceExhausted)?;
        self.next = id.successor();
        Ok(id)
    }

    /// Records an identifier chosen by someone else (the decoder) so it is never
    /// handed out later.
    pub fn observe(&mut self, id: InstanceId) {
        if let Some(next) = self.next {
            if id >= next {
                self.next = id.successor();
            }
        }
    }

    /// Forgets every identifier. Only valid together with clearing the store.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
