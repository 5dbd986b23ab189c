//! Forward references recorded during bulk loading.
//!
//! The decoder may deliver `#10 = IFCWALL(..., #42, ...)` before `#42` exists.
//! Such a reference stays in the record as a plain id but cannot be entered into
//! the inverse index yet; it waits here until its target is loaded.
//!
//! The list is a view of the backend's pending index: every change made here is
//! mirrored by an `AddPending`/`RemovePending`/`ResolvePending` op in the same
//! write batch, and [`EntityStore::open`](crate::EntityStore::open) rebuilds it
//! from the backend.

use std::collections::BTreeMap;

use crate::id::InstanceId;
use crate::schema::TypeId;

/// A reference whose target has not been loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReference {
    /// Instance holding the reference.
    pub source: InstanceId,
    /// Declared type of `source`, used for the inverse key once resolved.
    pub source_type: TypeId,
    /// Attribute position of the reference inside `source`.
    pub attribute: u16,
    /// The id that has not been loaded yet.
    pub target: InstanceId,
}

/// Pending references keyed by the id they wait for.
#[derive(Debug, Default, Clone)]
pub struct UnresolvedReferences {
    by_target: BTreeMap<InstanceId, Vec<PendingReference>>,
}

impl FromIterator<PendingReference> for UnresolvedReferences {
    fn from_iter<I: IntoIterator<Item = PendingReference>>(iter: I) -> Self {
        let mut list = Self::new();
        for pending in iter {
            list.push(pending);
        }
        list
    }
}

impl UnresolvedReferences {
    /// An empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one more reference waiting for `pending.target`.
    pub fn push(&mut self, pending: PendingReference) {
        self.by_target.entry(pending.target).or_default().push(pending);
    }

    /// References waiting for `target`, without removing them.
    #[must_use]
    pub fn waiting_for(&self, target: InstanceId) -> &[PendingReference] {
        self.by_target.get(&target).map_or(&[], Vec::as_slice)
    }

    /// Removes and returns the references waiting for `target`.
    pub fn take(&mut self, target: InstanceId) -> Vec<PendingReference> {
        self.by_target.remove(&target).unwrap_or_default()
    }

    /// References held by `source`, optionally only from one attribute.
    #[must_use]
    pub fn from_source(&self, source: InstanceId, attribute: Option<u16>) -> Vec<PendingReference> {
        self.by_target
            .values()
            .flatten()
            .filter(|p| p.source == source && attribute.map_or(true, |a| a == p.attribute))
            .copied()
            .collect()
    }

    /// Forgets everything `source` was waiting for, optionally only from one
    /// attribute. Returns how many entries were dropped.
    pub fn forget_source(&mut self, source: InstanceId, attribute: Option<u16>) -> usize {
        let mut dropped = 0;
        self.by_target.retain(|_, list| {
            let before = list.len();
            list.retain(|p| p.source != source || attribute.is_some_and(|a| a != p.attribute));
            dropped += before - list.len();
            !list.is_empty()
        });
        dropped
    }

    /// Removes and returns every pending reference, ordered by target.
    pub fn drain(&mut self) -> Vec<PendingReference> {
        std::mem::take(&mut self.by_target)
            .into_values()
            .flatten()
            .collect()
    }

    /// Number of pending references.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_target.values().map(Vec::len).sum()
    }

    /// True when nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_target.is_empty()
    }

    /// Drops every pending reference.
    pub fn clear(&mut self) {
        self.by_target.clear();
    }
}
