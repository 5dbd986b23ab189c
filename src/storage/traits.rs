//! Abstract storage contract.
//!
//! Both backends implement [`StorageBackend`]. Reads go straight to the backend;
//! every mutation is expressed as a [`WriteBatch`] of index operations that the
//! backend applies atomically: a failed batch leaves primary storage and every
//! index exactly as they were.

use std::sync::Arc;

use crate::cursor::{IdCursor, TypeCursor};
use crate::error::Result;
use crate::id::InstanceId;
use crate::options::BackendKind;
use crate::schema::TypeId;
use crate::unresolved::PendingReference;
use crate::value::Instance;

/// Key of the inverse-reference index: instances of `type_id` referencing
/// `target` from attribute `attribute`.
///
/// The derived ordering (target, then type, then attribute) is the iteration
/// order of both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InverseKey {
    /// Referenced instance.
    pub target: InstanceId,
    /// Declared type of the referencing instances.
    pub type_id: TypeId,
    /// Attribute position holding the reference.
    pub attribute: u16,
}

impl InverseKey {
    /// Builds a key from its three parts.
    #[must_use]
    pub const fn new(target: InstanceId, type_id: TypeId, attribute: u16) -> Self {
        Self {
            target,
            type_id,
            attribute,
        }
    }
}

/// One index-maintenance step.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOp {
    /// Store or replace an instance record.
    PutInstance(Arc<Instance>),
    /// Remove an instance record. Absent records are ignored.
    RemoveInstance(InstanceId),
    /// Adds `id` to the set of instances of `type_id`.
    AddTypeRef { type_id: TypeId, id: InstanceId },
    /// Drops the type's entry once its set is empty.
    RemoveTypeRef { type_id: TypeId, id: InstanceId },
    /// Maps a GlobalId to its instance.
    PutGuid { guid: String, id: InstanceId },
    /// Removes a GlobalId mapping. Absent mappings are ignored.
    RemoveGuid { guid: String },
    /// Appends `from` to the entry list of `key`.
    RegisterInverse { key: InverseKey, from: InstanceId },
    /// Removes one occurrence of `from`; a no-op when absent.
    UnregisterInverse { key: InverseKey, from: InstanceId },
    /// Unregisters every outgoing reference of the instance. Missing entries are
    /// skipped and the walk always completes.
    ProcessDeletionInverse(Arc<Instance>),
    /// Drops every inverse entry whose target is this id.
    DropInverseTarget(InstanceId),
    /// Raises the persisted id high-water mark (never lowers it).
    ReserveIds(u32),
    /// Marks a deleted id so it can never be loaded again.
    Tombstone(InstanceId),
    /// Records a forward reference whose target is not stored yet.
    AddPending(PendingReference),
    /// Removes one occurrence of a pending reference; a no-op when absent.
    RemovePending(PendingReference),
    /// Drops every pending reference waiting for this target.
    ResolvePending(InstanceId),
}

/// An ordered list of [`IndexOp`]s applied as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<IndexOp>,
}

impl WriteBatch {
    /// An empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an op; ops apply in push order.
    pub fn push(&mut self, op: IndexOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    /// Pushes [`IndexOp::PutInstance`].
    pub fn put_instance(&mut self, instance: Arc<Instance>) -> &mut Self {
        self.push(IndexOp::PutInstance(instance))
    }

    /// Pushes [`IndexOp::RegisterInverse`].
    pub fn register_inverse(&mut self, key: InverseKey, from: InstanceId) -> &mut Self {
        self.push(IndexOp::RegisterInverse { key, from })
    }

    /// Pushes [`IndexOp::UnregisterInverse`].
    pub fn unregister_inverse(&mut self, key: InverseKey, from: InstanceId) -> &mut Self {
        self.push(IndexOp::UnregisterInverse { key, from })
    }

    /// Pushes [`IndexOp::AddTypeRef`].
    pub fn add_type_ref(&mut self, type_id: TypeId, id: InstanceId) -> &mut Self {
        self.push(IndexOp::AddTypeRef { type_id, id })
    }

    /// Pushes [`IndexOp::RemoveTypeRef`].
    pub fn remove_type_ref(&mut self, type_id: TypeId, id: InstanceId) -> &mut Self {
        self.push(IndexOp::RemoveTypeRef { type_id, id })
    }

    /// Number of ops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when the batch holds no ops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Ops in application order.
    pub fn iter(&self) -> std::slice::Iter<'_, IndexOp> {
        self.ops.iter()
    }
}

impl IntoIterator for WriteBatch {
    type Item = IndexOp;
    type IntoIter = std::vec::IntoIter<IndexOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

impl<'a> IntoIterator for &'a WriteBatch {
    type Item = &'a IndexOp;
    type IntoIter = std::slice::Iter<'a, IndexOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

/// Storage backend for one document.
///
/// Cursors borrow the backend, so none can outlive a mutation.
///
/// # Ordering
/// Implementations must agree on iteration order: ids ascending within a type,
/// types ascending, inverse entries by [`InverseKey`] and then insertion order.
pub trait StorageBackend: Send {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Looks up a record by id.
    fn get(&self, id: InstanceId) -> Result<Option<Arc<Instance>>>;

    /// True when a record with this id is stored.
    fn contains(&self, id: InstanceId) -> Result<bool>;

    /// True when this id belonged to an instance that has been deleted.
    fn is_tombstoned(&self, id: InstanceId) -> Result<bool>;

    /// Instance holding this GlobalId, if any.
    fn guid_lookup(&self, guid: &str) -> Result<Option<InstanceId>>;

    /// Ids of exactly this type, ascending.
    fn ids_of_type(&self, type_id: TypeId) -> IdCursor<'_>;

    /// Types with at least one instance, ascending.
    fn types(&self) -> TypeCursor<'_>;

    /// Every stored id, ascending.
    fn ids(&self) -> IdCursor<'_>;

    /// Every inverse entry targeting `target`, in key order.
    fn inverse_entries(&self, target: InstanceId) -> Result<Vec<(InverseKey, Vec<InstanceId>)>>;

    /// Number of stored instances.
    fn len(&self) -> Result<usize>;

    /// Highest id ever reserved (`0` if none).
    fn high_water(&self) -> Result<u32>;

    /// Every stored forward reference still waiting for its target, ordered by
    /// target.
    fn pending_references(&self) -> Result<Vec<PendingReference>>;

    /// Applies every op of the batch, or none of them.
    fn apply(&mut self, batch: WriteBatch) -> Result<()>;

    /// Drops every record, index entry, tombstone and pending reference, and the
    /// high-water mark.
    fn reset(&mut self) -> Result<()>;
}
