//! In-memory storage backend.
//!
//! Everything lives in ordered maps, so iteration order matches the persistent
//! backend's key order without extra sorting. Index entries hold ids only; the
//! primary map is the single owner of instance records.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::cursor::{IdCursor, TypeCursor};
use crate::error::Result;
use crate::id::InstanceId;
use crate::options::BackendKind;
use crate::schema::TypeId;
use crate::storage::traits::{IndexOp, InverseKey, StorageBackend, WriteBatch};
use crate::unresolved::PendingReference;
use crate::value::Instance;

/// Resident backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    instances: BTreeMap<InstanceId, Arc<Instance>>,
    by_type: BTreeMap<TypeId, BTreeSet<InstanceId>>,
    by_guid: BTreeMap<String, InstanceId>,
    inverses: BTreeMap<InverseKey, Vec<InstanceId>>,
    deleted: BTreeSet<InstanceId>,
    pending: BTreeMap<InstanceId, Vec<PendingReference>>,
    high_water: u32,
}

impl MemoryBackend {
    /// An empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn add_type_ref(&mut self, type_id: TypeId, id: InstanceId) {
        self.by_type.entry(type_id).or_default().insert(id);
    }

    fn remove_type_ref(&mut self, type_id: TypeId, id: InstanceId) {
        if let Some(set) = self.by_type.get_mut(&type_id) {
            set.remove(&id);
            if set.is_empty() {
                self.by_type.remove(&type_id);
            }
        }
    }

    fn register_inverse(&mut self, key: InverseKey, from: InstanceId) {
        self.inverses.entry(key).or_default().push(from);
    }

    fn unregister_inverse(&mut self, key: InverseKey, from: InstanceId) {
        let Some(list) = self.inverses.get_mut(&key) else {
            return;
        };
        if let Some(pos) = list.iter().position(|&id| id == from) {
            list.remove(pos);
        }
        if list.is_empty() {
            self.inverses.remove(&key);
        }
    }

    fn process_deletion_inverse(&mut self, instance: &Instance) {
        for (attribute, target) in instance.references() {
            let key = InverseKey::new(target, instance.type_id, attribute);
            self.unregister_inverse(key, instance.id);
        }
    }

    fn drop_inverse_target(&mut self, target: InstanceId) {
        let keys: Vec<InverseKey> = self
            .inverses
            .range(target_range(target))
            .map(|(k, _)| *k)
            .collect();
        for key in keys {
            self.inverses.remove(&key);
        }
    }

    fn remove_pending(&mut self, pending: PendingReference) {
        let Some(list) = self.pending.get_mut(&pending.target) else {
            return;
        };
        if let Some(pos) = list.iter().position(|p| *p == pending) {
            list.remove(pos);
        }
        if list.is_empty() {
            self.pending.remove(&pending.target);
        }
    }

    fn apply_op(&mut self, op: IndexOp) {
        match op {
            IndexOp::PutInstance(instance) => {
                self.instances.insert(instance.id, instance);
            }
            IndexOp::RemoveInstance(id) => {
                self.instances.remove(&id);
            }
            IndexOp::AddTypeRef { type_id, id } => self.add_type_ref(type_id, id),
            IndexOp::RemoveTypeRef { type_id, id } => self.remove_type_ref(type_id, id),
            IndexOp::PutGuid { guid, id } => {
                self.by_guid.insert(guid, id);
            }
            IndexOp::RemoveGuid { guid } => {
                self.by_guid.remove(&guid);
            }
            IndexOp::RegisterInverse { key, from } => self.register_inverse(key, from),
            IndexOp::UnregisterInverse { key, from } => self.unregister_inverse(key, from),
            IndexOp::ProcessDeletionInverse(instance) => self.process_deletion_inverse(&instance),
            IndexOp::DropInverseTarget(target) => self.drop_inverse_target(target),
            IndexOp::ReserveIds(high_water) => self.high_water = self.high_water.max(high_water),
            IndexOp::Tombstone(id) => {
                self.deleted.insert(id);
            }
            IndexOp::AddPending(pending) => self.pending.entry(pending.target).or_default().push(pending),
            IndexOp::RemovePending(pending) => self.remove_pending(pending),
            IndexOp::ResolvePending(target) => {
                self.pending.remove(&target);
            }
        }
    }
}

fn target_range(target: InstanceId) -> std::ops::RangeInclusive<InverseKey> {
    InverseKey::new(target, TypeId::from_index(0), 0)
        ..=InverseKey::new(target, TypeId::from_index(u16::MAX), u16::MAX)
}

impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Resident
    }

    fn get(&self, id: InstanceId) -> Result<Option<Arc<Instance>>> {
        Ok(self.instances.get(&id).cloned())
    }

    fn contains(&self, id: InstanceId) -> Result<bool> {
        Ok(self.instances.contains_key(&id))
    }

    fn is_tombstoned(&self, id: InstanceId) -> Result<bool> {
        Ok(self.deleted.contains(&id))
    }

    fn guid_lookup(&self, guid: &str) -> Result<Option<InstanceId>> {
        Ok(self.by_guid.get(guid).copied())
    }

    fn ids_of_type(&self, type_id: TypeId) -> IdCursor<'_> {
        self.by_type
            .get(&type_id)
            .map_or(IdCursor::Empty, IdCursor::over_set)
    }

    fn types(&self) -> TypeCursor<'_> {
        TypeCursor::over_index(&self.by_type)
    }

    fn ids(&self) -> IdCursor<'_> {
        IdCursor::over_keys(&self.instances)
    }

    fn inverse_entries(&self, target: InstanceId) -> Result<Vec<(InverseKey, Vec<InstanceId>)>> {
        Ok(self
            .inverses
            .range(target_range(target))
            .map(|(k, v)| (*k, v.clone()))
            .collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.instances.len())
    }

    fn high_water(&self) -> Result<u32> {
        Ok(self.high_water)
    }

    fn pending_references(&self) -> Result<Vec<PendingReference>> {
        Ok(self.pending.values().flatten().copied().collect())
    }

    fn apply(&mut self, batch: WriteBatch) -> Result<()> {
        // Every op is an infallible map update, so the batch cannot stop halfway.
        for op in batch {
            self.apply_op(op);
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        *self = Self::new();
        Ok(())
    }
}
