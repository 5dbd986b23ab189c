//! The entity store facade.
//!
//! [`EntityStore`] is what applications hold. It owns the id allocator and a
//! view of the pending forward references and turns every mutation into one
//! [`WriteBatch`] so that primary storage and the type, GlobalId and inverse
//! indices change together or not at all, whichever backend is active.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::cursor::{IdCursor, TypeCursor};
use crate::error::{OpenError, Result, StoreError};
use crate::id::{IdAllocator, InstanceId};
use crate::options::{BackendChoice, BackendKind, StoreOptions};
use crate::schema::{Declaration, Schema, TypeId};
use crate::storage::{IndexOp, InverseKey, MemoryBackend, StorageBackend, WriteBatch};
use crate::unresolved::{PendingReference, UnresolvedReferences};
use crate::value::{Instance, Value};

/// A document's instances and their indices.
///
/// # Examples
///
/// ```
/// use spfstore::{EntityStore, Schema, Value};
///
/// let schema = Schema::builder("DEMO")
///     .entity("Point", None, &["Coordinates"])
///     .entity("Line", None, &["Pnt", "Dir"])
///     .build()
///     .unwrap();
/// let point = schema.type_id("Point").unwrap();
/// let line = schema.type_id("Line").unwrap();
///
/// let mut store = EntityStore::in_memory(schema);
/// let p = store.insert(point, vec![Value::List(vec![0.0.into(), 0.0.into()])]).unwrap();
/// let l = store.insert(line, vec![Value::Ref(p), Value::Null]).unwrap();
///
/// let users = store.referencing_instances(p, None, None).unwrap();
/// assert_eq!(users.collect_ids().unwrap(), vec![l]);
/// ```
pub struct EntityStore {
    schema: Arc<Schema>,
    backend: Box<dyn StorageBackend>,
    ids: IdAllocator,
    unresolved: UnresolvedReferences,
    options: StoreOptions,
}

impl fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("schema", &self.schema.name())
            .field("backend", &self.backend.kind())
            .field("next_id", &self.ids.peek())
            .field("unresolved", &self.unresolved.len())
            .field("options", &self.options)
            .finish()
    }
}

fn declaration(schema: &Schema, type_id: TypeId) -> Result<&Declaration> {
    schema
        .declaration(type_id)
        .ok_or_else(|| StoreError::UnknownType(type_id.to_string()))
}

fn guid_of<'v>(decl: &Declaration, attributes: &'v [Value]) -> Option<&'v str> {
    if decl.carries_guid() {
        attributes.first().and_then(Value::as_str)
    } else {
        None
    }
}

fn attribute_position(index: usize) -> u16 {
    // Declarations never have more than u16::MAX attributes.
    u16::try_from(index).unwrap_or(u16::MAX)
}

impl EntityStore {
    /// Opens a store on the chosen backend. The choice is fixed for the life of
    /// the returned store.
    ///
    /// # Errors
    /// Invalid options, or any failure preparing the persistent backend.
    pub fn open(
        schema: impl Into<Arc<Schema>>,
        backend: BackendChoice,
        options: StoreOptions,
    ) -> std::result::Result<Self, OpenError> {
        let options = options.validate()?;
        let schema = schema.into();
        let backend: Box<dyn StorageBackend> = match backend {
            BackendChoice::Resident => Box::new(MemoryBackend::new()),
            BackendChoice::Persistent(dir) => persistent_backend(&dir, &schema, &options)?,
        };
        let ids = IdAllocator::resume(backend.high_water()?);
        let unresolved: UnresolvedReferences = backend.pending_references()?.into_iter().collect();

        info!(
            schema = schema.name(),
            backend = ?backend.kind(),
            instances = backend.len()?,
            unresolved = unresolved.len(),
            next_id = ?ids.peek(),
            "opened entity store"
        );

        Ok(Self {
            schema,
            backend,
            ids,
            unresolved,
            options,
        })
    }

    /// A resident store with default options.
    #[must_use]
    pub fn in_memory(schema: impl Into<Arc<Schema>>) -> Self {
        Self {
            schema: schema.into(),
            backend: Box::new(MemoryBackend::new()),
            ids: IdAllocator::new(),
            unresolved: UnresolvedReferences::new(),
            options: StoreOptions::default(),
        }
    }

    /// Shorthand for [`open`](Self::open) with [`BackendChoice::Persistent`].
    ///
    /// # Errors
    /// See [`open`](Self::open).
    pub fn open_persistent(
        schema: impl Into<Arc<Schema>>,
        dir: impl AsRef<Path>,
        options: StoreOptions,
    ) -> std::result::Result<Self, OpenError> {
        Self::open(
            schema,
            BackendChoice::Persistent(dir.as_ref().to_path_buf()),
            options,
        )
    }

    /// The schema this store was opened with.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Options in effect, after validation.
    #[must_use]
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Which backend is active.
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Resolves a declaration name.
    ///
    /// # Errors
    /// `UnknownType` if the schema does not declare it.
    pub fn type_id(&self, name: &str) -> Result<TypeId> {
        self.schema
            .type_id(name)
            .ok_or_else(|| StoreError::UnknownType(name.to_string()))
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.options.readonly {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    fn conform(&self, id: InstanceId, decl: &Declaration, mut attributes: Vec<Value>) -> Result<Vec<Value>> {
        let expected = decl.attribute_count();
        if attributes.len() == expected {
            return Ok(attributes);
        }
        if !self.options.coerce_attribute_count {
            return Err(StoreError::malformed(
                id,
                format!(
                    "{} has {expected} attributes, record has {}",
                    decl.name(),
                    attributes.len()
                ),
            ));
        }
        warn!(
            id = %id,
            type_name = decl.name(),
            expected,
            found = attributes.len(),
            "coercing attribute count"
        );
        attributes.resize(expected, Value::Null);
        Ok(attributes)
    }

    fn ensure_guid_free(&self, guid: &str, owner: InstanceId) -> Result<()> {
        match self.backend.guid_lookup(guid)? {
            Some(existing) if existing != owner => Err(StoreError::DuplicateGuid {
                guid: guid.to_string(),
                existing,
            }),
            _ => Ok(()),
        }
    }

    fn ensure_targets_exist(&self, owner: InstanceId, value: &Value) -> Result<()> {
        for target in value.references() {
            if target != owner && !self.backend.contains(target)? {
                return Err(StoreError::NotFound(target));
            }
        }
        Ok(())
    }

    /// Record, type entry and GlobalId entry of a new instance.
    fn record_batch(&self, decl: &Declaration, instance: &Arc<Instance>) -> Result<WriteBatch> {
        let mut batch = WriteBatch::new();
        batch.put_instance(Arc::clone(instance));
        if decl.is_entity() {
            batch.add_type_ref(instance.type_id, instance.id);
        }
        if let Some(guid) = guid_of(decl, &instance.attributes) {
            self.ensure_guid_free(guid, instance.id)?;
            batch.push(IndexOp::PutGuid {
                guid: guid.to_string(),
                id: instance.id,
            });
        }
        Ok(batch)
    }

    /// Creates an instance with every attribute unset.
    ///
    /// # Errors
    /// `UnknownType`, `ReadOnly`, `IdSpaceExhausted`, or a backend failure.
    pub fn create(&mut self, type_id: TypeId) -> Result<InstanceId> {
        let count = declaration(&self.schema, type_id)?.attribute_count();
        self.insert(type_id, vec![Value::Null; count])
    }

    /// Creates an instance with the given attributes. Every referenced instance
    /// must already exist.
    ///
    /// # Errors
    /// - `MalformedRecord` if the attribute count is wrong (strict mode)
    /// - `NotFound(target)` for a reference to a missing instance
    /// - `DuplicateGuid` if another instance carries the same GlobalId
    ///
    /// A failed insert leaves the store unchanged.
    pub fn insert(&mut self, type_id: TypeId, attributes: Vec<Value>) -> Result<InstanceId> {
        self.ensure_writable()?;
        let schema = Arc::clone(&self.schema);
        let decl = declaration(&schema, type_id)?;
        let id = self.ids.peek().ok_or(StoreError::IdSpaceExhausted)?;
        let attributes = self.conform(id, decl, attributes)?;
        for value in &attributes {
            self.ensure_targets_exist(id, value)?;
        }

        let instance = Arc::new(Instance {
            id,
            type_id,
            attributes,
        });
        let mut batch = self.record_batch(decl, &instance)?;
        for (attribute, target) in instance.references() {
            batch.register_inverse(InverseKey::new(target, type_id, attribute), id);
        }
        batch.push(IndexOp::ReserveIds(id.get()));

        self.backend.apply(batch)?;
        self.ids.observe(id);
        debug!(id = %id, type_name = decl.name(), "inserted instance");
        Ok(id)
    }

    /// Stores a record delivered by the decoder under its own id.
    ///
    /// References to ids that are not loaded yet are kept in the record and
    /// entered into the inverse index once their target arrives.
    ///
    /// # Errors
    /// - `DuplicateId` if `id` is present or belonged to a deleted instance
    /// - `MalformedRecord` on an attribute count mismatch (unless coercing)
    /// - `DuplicateGuid` if another instance carries the same GlobalId
    pub fn load(&mut self, id: InstanceId, type_id: TypeId, attributes: Vec<Value>) -> Result<()> {
        self.ensure_writable()?;
        let schema = Arc::clone(&self.schema);
        let decl = declaration(&schema, type_id)?;
        if self.backend.contains(id)? || self.backend.is_tombstoned(id)? {
            return Err(StoreError::DuplicateId(id));
        }
        let attributes = self.conform(id, decl, attributes)?;
        let instance = Arc::new(Instance {
            id,
            type_id,
            attributes,
        });

        let mut batch = self.record_batch(decl, &instance)?;

        let mut deferred = Vec::new();
        for (attribute, target) in instance.references() {
            if target == id || self.backend.contains(target)? {
                batch.register_inverse(InverseKey::new(target, type_id, attribute), id);
            } else {
                deferred.push(PendingReference {
                    source: id,
                    source_type: type_id,
                    attribute,
                    target,
                });
            }
        }
        for pending in &deferred {
            batch.push(IndexOp::AddPending(*pending));
        }
        let waiting_here = self.unresolved.waiting_for(id);
        for pending in waiting_here {
            batch.register_inverse(
                InverseKey::new(id, pending.source_type, pending.attribute),
                pending.source,
            );
        }
        if !waiting_here.is_empty() {
            batch.push(IndexOp::ResolvePending(id));
        }
        let high = deferred.iter().map(|p| p.target).fold(id, InstanceId::max);
        batch.push(IndexOp::ReserveIds(high.get()));

        self.backend.apply(batch)?;

        let resolved = self.unresolved.take(id).len();
        self.ids.observe(high);
        let waiting = deferred.len();
        for pending in deferred {
            self.unresolved.push(pending);
        }
        debug!(id = %id, type_name = decl.name(), resolved, waiting, "loaded instance");
        Ok(())
    }

    /// Ends a bulk load. Forward references whose target never arrived are
    /// removed from their records. Returns how many there were.
    ///
    /// # Errors
    /// In strict mode any leftover reference is reported as `MalformedRecord`
    /// (after the records were cleaned up).
    pub fn finish_load(&mut self) -> Result<usize> {
        if self.unresolved.is_empty() {
            return Ok(0);
        }
        self.ensure_writable()?;

        let leftovers = self.unresolved.drain();
        let mut by_source: BTreeMap<InstanceId, Vec<&PendingReference>> = BTreeMap::new();
        for pending in &leftovers {
            by_source.entry(pending.source).or_default().push(pending);
        }

        let mut batch = WriteBatch::new();
        let targets: BTreeSet<InstanceId> = leftovers.iter().map(|p| p.target).collect();
        for target in targets {
            batch.push(IndexOp::ResolvePending(target));
        }
        for (source, refs) in &by_source {
            let Some(current) = self.backend.get(*source)? else {
                continue;
            };
            let mut updated = (*current).clone();
            for pending in refs {
                if let Some(slot) = updated.attributes.get_mut(usize::from(pending.attribute)) {
                    slot.strip_references(pending.target);
                }
            }
            batch.put_instance(Arc::new(updated));
        }
        if let Err(e) = self.backend.apply(batch) {
            for pending in leftovers {
                self.unresolved.push(pending);
            }
            return Err(e);
        }

        let first = &leftovers[0];
        warn!(
            count = leftovers.len(),
            sources = by_source.len(),
            first_source = %first.source,
            first_target = %first.target,
            "removed unresolved forward references"
        );
        if self.options.coerce_attribute_count {
            Ok(leftovers.len())
        } else {
            Err(StoreError::malformed(
                first.source,
                format!(
                    "{} unresolved reference(s), first to #{}",
                    leftovers.len(),
                    first.target
                ),
            ))
        }
    }

    /// Number of references still waiting for their target.
    #[must_use]
    pub fn unresolved_count(&self) -> usize {
        self.unresolved.len()
    }

    /// Replaces attribute `index` of an instance, keeping the inverse and
    /// GlobalId indices in step.
    ///
    /// # Errors
    /// - `NotFound` if the instance, or an instance the new value references,
    ///   does not exist
    /// - `MalformedRecord` if `index` is out of range
    /// - `DuplicateGuid` when attribute 0 becomes another instance's GlobalId
    pub fn set_attribute(&mut self, id: InstanceId, index: usize, value: Value) -> Result<()> {
        self.ensure_writable()?;
        let current = self.instance_by_id(id)?;
        let schema = Arc::clone(&self.schema);
        let decl = declaration(&schema, current.type_id)?;
        if index >= current.attributes.len() {
            return Err(StoreError::malformed(
                id,
                format!("{} has no attribute {index}", decl.name()),
            ));
        }
        self.ensure_targets_exist(id, &value)?;

        let attribute = attribute_position(index);
        let mut updated = (*current).clone();
        let old = std::mem::replace(&mut updated.attributes[index], value);

        let mut batch = WriteBatch::new();
        for target in old.references() {
            batch.unregister_inverse(InverseKey::new(target, current.type_id, attribute), id);
        }
        for target in updated.attributes[index].references() {
            batch.register_inverse(InverseKey::new(target, current.type_id, attribute), id);
        }
        if index == 0 && decl.carries_guid() {
            let old_guid = old.as_str();
            let new_guid = updated.attributes[0].as_str();
            if old_guid != new_guid {
                if let Some(guid) = new_guid {
                    self.ensure_guid_free(guid, id)?;
                }
                if let Some(guid) = old_guid {
                    batch.push(IndexOp::RemoveGuid {
                        guid: guid.to_string(),
                    });
                }
                if let Some(guid) = new_guid {
                    batch.push(IndexOp::PutGuid {
                        guid: guid.to_string(),
                        id,
                    });
                }
            }
        }
        batch.put_instance(Arc::new(updated));
        for pending in self.unresolved.from_source(id, Some(attribute)) {
            batch.push(IndexOp::RemovePending(pending));
        }

        self.backend.apply(batch)?;
        self.unresolved.forget_source(id, Some(attribute));
        debug!(id = %id, attribute, "updated attribute");
        Ok(())
    }

    /// Deletes an instance.
    ///
    /// Index entries go first (its own outgoing references, then references to
    /// it held by other instances, which are removed from those records), then
    /// the GlobalId and type entries, then the record itself. The id is
    /// tombstoned: it can never be loaded or allocated again.
    ///
    /// # Errors
    /// `NotFound` if the instance does not exist. If index cleanup fails the
    /// record and its type entry are still removed when possible, and the
    /// cleanup error is returned.
    pub fn delete(&mut self, id: InstanceId) -> Result<()> {
        self.ensure_writable()?;
        let instance = self.instance_by_id(id)?;

        let mut batch = WriteBatch::new();
        batch.push(IndexOp::ProcessDeletionInverse(Arc::clone(&instance)));

        let mut referrers = BTreeSet::new();
        for (_, sources) in self.backend.inverse_entries(id)? {
            referrers.extend(sources.into_iter().filter(|&source| source != id));
        }
        for &source in &referrers {
            let Some(current) = self.backend.get(source)? else {
                continue;
            };
            let mut updated = (*current).clone();
            let stripped: usize = updated
                .attributes
                .iter_mut()
                .map(|value| value.strip_references(id))
                .sum();
            if stripped > 0 {
                batch.put_instance(Arc::new(updated));
            }
        }
        batch.push(IndexOp::DropInverseTarget(id));

        for pending in self.unresolved.from_source(id, None) {
            batch.push(IndexOp::RemovePending(pending));
        }

        let decl = self.schema.declaration(instance.type_id);
        let carries_guid = decl.is_some_and(Declaration::carries_guid);
        let indexed = decl.map_or(true, Declaration::is_entity);
        if let Some(guid) = guid_of_instance(carries_guid, &instance) {
            batch.push(IndexOp::RemoveGuid {
                guid: guid.to_string(),
            });
        }
        if indexed {
            batch.remove_type_ref(instance.type_id, id);
        }
        batch.push(IndexOp::RemoveInstance(id)).push(IndexOp::Tombstone(id));

        if let Err(cleanup) = self.backend.apply(batch) {
            error!(id = %id, error = %cleanup, "index cleanup failed during delete");
            let mut minimal = WriteBatch::new();
            minimal
                .remove_type_ref(instance.type_id, id)
                .push(IndexOp::RemoveInstance(id))
                .push(IndexOp::Tombstone(id));
            if let Err(e) = self.backend.apply(minimal) {
                error!(id = %id, error = %e, "could not remove record after cleanup failure");
            }
            return Err(cleanup);
        }

        self.unresolved.forget_source(id, None);
        debug!(id = %id, referrers = referrers.len(), "deleted instance");
        Ok(())
    }

    /// The record stored under `id`.
    ///
    /// # Errors
    /// `NotFound` if no such instance exists.
    pub fn instance_by_id(&self, id: InstanceId) -> Result<Arc<Instance>> {
        self.backend.get(id)?.ok_or(StoreError::NotFound(id))
    }

    /// Whether an instance with this id exists.
    ///
    /// # Errors
    /// Backend failures only.
    pub fn contains(&self, id: InstanceId) -> Result<bool> {
        self.backend.contains(id)
    }

    /// The instance whose attribute 0 holds this GlobalId.
    ///
    /// # Errors
    /// `GuidNotFound` if no instance carries this GlobalId.
    pub fn instance_by_guid(&self, guid: &str) -> Result<Arc<Instance>> {
        let id = self
            .backend
            .guid_lookup(guid)?
            .ok_or_else(|| StoreError::GuidNotFound(guid.to_string()))?;
        self.backend.get(id)?.ok_or_else(|| {
            StoreError::corrupt(guid.as_bytes(), format!("GlobalId entry points at missing #{id}"))
        })
    }

    /// Instances of a type, optionally including every subtype, in type index
    /// order and ascending id order within each type. Lazy; call again to
    /// restart.
    ///
    /// # Errors
    /// `UnknownType` if the schema does not declare `type_id`.
    pub fn instances_of_type(&self, type_id: TypeId, include_subtypes: bool) -> Result<InstancesOfType<'_>> {
        declaration(&self.schema, type_id)?;
        let types = if include_subtypes {
            self.schema.subtypes_of(type_id).to_vec()
        } else {
            vec![type_id]
        };
        Ok(InstancesOfType {
            backend: self.backend.as_ref(),
            types: types.into_iter(),
            current: IdCursor::Empty,
        })
    }

    /// Ids of exactly this type, ascending.
    #[must_use]
    pub fn ids_of_type(&self, type_id: TypeId) -> IdCursor<'_> {
        self.backend.ids_of_type(type_id)
    }

    /// Every id in the store, ascending.
    #[must_use]
    pub fn ids(&self) -> IdCursor<'_> {
        self.backend.ids()
    }

    /// Types that currently have instances, ascending.
    #[must_use]
    pub fn types(&self) -> TypeCursor<'_> {
        self.backend.types()
    }

    /// Instances referencing `id`, each reported once.
    ///
    /// `type_filter` keeps referrers of that type or any subtype;
    /// `attribute_filter` keeps references made from that attribute position.
    /// Order follows the inverse index: referencing type, then attribute, then
    /// registration order.
    ///
    /// The inverse entries of one target are read with a single range scan and
    /// filtered up front, so the returned cursor walks an owned id list rather
    /// than the backend. Its size is bounded by the target's in-degree.
    ///
    /// # Errors
    /// `NotFound` if `id` does not exist.
    pub fn referencing_instances(
        &self,
        id: InstanceId,
        type_filter: Option<TypeId>,
        attribute_filter: Option<u16>,
    ) -> Result<IdCursor<'_>> {
        if !self.backend.contains(id)? {
            return Err(StoreError::NotFound(id));
        }
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (key, sources) in self.backend.inverse_entries(id)? {
            if type_filter.is_some_and(|ty| !self.schema.is_subtype_of(key.type_id, ty)) {
                continue;
            }
            if attribute_filter.is_some_and(|attr| attr != key.attribute) {
                continue;
            }
            out.extend(sources.into_iter().filter(|source| seen.insert(*source)));
        }
        Ok(IdCursor::owned(out))
    }

    /// Number of inverse entries targeting `id`, counting each reference.
    ///
    /// # Errors
    /// `NotFound` if `id` does not exist.
    pub fn total_inverses(&self, id: InstanceId) -> Result<usize> {
        if !self.backend.contains(id)? {
            return Err(StoreError::NotFound(id));
        }
        Ok(self
            .backend
            .inverse_entries(id)?
            .iter()
            .map(|(_, sources)| sources.len())
            .sum())
    }

    /// Breadth-first walk of forward references from `id`, the start included.
    /// `max_depth` of `Some(0)` yields only `id`; `None` walks everything
    /// reachable. References to ids not loaded yet are skipped.
    ///
    /// # Errors
    /// `NotFound` if `id` does not exist.
    pub fn traverse(&self, id: InstanceId, max_depth: Option<usize>) -> Result<Vec<InstanceId>> {
        let root = self.instance_by_id(id)?;
        let mut seen = HashSet::from([id]);
        let mut order = vec![id];
        let mut frontier = VecDeque::from([(root, 0usize)]);

        while let Some((instance, depth)) = frontier.pop_front() {
            if max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            for (_, target) in instance.references() {
                if !seen.insert(target) {
                    continue;
                }
                let Some(next) = self.backend.get(target)? else {
                    continue;
                };
                order.push(target);
                frontier.push_back((next, depth + 1));
            }
        }
        Ok(order)
    }

    /// Number of stored instances.
    ///
    /// # Errors
    /// Backend failures only.
    pub fn len(&self) -> Result<usize> {
        self.backend.len()
    }

    /// True when no instance is stored.
    ///
    /// # Errors
    /// Backend failures only.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.backend.len()? == 0)
    }

    /// Removes every instance, index entry, tombstone and pending reference and
    /// restarts id allocation at `#1`.
    ///
    /// # Errors
    /// `ReadOnly`, or a backend failure.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.backend.reset()?;
        self.ids.reset();
        self.unresolved.clear();
        info!(schema = self.schema.name(), "reset entity store");
        Ok(())
    }
}

fn guid_of_instance(carries_guid: bool, instance: &Instance) -> Option<&str> {
    if carries_guid {
        instance.guid()
    } else {
        None
    }
}

#[cfg(feature = "persistent")]
fn persistent_backend(
    dir: &Path,
    schema: &Schema,
    options: &StoreOptions,
) -> std::result::Result<Box<dyn StorageBackend>, OpenError> {
    Ok(Box::new(crate::storage::PersistentBackend::open(
        dir, schema, options,
    )?))
}

#[cfg(not(feature = "persistent"))]
fn persistent_backend(
    _dir: &Path,
    _schema: &Schema,
    _options: &StoreOptions,
) -> std::result::Result<Box<dyn StorageBackend>, OpenError> {
    Err(OpenError::BackendUnavailable)
}

/// Lazy iterator returned by [`EntityStore::instances_of_type`].
pub struct InstancesOfType<'a> {
    backend: &'a dyn StorageBackend,
    types: std::vec::IntoIter<TypeId>,
    current: IdCursor<'a>,
}

impl Iterator for InstancesOfType<'_> {
    type Item = Result<Arc<Instance>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.current.next() {
                Some(Ok(id)) => {
                    return Some(self.backend.get(id).and_then(|found| {
                        found.ok_or_else(|| {
                            StoreError::corrupt(&id.get().to_be_bytes(), "type index entry without record")
                        })
                    }));
                }
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    let ty = self.types.next()?;
                    self.current = self.backend.ids_of_type(ty);
                }
            }
        }
    }
}

impl fmt::Debug for InstancesOfType<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstancesOfType")
            .field("remaining_types", &self.types.as_slice())
            .field("current", &self.current)
            .finish()
    }
}
