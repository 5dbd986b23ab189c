//! redb-backed storage.
//!
//! Primary records and every index share one ordered table. Each
//! [`WriteBatch`] becomes one write transaction; the instance cache is touched
//! only after that transaction commits.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use redb::{Database, DatabaseError, Durability, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cursor::{IdCursor, TypeCursor};
use crate::error::{OpenError, Result, StoreError};
use crate::id::InstanceId;
use crate::options::{BackendKind, StoreOptions};
use crate::schema::{Schema, TypeId};
use crate::storage::traits::{IndexOp, InverseKey, StorageBackend, WriteBatch};
use crate::unresolved::PendingReference;
use crate::value::Instance;

use super::cache::InstanceCache;
use super::codec;
use super::cursor::{StoredCursor, StoredTypeCursor};
use super::file_lock::FileLock;
use super::keys;

/// The single table holding records and indices.
pub(super) const RECORDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("records");

/// Database file inside the store directory.
pub const DB_FILE: &str = "store.redb";

/// On-disk layout version.
pub const FORMAT_VERSION: u32 = 1;

pub(super) fn storage_err<E: Into<redb::Error>>(context: &'static str) -> impl Fn(E) -> StoreError {
    move |e| StoreError::unavailable(context, e.into())
}

/// Reads one value, copying it out of the transaction.
pub(super) fn read_bytes<T>(table: &T, key: &[u8]) -> Result<Option<Vec<u8>>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    Ok(table
        .get(key)
        .map_err(storage_err("read"))?
        .map(|guard| guard.value().to_vec()))
}

/// Up to `limit` key/value pairs in `[lower, upper)`, from the low end or, when
/// `reverse` is set, from the high end.
pub(super) fn scan<T>(
    table: &T,
    lower: &[u8],
    upper: &[u8],
    limit: usize,
    reverse: bool,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let mut out = Vec::new();
    if lower >= upper || limit == 0 {
        return Ok(out);
    }
    let range = table
        .range::<&[u8]>(lower..upper)
        .map_err(storage_err("range scan"))?;
    if reverse {
        for entry in range.rev().take(limit) {
            let (k, v) = entry.map_err(storage_err("range scan"))?;
            out.push((k.value().to_vec(), v.value().to_vec()));
        }
    } else {
        for entry in range.take(limit) {
            let (k, v) = entry.map_err(storage_err("range scan"))?;
            out.push((k.value().to_vec(), v.value().to_vec()));
        }
    }
    Ok(out)
}

/// Runs `f` against the table in a fresh read transaction.
pub(super) fn with_table<T>(
    db: &Database,
    f: impl FnOnce(&redb::ReadOnlyTable<&'static [u8], &'static [u8]>) -> Result<T>,
) -> Result<T> {
    let txn = db.begin_read().map_err(storage_err("begin read"))?;
    let table = txn.open_table(RECORDS).map_err(storage_err("open table"))?;
    f(&table)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    schema: String,
    fingerprint: String,
    created_at: DateTime<Utc>,
}

impl Manifest {
    fn for_schema(schema: &Schema) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            schema: schema.name().to_string(),
            fingerprint: schema.fingerprint().to_string(),
            created_at: Utc::now(),
        }
    }

    fn describe(name: &str, fingerprint: &str) -> String {
        let short = fingerprint.get(..12).unwrap_or(fingerprint);
        format!("{name} ({short})")
    }
}

enum CacheEffect {
    Put(Arc<Instance>),
    Invalidate(InstanceId),
}

/// Persistent backend.
pub struct PersistentBackend {
    db: Database,
    dir: PathBuf,
    readonly: bool,
    durability: Durability,
    cache: Mutex<InstanceCache>,
    _lock: FileLock,
}

impl std::fmt::Debug for PersistentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentBackend")
            .field("dir", &self.dir)
            .field("readonly", &self.readonly)
            .finish_non_exhaustive()
    }
}

impl PersistentBackend {
    /// Opens or creates the store in `dir`.
    ///
    /// # Errors
    /// - `Missing` for a read-only open of a directory holding no store
    /// - `Locked` if another handle has the directory open, read-only or not
    /// - `SchemaMismatch` / `UnsupportedFormat` if the manifest disagrees
    pub fn open(
        dir: &Path,
        schema: &Schema,
        options: &StoreOptions,
    ) -> std::result::Result<Self, OpenError> {
        let db_path = dir.join(DB_FILE);
        let io_err = |source| OpenError::Io {
            path: dir.to_path_buf(),
            source,
        };

        if options.readonly {
            if !db_path.exists() {
                return Err(OpenError::Missing(dir.to_path_buf()));
            }
        } else {
            fs::create_dir_all(dir).map_err(io_err)?;
        }

        // redb locks the database file exclusively even for reads, so readers
        // take the directory lock the same way writers do.
        let lock = FileLock::acquire(dir).map_err(|e| {
            if e.kind() == ErrorKind::WouldBlock {
                OpenError::Locked(dir.to_path_buf())
            } else {
                io_err(e)
            }
        })?;

        let opened = if options.readonly {
            Database::open(&db_path)
        } else {
            Database::create(&db_path)
        };
        let db = opened.map_err(|e| match e {
            DatabaseError::DatabaseAlreadyOpen => OpenError::Locked(dir.to_path_buf()),
            other => OpenError::Store(storage_err("open database")(other)),
        })?;

        let durability = if options.sync_on_write {
            Durability::Immediate
        } else {
            Durability::Eventual
        };

        let backend = Self {
            db,
            dir: dir.to_path_buf(),
            readonly: options.readonly,
            durability,
            cache: Mutex::new(InstanceCache::new(options.cache_size)),
            _lock: lock,
        };
        backend.check_manifest(schema)?;

        info!(
            dir = %dir.display(),
            readonly = options.readonly,
            cache_size = options.cache_size,
            "opened persistent store"
        );
        Ok(backend)
    }

    /// Directory holding the store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn check_manifest(&self, schema: &Schema) -> std::result::Result<(), OpenError> {
        let key = keys::meta(keys::MANIFEST);
        let stored = {
            let txn = self.db.begin_read().map_err(storage_err("begin read"))?;
            match txn.open_table(RECORDS) {
                Ok(table) => read_bytes(&table, &key)?,
                Err(TableError::TableDoesNotExist(_)) => None,
                Err(e) => return Err(storage_err("open table")(e).into()),
            }
        };

        let Some(bytes) = stored else {
            if self.readonly {
                return Err(OpenError::Missing(self.dir.clone()));
            }
            let manifest = Manifest::for_schema(schema);
            let encoded = codec::encode(&manifest)
                .map_err(|e| StoreError::unavailable("encode manifest", e))?;
            let txn = self.db.begin_write().map_err(storage_err("begin write"))?;
            {
                let mut table = txn.open_table(RECORDS).map_err(storage_err("open table"))?;
                table
                    .insert(key.as_slice(), encoded.as_slice())
                    .map_err(storage_err("write manifest"))?;
            }
            txn.commit().map_err(storage_err("commit"))?;
            debug!(schema = schema.name(), "wrote store manifest");
            return Ok(());
        };

        let manifest: Manifest =
            codec::decode(&bytes).map_err(|e| StoreError::corrupt(&key, e.to_string()))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(OpenError::UnsupportedFormat {
                expected: FORMAT_VERSION,
                found: manifest.format_version,
            });
        }
        if manifest.fingerprint != schema.fingerprint() {
            return Err(OpenError::SchemaMismatch {
                expected: Manifest::describe(schema.name(), schema.fingerprint()),
                found: Manifest::describe(&manifest.schema, &manifest.fingerprint),
            });
        }
        Ok(())
    }

    fn cache(&self) -> Result<MutexGuard<'_, InstanceCache>> {
        self.cache
            .lock()
            .map_err(|_| StoreError::unavailable("instance cache", "poisoned lock"))
    }

    fn read_meta(&self, name: &str) -> Result<u32> {
        let key = keys::meta(name);
        with_table(&self.db, |table| match read_bytes(table, &key)? {
            Some(bytes) => keys::decode_u32_value(&key, &bytes),
            None => Ok(0),
        })
    }

    fn decode_record(key: &[u8], bytes: &[u8], id: InstanceId) -> Result<Instance> {
        let instance: Instance =
            codec::decode(bytes).map_err(|e| StoreError::corrupt(key, e.to_string()))?;
        if instance.id != id {
            return Err(StoreError::corrupt(
                key,
                format!("record holds #{} instead of #{id}", instance.id),
            ));
        }
        Ok(instance)
    }
}

/// Mutations of one write transaction.
struct Writer<'t> {
    table: redb::Table<'t, &'static [u8], &'static [u8]>,
    count_delta: i64,
    effects: Vec<CacheEffect>,
}

impl Writer<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        Ok(self
            .table
            .insert(key, value)
            .map_err(storage_err("write"))?
            .is_some())
    }

    fn remove(&mut self, key: &[u8]) -> Result<bool> {
        Ok(self
            .table
            .remove(key)
            .map_err(storage_err("write"))?
            .is_some())
    }

    fn inverse_list(&self, key: &[u8]) -> Result<Vec<InstanceId>> {
        match read_bytes(&self.table, key)? {
            Some(bytes) => keys::unpack_ids(key, &bytes),
            None => Ok(Vec::new()),
        }
    }

    fn register_inverse(&mut self, key: &InverseKey, from: InstanceId) -> Result<()> {
        let raw = keys::inverse(key);
        let mut list = self.inverse_list(&raw)?;
        list.push(from);
        self.put(&raw, &keys::pack_ids(&list))?;
        Ok(())
    }

    fn unregister_inverse(&mut self, key: &InverseKey, from: InstanceId) -> Result<()> {
        let raw = keys::inverse(key);
        let mut list = self.inverse_list(&raw)?;
        let Some(pos) = list.iter().position(|&id| id == from) else {
            return Ok(());
        };
        list.remove(pos);
        if list.is_empty() {
            self.remove(&raw)?;
        } else {
            self.put(&raw, &keys::pack_ids(&list))?;
        }
        Ok(())
    }

    fn drop_inverse_target(&mut self, target: InstanceId) -> Result<()> {
        let lower = keys::inverse_target(target);
        let upper = keys::prefix_end(&lower);
        let doomed: Vec<Vec<u8>> = scan(&self.table, &lower, &upper, usize::MAX, false)?
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        for key in doomed {
            self.remove(&key)?;
        }
        Ok(())
    }

    fn pending_list(&self, key: &[u8]) -> Result<Vec<PendingReference>> {
        match read_bytes(&self.table, key)? {
            Some(bytes) => keys::unpack_pending(key, &bytes),
            None => Ok(Vec::new()),
        }
    }

    fn add_pending(&mut self, pending: PendingReference) -> Result<()> {
        let raw = keys::pending(pending.target);
        let mut list = self.pending_list(&raw)?;
        list.push(pending);
        self.put(&raw, &keys::pack_pending(&list))?;
        Ok(())
    }

    fn remove_pending(&mut self, pending: PendingReference) -> Result<()> {
        let raw = keys::pending(pending.target);
        let mut list = self.pending_list(&raw)?;
        let Some(pos) = list.iter().position(|p| *p == pending) else {
            return Ok(());
        };
        list.remove(pos);
        if list.is_empty() {
            self.remove(&raw)?;
        } else {
            self.put(&raw, &keys::pack_pending(&list))?;
        }
        Ok(())
    }

    fn reserve_ids(&mut self, high_water: u32) -> Result<()> {
        let key = keys::meta(keys::HIGH_WATER);
        let current = match read_bytes(&self.table, &key)? {
            Some(bytes) => keys::decode_u32_value(&key, &bytes)?,
            None => 0,
        };
        if high_water > current {
            self.put(&key, &high_water.to_be_bytes())?;
        }
        Ok(())
    }

    fn apply(&mut self, op: IndexOp) -> Result<()> {
        match op {
            IndexOp::PutInstance(instance) => {
                let encoded = codec::encode(&*instance)
                    .map_err(|e| StoreError::unavailable("encode record", e))?;
                if !self.put(&keys::instance(instance.id), &encoded)? {
                    self.count_delta += 1;
                }
                self.effects.push(CacheEffect::Put(instance));
            }
            IndexOp::RemoveInstance(id) => {
                if self.remove(&keys::instance(id))? {
                    self.count_delta -= 1;
                }
                self.effects.push(CacheEffect::Invalidate(id));
            }
            IndexOp::AddTypeRef { type_id, id } => {
                self.put(&keys::type_member(type_id, id), &[])?;
            }
            IndexOp::RemoveTypeRef { type_id, id } => {
                self.remove(&keys::type_member(type_id, id))?;
            }
            IndexOp::PutGuid { guid, id } => {
                self.put(&keys::guid(&guid), &id.get().to_be_bytes())?;
            }
            IndexOp::RemoveGuid { guid } => {
                self.remove(&keys::guid(&guid))?;
            }
            IndexOp::RegisterInverse { key, from } => self.register_inverse(&key, from)?,
            IndexOp::UnregisterInverse { key, from } => self.unregister_inverse(&key, from)?,
            IndexOp::ProcessDeletionInverse(instance) => {
                for (attribute, target) in instance.references() {
                    let key = InverseKey::new(target, instance.type_id, attribute);
                    self.unregister_inverse(&key, instance.id)?;
                }
            }
            IndexOp::DropInverseTarget(target) => self.drop_inverse_target(target)?,
            IndexOp::ReserveIds(high_water) => self.reserve_ids(high_water)?,
            IndexOp::Tombstone(id) => {
                self.put(&keys::tombstone(id), &[])?;
            }
            IndexOp::AddPending(pending) => self.add_pending(pending)?,
            IndexOp::RemovePending(pending) => self.remove_pending(pending)?,
            IndexOp::ResolvePending(target) => {
                self.remove(&keys::pending(target))?;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.count_delta == 0 {
            return Ok(());
        }
        let key = keys::meta(keys::COUNT);
        let current = match read_bytes(&self.table, &key)? {
            Some(bytes) => keys::decode_u32_value(&key, &bytes)?,
            None => 0,
        };
        let updated = i64::from(current) + self.count_delta;
        let updated = u32::try_from(updated)
            .map_err(|_| StoreError::corrupt(&key, format!("instance count would become {updated}")))?;
        self.put(&key, &updated.to_be_bytes())?;
        Ok(())
    }
}

impl StorageBackend for PersistentBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Persistent
    }

    fn get(&self, id: InstanceId) -> Result<Option<Arc<Instance>>> {
        if let Some(hit) = self.cache()?.get(id) {
            return Ok(Some(hit));
        }
        let key = keys::instance(id);
        let Some(bytes) = with_table(&self.db, |table| read_bytes(table, &key))? else {
            return Ok(None);
        };
        let instance = Arc::new(Self::decode_record(&key, &bytes, id)?);
        self.cache()?.put(Arc::clone(&instance));
        Ok(Some(instance))
    }

    fn contains(&self, id: InstanceId) -> Result<bool> {
        if self.cache()?.get(id).is_some() {
            return Ok(true);
        }
        let key = keys::instance(id);
        with_table(&self.db, |table| Ok(read_bytes(table, &key)?.is_some()))
    }

    fn is_tombstoned(&self, id: InstanceId) -> Result<bool> {
        let key = keys::tombstone(id);
        with_table(&self.db, |table| Ok(read_bytes(table, &key)?.is_some()))
    }

    fn guid_lookup(&self, guid: &str) -> Result<Option<InstanceId>> {
        let key = keys::guid(guid);
        with_table(&self.db, |table| {
            read_bytes(table, &key)?
                .map(|bytes| keys::decode_id_value(&key, &bytes))
                .transpose()
        })
    }

    fn ids_of_type(&self, type_id: TypeId) -> IdCursor<'_> {
        let prefix = keys::type_group(type_id);
        IdCursor::Stored(StoredCursor::new(&self.db, &prefix, |key| {
            keys::decode_type_member(key).map(|(_, id)| id)
        }))
    }

    fn types(&self) -> TypeCursor<'_> {
        TypeCursor::Stored(StoredTypeCursor::new(&self.db))
    }

    fn ids(&self) -> IdCursor<'_> {
        IdCursor::Stored(StoredCursor::new(&self.db, &[keys::INSTANCE], keys::decode_instance))
    }

    fn inverse_entries(&self, target: InstanceId) -> Result<Vec<(InverseKey, Vec<InstanceId>)>> {
        let lower = keys::inverse_target(target);
        let upper = keys::prefix_end(&lower);
        let raw = with_table(&self.db, |table| scan(table, &lower, &upper, usize::MAX, false))?;
        raw.into_iter()
            .map(|(key, value)| Ok((keys::decode_inverse(&key)?, keys::unpack_ids(&key, &value)?)))
            .collect()
    }

    fn len(&self) -> Result<usize> {
        Ok(self.read_meta(keys::COUNT)? as usize)
    }

    fn high_water(&self) -> Result<u32> {
        self.read_meta(keys::HIGH_WATER)
    }

    fn pending_references(&self) -> Result<Vec<PendingReference>> {
        let lower = [keys::PENDING];
        let upper = keys::prefix_end(&lower);
        let raw = with_table(&self.db, |table| scan(table, &lower, &upper, usize::MAX, false))?;
        let mut out = Vec::new();
        for (key, value) in raw {
            out.extend(keys::unpack_pending(&key, &value)?);
        }
        Ok(out)
    }

    fn apply(&mut self, batch: WriteBatch) -> Result<()> {
        if self.readonly {
            return Err(StoreError::ReadOnly);
        }
        let ops = batch.len();
        let mut txn = self.db.begin_write().map_err(storage_err("begin write"))?;
        txn.set_durability(self.durability);

        let written = {
            let table = txn.open_table(RECORDS).map_err(storage_err("open table"))?;
            let mut writer = Writer {
                table,
                count_delta: 0,
                effects: Vec::new(),
            };
            let result = batch
                .into_iter()
                .try_for_each(|op| writer.apply(op))
                .and_then(|()| writer.finish());
            result.map(|()| writer.effects)
        };

        let effects = match written {
            Ok(effects) => effects,
            Err(e) => {
                if let Err(abort) = txn.abort() {
                    warn!(error = %abort, "failed to abort write transaction");
                }
                return Err(e);
            }
        };
        txn.commit().map_err(storage_err("commit"))?;

        let mut cache = self.cache()?;
        for effect in effects {
            match effect {
                CacheEffect::Put(instance) => cache.put(instance),
                CacheEffect::Invalidate(id) => cache.invalidate(id),
            }
        }
        debug!(ops, "committed write batch");
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        if self.readonly {
            return Err(StoreError::ReadOnly);
        }
        let manifest_key = keys::meta(keys::MANIFEST);
        let mut txn = self.db.begin_write().map_err(storage_err("begin write"))?;
        txn.set_durability(self.durability);
        {
            let mut table = txn.open_table(RECORDS).map_err(storage_err("open table"))?;
            let manifest = read_bytes(&table, &manifest_key)?;
            let all: Vec<Vec<u8>> = scan(&table, &[], &[u8::MAX; 2], usize::MAX, false)?
                .into_iter()
                .map(|(k, _)| k)
                .collect();
            for key in all {
                table.remove(key.as_slice()).map_err(storage_err("write"))?;
            }
            if let Some(manifest) = manifest {
                table
                    .insert(manifest_key.as_slice(), manifest.as_slice())
                    .map_err(storage_err("write manifest"))?;
            }
        }
        txn.commit().map_err(storage_err("commit"))?;
        self.cache()?.clear();
        info!(dir = %self.dir.display(), "reset persistent store");
        Ok(())
    }
}
