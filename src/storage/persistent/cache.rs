//! Bounded LRU of deserialised instances.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::id::InstanceId;
use crate::value::Instance;

/// Decoded records in front of the database. A capacity of zero disables it.
#[derive(Debug)]
pub struct InstanceCache {
    inner: Option<LruCache<InstanceId, Arc<Instance>>>,
}

impl InstanceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    /// Looks up `id`, marking it most recently used.
    pub fn get(&mut self, id: InstanceId) -> Option<Arc<Instance>> {
        self.inner.as_mut()?.get(&id).cloned()
    }

    /// Inserts or refreshes a record, evicting the least recently used one when full.
    pub fn put(&mut self, instance: Arc<Instance>) {
        if let Some(inner) = self.inner.as_mut() {
            inner.put(instance.id, instance);
        }
    }

    pub fn invalidate(&mut self, id: InstanceId) {
        if let Some(inner) = self.inner.as_mut() {
            inner.pop(&id);
        }
    }

    pub fn clear(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            inner.clear();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, LruCache::len)
    }
}
