//! Type-erased cursors.
//!
//! A cursor holds exactly one of a closed set of concrete iterators, so both
//! backends can hand out the same type without boxing. Each step is one `match`.
//!
//! Equality is positional: two cursors are equal when they hold the same variant
//! at the same position. Comparing cursors that walk different collections is a
//! caller bug; it is asserted in debug builds where the source can be told apart.

use std::collections::{btree_map, btree_set, BTreeSet};
use std::sync::Arc;

use crate::error::Result;
use crate::id::InstanceId;
use crate::schema::TypeId;
use crate::value::Instance;

#[cfg(feature = "persistent")]
use crate::storage::persistent::{StoredCursor, StoredTypeCursor};

/// Wraps an in-memory iterator with the bookkeeping needed for equality.
#[derive(Debug, Clone)]
pub struct OrderedCursor<I> {
    iter: I,
    source: usize,
    taken_front: usize,
    taken_back: usize,
}

impl<I> OrderedCursor<I> {
    /// `source` identifies the collection being walked (its address).
    pub(crate) fn new<T: ?Sized>(iter: I, source: &T) -> Self {
        Self {
            iter,
            source: std::ptr::from_ref(source).cast::<()>() as usize,
            taken_front: 0,
            taken_back: 0,
        }
    }
}

impl<I: Iterator> Iterator for OrderedCursor<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.iter.next()?;
        self.taken_front += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<I: DoubleEndedIterator> DoubleEndedIterator for OrderedCursor<I> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let item = self.iter.next_back()?;
        self.taken_back += 1;
        Some(item)
    }
}

impl<I> PartialEq for OrderedCursor<I> {
    fn eq(&self, other: &Self) -> bool {
        debug_assert_eq!(
            self.source, other.source,
            "compared cursors over different collections"
        );
        self.taken_front == other.taken_front && self.taken_back == other.taken_back
    }
}

/// Bidirectional cursor over instance ids.
#[derive(Debug, Clone)]
pub enum IdCursor<'a> {
    /// Yields nothing.
    Empty,
    /// Members of one type in the resident type index.
    Set(OrderedCursor<btree_set::Iter<'a, InstanceId>>),
    /// Keys of the resident primary map.
    Keys(OrderedCursor<btree_map::Keys<'a, InstanceId, Arc<Instance>>>),
    /// A materialised result.
    Owned(std::vec::IntoIter<InstanceId>),
    /// Paged range scan of the persistent backend.
    #[cfg(feature = "persistent")]
    Stored(StoredCursor<'a>),
}

impl<'a> IdCursor<'a> {
    pub(crate) fn over_set(set: &'a BTreeSet<InstanceId>) -> Self {
        Self::Set(OrderedCursor::new(set.iter(), set))
    }

    pub(crate) fn over_keys(map: &'a btree_map::BTreeMap<InstanceId, Arc<Instance>>) -> Self {
        Self::Keys(OrderedCursor::new(map.keys(), map))
    }

    /// A cursor over an already collected list.
    #[must_use]
    pub fn owned(ids: Vec<InstanceId>) -> Self {
        Self::Owned(ids.into_iter())
    }

    /// Drains the cursor, stopping at the first error.
    ///
    /// # Errors
    /// Whatever the underlying backend reported.
    pub fn collect_ids(self) -> Result<Vec<InstanceId>> {
        self.collect()
    }
}

impl Iterator for IdCursor<'_> {
    type Item = Result<InstanceId>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Empty => None,
            Self::Set(it) => it.next().copied().map(Ok),
            Self::Keys(it) => it.next().copied().map(Ok),
            Self::Owned(it) => it.next().map(Ok),
            #[cfg(feature = "persistent")]
            Self::Stored(it) => it.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            Self::Empty => (0, Some(0)),
            Self::Set(it) => it.size_hint(),
            Self::Keys(it) => it.size_hint(),
            Self::Owned(it) => it.size_hint(),
            #[cfg(feature = "persistent")]
            Self::Stored(it) => it.size_hint(),
        }
    }
}

impl DoubleEndedIterator for IdCursor<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        match self {
            Self::Empty => None,
            Self::Set(it) => it.next_back().copied().map(Ok),
            Self::Keys(it) => it.next_back().copied().map(Ok),
            Self::Owned(it) => it.next_back().map(Ok),
            #[cfg(feature = "persistent")]
            Self::Stored(it) => it.next_back(),
        }
    }
}

impl PartialEq for IdCursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            (Self::Set(a), Self::Set(b)) => a == b,
            (Self::Keys(a), Self::Keys(b)) => a == b,
            (Self::Owned(a), Self::Owned(b)) => a.as_slice() == b.as_slice(),
            #[cfg(feature = "persistent")]
            (Self::Stored(a), Self::Stored(b)) => a == b,
            _ => false,
        }
    }
}

/// Forward-only cursor over the types present in a store.
#[derive(Debug, Clone)]
pub enum TypeCursor<'a> {
    /// Keys of the resident type index.
    Resident(OrderedCursor<btree_map::Keys<'a, TypeId, BTreeSet<InstanceId>>>),
    /// Type-group seeks over the persistent type index.
    #[cfg(feature = "persistent")]
    Stored(StoredTypeCursor<'a>),
}

impl<'a> TypeCursor<'a> {
    pub(crate) fn over_index(index: &'a btree_map::BTreeMap<TypeId, BTreeSet<InstanceId>>) -> Self {
        Self::Resident(OrderedCursor::new(index.keys(), index))
    }
}

impl Iterator for TypeCursor<'_> {
    type Item = Result<TypeId>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Resident(it) => it.next().copied().map(Ok),
            #[cfg(feature = "persistent")]
            Self::Stored(it) => it.next(),
        }
    }
}

impl PartialEq for TypeCursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Resident(a), Self::Resident(b)) => a == b,
            #[cfg(feature = "persistent")]
            (Self::Stored(a), Self::Stored(b)) => a == b,
            #[cfg(feature = "persistent")]
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u32) -> InstanceId {
        InstanceId::new(raw).unwrap()
    }

    fn set() -> BTreeSet<InstanceId> {
        [3, 1, 7, 5].into_iter().map(id).collect()
    }

    #[test]
    fn set_cursor_walks_both_ends() {
        let s = set();
        let mut c = IdCursor::over_set(&s);
        assert_eq!(c.next().unwrap().unwrap(), id(1));
        assert_eq!(c.next_back().unwrap().unwrap(), id(7));
        let rest: Vec<_> = c.map(Result::unwrap).collect();
        assert_eq!(rest, vec![id(3), id(5)]);
    }

    #[test]
    fn equality_is_positional() {
        let s = set();
        let mut a = IdCursor::over_set(&s);
        let mut b = IdCursor::over_set(&s);
        assert_eq!(a, b);

        a.next();
        assert_ne!(a, b);
        b.next();
        assert_eq!(a, b);

        a.next_back();
        assert_ne!(a, b);
    }

    #[test]
    fn different_variants_are_unequal() {
        let s = set();
        let a = IdCursor::over_set(&s);
        let b = IdCursor::owned(s.iter().copied().collect());
        assert_ne!(a, b);
        assert_eq!(IdCursor::Empty, IdCursor::Empty);
    }

    #[test]
    fn owned_cursor_compares_remaining_items() {
        let mut a = IdCursor::owned(vec![id(1), id(2)]);
        let b = IdCursor::owned(vec![id(2)]);
        assert_ne!(a, b);
        a.next();
        assert_eq!(a, b);
        assert_eq!(a.collect_ids().unwrap(), vec![id(2)]);
    }

    #[test]
    fn type_cursor_is_forward_only_and_ordered() {
        let mut index = btree_map::BTreeMap::new();
        index.insert(TypeId::from_index(4), set());
        index.insert(TypeId::from_index(2), set());
        let types: Vec<_> = TypeCursor::over_index(&index).map(Result::unwrap).collect();
        assert_eq!(types, vec![TypeId::from_index(2), TypeId::from_index(4)]);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "different collections")]
    fn comparing_foreign_cursors_is_caught() {
        let s1 = set();
        let s2 = set();
        let _ = IdCursor::over_set(&s1) == IdCursor::over_set(&s2);
    }
}
