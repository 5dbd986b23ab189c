//! Paged cursors over key ranges.
//!
//! A cursor never holds a transaction open between steps: each page is read in
//! its own short read transaction and buffered. The unread window `[lower, upper)`
//! shrinks from both ends as pages are fetched.

use std::collections::VecDeque;
use std::fmt;

use redb::Database;

use crate::error::Result;
use crate::id::InstanceId;
use crate::schema::TypeId;

use super::backend::{scan, with_table};
use super::keys;

/// Keys fetched per read transaction.
const PAGE: usize = 256;

type DecodeId = fn(&[u8]) -> Result<InstanceId>;

/// Bidirectional cursor over the ids under one key prefix.
#[derive(Clone)]
pub struct StoredCursor<'a> {
    db: &'a Database,
    prefix: Vec<u8>,
    lower: Vec<u8>,
    upper: Vec<u8>,
    taken_front: usize,
    taken_back: usize,
    head: VecDeque<InstanceId>,
    tail: VecDeque<InstanceId>,
    exhausted: bool,
    failed: bool,
    decode: DecodeId,
}

impl<'a> StoredCursor<'a> {
    pub(crate) fn new(db: &'a Database, prefix: &[u8], decode: DecodeId) -> Self {
        Self {
            db,
            prefix: prefix.to_vec(),
            lower: prefix.to_vec(),
            upper: keys::prefix_end(prefix),
            taken_front: 0,
            taken_back: 0,
            head: VecDeque::new(),
            tail: VecDeque::new(),
            exhausted: false,
            failed: false,
            decode,
        }
    }

    fn fetch(&mut self, reverse: bool) -> Result<()> {
        let page = with_table(self.db, |table| {
            scan(table, &self.lower, &self.upper, PAGE, reverse)
        })?;
        if page.len() < PAGE {
            self.exhausted = true;
        }
        if reverse {
            if let Some((lowest, _)) = page.last() {
                self.upper.clone_from(lowest);
            }
            for (key, _) in &page {
                self.tail.push_front((self.decode)(key)?);
            }
        } else {
            if let Some((highest, _)) = page.last() {
                self.lower = keys::successor(highest);
            }
            for (key, _) in &page {
                self.head.push_back((self.decode)(key)?);
            }
        }
        Ok(())
    }

    fn step(&mut self, reverse: bool) -> Option<Result<InstanceId>> {
        if self.failed {
            return None;
        }
        loop {
            let near = if reverse {
                self.tail.pop_back()
            } else {
                self.head.pop_front()
            };
            if let Some(id) = near {
                return Some(Ok(id));
            }
            if self.exhausted {
                return if reverse {
                    self.head.pop_back().map(Ok)
                } else {
                    self.tail.pop_front().map(Ok)
                };
            }
            if let Err(e) = self.fetch(reverse) {
                self.failed = true;
                return Some(Err(e));
            }
        }
    }
}

impl Iterator for StoredCursor<'_> {
    type Item = Result<InstanceId>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.step(false)?;
        self.taken_front += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let buffered = self.head.len() + self.tail.len();
        if self.exhausted || self.failed {
            (buffered, Some(buffered))
        } else {
            (buffered, None)
        }
    }
}

impl DoubleEndedIterator for StoredCursor<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let item = self.step(true)?;
        self.taken_back += 1;
        Some(item)
    }
}

impl PartialEq for StoredCursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        debug_assert!(
            std::ptr::eq(self.db, other.db) && self.prefix == other.prefix,
            "compared cursors over different collections"
        );
        self.taken_front == other.taken_front
            && self.taken_back == other.taken_back
            && self.failed == other.failed
    }
}

impl fmt::Debug for StoredCursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCursor")
            .field("prefix", &hex::encode(&self.prefix))
            .field("lower", &hex::encode(&self.lower))
            .field("upper", &hex::encode(&self.upper))
            .field("buffered", &(self.head.len() + self.tail.len()))
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

/// Forward cursor over the distinct types of the type index. Each step seeks
/// directly to the next type group.
#[derive(Clone)]
pub struct StoredTypeCursor<'a> {
    db: &'a Database,
    next: Option<u16>,
}

impl<'a> StoredTypeCursor<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db, next: Some(0) }
    }
}

impl Iterator for StoredTypeCursor<'_> {
    type Item = Result<TypeId>;

    fn next(&mut self) -> Option<Self::Item> {
        let from = self.next?;
        let lower = keys::type_group(TypeId::from_index(from));
        let upper = [keys::TYPE + 1];
        let found = with_table(self.db, |table| scan(table, &lower, &upper, 1, false))
            .and_then(|page| match page.first() {
                Some((key, _)) => keys::decode_type_member(key).map(|(ty, _)| Some(ty)),
                None => Ok(None),
            });
        match found {
            Ok(Some(ty)) => {
                self.next = ty.index().checked_add(1);
                Some(Ok(ty))
            }
            Ok(None) => {
                self.next = None;
                None
            }
            Err(e) => {
                self.next = None;
                Some(Err(e))
            }
        }
    }
}

impl PartialEq for StoredTypeCursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        debug_assert!(
            std::ptr::eq(self.db, other.db),
            "compared cursors over different collections"
        );
        self.next == other.next
    }
}

impl fmt::Debug for StoredTypeCursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredTypeCursor")
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}
