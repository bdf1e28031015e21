//! In-memory mutable table keyed by internal key.
//!
//! The memtable is the first stop for every mutation and the first source
//! consulted on every read. It is an ordered multimap over [`InternalKey`]:
//! the same user key may appear once per sequence number, so overwrites and
//! tombstones coexist with the versions they shadow until a flush or
//! compaction drops the older ones.
//!
//! Backed by `crossbeam_skiplist::SkipMap`, which supports lock-free
//! concurrent readers. Writers are serialized by the engine's write mutex,
//! so the map never sees competing inserts for the same sequence number.

use crossbeam_skiplist::SkipMap;
use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Rough per-entry bookkeeping cost (sequence, tombstone flag, skiplist node
/// pointers) charged on top of key and value bytes.
const ENTRY_OVERHEAD: usize = 24;

/// The key every ordered component sorts by: user key plus sequence number.
///
/// Ordering is user key ascending (unsigned byte-wise), ties broken by
/// sequence **descending**. A forward seek to `(key, snapshot)` therefore
/// lands directly on the newest entry visible at that snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    pub user_key: Vec<u8>,
    pub seq: u64,
}

impl InternalKey {
    pub fn new(user_key: Vec<u8>, seq: u64) -> Self {
        Self { user_key, seq }
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.user_key
            .cmp(&other.user_key)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A versioned entry: the sequence number and the optional value.
/// `value == None` signifies a tombstone (delete).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    pub seq: u64,
    pub value: Option<Vec<u8>>,
}

impl ValueEntry {
    /// `true` if this entry records a deletion.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Concurrent ordered table of internal keys to optional values.
#[derive(Debug)]
pub struct Memtable {
    map: SkipMap<InternalKey, Option<Vec<u8>>>,
    approx_size: AtomicUsize,
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
            approx_size: AtomicUsize::new(0),
        }
    }

    /// Inserts an entry. `value == None` records a tombstone.
    ///
    /// Sequence numbers are unique (assigned by the engine under its write
    /// mutex), so this never replaces an existing entry.
    pub fn insert(&self, user_key: Vec<u8>, value: Option<Vec<u8>>, seq: u64) {
        let charged =
            user_key.len() + value.as_ref().map_or(0, |v| v.len()) + ENTRY_OVERHEAD;
        self.map.insert(InternalKey::new(user_key, seq), value);
        self.approx_size.fetch_add(charged, AtomicOrdering::Relaxed);
    }

    /// Finds the newest entry for `user_key` with sequence <= `snapshot`.
    ///
    /// Returns `None` if the key has no entry visible at the snapshot. A
    /// returned tombstone means "deleted" -- the caller must not fall
    /// through to older sources.
    pub fn get(&self, user_key: &[u8], snapshot: u64) -> Option<ValueEntry> {
        let target = InternalKey::new(user_key.to_vec(), snapshot);
        let entry = self
            .map
            .range((Bound::Included(target), Bound::Unbounded))
            .next()?;
        if entry.key().user_key != user_key {
            return None;
        }
        Some(ValueEntry {
            seq: entry.key().seq,
            value: entry.value().clone(),
        })
    }

    /// Number of entries (all versions counted).
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Approximate memory footprint in bytes.
    pub fn approx_size(&self) -> usize {
        self.approx_size.load(AtomicOrdering::Relaxed)
    }

    /// `true` once the approximate footprint reaches `limit`.
    pub fn should_rotate(&self, limit: usize) -> bool {
        self.approx_size() >= limit
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward iterator over every entry in internal-key order.
///
/// The iterator owns an `Arc` to the table and re-issues a bounded range
/// query from the last yielded key on each step, so it stays valid while
/// other threads keep inserting and never borrows the table.
pub struct MemtableIter {
    mem: Arc<Memtable>,
    last: Option<InternalKey>,
    done: bool,
}

impl MemtableIter {
    pub fn new(mem: Arc<Memtable>) -> Self {
        Self {
            mem,
            last: None,
            done: false,
        }
    }
}

impl Iterator for MemtableIter {
    type Item = (Vec<u8>, ValueEntry);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let lower = match self.last.take() {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };

        match self.mem.map.range((lower, Bound::Unbounded)).next() {
            Some(entry) => {
                let key = entry.key().clone();
                let item = (
                    key.user_key.clone(),
                    ValueEntry {
                        seq: key.seq,
                        value: entry.value().clone(),
                    },
                );
                self.last = Some(key);
                Some(item)
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests;
