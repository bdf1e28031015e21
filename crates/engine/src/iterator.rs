//! Merged iteration over live entries.
//!
//! `new_iterator` snapshots the current sources (memtable, immutable
//! memtable, every sorted run in the current version), filters each one to
//! entries at or below the read snapshot, and merges them newest-per-key.
//! Tombstones are consumed by the iterator and never yielded.

use std::sync::Arc;

use memtable::{Memtable, MemtableIter, ValueEntry};
use sstable::{EntrySource, MergeIterator, TableIterator};

use crate::error::Result;
use crate::options::ReadOptions;
use crate::Engine;

/// Ordered iterator over live `(key, value)` pairs visible at a snapshot.
///
/// Holds its own references to the memtables and run readers, so it stays
/// valid while writes, flushes, and compactions proceed; it simply keeps
/// observing the state it captured.
pub struct DbIterator {
    merge: MergeIterator,
}

impl Iterator for DbIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.merge.next_entry() {
                Ok(Some((key, entry))) => {
                    if let Some(value) = entry.value {
                        return Some(Ok((key, value)));
                    }
                    // Tombstone: the key is dead at this snapshot.
                }
                Ok(None) => return None,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Wraps a source so only entries visible at `snapshot` reach the merge.
fn visible_at<I>(iter: I, snapshot: u64) -> EntrySource
where
    I: Iterator<Item = sstable::Result<(Vec<u8>, ValueEntry)>> + Send + 'static,
{
    Box::new(iter.filter(move |item| match item {
        Ok((_, entry)) => entry.seq <= snapshot,
        Err(_) => true,
    }))
}

fn memtable_source(mem: Arc<Memtable>, snapshot: u64) -> EntrySource {
    visible_at(MemtableIter::new(mem).map(Ok), snapshot)
}

impl Engine {
    /// Creates an ordered iterator over the live entries visible at the
    /// read snapshot (ascending user-key order, one entry per key).
    pub fn new_iterator(&self, opts: &ReadOptions) -> Result<DbIterator> {
        let snapshot = opts.snapshot.unwrap_or_else(|| self.sequence());

        let mut sources: Vec<EntrySource> = Vec::new();

        let mem = Arc::clone(&self.mem.read().expect("mem lock poisoned"));
        sources.push(memtable_source(mem, snapshot));

        if let Some(imm) = self.imm.read().expect("imm lock poisoned").clone() {
            sources.push(memtable_source(imm, snapshot));
        }

        for handle in self.versions.all_files() {
            sources.push(visible_at(
                TableIterator::new(Arc::clone(&handle.table)),
                snapshot,
            ));
        }

        Ok(DbIterator {
            merge: MergeIterator::new(sources)?,
        })
    }
}
