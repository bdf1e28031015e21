//! K-way ordered merge with sequence-aware deduplication.
//!
//! Produces `(key, ValueEntry)` pairs in ascending user-key order from any
//! set of sources that each yield entries in internal-key order. When the
//! same user key appears in multiple sources, only the entry with the
//! **highest sequence number** is emitted (newest wins), and every source
//! positioned at that key is advanced past it.
//!
//! This is the core primitive for compaction (sorted runs in, one sorted
//! run out) and for the engine's merged scan over memtables and runs. The
//! merge does not consult snapshots; callers that need snapshot semantics
//! filter each source before handing it in.

use memtable::ValueEntry;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::Result;

/// A merge input: any iterator yielding entries in internal-key order.
pub type EntrySource = Box<dyn Iterator<Item = Result<(Vec<u8>, ValueEntry)>> + Send>;

/// The head entry of one source, ordered for the merge heap.
struct HeapEntry {
    key: Vec<u8>,
    entry: ValueEntry,
    /// Index into the `sources` array.
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.entry.seq == other.entry.seq && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the *smallest* key first, and
        // among equal keys the *largest* sequence. Sequence ties cannot
        // occur between live entries, so the source index is only a
        // deterministic last resort.
        other
            .key
            .cmp(&self.key)
            .then_with(|| self.entry.seq.cmp(&other.entry.seq))
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges N entry sources into a single deduplicated sorted stream.
pub struct MergeIterator {
    sources: Vec<EntrySource>,
    heap: BinaryHeap<HeapEntry>,
}

impl MergeIterator {
    /// Creates a merge over the given sources, priming the heap with each
    /// source's first entry.
    pub fn new(sources: Vec<EntrySource>) -> Result<Self> {
        let mut merge = Self {
            sources,
            heap: BinaryHeap::new(),
        };
        for i in 0..merge.sources.len() {
            merge.advance_source(i)?;
        }
        Ok(merge)
    }

    /// Pulls the next entry from source `i` onto the heap.
    fn advance_source(&mut self, i: usize) -> Result<()> {
        if let Some(item) = self.sources[i].next() {
            let (key, entry) = item?;
            self.heap.push(HeapEntry {
                key,
                entry,
                source: i,
            });
        }
        Ok(())
    }

    /// Returns the next `(key, entry)` in ascending user-key order, or
    /// `None` when all sources are exhausted.
    ///
    /// The entry returned for a key is always the one with the highest
    /// sequence across all sources; older versions of the same key are
    /// consumed and dropped.
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, ValueEntry)>> {
        let top = match self.heap.pop() {
            Some(e) => e,
            None => return Ok(None),
        };
        self.advance_source(top.source)?;

        // Drain every other version of this key; heap order guarantees the
        // first popped one had the largest sequence.
        while let Some(peek) = self.heap.peek() {
            if peek.key != top.key {
                break;
            }
            let dup = self.heap.pop().expect("peeked entry exists");
            self.advance_source(dup.source)?;
        }

        Ok(Some((top.key, top.entry)))
    }

    /// Collects all remaining entries into a `Vec`. Useful for tests.
    pub fn collect_all(&mut self) -> Result<Vec<(Vec<u8>, ValueEntry)>> {
        let mut result = Vec::new();
        while let Some(pair) = self.next_entry()? {
            result.push(pair);
        }
        Ok(result)
    }
}
