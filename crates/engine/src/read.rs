//! Read path: `get()` and `exists()`.
//!
//! Point lookups check the memtable first (freshest data), then the
//! immutable memtable if a flush is in flight, then the sorted runs level
//! by level. Level 0 is searched newest-first (its runs may overlap);
//! deeper levels are non-overlapping. The first entry visible at the
//! snapshot wins, and a tombstone resolves to "absent".

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::Result;
use crate::options::ReadOptions;
use crate::Engine;

impl Engine {
    /// Looks up `key`, returning its value as of the read snapshot.
    ///
    /// `Ok(None)` covers both "never written" and "deleted"; the two are
    /// indistinguishable by design.
    pub fn get(&self, key: &[u8], opts: &ReadOptions) -> Result<Option<Vec<u8>>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let snapshot = opts.snapshot.unwrap_or_else(|| self.sequence());

        // 1. Mutable memtable: freshest data, includes tombstones.
        let mem = Arc::clone(&self.mem.read().expect("mem lock poisoned"));
        if let Some(entry) = mem.get(key, snapshot) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entry.value);
        }

        // 2. Immutable memtable, present while a flush is in flight.
        let imm = self.imm.read().expect("imm lock poisoned").clone();
        if let Some(imm) = imm {
            if let Some(entry) = imm.get(key, snapshot) {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.value);
            }
        }

        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        // 3. Sorted runs, shallowest level first. Level-0 files are already
        // ordered newest-first by file number; deeper levels are disjoint.
        for level in 0..self.versions.max_levels() {
            for handle in self.versions.files_at_level(level) {
                if !handle.meta.contains_key(key) {
                    continue;
                }
                if !handle.table.may_contain(key) {
                    continue;
                }
                if let Some(entry) = handle.table.get(key)? {
                    if entry.seq <= snapshot {
                        return Ok(entry.value);
                    }
                    // The run's only version of this key is newer than the
                    // snapshot; an older version may survive in an older
                    // level-0 run or a deeper level.
                }
            }
        }

        Ok(None)
    }

    /// `true` if `key` has a live value at the latest snapshot.
    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key, &ReadOptions::default())?.is_some())
    }
}
