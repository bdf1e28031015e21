//! Write path: `put()`, `delete()`, `write()` (batches), `flush()`, and
//! rotation.
//!
//! All mutations flow through this module. Each write is appended to the
//! journal **before** it becomes visible in the memtable; a journal failure
//! leaves the memtable untouched. When the memtable exceeds its limit it is
//! rotated: promoted to immutable, flushed to a level-0 sorted run, and
//! replaced, while a fresh journal epoch takes over.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use memtable::{Memtable, MemtableIter};
use sstable::{BuilderOptions, TableBuilder, TableReader};
use wal::WalRecord;

use crate::error::{Error, Result};
use crate::options::WriteOptions;
use crate::version::RunHandle;
use crate::{Engine, WriteState, MAX_KEY_SIZE, MAX_VALUE_SIZE};

/// An atomic group of mutations.
///
/// All records in a batch receive consecutive sequence numbers, are
/// journaled together, and are applied to the memtable in batch order. A
/// single optional sync covers the whole batch.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub(crate) ops: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an insert-or-overwrite.
    pub fn put<K: Into<Vec<u8>>, V: Into<Vec<u8>>>(&mut self, key: K, value: V) {
        self.ops.push((key.into(), Some(value.into())));
    }

    /// Queues a deletion.
    pub fn delete<K: Into<Vec<u8>>>(&mut self, key: K) {
        self.ops.push((key.into(), None));
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("key must not be empty".into()));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(Error::InvalidArgument(format!(
            "key too large: {} bytes (max {})",
            key.len(),
            MAX_KEY_SIZE
        )));
    }
    Ok(())
}

fn validate_value(value: &[u8]) -> Result<()> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(Error::InvalidArgument(format!(
            "value too large: {} bytes (max {})",
            value.len(),
            MAX_VALUE_SIZE
        )));
    }
    Ok(())
}

impl Engine {
    /// Inserts or overwrites a key.
    pub fn put<K, V>(&self, key: K, value: V, opts: &WriteOptions) -> Result<()>
    where
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        let key = key.into();
        let value = value.into();
        validate_key(&key)?;
        validate_value(&value)?;
        self.apply_ops(vec![(key, Some(value))], opts)
    }

    /// Deletes a key by writing a tombstone. Deleting an absent key
    /// succeeds.
    pub fn delete<K: Into<Vec<u8>>>(&self, key: K, opts: &WriteOptions) -> Result<()> {
        let key = key.into();
        validate_key(&key)?;
        self.apply_ops(vec![(key, None)], opts)
    }

    /// Applies a batch atomically with respect to rotation and recovery.
    pub fn write(&self, batch: WriteBatch, opts: &WriteOptions) -> Result<()> {
        for (key, value) in &batch.ops {
            validate_key(key)?;
            if let Some(value) = value {
                validate_value(value)?;
            }
        }
        self.apply_ops(batch.ops, opts)
    }

    /// Forces a rotation of the current memtable into a level-0 run.
    /// No-op when there is nothing buffered.
    pub fn flush(&self) -> Result<()> {
        let mut ws = self.writer.lock().expect("write mutex poisoned");
        let mem_empty = self.mem.read().expect("mem lock poisoned").is_empty();
        let imm_empty = self.imm.read().expect("imm lock poisoned").is_none();
        if mem_empty && imm_empty {
            return Ok(());
        }
        self.rotate(&mut ws)
    }

    /// The shared write path: assign sequences, journal, apply, maybe
    /// rotate, all under the write mutex.
    fn apply_ops(&self, ops: Vec<(Vec<u8>, Option<Vec<u8>>)>, opts: &WriteOptions) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let sync = opts.sync.unwrap_or(self.options.sync_writes_default);
        let journal = self.options.enable_journal && !opts.disable_journal;

        let mut ws = self.writer.lock().expect("write mutex poisoned");

        // Consecutive sequences for the whole group, assigned atomically.
        let first_seq = self.seq.fetch_add(ops.len() as u64, Ordering::SeqCst) + 1;

        // Journal every record before any becomes visible. A failure here
        // returns without touching the memtable.
        if journal {
            if let Some(wal) = ws.wal.as_mut() {
                for (i, (key, value)) in ops.iter().enumerate() {
                    let seq = first_seq + i as u64;
                    let record = match value {
                        Some(v) => WalRecord::Put {
                            seq,
                            key: key.clone(),
                            value: v.clone(),
                        },
                        None => WalRecord::Del {
                            seq,
                            key: key.clone(),
                        },
                    };
                    wal.append(&record)?;
                }
                if sync {
                    wal.sync()?;
                }
            }
        }

        // Apply to the memtable in batch order.
        let mem = Arc::clone(&self.mem.read().expect("mem lock poisoned"));
        for (i, (key, value)) in ops.into_iter().enumerate() {
            let seq = first_seq + i as u64;
            match value {
                Some(_) => self.counters.writes.fetch_add(1, Ordering::Relaxed),
                None => self.counters.deletes.fetch_add(1, Ordering::Relaxed),
            };
            mem.insert(key, value, seq);
        }

        // Rotation only ever happens after the entire group is journaled
        // and applied, so a batch never straddles two epochs.
        if mem.should_rotate(self.options.memtable_limit_bytes) {
            self.rotate(&mut ws)?;
        }

        Ok(())
    }

    /// Rotates the memtable: promote to immutable, open a new journal
    /// epoch, flush to a level-0 run, publish, delete covered epochs, and
    /// nudge the compactor. Runs with the write mutex held.
    pub(crate) fn rotate(&self, ws: &mut WriteState) -> Result<()> {
        // A previous flush may have failed and left an immutable table
        // behind; finish it before rotating again.
        let leftover = self.imm.read().expect("imm lock poisoned").clone();
        if let Some(prev) = leftover {
            self.flush_run(&prev)?;
            *self.imm.write().expect("imm lock poisoned") = None;
        }

        let rotation_seq = self.seq.load(Ordering::SeqCst);

        let old_mem = {
            let mut mem = self.mem.write().expect("mem lock poisoned");
            std::mem::replace(&mut *mem, Arc::new(Memtable::new()))
        };
        if old_mem.is_empty() {
            return Ok(());
        }
        *self.imm.write().expect("imm lock poisoned") = Some(Arc::clone(&old_mem));

        tracing::debug!(sequence = rotation_seq, "rotating memtable");

        if self.options.enable_journal {
            ws.wal = Some(self.wal_manager.create_writer(rotation_seq)?);
        }

        self.flush_run(&old_mem)?;
        *self.imm.write().expect("imm lock poisoned") = None;

        // The new run covers every sequence below the rotation point; this
        // also retires stale epochs left by a previously journaled run when
        // journaling is now off.
        if let Err(e) = self.wal_manager.cleanup(rotation_seq) {
            tracing::warn!(error = %e, "journal cleanup failed");
        }

        self.compactor.maybe_schedule();
        Ok(())
    }

    /// Writes one immutable memtable out as a level-0 sorted run and
    /// publishes it.
    fn flush_run(&self, mem: &Arc<Memtable>) -> Result<()> {
        if mem.is_empty() {
            return Ok(());
        }

        let file_number = self.versions.next_file_number();
        let path = self.db_path.join(format!("{}.sst", file_number));

        let mut builder = TableBuilder::create(
            &path,
            BuilderOptions {
                bloom_bits_per_key: self.options.bloom_bits_per_key,
                ..Default::default()
            },
        )?;

        // The memtable iterates in internal-key order: versions of a key
        // arrive newest first, and only the newest survives the flush.
        let mut last_key: Option<Vec<u8>> = None;
        for (key, entry) in MemtableIter::new(Arc::clone(mem)) {
            if last_key.as_deref() == Some(key.as_slice()) {
                continue;
            }
            builder.add(&key, &entry)?;
            last_key = Some(key);
        }
        builder.finish()?;

        let table = Arc::new(TableReader::open(&path)?);
        let handle = Arc::new(RunHandle::from_reader(file_number, 0, table));
        let entries = handle.meta.entry_count;
        self.versions.apply_flush(handle)?;

        tracing::info!(
            file = file_number,
            entries,
            "flushed memtable to level-0 run"
        );
        Ok(())
    }
}
