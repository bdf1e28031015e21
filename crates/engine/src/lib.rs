//! # Engine - SiltDB Storage Engine
//!
//! The central orchestrator that ties together the [`memtable`], [`wal`],
//! and [`sstable`] crates into a complete LSM-tree key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌─────────────────────────────────────────────────┐
//! │                    ENGINE                       │
//! │                                                 │
//! │ write.rs → journal append → memtable insert     │
//! │               |                                 │
//! │               |  (limit exceeded?)              │
//! │               v                                 │
//! │            rotate → immutable table             │
//! │               |     new journal epoch           │
//! │               v                                 │
//! │            flush → level-0 sorted run           │
//! │                                                 │
//! │ compaction.rs (background thread)               │
//! │            level L → merged run at L+1          │
//! │                                                 │
//! │ read.rs → memtable → immutable → L0..L6 runs    │
//! │            (first visible entry wins)           │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                             |
//! |----------------|-----------------------------------------------------|
//! | [`lib.rs`]     | `Engine` struct, open, snapshots, stats, `Drop`     |
//! | [`options`]    | `Options`, `ReadOptions`, `WriteOptions`            |
//! | [`error`]      | error taxonomy surfaced to callers                  |
//! | [`version`]    | version set, run descriptors, manifest persistence  |
//! | [`compaction`] | background worker, pick policy, merge execution     |
//! | [`write`]      | put/delete/batches, rotation, flush                 |
//! | [`read`]       | point lookups                                       |
//! | [`iterator`]   | merged snapshot iteration                           |
//! | [`recovery`]   | journal replay, orphan cleanup                      |
//!
//! ## Crash Safety
//!
//! Every write is appended to the journal **before** the memtable update.
//! Journal epochs are deleted only after the sequences they cover are
//! published in a sorted run through the manifest, and the manifest itself
//! is replaced atomically (temp file + fsync + rename). Sorted runs that
//! never made it into the manifest are removed at the next open.

mod compaction;
mod error;
mod iterator;
mod options;
mod read;
mod recovery;
mod version;
mod write;

pub use compaction::{CompactionStats, Compactor};
pub use error::{Error, Result};
pub use iterator::DbIterator;
pub use options::{Options, ReadOptions, WriteOptions};
pub use version::{FileMeta, RunHandle, VersionSet};
pub use write::WriteBatch;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use memtable::Memtable;
use sstable::BuilderOptions;
use wal::{WalManager, WalWriter};

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = 64 * 1024;
/// Maximum allowed value size in bytes (10 MiB).
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// State owned by the write mutex: the current journal epoch writer.
pub(crate) struct WriteState {
    pub(crate) wal: Option<WalWriter>,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) reads: AtomicU64,
    pub(crate) writes: AtomicU64,
    pub(crate) deletes: AtomicU64,
    pub(crate) cache_hits: AtomicU64,
    pub(crate) cache_misses: AtomicU64,
}

/// Point-in-time operational counters and sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Entries buffered in memory (all versions, both memtables).
    pub num_entries: u64,
    /// Approximate memtable footprint in bytes.
    pub memtable_bytes: u64,
    /// Sorted runs across all levels.
    pub num_sorted_runs: u64,
    /// Total bytes held in sorted runs.
    pub disk_usage: u64,
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Current sequence number.
    pub sequence: u64,
}

/// The storage engine: thread-safe, reads concurrent, writes serialized.
///
/// All operations take `&self`; share the engine across threads with an
/// `Arc`. Writers serialize on an internal mutex, readers are lock-free
/// against the memtables and share run readers by reference count.
pub struct Engine {
    options: Options,
    db_path: PathBuf,

    /// Global mutation counter; the snapshot identifier.
    seq: AtomicU64,

    mem: RwLock<Arc<Memtable>>,
    /// Present only while a flush is in flight (or after a failed one).
    imm: RwLock<Option<Arc<Memtable>>>,

    writer: Mutex<WriteState>,
    wal_manager: WalManager,
    versions: Arc<VersionSet>,
    compactor: Compactor,
    counters: Counters,
}

impl Engine {
    /// Opens (or creates) a store at `options.db_path`.
    ///
    /// Recovery: loads the manifest if present, replays every journal epoch
    /// into a fresh memtable, restores the sequence counter, removes
    /// orphaned run files, opens a new journal epoch, and starts the
    /// compaction worker.
    pub fn open(options: Options) -> Result<Engine> {
        options.validate()?;
        let db_path = options.db_path.clone();

        if !db_path.exists() {
            if options.create_if_missing {
                std::fs::create_dir_all(&db_path)?;
            } else {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("db path does not exist: {}", db_path.display()),
                )));
            }
        }

        let manifest_exists = db_path.join(version::MANIFEST_FILENAME).exists();
        if manifest_exists && options.error_if_exists {
            return Err(Error::AlreadyExists(format!(
                "store already exists: {}",
                db_path.display()
            )));
        }

        tracing::info!(path = %db_path.display(), "opening store");

        let versions = Arc::new(VersionSet::new(
            &db_path,
            options.max_levels,
            options.level0_compaction_trigger,
            options.level_size_multiplier,
        ));
        if manifest_exists {
            versions.load()?;
        }

        // Replay journals (even if journaling is now disabled: epochs from
        // a previous run still hold unflushed data).
        let wal_manager = WalManager::new(&db_path);
        let mem = Arc::new(Memtable::new());
        let max_seq = recovery::replay_epochs(&wal_manager, &mem)?;

        recovery::remove_orphan_runs(&db_path, &versions)?;

        let wal = if options.enable_journal {
            Some(wal_manager.create_writer(max_seq)?)
        } else {
            None
        };

        let compactor = Compactor::new(
            Arc::clone(&versions),
            db_path.clone(),
            BuilderOptions {
                bloom_bits_per_key: options.bloom_bits_per_key,
                ..Default::default()
            },
        );
        compactor.start();

        tracing::info!(
            path = %db_path.display(),
            sequence = max_seq,
            runs = versions.run_count(),
            "store opened"
        );

        Ok(Engine {
            options,
            db_path,
            seq: AtomicU64::new(max_seq),
            mem: RwLock::new(mem),
            imm: RwLock::new(None),
            writer: Mutex::new(WriteState { wal }),
            wal_manager,
            versions,
            compactor,
            counters: Counters::default(),
        })
    }

    /// The current sequence number.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Captures a read snapshot: every write already acknowledged is
    /// visible at it, nothing later is.
    #[must_use]
    pub fn get_snapshot(&self) -> u64 {
        self.sequence()
    }

    /// Sequence numbers are never reused and history survives until
    /// compaction legitimately merges it away, so releasing is a no-op.
    pub fn release_snapshot(&self, _snapshot: u64) {}

    /// Synchronously runs the compaction picker; see
    /// [`Compactor::compact_level`].
    pub fn compact_level(&self, level: Option<usize>) -> Result<()> {
        self.compactor.compact_level(level)
    }

    /// Background compaction counters.
    #[must_use]
    pub fn compaction_stats(&self) -> CompactionStats {
        self.compactor.stats()
    }

    /// Operational snapshot.
    #[must_use]
    pub fn stats(&self) -> Stats {
        let mem = Arc::clone(&self.mem.read().expect("mem lock poisoned"));
        let imm = self.imm.read().expect("imm lock poisoned").clone();
        let (imm_entries, imm_bytes) = imm
            .map(|m| (m.len() as u64, m.approx_size() as u64))
            .unwrap_or((0, 0));

        Stats {
            num_entries: mem.len() as u64 + imm_entries,
            memtable_bytes: mem.approx_size() as u64 + imm_bytes,
            num_sorted_runs: self.versions.run_count() as u64,
            disk_usage: self.versions.total_disk_usage(),
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            sequence: self.sequence(),
        }
    }

    /// Engine configuration, as opened.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mem = Arc::clone(&self.mem.read().expect("mem lock poisoned"));
        f.debug_struct("Engine")
            .field("db_path", &self.db_path)
            .field("sequence", &self.sequence())
            .field("memtable_entries", &mem.len())
            .field("memtable_bytes", &mem.approx_size())
            .field("versions", &self.versions)
            .finish()
    }
}

/// Best-effort shutdown: stop the compactor, then flush whatever is still
/// buffered so a clean close leaves no journal to replay.
///
/// Errors during the final flush are ignored because `Drop` cannot
/// propagate them; the data is still safe in the journal and will be
/// recovered on the next open.
impl Drop for Engine {
    fn drop(&mut self) {
        self.compactor.stop();

        let dirty = {
            let mem_empty = self.mem.read().expect("mem lock poisoned").is_empty();
            let imm_empty = self.imm.read().expect("imm lock poisoned").is_none();
            !(mem_empty && imm_empty)
        };
        if dirty {
            let _ = self.flush();
        }

        tracing::info!(path = %self.db_path.display(), "store closed");
    }
}

#[cfg(test)]
mod tests;
