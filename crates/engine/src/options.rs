//! Engine configuration and per-operation options.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Default memtable rotation threshold (64 MiB).
pub const DEFAULT_MEMTABLE_LIMIT: usize = 64 * 1024 * 1024;

/// Default number of level-0 runs that triggers compaction.
pub const DEFAULT_LEVEL0_COMPACTION_TRIGGER: usize = 4;

/// Default number of levels.
pub const DEFAULT_MAX_LEVELS: usize = 7;

/// Default growth factor between level size targets.
pub const DEFAULT_LEVEL_SIZE_MULTIPLIER: u64 = 10;

/// Default bloom filter budget.
pub const DEFAULT_BLOOM_BITS_PER_KEY: usize = 10;

/// Engine-level configuration, fixed at open.
#[derive(Debug, Clone)]
pub struct Options {
    /// Filesystem directory holding the store (required).
    pub db_path: PathBuf,
    /// Create the directory if it does not exist.
    pub create_if_missing: bool,
    /// Refuse to open a directory that already has a manifest.
    pub error_if_exists: bool,
    /// Approximate memtable byte threshold that triggers rotation.
    pub memtable_limit_bytes: usize,
    /// Journal mutations before applying them in memory.
    pub enable_journal: bool,
    /// Default for [`WriteOptions::sync`] when a write does not override it.
    pub sync_writes_default: bool,
    /// Bloom filter budget for new sorted runs.
    pub bloom_bits_per_key: usize,
    /// Level-0 run count that triggers compaction. Must be >= 1.
    pub level0_compaction_trigger: usize,
    /// Number of levels. Must be >= 2.
    pub max_levels: usize,
    /// Growth factor between level size targets. Must be >= 2.
    pub level_size_multiplier: u64,
}

impl Options {
    /// Options with defaults for everything but the path.
    pub fn new<P: Into<PathBuf>>(db_path: P) -> Self {
        Self {
            db_path: db_path.into(),
            create_if_missing: true,
            error_if_exists: false,
            memtable_limit_bytes: DEFAULT_MEMTABLE_LIMIT,
            enable_journal: true,
            sync_writes_default: false,
            bloom_bits_per_key: DEFAULT_BLOOM_BITS_PER_KEY,
            level0_compaction_trigger: DEFAULT_LEVEL0_COMPACTION_TRIGGER,
            max_levels: DEFAULT_MAX_LEVELS,
            level_size_multiplier: DEFAULT_LEVEL_SIZE_MULTIPLIER,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.memtable_limit_bytes == 0 {
            return Err(Error::InvalidArgument(
                "memtable_limit_bytes must be > 0".into(),
            ));
        }
        if self.level0_compaction_trigger < 1 {
            return Err(Error::InvalidArgument(
                "level0_compaction_trigger must be >= 1".into(),
            ));
        }
        if self.max_levels < 2 {
            return Err(Error::InvalidArgument("max_levels must be >= 2".into()));
        }
        if self.level_size_multiplier < 2 {
            return Err(Error::InvalidArgument(
                "level_size_multiplier must be >= 2".into(),
            ));
        }
        Ok(())
    }
}

/// Per-read options.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Read as of this sequence number; `None` reads the latest state.
    pub snapshot: Option<u64>,
    /// Accepted for API parity; journal CRCs are always verified and the
    /// sorted-run format carries no per-record checksums.
    pub verify_checksums: bool,
}

/// Per-write options.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Force device-level sync for this write; `None` falls back to
    /// [`Options::sync_writes_default`].
    pub sync: Option<bool>,
    /// Skip the journal for this write (the mutation is lost on crash
    /// unless flushed).
    pub disable_journal: bool,
}

impl WriteOptions {
    /// A write that requests device-level durability.
    pub fn synced() -> Self {
        Self {
            sync: Some(true),
            ..Default::default()
        }
    }
}
