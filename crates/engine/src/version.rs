//! Version set: the authoritative catalog of sorted runs, persisted to the
//! manifest.
//!
//! Levels are held behind a single mutex and every mutation persists the
//! manifest before the lock is released, so observers either see the
//! pre-update version or the fully updated one. If the manifest write
//! fails, the in-memory state is rolled back to match disk.
//!
//! ## Manifest format (binary, little-endian)
//!
//! ```text
//! [next_file_number: u64][level_count: u32]
//! per level:   [file_count: u32]
//! per file:    [file_number: u64][file_size: u64]
//!              [name_len: u32][name][smallest_len: u32][smallest]
//!              [largest_len: u32][largest][entry_count: u64]
//! ```
//!
//! The manifest is rewritten on every change via temp file + fsync +
//! atomic rename, so a crash mid-write leaves the previous manifest intact.

use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sstable::TableReader;

use crate::error::{Error, Result};

/// Name of the manifest file within the engine directory.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

/// Temporary file used during atomic manifest writes.
const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

/// Size target for level 1; level L targets this times multiplier^(L-1).
const BASE_LEVEL_BYTES: u64 = 10 * 1024 * 1024;

/// Descriptor of one sorted run on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// Unique within the engine lifetime; doubles as the file name stem.
    pub file_number: u64,
    pub file_size: u64,
    /// Bare file name (`<N>.sst`), joined to the engine directory on use.
    pub file_name: String,
    pub smallest_key: Vec<u8>,
    pub largest_key: Vec<u8>,
    pub entry_count: u64,
    pub level: usize,
}

impl FileMeta {
    /// `true` if `key` falls inside this run's `[smallest, largest]` range.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        key >= self.smallest_key.as_slice() && key <= self.largest_key.as_slice()
    }

    /// `true` if this run's key range intersects `[min, max]`.
    pub fn overlaps(&self, min: &[u8], max: &[u8]) -> bool {
        !(self.largest_key.as_slice() < min || self.smallest_key.as_slice() > max)
    }
}

/// A run descriptor plus the shared open reader.
///
/// The version set, point reads, iterators, and the compactor all hold
/// `Arc` clones; the file handle closes when the last clone drops, even if
/// the descriptor has already been removed from the current version.
#[derive(Debug)]
pub struct RunHandle {
    pub meta: FileMeta,
    pub table: Arc<TableReader>,
}

impl RunHandle {
    /// Builds the descriptor for a freshly written run from its reader.
    pub fn from_reader(file_number: u64, level: usize, table: Arc<TableReader>) -> Self {
        Self {
            meta: FileMeta {
                file_number,
                file_size: table.file_size(),
                file_name: format!("{}.sst", file_number),
                smallest_key: table.smallest_key().to_vec(),
                largest_key: table.largest_key().to_vec(),
                entry_count: table.num_entries(),
                level,
            },
            table,
        }
    }
}

/// level -> ordered run handles, plus the next-file-number counter.
pub struct VersionSet {
    db_path: PathBuf,
    levels: Mutex<Vec<Vec<Arc<RunHandle>>>>,
    next_file_number: AtomicU64,
    max_levels: usize,
    level0_trigger: usize,
    size_multiplier: u64,
}

impl VersionSet {
    pub fn new<P: AsRef<Path>>(
        db_path: P,
        max_levels: usize,
        level0_trigger: usize,
        size_multiplier: u64,
    ) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            levels: Mutex::new(vec![Vec::new(); max_levels]),
            next_file_number: AtomicU64::new(1),
            max_levels,
            level0_trigger,
            size_multiplier,
        }
    }

    /// Number of levels tracked.
    pub fn max_levels(&self) -> usize {
        self.max_levels
    }

    /// Allocates the next file number (atomic increment).
    pub fn next_file_number(&self) -> u64 {
        self.next_file_number.fetch_add(1, Ordering::SeqCst)
    }

    /// Runs at `level`, in read order: level 0 newest-first by descending
    /// file number, levels >= 1 sorted ascending by smallest key.
    pub fn files_at_level(&self, level: usize) -> Vec<Arc<RunHandle>> {
        let levels = self.levels.lock().expect("version mutex poisoned");
        levels.get(level).cloned().unwrap_or_default()
    }

    /// Every run in the current version, level 0 first.
    pub fn all_files(&self) -> Vec<Arc<RunHandle>> {
        let levels = self.levels.lock().expect("version mutex poisoned");
        levels.iter().flatten().cloned().collect()
    }

    /// Total bytes at `level`.
    pub fn level_size(&self, level: usize) -> u64 {
        let levels = self.levels.lock().expect("version mutex poisoned");
        levels
            .get(level)
            .map(|files| files.iter().map(|f| f.meta.file_size).sum())
            .unwrap_or(0)
    }

    /// Size target for a level >= 1.
    fn target_size(&self, level: usize) -> u64 {
        let mut target = BASE_LEVEL_BYTES;
        for _ in 1..level {
            target = target.saturating_mul(self.size_multiplier);
        }
        target
    }

    /// Compaction trigger: level 0 by run count, deeper levels by byte size.
    pub fn needs_compaction(&self, level: usize) -> bool {
        if level == 0 {
            let levels = self.levels.lock().expect("version mutex poisoned");
            return levels[0].len() >= self.level0_trigger;
        }
        self.level_size(level) > self.target_size(level)
    }

    /// Number of runs across all levels.
    pub fn run_count(&self) -> usize {
        let levels = self.levels.lock().expect("version mutex poisoned");
        levels.iter().map(Vec::len).sum()
    }

    /// Total on-disk bytes across all levels.
    pub fn total_disk_usage(&self) -> u64 {
        let levels = self.levels.lock().expect("version mutex poisoned");
        levels
            .iter()
            .flatten()
            .map(|f| f.meta.file_size)
            .sum()
    }

    /// File numbers referenced by the current version.
    pub fn live_file_numbers(&self) -> HashSet<u64> {
        let levels = self.levels.lock().expect("version mutex poisoned");
        levels
            .iter()
            .flatten()
            .map(|f| f.meta.file_number)
            .collect()
    }

    /// Publishes a freshly flushed run at its level and persists the
    /// manifest. On persist failure the run is removed again and the error
    /// returned; the version visible to readers always matches disk.
    pub fn apply_flush(&self, handle: Arc<RunHandle>) -> Result<()> {
        let mut levels = self.levels.lock().expect("version mutex poisoned");
        let level = handle.meta.level;
        let file_number = handle.meta.file_number;

        Self::insert_sorted(&mut levels[level], handle, level);

        if let Err(e) = self.persist_locked(&levels) {
            levels[level].retain(|f| f.meta.file_number != file_number);
            return Err(e);
        }
        Ok(())
    }

    /// Atomically replaces `removed` at `level` and `removed_next` at
    /// `level+1` with `output` at `level+1`, persisting the manifest.
    /// Rolls the in-memory state back if the manifest write fails.
    pub fn apply_compaction(
        &self,
        level: usize,
        removed: &[u64],
        removed_next: &[u64],
        output: Option<Arc<RunHandle>>,
    ) -> Result<()> {
        let mut levels = self.levels.lock().expect("version mutex poisoned");

        let saved_input_level = levels[level].clone();
        let saved_output_level = levels[level + 1].clone();

        levels[level].retain(|f| !removed.contains(&f.meta.file_number));
        levels[level + 1].retain(|f| !removed_next.contains(&f.meta.file_number));
        if let Some(handle) = output {
            Self::insert_sorted(&mut levels[level + 1], handle, level + 1);
        }

        if let Err(e) = self.persist_locked(&levels) {
            levels[level] = saved_input_level;
            levels[level + 1] = saved_output_level;
            return Err(e);
        }
        Ok(())
    }

    /// Keeps level 0 newest-first by file number and deeper levels sorted
    /// by smallest key.
    fn insert_sorted(files: &mut Vec<Arc<RunHandle>>, handle: Arc<RunHandle>, level: usize) {
        files.push(handle);
        if level == 0 {
            files.sort_by(|a, b| b.meta.file_number.cmp(&a.meta.file_number));
        } else {
            files.sort_by(|a, b| a.meta.smallest_key.cmp(&b.meta.smallest_key));
        }
    }

    /// Persists the current state; callers that mutated nothing use this to
    /// write an initial manifest.
    pub fn persist(&self) -> Result<()> {
        let levels = self.levels.lock().expect("version mutex poisoned");
        self.persist_locked(&levels)
    }

    fn manifest_path(&self) -> PathBuf {
        self.db_path.join(MANIFEST_FILENAME)
    }

    /// Writes the manifest atomically: temp file, fsync, rename.
    fn persist_locked(&self, levels: &[Vec<Arc<RunHandle>>]) -> Result<()> {
        let tmp_path = self.db_path.join(MANIFEST_TMP_FILENAME);

        let mut buf = Vec::new();
        buf.extend_from_slice(&self.next_file_number.load(Ordering::SeqCst).to_le_bytes());
        buf.extend_from_slice(&(levels.len() as u32).to_le_bytes());
        for level_files in levels.iter() {
            buf.extend_from_slice(&(level_files.len() as u32).to_le_bytes());
            for file in level_files {
                let meta = &file.meta;
                buf.extend_from_slice(&meta.file_number.to_le_bytes());
                buf.extend_from_slice(&meta.file_size.to_le_bytes());
                buf.extend_from_slice(&(meta.file_name.len() as u32).to_le_bytes());
                buf.extend_from_slice(meta.file_name.as_bytes());
                buf.extend_from_slice(&(meta.smallest_key.len() as u32).to_le_bytes());
                buf.extend_from_slice(&meta.smallest_key);
                buf.extend_from_slice(&(meta.largest_key.len() as u32).to_le_bytes());
                buf.extend_from_slice(&meta.largest_key);
                buf.extend_from_slice(&meta.entry_count.to_le_bytes());
            }
        }

        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            f.write_all(&buf)?;
            f.flush()?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp_path, self.manifest_path())?;

        Ok(())
    }

    /// Loads the manifest and opens a reader for every referenced run.
    ///
    /// # Errors
    ///
    /// `Corruption` on truncated framing, `Io` if a referenced run file is
    /// missing or unreadable.
    pub fn load(&self) -> Result<()> {
        let data = std::fs::read(self.manifest_path())?;
        let mut rdr = data.as_slice();

        let next_num = rdr
            .read_u64::<LittleEndian>()
            .map_err(|_| manifest_truncated())?;
        let level_count = rdr
            .read_u32::<LittleEndian>()
            .map_err(|_| manifest_truncated())? as usize;

        let mut loaded: Vec<Vec<Arc<RunHandle>>> =
            vec![Vec::new(); level_count.max(self.max_levels)];
        let mut max_file_number = 0u64;

        for level in 0..level_count {
            let file_count = rdr
                .read_u32::<LittleEndian>()
                .map_err(|_| manifest_truncated())? as usize;

            for _ in 0..file_count {
                let file_number = rdr
                    .read_u64::<LittleEndian>()
                    .map_err(|_| manifest_truncated())?;
                let file_size = rdr
                    .read_u64::<LittleEndian>()
                    .map_err(|_| manifest_truncated())?;
                let file_name = read_string(&mut rdr)?;
                let smallest_key = read_bytes(&mut rdr)?;
                let largest_key = read_bytes(&mut rdr)?;
                let entry_count = rdr
                    .read_u64::<LittleEndian>()
                    .map_err(|_| manifest_truncated())?;

                let path = self.db_path.join(&file_name);
                let table = Arc::new(TableReader::open(&path)?);

                max_file_number = max_file_number.max(file_number);
                loaded[level].push(Arc::new(RunHandle {
                    meta: FileMeta {
                        file_number,
                        file_size,
                        file_name,
                        smallest_key,
                        largest_key,
                        entry_count,
                        level,
                    },
                    table,
                }));
            }
        }

        // Restore read order per level.
        for (level, files) in loaded.iter_mut().enumerate() {
            if level == 0 {
                files.sort_by(|a, b| b.meta.file_number.cmp(&a.meta.file_number));
            } else {
                files.sort_by(|a, b| a.meta.smallest_key.cmp(&b.meta.smallest_key));
            }
        }

        self.next_file_number
            .store(next_num.max(max_file_number + 1), Ordering::SeqCst);
        *self.levels.lock().expect("version mutex poisoned") = loaded;

        Ok(())
    }
}

impl std::fmt::Debug for VersionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let levels = self.levels.lock().expect("version mutex poisoned");
        let counts: Vec<usize> = levels.iter().map(Vec::len).collect();
        f.debug_struct("VersionSet")
            .field("levels", &counts)
            .field(
                "next_file_number",
                &self.next_file_number.load(Ordering::SeqCst),
            )
            .finish()
    }
}

fn manifest_truncated() -> Error {
    Error::Corruption("manifest truncated".into())
}

fn read_bytes(rdr: &mut &[u8]) -> Result<Vec<u8>> {
    let len = rdr
        .read_u32::<LittleEndian>()
        .map_err(|_| manifest_truncated())? as usize;
    if rdr.len() < len {
        return Err(manifest_truncated());
    }
    let out = rdr[..len].to_vec();
    *rdr = &rdr[len..];
    Ok(out)
}

fn read_string(rdr: &mut &[u8]) -> Result<String> {
    let bytes = read_bytes(rdr)?;
    String::from_utf8(bytes).map_err(|_| Error::Corruption("manifest file name not utf-8".into()))
}
