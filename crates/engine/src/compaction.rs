//! Background compaction worker.
//!
//! One dedicated thread waits on a condition variable with a one-second
//! fallback timeout; the write path nudges it after every flush. Each job
//! takes every run of the lowest level that needs compacting, merges them
//! newest-sequence-wins into a single run at the next level, publishes the
//! result through the version set, and deletes the inputs.
//!
//! Failures never surface to foreground callers: the partial output is
//! abandoned, the version set is untouched, and the job is retried on the
//! next wakeup.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use sstable::{BuilderOptions, EntrySource, MergeIterator, TableBuilder, TableIterator, TableReader};

use crate::error::{Error, Result};
use crate::version::{RunHandle, VersionSet};

/// Counters exposed by [`Compactor::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub files_compacted: u64,
    pub compactions_completed: u64,
}

#[derive(Default)]
struct StatsCells {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    files_compacted: AtomicU64,
    compactions_completed: AtomicU64,
}

/// One unit of work: all runs of `level`, plus the runs of `level + 1`
/// they overlap, merged into a single run at `level + 1`.
///
/// Folding the overlapping next-level runs into the merge is what keeps
/// levels >= 1 pairwise disjoint: the single output replaces everything it
/// could collide with.
struct CompactionJob {
    level: usize,
    inputs: Vec<Arc<RunHandle>>,
    next_level_inputs: Vec<Arc<RunHandle>>,
}

impl CompactionJob {
    /// Gathers the next-level runs overlapping the combined key range of
    /// `inputs`.
    fn for_level(versions: &VersionSet, level: usize) -> Option<Self> {
        let inputs = versions.files_at_level(level);
        if inputs.is_empty() {
            return None;
        }

        let min = inputs
            .iter()
            .map(|h| h.meta.smallest_key.as_slice())
            .min()
            .expect("non-empty inputs");
        let max = inputs
            .iter()
            .map(|h| h.meta.largest_key.as_slice())
            .max()
            .expect("non-empty inputs");

        let next_level_inputs = versions
            .files_at_level(level + 1)
            .into_iter()
            .filter(|h| h.meta.overlaps(min, max))
            .collect();

        Some(Self {
            level,
            inputs,
            next_level_inputs,
        })
    }
}

struct Shared {
    versions: Arc<VersionSet>,
    db_path: PathBuf,
    builder_options: BuilderOptions,
    running: AtomicBool,
    /// `true` when the write path has nudged us since the last scan.
    pending: Mutex<bool>,
    cv: Condvar,
    /// Serializes job execution between the background thread and
    /// synchronous `compact_level` calls.
    job_lock: Mutex<()>,
    stats: StatsCells,
}

/// Owner of the background thread; started at engine open, stopped at
/// shutdown.
pub struct Compactor {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Compactor {
    pub fn new(
        versions: Arc<VersionSet>,
        db_path: PathBuf,
        builder_options: BuilderOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                versions,
                db_path,
                builder_options,
                running: AtomicBool::new(false),
                pending: Mutex::new(false),
                cv: Condvar::new(),
                job_lock: Mutex::new(()),
                stats: StatsCells::default(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Starts the background thread. Idempotent.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::spawn(move || {
            tracing::info!("compactor thread started");
            background_loop(&shared);
            tracing::info!("compactor thread stopped");
        });
        *self.handle.lock().expect("compactor handle poisoned") = Some(handle);
    }

    /// Stops the background thread after the current job completes.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.cv.notify_all();
        if let Some(handle) = self
            .handle
            .lock()
            .expect("compactor handle poisoned")
            .take()
        {
            let _ = handle.join();
        }
    }

    /// Wakes the worker to re-scan the levels.
    pub fn maybe_schedule(&self) {
        *self.shared.pending.lock().expect("compactor mutex poisoned") = true;
        self.shared.cv.notify_one();
    }

    /// Synchronous invocation of the picker on the caller's thread.
    ///
    /// `Some(level)` compacts that level whenever it is non-empty, ignoring
    /// the trigger; `None` runs the normal pick policy. Serializes with the
    /// background worker, so a job already in flight completes first.
    pub fn compact_level(&self, level: Option<usize>) -> Result<()> {
        if let Some(l) = level {
            if l + 1 >= self.shared.versions.max_levels() {
                return Err(Error::InvalidArgument(format!(
                    "cannot compact level {} (max level is {})",
                    l,
                    self.shared.versions.max_levels() - 1
                )));
            }
        }

        let _guard = self.shared.job_lock.lock().expect("job mutex poisoned");
        let job = match level {
            Some(l) => CompactionJob::for_level(&self.shared.versions, l),
            None => pick_compaction(&self.shared.versions),
        };

        match job {
            Some(job) => do_compaction(&self.shared, &job),
            None => Ok(()),
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CompactionStats {
        let s = &self.shared.stats;
        CompactionStats {
            bytes_read: s.bytes_read.load(Ordering::Relaxed),
            bytes_written: s.bytes_written.load(Ordering::Relaxed),
            files_compacted: s.files_compacted.load(Ordering::Relaxed),
            compactions_completed: s.compactions_completed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn background_loop(shared: &Shared) {
    while shared.running.load(Ordering::SeqCst) {
        {
            let pending = shared.pending.lock().expect("compactor mutex poisoned");
            let (mut pending, _) = shared
                .cv
                .wait_timeout_while(pending, Duration::from_secs(1), |nudged| {
                    !*nudged && shared.running.load(Ordering::SeqCst)
                })
                .expect("compactor mutex poisoned");
            if !shared.running.load(Ordering::SeqCst) {
                break;
            }
            *pending = false;
        }

        let _guard = shared.job_lock.lock().expect("job mutex poisoned");
        if let Some(job) = pick_compaction(&shared.versions) {
            if let Err(e) = do_compaction(shared, &job) {
                // Retried on the next wakeup; the version set is unchanged.
                tracing::error!(level = job.level, error = %e, "compaction failed");
            }
        }
    }
}

/// Whole-level pick policy: the lowest level whose trigger fired.
fn pick_compaction(versions: &VersionSet) -> Option<CompactionJob> {
    for level in 0..versions.max_levels() - 1 {
        if versions.needs_compaction(level) {
            if let Some(job) = CompactionJob::for_level(versions, level) {
                return Some(job);
            }
        }
    }
    None
}

fn do_compaction(shared: &Shared, job: &CompactionJob) -> Result<()> {
    tracing::info!(
        level = job.level,
        inputs = job.inputs.len(),
        next_level_inputs = job.next_level_inputs.len(),
        "starting compaction"
    );

    let sources: Vec<EntrySource> = job
        .inputs
        .iter()
        .chain(&job.next_level_inputs)
        .map(|h| Box::new(TableIterator::new(Arc::clone(&h.table))) as EntrySource)
        .collect();
    let mut merge = MergeIterator::new(sources)?;

    let output_number = shared.versions.next_file_number();
    let output_path = shared.db_path.join(format!("{}.sst", output_number));
    let mut builder = TableBuilder::create(&output_path, shared.builder_options)?;

    // Newest version per user key wins; tombstones are kept at every level,
    // which is always safe.
    while let Some((key, entry)) = merge.next_entry()? {
        builder.add(&key, &entry)?;
    }

    let input_numbers: Vec<u64> = job.inputs.iter().map(|h| h.meta.file_number).collect();
    let next_level_numbers: Vec<u64> = job
        .next_level_inputs
        .iter()
        .map(|h| h.meta.file_number)
        .collect();

    let output_handle = if builder.num_entries() == 0 {
        builder.abandon();
        None
    } else {
        builder.finish()?;
        let table = Arc::new(TableReader::open(&output_path)?);
        Some(Arc::new(RunHandle::from_reader(
            output_number,
            job.level + 1,
            table,
        )))
    };

    let output_size = output_handle
        .as_ref()
        .map_or(0, |h| h.meta.file_size);

    shared.versions.apply_compaction(
        job.level,
        &input_numbers,
        &next_level_numbers,
        output_handle,
    )?;

    // Inputs are no longer referenced by the version; in-flight readers
    // keep the handles alive until they finish.
    let all_inputs = job.inputs.iter().chain(&job.next_level_inputs);
    let mut bytes_read = 0u64;
    let mut files = 0u64;
    for input in all_inputs {
        bytes_read += input.meta.file_size;
        files += 1;
        let path = shared.db_path.join(&input.meta.file_name);
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to delete compacted run");
        }
    }

    let stats = &shared.stats;
    stats.bytes_read.fetch_add(bytes_read, Ordering::Relaxed);
    stats.bytes_written.fetch_add(output_size, Ordering::Relaxed);
    stats.files_compacted.fetch_add(files, Ordering::Relaxed);
    stats.compactions_completed.fetch_add(1, Ordering::Relaxed);

    tracing::info!(
        level = job.level,
        inputs = files,
        output = output_number,
        bytes = output_size,
        "compaction complete"
    );

    Ok(())
}
