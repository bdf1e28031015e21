//! Cold-start recovery: journal replay and orphaned-file cleanup.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use memtable::Memtable;
use wal::{WalError, WalManager, WalReader, WalRecord};

use crate::error::Result;
use crate::version::VersionSet;

/// Replays every journal epoch, in sequence order, into `mem`.
///
/// Returns the largest sequence observed, across both replayed records and
/// epoch file names. Epoch names record the sequence counter at rotation
/// time, so they floor the counter above everything already persisted in
/// sorted runs even when the epochs themselves are empty.
///
/// A corrupt record stops replay **for that epoch only**: records before
/// the corruption point stay applied, the rest of the epoch is discarded,
/// and later epochs are still replayed.
pub(crate) fn replay_epochs(wal_manager: &WalManager, mem: &Arc<Memtable>) -> Result<u64> {
    let mut max_seq = 0u64;

    for (epoch_seq, path) in wal_manager.list_epochs()? {
        max_seq = max_seq.max(epoch_seq);

        let mut reader = WalReader::open(&path)?;
        let mut replayed = 0u64;
        let result = reader.replay(|record| {
            max_seq = max_seq.max(record.seq());
            replayed += 1;
            match record {
                WalRecord::Put { seq, key, value } => mem.insert(key, Some(value), seq),
                WalRecord::Del { seq, key } => mem.insert(key, None, seq),
            }
        });

        match result {
            Ok(()) => {
                tracing::debug!(epoch = epoch_seq, records = replayed, "replayed journal epoch");
            }
            Err(WalError::Corrupt) => {
                tracing::warn!(
                    epoch = epoch_seq,
                    records = replayed,
                    "corrupt journal tail; discarding the rest of this epoch"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(max_seq)
}

/// Deletes sorted-run files whose numbers are not referenced by the current
/// version: leftovers of aborted flushes and compactions.
pub(crate) fn remove_orphan_runs(db_path: &Path, versions: &VersionSet) -> Result<()> {
    let live: HashSet<u64> = versions.live_file_numbers();

    for entry in std::fs::read_dir(db_path)? {
        let path = entry?.path();
        if !path.extension().map_or(false, |e| e == "sst") {
            continue;
        }
        let number = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(number) = number {
            if !live.contains(&number) {
                std::fs::remove_file(&path)?;
                tracing::warn!(file = number, "deleted orphaned sorted run");
            }
        }
    }

    // A stale manifest temp file can survive a crash mid-persist.
    let tmp = db_path.join("MANIFEST.tmp");
    if tmp.exists() {
        let _ = std::fs::remove_file(tmp);
    }

    Ok(())
}
