use super::helpers::*;
use crate::{Error, ReadOptions};
use anyhow::Result;
use std::time::{Duration, Instant};
use tempfile::tempdir;

// --------------------- Manual compaction ---------------------

#[test]
fn compact_level0_merges_overlapping_runs() -> Result<()> {
    // Scenario F, second half.
    let dir = tempdir()?;
    let engine = open_store(dir.path());

    put(&engine, b"k", b"A");
    engine.flush()?;
    put(&engine, b"k", b"B");
    engine.flush()?;
    assert_eq!(engine.versions.files_at_level(0).len(), 2);

    engine.compact_level(Some(0))?;

    assert_eq!(engine.versions.files_at_level(0).len(), 0);
    let level1 = engine.versions.files_at_level(1);
    assert_eq!(level1.len(), 1, "exactly one run covers the key");
    assert!(level1[0].meta.contains_key(b"k"));
    assert_eq!(get(&engine, b"k"), Some(b"B".to_vec()));
    Ok(())
}

#[test]
fn tombstones_survive_compaction() -> Result<()> {
    // Scenario B.
    let dir = tempdir()?;
    let engine = open_store(dir.path());

    put(&engine, b"a", b"1");
    put(&engine, b"b", b"2");
    delete(&engine, b"a");

    assert_eq!(get(&engine, b"a"), None);
    assert_eq!(get(&engine, b"b"), Some(b"2".to_vec()));

    engine.flush()?;
    engine.compact_level(Some(0))?;

    assert_eq!(get(&engine, b"a"), None);
    assert_eq!(get(&engine, b"b"), Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn compaction_folds_in_overlapping_next_level_runs() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_store(dir.path());

    // First wave settles at level 1.
    put(&engine, b"a", b"a1");
    put(&engine, b"m", b"m1");
    engine.flush()?;
    engine.compact_level(Some(0))?;
    assert_eq!(engine.versions.files_at_level(1).len(), 1);

    // Second wave overlaps the same range; compacting level 0 again must
    // merge with the existing level-1 run, not sit beside it.
    put(&engine, b"a", b"a2");
    put(&engine, b"z", b"z2");
    engine.flush()?;
    engine.compact_level(Some(0))?;

    let level1 = engine.versions.files_at_level(1);
    assert_eq!(level1.len(), 1);
    assert_eq!(get(&engine, b"a"), Some(b"a2".to_vec()));
    assert_eq!(get(&engine, b"m"), Some(b"m1".to_vec()));
    assert_eq!(get(&engine, b"z"), Some(b"z2".to_vec()));
    Ok(())
}

#[test]
fn levels_above_zero_stay_disjoint_and_sorted() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_store(dir.path());

    for wave in 0..4u64 {
        for i in 0..30u64 {
            let key = format!("key{:03}", (wave * 17 + i * 3) % 100);
            put(&engine, key.as_bytes(), format!("w{}", wave).as_bytes());
        }
        engine.flush()?;
        engine.compact_level(Some(0))?;
    }

    for level in 1..engine.versions.max_levels() {
        let files = engine.versions.files_at_level(level);
        for pair in files.windows(2) {
            assert!(
                pair[0].meta.largest_key < pair[1].meta.smallest_key,
                "level {} runs overlap",
                level
            );
        }
    }
    Ok(())
}

#[test]
fn compact_empty_level_is_a_noop() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_store(dir.path());

    engine.compact_level(Some(0))?;
    engine.compact_level(None)?;
    assert_eq!(engine.stats().num_sorted_runs, 0);
    Ok(())
}

#[test]
fn compacting_the_last_level_is_invalid() {
    let dir = tempdir().unwrap();
    let engine = open_store(dir.path());

    let last = engine.versions.max_levels() - 1;
    assert!(matches!(
        engine.compact_level(Some(last)),
        Err(Error::InvalidArgument(_))
    ));
}

// --------------------- Automatic compaction ---------------------

#[test]
fn background_worker_compacts_at_level0_trigger() -> Result<()> {
    let dir = tempdir()?;
    let mut options = test_options(dir.path());
    options.level0_compaction_trigger = 2;
    let engine = crate::Engine::open(options)?;

    put(&engine, b"a", b"1");
    engine.flush()?;
    put(&engine, b"b", b"2");
    engine.flush()?;

    // The flush nudges the worker; give it a moment.
    let deadline = Instant::now() + Duration::from_secs(10);
    while engine.compaction_stats().compactions_completed == 0 {
        assert!(Instant::now() < deadline, "background compaction never ran");
        std::thread::sleep(Duration::from_millis(50));
    }

    assert!(engine.versions.files_at_level(0).len() < 2);
    assert_eq!(get(&engine, b"a"), Some(b"1".to_vec()));
    assert_eq!(get(&engine, b"b"), Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn compaction_deletes_input_files() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_store(dir.path());

    put(&engine, b"k", b"A");
    engine.flush()?;
    put(&engine, b"k", b"B");
    engine.flush()?;

    let inputs: Vec<_> = engine
        .versions
        .files_at_level(0)
        .iter()
        .map(|h| dir.path().join(&h.meta.file_name))
        .collect();
    assert!(inputs.iter().all(|p| p.exists()));

    engine.compact_level(Some(0))?;

    for path in inputs {
        assert!(!path.exists(), "{} should be deleted", path.display());
    }
    Ok(())
}

#[test]
fn iterator_keeps_reading_runs_removed_by_compaction() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_store(dir.path());

    for i in 0..20u64 {
        put(&engine, format!("key{:02}", i).as_bytes(), b"v");
    }
    engine.flush()?;

    let mut iter = engine.new_iterator(&ReadOptions::default())?;
    let first = iter.next().unwrap()?;
    assert_eq!(first.0, b"key00".to_vec());

    // Replace the level-0 run under the iterator's feet.
    engine.compact_level(Some(0))?;

    let rest: Vec<_> = iter.collect::<crate::Result<Vec<_>>>()?;
    assert_eq!(rest.len(), 19, "iterator pinned the old run via its handle");
    Ok(())
}

// --------------------- Stats ---------------------

#[test]
fn compaction_stats_accumulate() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_store(dir.path());

    put(&engine, b"a", b"1");
    engine.flush()?;
    put(&engine, b"b", b"2");
    engine.flush()?;
    engine.compact_level(Some(0))?;

    let stats = engine.compaction_stats();
    assert_eq!(stats.compactions_completed, 1);
    assert_eq!(stats.files_compacted, 2);
    assert!(stats.bytes_read > 0);
    assert!(stats.bytes_written > 0);
    Ok(())
}
