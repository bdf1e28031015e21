use super::helpers::*;
use crate::{Engine, Error, WriteOptions};
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

// --------------------- Journal replay ---------------------

#[test]
fn crash_recovers_journaled_writes() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_store(dir.path());

    put(&engine, b"a", b"1");
    put(&engine, b"b", b"2");
    delete(&engine, b"a");
    crash(engine);

    let engine = open_store(dir.path());
    assert_eq!(get(&engine, b"a"), None);
    assert_eq!(get(&engine, b"b"), Some(b"2".to_vec()));
    assert_eq!(engine.sequence(), 3);
    Ok(())
}

#[test]
fn sync_writes_survive_crash() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_store(dir.path());

    engine.put(b"durable".to_vec(), b"yes".to_vec(), &WriteOptions::synced())?;
    crash(engine);

    let engine = open_store(dir.path());
    assert_eq!(get(&engine, b"durable"), Some(b"yes".to_vec()));
    Ok(())
}

#[test]
fn reopen_after_clean_close_recovers_from_runs() -> Result<()> {
    // Scenario A, including the reopen.
    let dir = tempdir()?;
    {
        let engine = open_store(dir.path());
        put(&engine, b"k", b"v1");
        put(&engine, b"k", b"v2");
        assert_eq!(get(&engine, b"k"), Some(b"v2".to_vec()));
    }

    let engine = open_store(dir.path());
    assert_eq!(get(&engine, b"k"), Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn recovery_skips_corrupt_journal_tail() -> Result<()> {
    // Scenario D.
    let dir = tempdir()?;
    let engine = open_store(dir.path());

    engine.put(b"k1".to_vec(), b"v1".to_vec(), &WriteOptions::synced())?;
    engine.put(b"k2".to_vec(), b"v2".to_vec(), &WriteOptions::synced())?;
    crash(engine);

    // Append 16 bytes of garbage to the only journal epoch.
    let epoch = dir.path().join("0.wal");
    assert!(epoch.exists());
    let mut data = fs::read(&epoch)?;
    data.extend_from_slice(&[0xEE; 16]);
    fs::write(&epoch, &data)?;

    let engine = open_store(dir.path());
    assert_eq!(get(&engine, b"k1"), Some(b"v1".to_vec()));
    assert_eq!(get(&engine, b"k2"), Some(b"v2".to_vec()));

    // The store stays writable after the partial replay.
    put(&engine, b"k3", b"v3");
    assert_eq!(get(&engine, b"k3"), Some(b"v3".to_vec()));
    Ok(())
}

#[test]
fn corruption_in_one_epoch_does_not_block_later_epochs() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_store(dir.path());

    put(&engine, b"first", b"1");
    engine.flush()?; // rotates: epoch 1.wal opens
    put(&engine, b"second", b"2");
    crash(engine);

    // Plant a fully corrupt older epoch; the newer one must still replay.
    fs::write(dir.path().join("0.wal"), [0xAB; 32])?;

    let engine = open_store(dir.path());
    // "first" survived through its flushed run, "second" through 1.wal.
    assert_eq!(get(&engine, b"first"), Some(b"1".to_vec()));
    assert_eq!(get(&engine, b"second"), Some(b"2".to_vec()));
    Ok(())
}

// --------------------- Sequence restoration ---------------------

#[test]
fn sequence_not_reused_after_clean_restart() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_store(dir.path());
        put(&engine, b"a", b"1");
        put(&engine, b"b", b"2");
        put(&engine, b"c", b"3");
        // Clean drop flushes; journal epochs below 3 are deleted.
    }

    let engine = open_store(dir.path());
    assert!(
        engine.sequence() >= 3,
        "sequence regressed to {} after restart",
        engine.sequence()
    );

    // A new write must dominate the old version of the same key.
    put(&engine, b"c", b"3-new");
    assert_eq!(get(&engine, b"c"), Some(b"3-new".to_vec()));
    Ok(())
}

// --------------------- Directory handling ---------------------

#[test]
fn error_if_exists_refuses_existing_store() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_store(dir.path());
        put(&engine, b"k", b"v");
        // Clean close writes a manifest via the flush.
    }

    let mut options = test_options(dir.path());
    options.error_if_exists = true;
    assert!(matches!(
        Engine::open(options),
        Err(Error::AlreadyExists(_))
    ));
    Ok(())
}

#[test]
fn error_if_exists_allows_fresh_directory() -> Result<()> {
    let dir = tempdir()?;
    let mut options = test_options(dir.path().join("fresh"));
    options.error_if_exists = true;
    let engine = Engine::open(options)?;
    put(&engine, b"k", b"v");
    Ok(())
}

#[test]
fn create_if_missing_false_requires_directory() {
    let dir = tempdir().unwrap();
    let mut options = test_options(dir.path().join("missing"));
    options.create_if_missing = false;
    assert!(matches!(Engine::open(options), Err(Error::Io(_))));
}

#[test]
fn invalid_options_are_rejected() {
    let dir = tempdir().unwrap();

    let mut options = test_options(dir.path());
    options.max_levels = 1;
    assert!(matches!(
        Engine::open(options),
        Err(Error::InvalidArgument(_))
    ));

    let mut options = test_options(dir.path());
    options.level_size_multiplier = 1;
    assert!(matches!(
        Engine::open(options),
        Err(Error::InvalidArgument(_))
    ));

    let mut options = test_options(dir.path());
    options.level0_compaction_trigger = 0;
    assert!(matches!(
        Engine::open(options),
        Err(Error::InvalidArgument(_))
    ));
}

// --------------------- Orphan cleanup ---------------------

#[test]
fn orphaned_runs_are_deleted_at_open() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_store(dir.path());
        put(&engine, b"k", b"v");
        engine.flush()?;
    }

    // Plant a fake leftover from an aborted compaction.
    let orphan = dir.path().join("9999.sst");
    fs::write(&orphan, b"partial garbage")?;

    let engine = open_store(dir.path());
    assert!(!orphan.exists(), "orphaned run must be removed at open");
    assert_eq!(get(&engine, b"k"), Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn journal_epochs_below_flush_point_are_deleted() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_store(dir.path());

    put(&engine, b"a", b"1");
    engine.flush()?;
    put(&engine, b"b", b"2");
    engine.flush()?;

    let wal_count = fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map_or(false, |x| x == "wal"))
        .count();
    assert_eq!(wal_count, 1, "only the live epoch should remain");
    Ok(())
}
