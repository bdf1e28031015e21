use crate::{Engine, Options, ReadOptions, WriteOptions};
use std::path::Path;

/// Options tuned for tests: auto-compaction effectively disabled so tests
/// control the level layout explicitly.
pub fn test_options<P: AsRef<Path>>(dir: P) -> Options {
    let mut options = Options::new(dir.as_ref());
    options.level0_compaction_trigger = 100;
    options
}

pub fn open_store<P: AsRef<Path>>(dir: P) -> Engine {
    Engine::open(test_options(dir)).expect("open store")
}

/// Simulates a process crash: the engine disappears without the final
/// flush that a clean drop performs. Journal epochs and the manifest stay
/// exactly as they were.
pub fn crash(engine: Engine) {
    engine.compactor.stop();
    std::mem::forget(engine);
}

pub fn put(engine: &Engine, key: &[u8], value: &[u8]) {
    engine
        .put(key.to_vec(), value.to_vec(), &WriteOptions::default())
        .expect("put");
}

pub fn delete(engine: &Engine, key: &[u8]) {
    engine
        .delete(key.to_vec(), &WriteOptions::default())
        .expect("delete");
}

pub fn get(engine: &Engine, key: &[u8]) -> Option<Vec<u8>> {
    engine.get(key, &ReadOptions::default()).expect("get")
}

pub fn get_at(engine: &Engine, key: &[u8], snapshot: u64) -> Option<Vec<u8>> {
    engine
        .get(
            key,
            &ReadOptions {
                snapshot: Some(snapshot),
                ..Default::default()
            },
        )
        .expect("get at snapshot")
}

/// Collects the live `(key, value)` pairs seen by a fresh iterator.
pub fn scan_all(engine: &Engine) -> Vec<(Vec<u8>, Vec<u8>)> {
    engine
        .new_iterator(&ReadOptions::default())
        .expect("iterator")
        .collect::<crate::Result<Vec<_>>>()
        .expect("scan")
}
