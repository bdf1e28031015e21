use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use memtable::ValueEntry;
use sstable::{BuilderOptions, TableBuilder, TableReader};
use tempfile::tempdir;

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn build_run(path: &std::path::Path) {
    let mut builder = TableBuilder::create(path, BuilderOptions::default()).unwrap();
    for i in 0..N_KEYS {
        builder
            .add(
                format!("key{:06}", i).as_bytes(),
                &ValueEntry {
                    seq: i as u64 + 1,
                    value: Some(vec![b'x'; VALUE_SIZE]),
                },
            )
            .unwrap();
    }
    builder.finish().unwrap();
}

fn sstable_build_benchmark(c: &mut Criterion) {
    c.bench_function("sstable_build_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let path = dir.path().join("bench.sst");
                (dir, path)
            },
            |(_dir, path)| {
                build_run(&path);
            },
            BatchSize::SmallInput,
        );
    });
}

fn sstable_get_hit_benchmark(c: &mut Criterion) {
    c.bench_function("sstable_get_hit_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let path = dir.path().join("bench.sst");
                build_run(&path);
                let reader = TableReader::open(&path).unwrap();
                (dir, reader)
            },
            |(_dir, reader)| {
                for i in 0..N_KEYS {
                    let key = format!("key{:06}", i);
                    let entry = reader.get(key.as_bytes()).unwrap();
                    assert!(entry.is_some());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn sstable_get_miss_benchmark(c: &mut Criterion) {
    c.bench_function("sstable_get_miss_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let path = dir.path().join("bench.sst");
                build_run(&path);
                let reader = TableReader::open(&path).unwrap();
                (dir, reader)
            },
            |(_dir, reader)| {
                // Absent keys: the bloom filter should reject nearly all
                // of these without touching the data blocks.
                for i in N_KEYS..2 * N_KEYS {
                    let key = format!("key{:06}", i);
                    let entry = reader.get(key.as_bytes()).unwrap();
                    assert!(entry.is_none());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    sstable_build_benchmark,
    sstable_get_hit_benchmark,
    sstable_get_miss_benchmark
);
criterion_main!(benches);
