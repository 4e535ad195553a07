//! Micro-benchmarks for SedimentDB core operations.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- put       # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};

use sedimentdb::engine::{Engine, EngineConfig};
use tempfile::TempDir;

/// Default value payload (128 bytes).
const VALUE_128B: &[u8; 128] = &[0xAB; 128];

/// Format a zero-padded key.
fn make_key(i: u64) -> Vec<u8> {
    format!("key-{i:012}").into_bytes()
}

/// Open a fresh engine with a buffer large enough that flushes stay out
/// of the measured path.
fn open_memtable_only(dir: &std::path::Path) -> Engine {
    Engine::open(
        dir,
        EngineConfig {
            memtable_threshold: 256 * 1024 * 1024,
            ..EngineConfig::default()
        },
    )
    .expect("open engine")
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_128b", |b| {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());
        let mut i = 0u64;
        b.iter_batched(
            || {
                i += 1;
                make_key(i)
            },
            |key| engine.put(black_box(key), VALUE_128B.to_vec()).unwrap(),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_memtable_hit", |b| {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());
        for i in 0..10_000 {
            engine.put(make_key(i), VALUE_128B.to_vec()).unwrap();
        }
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 1) % 10_000;
            black_box(engine.get(make_key(i)).unwrap());
        });
    });

    group.bench_function("get_sstable_hit", |b| {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());
        for i in 0..10_000 {
            engine.put(make_key(i), VALUE_128B.to_vec()).unwrap();
        }
        engine.flush().unwrap();
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 1) % 10_000;
            black_box(engine.get(make_key(i)).unwrap());
        });
    });

    group.bench_function("get_bloom_miss", |b| {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());
        for i in 0..10_000 {
            engine.put(make_key(i), VALUE_128B.to_vec()).unwrap();
        }
        engine.flush().unwrap();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let _ = black_box(engine.get(format!("absent-{i}").into_bytes()));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_put, bench_get);
criterion_main!(benches);
