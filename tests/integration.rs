//! Integration tests for the public `Engine` API.
//!
//! These tests exercise the full storage stack (WAL → memtable → SSTable →
//! compaction) through `sedimentdb::engine::{Engine, EngineConfig}` only.
//! No internal modules are referenced.
//!
//! ## Coverage areas
//! - **Lifecycle**: open, close, idempotent close, drop-based cleanup
//! - **CRUD**: put, get, delete, overwrite, nonexistent keys
//! - **Persistence**: data survives close → reopen; deletes survive reopen
//! - **Flush & compaction**: spills to disk, merges levels, preserves data
//! - **Validation**: key/value size constraints rejected fast
//! - **Concurrency**: multi-thread writers, readers during writes

use std::time::Duration;

use sedimentdb::engine::{Engine, EngineConfig, EngineError, MergeSettings};
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Small threshold so writes spill to disk quickly.
fn small_buffer_config() -> EngineConfig {
    EngineConfig {
        memtable_threshold: 256,
        sparse_key_distance: 4,
        ..EngineConfig::default()
    }
}

/// Background compaction every 25 ms with a low file trigger.
fn compacting_config() -> EngineConfig {
    EngineConfig {
        memtable_threshold: 256,
        sparse_key_distance: 4,
        merge: MergeSettings {
            interval: Duration::from_millis(25),
            num_files: 2,
            ..MergeSettings::default()
        },
        ..EngineConfig::default()
    }
}

fn key(i: u32) -> Vec<u8> {
    format!("key-{i:06}").into_bytes()
}

fn val(i: u32) -> Vec<u8> {
    format!("value-{i:06}").into_bytes()
}

// ================================================================================================
// Lifecycle
// ================================================================================================

#[test]
fn open_and_close_a_fresh_engine() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), EngineConfig::default()).unwrap();
    engine.close().unwrap();
}

#[test]
fn close_twice_is_harmless() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), EngineConfig::default()).unwrap();
    engine.close().unwrap();
    engine.close().unwrap();
}

#[test]
fn dropping_the_last_handle_shuts_down_cleanly() {
    let tmp = TempDir::new().unwrap();
    {
        let engine = Engine::open(tmp.path(), EngineConfig::default()).unwrap();
        engine.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        // No close: drop must stop the workers without hanging.
    }
    let engine = Engine::open(tmp.path(), EngineConfig::default()).unwrap();
    assert_eq!(engine.get(b"k".to_vec()).unwrap(), b"v".to_vec());
    engine.close().unwrap();
}

// ================================================================================================
// CRUD
// ================================================================================================

#[test]
fn basic_crud_cycle() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), EngineConfig::default()).unwrap();

    engine.put(b"hello".to_vec(), b"world".to_vec()).unwrap();
    assert_eq!(engine.get(b"hello".to_vec()).unwrap(), b"world".to_vec());

    engine.put(b"hello".to_vec(), b"again".to_vec()).unwrap();
    assert_eq!(engine.get(b"hello".to_vec()).unwrap(), b"again".to_vec());

    engine.delete(b"hello".to_vec()).unwrap();
    assert!(matches!(
        engine.get(b"hello".to_vec()),
        Err(EngineError::NotFound)
    ));

    engine.close().unwrap();
}

#[test]
fn validation_errors_are_distinct() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), EngineConfig::default()).unwrap();

    assert!(matches!(
        engine.put(Vec::new(), b"v".to_vec()),
        Err(EngineError::KeyRequired)
    ));
    assert!(matches!(
        engine.put(vec![0; 70_000], b"v".to_vec()),
        Err(EngineError::KeyTooLarge)
    ));
    assert!(matches!(
        engine.put(b"k".to_vec(), Vec::new()),
        Err(EngineError::ValueRequired)
    ));
    assert!(matches!(
        engine.put(b"k".to_vec(), vec![0; 70_000]),
        Err(EngineError::ValueTooLarge)
    ));

    engine.close().unwrap();
}

// ================================================================================================
// Persistence
// ================================================================================================

#[test]
fn a_thousand_keys_survive_reopen_across_layers() {
    let tmp = TempDir::new().unwrap();
    {
        let engine = Engine::open(tmp.path(), small_buffer_config()).unwrap();
        for i in 0..1000 {
            engine.put(key(i), val(i)).unwrap();
        }
        engine.close().unwrap();
    }

    let engine = Engine::open(tmp.path(), small_buffer_config()).unwrap();
    for i in 0..1000 {
        assert_eq!(engine.get(key(i)).unwrap(), val(i), "key {i} lost");
    }
    engine.close().unwrap();
}

#[test]
fn deletes_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let engine = Engine::open(tmp.path(), small_buffer_config()).unwrap();
        for i in 0..100 {
            engine.put(key(i), val(i)).unwrap();
        }
        for i in 0..100 {
            if i % 2 == 0 {
                engine.delete(key(i)).unwrap();
            }
        }
        engine.close().unwrap();
    }

    let engine = Engine::open(tmp.path(), small_buffer_config()).unwrap();
    for i in 0..100 {
        if i % 2 == 0 {
            assert!(matches!(engine.get(key(i)), Err(EngineError::NotFound)));
        } else {
            assert_eq!(engine.get(key(i)).unwrap(), val(i));
        }
    }
    engine.close().unwrap();
}

// ================================================================================================
// Flush & compaction
// ================================================================================================

#[test]
fn overflowing_writes_spill_to_disk_and_stay_readable() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), small_buffer_config()).unwrap();

    for i in 0..500 {
        engine.put(key(i), val(i)).unwrap();
    }

    // The memtable threshold is tiny, so most of this data is in tables
    // by now; everything must still resolve.
    for i in 0..500 {
        assert_eq!(engine.get(key(i)).unwrap(), val(i));
    }

    let stats = engine.stats().unwrap();
    assert!(
        stats.level_table_counts.iter().sum::<usize>() > 0 || stats.memtable_entries > 0,
        "data vanished from both layers"
    );
    engine.close().unwrap();
}

#[test]
fn manual_compaction_preserves_the_newest_values() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), EngineConfig::default()).unwrap();

    for round in 0..3 {
        for i in 0..50 {
            engine
                .put(key(i), format!("round-{round}-{i}").into_bytes())
                .unwrap();
        }
        engine.flush().unwrap();
    }
    assert!(engine.compact(0).unwrap());

    for i in 0..50 {
        assert_eq!(
            engine.get(key(i)).unwrap(),
            format!("round-2-{i}").into_bytes()
        );
    }
    engine.close().unwrap();
}

#[test]
fn background_compaction_keeps_the_store_consistent() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), compacting_config()).unwrap();

    for i in 0..800 {
        engine.put(key(i), val(i)).unwrap();
    }
    // Give the compactor a few ticks while reads continue.
    for _ in 0..10 {
        std::thread::sleep(Duration::from_millis(30));
        for i in (0..800).step_by(97) {
            assert_eq!(engine.get(key(i)).unwrap(), val(i));
        }
    }

    for i in 0..800 {
        assert_eq!(engine.get(key(i)).unwrap(), val(i));
    }
    engine.close().unwrap();
}

// ================================================================================================
// Concurrency
// ================================================================================================

#[test]
fn concurrent_writers_and_readers() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), small_buffer_config()).unwrap();

    let mut handles = Vec::new();
    for t in 0u32..4 {
        let engine = engine.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..100 {
                let k = format!("w{t}-{i:04}").into_bytes();
                engine.put(k.clone(), val(i)).unwrap();
                // Read-your-writes under the coarse lock.
                assert_eq!(engine.get(k).unwrap(), val(i));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0u32..4 {
        for i in 0..100 {
            let k = format!("w{t}-{i:04}").into_bytes();
            assert_eq!(engine.get(k).unwrap(), val(i));
        }
    }
    engine.close().unwrap();
}

// ================================================================================================
// Full stack
// ================================================================================================

#[test]
fn end_to_end_lifecycle() {
    let tmp = TempDir::new().unwrap();

    // Phase 1: write, delete, spill, compact.
    {
        let engine = Engine::open(tmp.path(), small_buffer_config()).unwrap();
        for i in 0..300 {
            engine.put(key(i), val(i)).unwrap();
        }
        for i in (0..300).step_by(3) {
            engine.delete(key(i)).unwrap();
        }
        engine.flush().unwrap();
        engine.compact(0).unwrap();
        engine.close().unwrap();
    }

    // Phase 2: reopen and verify every key's fate.
    let engine = Engine::open(tmp.path(), small_buffer_config()).unwrap();
    for i in 0..300 {
        if i % 3 == 0 {
            assert!(matches!(engine.get(key(i)), Err(EngineError::NotFound)));
        } else {
            assert_eq!(engine.get(key(i)).unwrap(), val(i));
        }
    }

    // Phase 3: overwrite a slice and check freshness once more.
    for i in 0..50 {
        engine.put(key(i), b"fresh".to_vec()).unwrap();
    }
    for i in 0..50 {
        assert_eq!(engine.get(key(i)).unwrap(), b"fresh".to_vec());
    }
    engine.close().unwrap();
}
