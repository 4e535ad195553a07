use std::time::{Duration, Instant};

use crate::engine::{EngineConfig, MergeSettings};
use tracing_subscriber::EnvFilter;

/// Initialize a tracing subscriber controlled by `RUST_LOG`.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config whose threshold is high enough that nothing ever flushes.
pub fn memtable_only_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        memtable_threshold: 64 * 1024,
        ..EngineConfig::default()
    }
}

/// Tiny threshold so the background flush worker kicks in almost
/// immediately; background compaction stays disabled.
pub fn tiny_buffer_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        memtable_threshold: 4,
        sparse_key_distance: 4,
        ..EngineConfig::default()
    }
}

/// Manual-flush config with a small sparse distance and no background
/// compaction; used by the compaction tests for determinism.
pub fn manual_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        memtable_threshold: 64 * 1024,
        sparse_key_distance: 4,
        ..EngineConfig::default()
    }
}

/// Like [`manual_config`] but with a single terminal level, so the first
/// compaction already drops tombstones.
pub fn terminal_level_config() -> EngineConfig {
    let mut config = manual_config();
    config.merge = MergeSettings {
        max_levels: 1,
        ..MergeSettings::default()
    };
    config
}

/// Polls `cond` until it holds or the timeout elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}
