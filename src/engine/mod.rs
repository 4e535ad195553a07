//! # LSM Storage Engine
//!
//! The composition root: one WAL, one memtable, one level catalog, and two
//! background workers, behind a single engine-wide read-write lock.
//!
//! ## Write path
//!
//! `put` and `delete` both validate, encode the value with its operation
//! tag, and then — under the write lock — append to the WAL *before*
//! inserting into the memtable. A reader can never observe a write that is
//! not already in the log (durable per the fsync policy). When the insert
//! pushes the memtable past its byte threshold, a signal is sent to the
//! flush worker; the channel is bounded so back-to-back writes coalesce
//! into one wakeup.
//!
//! ## Read path
//!
//! `get` takes the read lock, consults the memtable first, then walks the
//! levels in order — and each level's tables newest-first — gating every
//! table probe on its Bloom filter. The first hit wins; a tombstone hit
//! halts the search and reports [`EngineError::NotFound`].
//!
//! ## Background workers
//!
//! - **Flush worker** — re-checks the threshold under the write lock, then
//!   switches the memtable and writes a level-0 table from the frozen
//!   snapshot: bloom + three-file writer + fsync, sequence bump, catalog
//!   registration, WAL truncation. A failed flush restores the memtable
//!   and keeps the WAL, so durability is never lost.
//! - **Compaction worker** — wakes on a fixed interval (zero disables it)
//!   and merges any level holding more than `num_files * (level+1)` tables
//!   into the next level. The terminal level is a sink and is never
//!   compacted upward.
//!
//! Worker errors are logged and retried on the next wakeup; they never
//! terminate the engine.
//!
//! ## Locking
//!
//! One `RwLock` guards the memtable and the catalog together. Flush and
//! compaction do their file I/O outside the lock where possible and take
//! it at commit points; the WAL's own mutex is only ever acquired while
//! the engine lock is held, so the lock order is total and deadlock-free.
//!
//! ## Shutdown
//!
//! [`Engine::close`] closes the shutdown channel, joins both workers, and
//! syncs the WAL. In-flight operations complete first; closing twice is a
//! no-op. Dropping the last handle performs the same steps best-effort.

#[cfg(test)]
mod tests;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, bounded, tick};
use crossbeam::select;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::catalog::{self, CatalogError, LevelCatalog, SstDescriptor};
use crate::compaction::{self, CompactionError, SourceTable};
use crate::encoding::EncodingError;
use crate::encoding::value::{self, OpKind};
use crate::memtable::Memtable;
use crate::sstable::{self, SstError, SstWriter};
use crate::wal::{Wal, WalError};

/// Maximum allowed key size in bytes.
///
/// Hard-coded: the value participates in the on-disk frame sanity checks
/// and must not change.
pub const MAX_KEY_SIZE: usize = u16::MAX as usize;

/// Maximum allowed value size in bytes.
///
/// Hard-coded for the same reason as [`MAX_KEY_SIZE`].
pub const MAX_VALUE_SIZE: usize = u16::MAX as usize;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A zero-length key was supplied.
    #[error("key required")]
    KeyRequired,

    /// The key exceeds [`MAX_KEY_SIZE`].
    #[error("key too large")]
    KeyTooLarge,

    /// A zero-length value was supplied.
    #[error("value required")]
    ValueRequired,

    /// The value exceeds [`MAX_VALUE_SIZE`].
    #[error("value too large")]
    ValueTooLarge,

    /// The key is absent or masked by a tombstone.
    #[error("key not found")]
    NotFound,

    /// Error originating from the WAL.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Error originating from the SSTable subsystem.
    #[error("SSTable error: {0}")]
    Sst(#[from] SstError),

    /// Error originating from the level catalog.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Error originating from compaction.
    #[error("compaction error: {0}")]
    Compaction(#[from] CompactionError),

    /// Corrupt stored value.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Compaction scheduling and sizing knobs.
#[derive(Debug, Clone)]
pub struct MergeSettings {
    /// Run the whole merge under the engine write lock instead of taking
    /// it only at the commit point.
    pub immediate: bool,

    /// Terminal level index. Tables there are never compacted upward, and
    /// merges writing into it drop tombstones permanently.
    pub max_levels: u16,

    /// Compactor wake period. Zero disables background compaction.
    pub interval: Duration,

    /// A level is compacted when it holds more than
    /// `num_files * (level + 1)` tables. Zero disables the trigger.
    pub num_files: usize,

    /// Reserved: compact when a level's data reaches this size.
    pub data_size: u64,

    /// Reserved: relocate level-0 data after this window.
    pub time_window: Duration,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            immediate: false,
            max_levels: 3,
            interval: Duration::ZERO,
            num_files: 10,
            data_size: 0,
            time_window: Duration::ZERO,
        }
    }
}

/// Configuration for an [`Engine`] instance, passed to [`Engine::open`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Memtable byte threshold that triggers a flush.
    pub memtable_threshold: u64,

    /// One sparse-index entry per this many dense-index keys.
    pub sparse_key_distance: u32,

    /// Advisory ceiling on level-0 table count; exceeding it logs a
    /// warning at flush commit.
    pub disk_table_num_threshold: usize,

    /// Fsync the WAL on every append.
    pub fsync: bool,

    /// Compaction settings.
    pub merge: MergeSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memtable_threshold: 64_000,
            sparse_key_distance: 128,
            disk_table_num_threshold: 10,
            fsync: false,
            merge: MergeSettings::default(),
        }
    }
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug)]
pub struct EngineStats {
    /// Bytes currently buffered in the memtable.
    pub memtable_bytes: u64,

    /// Entries currently buffered in the memtable (tombstones included).
    pub memtable_entries: usize,

    /// Current WAL flush sequence number.
    pub wal_sequence: u64,

    /// Table count per level, level 0 first.
    pub level_table_counts: Vec<usize>,
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

struct EngineInner {
    /// Recent writes not yet flushed to a table.
    mem: Memtable,

    /// In-memory view of the on-disk levels.
    levels: LevelCatalog,
}

struct Lifecycle {
    /// Dropped to signal both workers to exit.
    shutdown_tx: Option<Sender<()>>,

    /// Worker join handles, taken on close.
    workers: Vec<JoinHandle<()>>,
}

struct Shared {
    root: PathBuf,
    config: EngineConfig,
    wal: Wal,
    inner: RwLock<EngineInner>,
    flush_tx: Sender<()>,
    lifecycle: Mutex<Lifecycle>,
}

/// The main LSM storage engine handle.
///
/// Thread-safe — can be cloned and shared across threads; all clones drive
/// the same underlying engine through its single read-write lock.
pub struct Engine {
    shared: Arc<Shared>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Engine {
    /// Opens (or creates) an engine rooted at the given directory.
    ///
    /// On a fresh directory the WAL and level directories are created on
    /// demand. On an existing directory the WAL is replayed into the
    /// memtable and the level catalog is reconstructed from disk, so the
    /// engine observes every table written before the restart.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let wal = Wal::open(&root, config.fsync)?;
        let mem = wal.load_mem()?;
        let replayed_bytes = mem.size();
        let levels = LevelCatalog::load(&root)?;

        info!(
            root = %root.display(),
            replayed_entries = mem.len(),
            tables = levels.table_count(),
            "engine opened"
        );

        let (flush_tx, flush_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let shared = Arc::new(Shared {
            root,
            config,
            wal,
            inner: RwLock::new(EngineInner { mem, levels }),
            flush_tx,
            lifecycle: Mutex::new(Lifecycle {
                shutdown_tx: Some(shutdown_tx),
                workers: Vec::new(),
            }),
        });

        let flush_handle = {
            let weak = Arc::downgrade(&shared);
            let shutdown_rx = shutdown_rx.clone();
            std::thread::Builder::new()
                .name("sediment-flush".into())
                .spawn(move || flush_worker(weak, flush_rx, shutdown_rx))?
        };
        let compaction_handle = {
            let weak = Arc::downgrade(&shared);
            let interval = shared.config.merge.interval;
            std::thread::Builder::new()
                .name("sediment-compaction".into())
                .spawn(move || compaction_worker(weak, shutdown_rx, interval))?
        };

        {
            let mut lifecycle = shared
                .lifecycle
                .lock()
                .map_err(|_| EngineError::Internal("lifecycle mutex poisoned".into()))?;
            lifecycle.workers.push(flush_handle);
            lifecycle.workers.push(compaction_handle);
        }

        // A replayed memtable may already be over the threshold.
        if replayed_bytes >= shared.config.memtable_threshold {
            let _ = shared.flush_tx.try_send(());
        }

        Ok(Self { shared })
    }

    /// Inserts a key-value pair.
    pub fn put(&self, key: Vec<u8>, val: Vec<u8>) -> Result<(), EngineError> {
        if key.is_empty() {
            return Err(EngineError::KeyRequired);
        }
        if key.len() > MAX_KEY_SIZE {
            return Err(EngineError::KeyTooLarge);
        }
        if val.is_empty() {
            return Err(EngineError::ValueRequired);
        }
        if val.len() > MAX_VALUE_SIZE {
            return Err(EngineError::ValueTooLarge);
        }

        self.shared.write_entry(key, value::encode(OpKind::Set, &val))
    }

    /// Deletes a key by writing a tombstone.
    ///
    /// Goes through exactly the same WAL-then-memtable path as [`Engine::put`].
    pub fn delete(&self, key: Vec<u8>) -> Result<(), EngineError> {
        if key.is_empty() {
            return Err(EngineError::KeyRequired);
        }
        if key.len() > MAX_KEY_SIZE {
            return Err(EngineError::KeyTooLarge);
        }

        self.shared.write_entry(key, value::encode(OpKind::Delete, &[]))
    }

    /// Looks up a key.
    ///
    /// Returns the value, or [`EngineError::NotFound`] when the key is
    /// absent or tombstoned.
    pub fn get(&self, key: Vec<u8>) -> Result<Vec<u8>, EngineError> {
        if key.is_empty() {
            return Err(EngineError::KeyRequired);
        }

        let inner = self.shared.read_lock()?;

        // 1. Memtable (newest data).
        if let Some(stored) = inner.mem.get(&key) {
            let decoded = value::decode(stored)?;
            if decoded.is_tombstone() {
                return Err(EngineError::NotFound);
            }
            return Ok(decoded.payload.to_vec());
        }

        // 2. Levels in order; within a level, newest table first. The first
        //    hit is authoritative — a tombstone halts the whole search.
        for tables in inner.levels.iter_levels() {
            for descriptor in tables.iter().rev() {
                if !descriptor.bloom.check(&key) {
                    continue;
                }
                if let Some(stored) = sstable::search_table(
                    &self.shared.root,
                    descriptor.level,
                    descriptor.number,
                    &key,
                )? {
                    let decoded = value::decode(&stored)?;
                    if decoded.is_tombstone() {
                        return Err(EngineError::NotFound);
                    }
                    return Ok(decoded.payload.to_vec());
                }
            }
        }

        Err(EngineError::NotFound)
    }

    /// Flushes the memtable to a level-0 table regardless of its size.
    ///
    /// Returns `Ok(false)` when the memtable was empty. The background
    /// worker performs the same operation when the byte threshold trips.
    pub fn flush(&self) -> Result<bool, EngineError> {
        let mut inner = self.shared.write_lock()?;
        if inner.mem.is_empty() {
            return Ok(false);
        }
        self.shared.flush_locked(&mut inner)?;
        Ok(true)
    }

    /// Merges level `level` (plus level `level + 1`) into level `level + 1`.
    ///
    /// Returns `Ok(false)` when there was nothing to merge. Compacting a
    /// level the catalog does not know, or a level at or beyond the
    /// terminal level, is a precondition error.
    pub fn compact(&self, level: u16) -> Result<bool, EngineError> {
        self.shared.compact_level(level)
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let inner = self.shared.read_lock()?;
        Ok(EngineStats {
            memtable_bytes: inner.mem.size(),
            memtable_entries: inner.mem.len(),
            wal_sequence: self.shared.wal.sequence()?,
            level_table_counts: inner.levels.iter_levels().map(|tables| tables.len()).collect(),
        })
    }

    /// Gracefully shuts down the engine.
    ///
    /// Stops both background workers, waits for them to finish, and syncs
    /// the WAL. Unflushed writes stay durable in the WAL and are replayed
    /// on the next open. Closing an already-closed engine is a no-op.
    pub fn close(&self) -> Result<(), EngineError> {
        self.shared.shutdown(true)
    }
}

// ------------------------------------------------------------------------------------------------
// Shared internals
// ------------------------------------------------------------------------------------------------

impl Shared {
    fn read_lock(&self) -> Result<RwLockReadGuard<'_, EngineInner>, EngineError> {
        self.inner
            .read()
            .map_err(|_| EngineError::Internal("engine lock poisoned".into()))
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, EngineInner>, EngineError> {
        self.inner
            .write()
            .map_err(|_| EngineError::Internal("engine lock poisoned".into()))
    }

    /// The single write path: WAL append, then memtable insert, then a
    /// flush signal when the threshold trips — all under the write lock.
    fn write_entry(&self, key: Vec<u8>, encoded: Vec<u8>) -> Result<(), EngineError> {
        let mut inner = self.write_lock()?;

        self.wal.append(&key, &encoded)?;
        inner.mem.put(key, encoded);

        if inner.mem.size() >= self.config.memtable_threshold {
            // A pending signal already covers us; coalesce.
            let _ = self.flush_tx.try_send(());
        }
        Ok(())
    }

    /// Background entry point: flush only if still over the threshold.
    fn flush_if_over_threshold(&self) -> Result<(), EngineError> {
        let mut inner = self.write_lock()?;
        if inner.mem.is_empty() || inner.mem.size() < self.config.memtable_threshold {
            return Ok(());
        }
        self.flush_locked(&mut inner)
    }

    /// Flushes the memtable into a new level-0 table.
    ///
    /// Runs entirely under the engine write lock. On a write failure the
    /// snapshot is swapped back in and the WAL is left intact.
    fn flush_locked(&self, inner: &mut EngineInner) -> Result<(), EngineError> {
        let snapshot = inner.mem.switch();

        let descriptor = match self.write_level0_table(&snapshot) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                // Nothing was written between switch and now (we hold the
                // lock), so the snapshot is the complete memtable.
                inner.mem = snapshot;
                return Err(e);
            }
        };
        let seq = descriptor.seq;
        let keys = descriptor.keys;

        // The table is durable: register it even if the sequence bump
        // fails, so reads keep working while the error surfaces.
        let bumped = self.wal.up_sequence();
        inner.levels.push(descriptor);
        bumped?;
        self.wal.clear()?;

        let level0_count = inner.levels.tables(0).len();
        if level0_count > self.config.disk_table_num_threshold {
            warn!(
                level0_count,
                threshold = self.config.disk_table_num_threshold,
                "level-0 table count over the advisory threshold"
            );
        }

        info!(seq, keys, level0_count, "memtable flushed");
        Ok(())
    }

    /// Writes one level-0 table from a frozen snapshot, building its Bloom
    /// filter along the way. Partial files are removed on failure.
    fn write_level0_table(&self, snapshot: &Memtable) -> Result<SstDescriptor, EngineError> {
        let seq = self.wal.sequence()?;
        let mut bloom = catalog::new_bloom(snapshot.len())?;
        let mut writer = SstWriter::create(&self.root, 0, seq, self.config.sparse_key_distance)?;
        let number = writer.number();

        for (key, stored) in snapshot.iter() {
            bloom.set(&key.to_vec());
            if let Err(e) = writer.add(key, stored) {
                drop(writer);
                let _ = sstable::remove_table(&self.root, 0, number);
                return Err(e.into());
            }
        }

        let meta = match writer.close() {
            Ok(meta) => meta,
            Err(e) => {
                let _ = sstable::remove_table(&self.root, 0, number);
                return Err(e.into());
            }
        };

        Ok(SstDescriptor {
            level: 0,
            number: meta.number,
            seq: meta.seq,
            keys: meta.keys,
            bloom,
        })
    }

    /// One background compaction pass over all levels.
    fn run_compaction_pass(&self) -> Result<(), EngineError> {
        let merge = &self.config.merge;
        if merge.num_files == 0 {
            return Ok(());
        }

        let level_count = self.read_lock()?.levels.level_count() as u16;
        for level in 0..level_count {
            if level >= merge.max_levels {
                // The terminal level is a sink.
                break;
            }
            let table_count = self.read_lock()?.levels.tables(level).len();
            if table_count > merge.num_files * (usize::from(level) + 1) {
                debug!(level, table_count, "level over file threshold");
                self.compact_level(level)?;
            }
        }
        Ok(())
    }

    /// Compacts one level into the next.
    fn compact_level(&self, level: u16) -> Result<bool, EngineError> {
        if level >= self.config.merge.max_levels {
            return Err(CompactionError::BeyondMaxLevel(level).into());
        }

        if self.config.merge.immediate {
            let mut inner = self.write_lock()?;
            let inputs = self.snapshot_inputs(&inner, level)?;
            if inputs.is_empty() {
                return Ok(false);
            }
            let outputs = self.run_merge(level, &inputs)?;
            self.commit_compaction(&mut inner, &inputs, outputs);
            Ok(true)
        } else {
            let inputs = {
                let inner = self.read_lock()?;
                self.snapshot_inputs(&inner, level)?
            };
            if inputs.is_empty() {
                return Ok(false);
            }
            let outputs = self.run_merge(level, &inputs)?;

            let mut inner = self.write_lock()?;
            self.commit_compaction(&mut inner, &inputs, outputs);
            Ok(true)
        }
    }

    /// Snapshots the tables of `level` and `level + 1` as merge inputs.
    fn snapshot_inputs(
        &self,
        inner: &EngineInner,
        level: u16,
    ) -> Result<Vec<SourceTable>, EngineError> {
        if usize::from(level) >= inner.levels.level_count() {
            return Err(CompactionError::UnknownLevel(level).into());
        }

        Ok(inner
            .levels
            .tables(level)
            .iter()
            .chain(inner.levels.tables(level + 1).iter())
            .map(|d| SourceTable {
                level: d.level,
                number: d.number,
                seq: d.seq,
                keys: d.keys,
            })
            .collect())
    }

    /// Runs the merge itself, outside any lock unless `immediate` is set.
    fn run_merge(
        &self,
        level: u16,
        inputs: &[SourceTable],
    ) -> Result<Vec<SstDescriptor>, EngineError> {
        let budget = self
            .config
            .memtable_threshold
            .saturating_mul(2u64.saturating_pow(u32::from(level) + 1));
        let drop_tombstones = level + 1 >= self.config.merge.max_levels;

        Ok(compaction::compact(
            &self.root,
            level,
            inputs,
            budget,
            self.config.sparse_key_distance,
            drop_tombstones,
        )?)
    }

    /// Swaps merge inputs for outputs: files first, then the catalog.
    fn commit_compaction(
        &self,
        inner: &mut EngineInner,
        inputs: &[SourceTable],
        outputs: Vec<SstDescriptor>,
    ) {
        for input in inputs {
            if let Err(e) = sstable::remove_table(&self.root, input.level, input.number) {
                warn!(
                    level = input.level,
                    number = input.number,
                    error = %e,
                    "failed to remove compacted input table"
                );
            }
        }

        let consumed: Vec<(u16, u32)> = inputs.iter().map(|t| (t.level, t.number)).collect();
        let output_count = outputs.len();
        inner.levels.apply_compaction(&consumed, outputs);

        info!(
            consumed = consumed.len(),
            outputs = output_count,
            "compaction committed"
        );
    }

    /// Stops the workers and joins them. `sync_wal` distinguishes the
    /// explicit close (which reports errors) from the drop path.
    fn shutdown(&self, sync_wal: bool) -> Result<(), EngineError> {
        let (shutdown_tx, workers) = {
            let mut lifecycle = match self.lifecycle.lock() {
                Ok(lifecycle) => lifecycle,
                Err(poisoned) => poisoned.into_inner(),
            };
            (
                lifecycle.shutdown_tx.take(),
                std::mem::take(&mut lifecycle.workers),
            )
        };

        if shutdown_tx.is_none() && workers.is_empty() {
            return Ok(());
        }

        // Closing the channel wakes both workers out of their selects.
        drop(shutdown_tx);
        let current = std::thread::current().id();
        for handle in workers {
            // A worker can be the thread dropping the last engine handle;
            // it must not join itself.
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }

        if sync_wal {
            self.wal.sync()?;
        }
        info!(root = %self.root.display(), "engine closed");
        Ok(())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown(false) {
            error!(error = %e, "engine shutdown on drop failed");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Background workers
// ------------------------------------------------------------------------------------------------

/// Drains flush signals until the engine shuts down.
fn flush_worker(shared: Weak<Shared>, flush_rx: Receiver<()>, shutdown_rx: Receiver<()>) {
    loop {
        select! {
            recv(flush_rx) -> msg => {
                if msg.is_err() {
                    break;
                }
                let Some(shared) = shared.upgrade() else { break };
                if let Err(e) = shared.flush_if_over_threshold() {
                    error!(error = %e, "background flush failed");
                }
            }
            recv(shutdown_rx) -> _ => break,
        }
    }
    debug!("flush worker stopped");
}

/// Ticks on the merge interval and compacts overloaded levels.
fn compaction_worker(shared: Weak<Shared>, shutdown_rx: Receiver<()>, interval: Duration) {
    if interval.is_zero() {
        info!("background compaction disabled (zero interval)");
        return;
    }

    let ticker = tick(interval);
    loop {
        select! {
            recv(ticker) -> _ => {
                let Some(shared) = shared.upgrade() else { break };
                if let Err(e) = shared.run_compaction_pass() {
                    error!(error = %e, "background compaction failed");
                }
            }
            recv(shutdown_rx) -> _ => break,
        }
    }
    debug!("compaction worker stopped");
}
