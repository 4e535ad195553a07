//! Write-ahead log — the durability journal consulted on recovery.
//!
//! Two files live in a `wal/` subdirectory of the engine root:
//!
//! - `wal.db` — append-only framed `(key, value)` records, written through
//!   the [shared record codec](crate::encoding).
//! - `wal.index.db` — a single 8-byte little-endian `u64` at offset 0
//!   holding the current flush sequence number.
//!
//! # Lifecycle
//!
//! Every mutation is appended here before the memtable makes it visible to
//! readers. After a successful flush the engine bumps the sequence number
//! ([`Wal::up_sequence`]) and truncates the log ([`Wal::clear`]); on open,
//! [`Wal::load_mem`] replays the log in order so the rebuilt memtable equals
//! the pre-crash one exactly.
//!
//! # Concurrency model
//!
//! All file state sits behind one mutex, so appends serialize independently
//! of the engine lock. The engine always takes its own lock *before*
//! touching the WAL, which keeps the lock order total.
//!
//! # Durability
//!
//! `fsync` per append is optional (off by default, as in the engine
//! defaults); the sequence file is always synced when rewritten. Replay
//! treats the first corrupt record as end-of-file: a torn tail write cannot
//! block recovery of everything before it.

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::encoding::{self, EncodingError};
use crate::memtable::Memtable;

/// Subdirectory of the engine root holding both WAL files.
pub const WAL_DIR: &str = "wal";

/// Log file name.
pub const WAL_FILE: &str = "wal.db";

/// Sequence-number side file name.
pub const WAL_INDEX_FILE: &str = "wal.index.db";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Framing error while appending or replaying.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// WAL Core
// ------------------------------------------------------------------------------------------------

struct WalInner {
    /// The append-only log.
    log: File,

    /// The 8-byte sequence side file.
    index: File,

    /// Current sequence number, mirrored from the index file.
    seq: u64,
}

/// Append-only write-ahead log with a sequence-number side file.
pub struct Wal {
    inner: Mutex<WalInner>,

    /// The `wal/` directory this log lives in.
    dir: PathBuf,

    /// Whether each append is followed by an fsync.
    fsync: bool,
}

impl Wal {
    /// Opens (or creates) the WAL under `root/wal/`.
    ///
    /// An existing log is left untouched; the sequence number is read back
    /// from the index file (a fresh or empty index reads as zero).
    pub fn open(root: impl AsRef<Path>, fsync: bool) -> Result<Self, WalError> {
        let dir = root.as_ref().join(WAL_DIR);
        std::fs::create_dir_all(&dir)?;

        let log = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.join(WAL_FILE))?;
        let mut index = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.join(WAL_INDEX_FILE))?;

        let seq = read_sequence(&mut index)?;

        info!(dir = %dir.display(), seq, fsync, "WAL opened");

        Ok(Self {
            inner: Mutex::new(WalInner { log, index, seq }),
            dir,
            fsync,
        })
    }

    /// Appends one framed `(key, value)` record.
    ///
    /// The file is positioned at its end before writing, and synced
    /// afterwards when the fsync policy asks for it.
    pub fn append(&self, key: &[u8], value: &[u8]) -> Result<(), WalError> {
        let mut inner = self.lock()?;

        inner.log.seek(SeekFrom::End(0))?;
        let written = encoding::write_record(&mut inner.log, key, value)?;

        if self.fsync {
            inner.log.sync_all()?;
        }

        trace!(bytes = written, "WAL record appended");
        Ok(())
    }

    /// Truncates the log by closing and re-opening it empty.
    ///
    /// The sequence file is untouched; call [`Wal::up_sequence`] first when
    /// committing a flush.
    pub fn clear(&self) -> Result<(), WalError> {
        let mut inner = self.lock()?;

        let path = self.dir.join(WAL_FILE);
        let fresh = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        inner.log = fresh;

        info!(path = %path.display(), "WAL cleared");
        Ok(())
    }

    /// Increments the sequence number and rewrites the index file.
    ///
    /// Returns the new sequence number.
    pub fn up_sequence(&self) -> Result<u64, WalError> {
        let mut inner = self.lock()?;

        let next = inner
            .seq
            .checked_add(1)
            .ok_or_else(|| WalError::Internal("sequence number overflow".into()))?;
        inner.seq = next;

        inner.index.seek(SeekFrom::Start(0))?;
        inner.index.write_all(&next.to_le_bytes())?;
        inner.index.sync_all()?;

        debug!(seq = next, "WAL sequence advanced");
        Ok(next)
    }

    /// Returns the current sequence number.
    pub fn sequence(&self) -> Result<u64, WalError> {
        Ok(self.lock()?.seq)
    }

    /// Replays the log into a fresh memtable.
    ///
    /// Records are applied in their original append order, so the result is
    /// byte-for-byte the memtable that existed when the log was written.
    /// The first corrupt record ends the replay; everything before it is
    /// kept.
    pub fn load_mem(&self) -> Result<Memtable, WalError> {
        let mut inner = self.lock()?;

        inner.log.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&inner.log);

        let mut mem = Memtable::new();
        let mut replayed = 0usize;
        loop {
            match encoding::read_record(&mut reader) {
                Ok(Some((key, value))) => {
                    mem.put(key, value);
                    replayed += 1;
                }
                Ok(None) => break,
                Err(EncodingError::Corrupt(reason)) => {
                    warn!(replayed, %reason, "WAL replay stopped at corrupt record");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        debug!(replayed, entries = mem.len(), "WAL replayed into memtable");
        Ok(mem)
    }

    /// Path of the log file, for diagnostics.
    pub fn path(&self) -> PathBuf {
        self.dir.join(WAL_FILE)
    }

    /// Syncs both files to disk.
    pub fn sync(&self) -> Result<(), WalError> {
        let inner = self.lock()?;
        inner.log.sync_all()?;
        inner.index.sync_all()?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, WalInner>, WalError> {
        self.inner
            .lock()
            .map_err(|_| WalError::Internal("WAL mutex poisoned".into()))
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = guard.log.sync_all() {
            error!(dir = %self.dir.display(), error = %e, "WAL sync failed on drop");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Sequence file I/O
// ------------------------------------------------------------------------------------------------

/// Reads the little-endian sequence number at offset 0.
///
/// A file too short to hold one (fresh index) reads as zero.
fn read_sequence(index: &mut File) -> Result<u64, WalError> {
    index.seek(SeekFrom::Start(0))?;

    let mut buf = [0u8; 8];
    let mut filled = 0;
    while filled < buf.len() {
        let n = index.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(0);
        }
        filled += n;
    }
    Ok(u64::from_le_bytes(buf))
}
