//! Sorted String Table (SST) — immutable three-file on-disk tables.
//!
//! Every table is three files sharing a base name `sst-NNNN` inside its
//! level directory `level-<k>/`:
//!
//! ```text
//! sst-NNNN.bin   data: framed (key, encoded_value), ascending key order
//! sst-NNNN.idx   dense index: one framed (key, u64 BE offset into .bin) per key
//! sst-NNNN.spr   sparse index: [seq: u64 BE] header, then every N-th key as
//!                a framed (key, u64 BE offset into .idx)
//! ```
//!
//! `N` is the sparse-key distance (engine default 128). All three files use
//! the [shared record frame](crate::encoding); all integers are big-endian.
//!
//! # Naming and identity
//!
//! The writer picks the next `sst-NNNN` base by scanning the level
//! directory. The pair `(level, seq)` identifying a table for read ordering
//! is recovered from the directory name and the `.spr` header, so the file
//! name itself stays a plain counter.
//!
//! # Immutability
//!
//! Once [`writer::SstWriter::close`] returns, the triple is never modified;
//! compaction writes replacement tables and only then removes obsolete ones
//! via [`remove_table`].
//!
//! # Sub-modules
//!
//! - [`writer`] — single-pass construction of the triple.
//! - [`reader`] — point lookup: sparse bracket → dense scan → data seek.
//! - [`iterator`] — streaming framed-record iterator over one file.

pub mod iterator;
pub mod reader;
pub mod writer;


pub use iterator::TableIterator;
pub use reader::search_table;
pub use writer::{SstWriter, TableMeta};

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::encoding::{self, EncodingError};

/// Extension of the data file.
pub const EXT_DATA: &str = "bin";

/// Extension of the dense index file.
pub const EXT_INDEX: &str = "idx";

/// Extension of the sparse index file.
pub const EXT_SPARSE: &str = "spr";

/// Base-name prefix shared by the triple.
pub const TABLE_PREFIX: &str = "sst-";

/// Directory-name prefix of a level.
pub const LEVEL_PREFIX: &str = "level-";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SstError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Framing or corruption error in one of the three files.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A writer was closed before any record was added.
    #[error("cannot close an SSTable with no records")]
    EmptyTable,

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Paths and directory layout
// ------------------------------------------------------------------------------------------------

/// Directory holding level `k` tables: `<root>/level-<k>`.
pub fn level_dir(root: &Path, level: u16) -> PathBuf {
    root.join(format!("{LEVEL_PREFIX}{level}"))
}

/// Path of one file of a table triple.
pub fn table_path(root: &Path, level: u16, number: u32, ext: &str) -> PathBuf {
    level_dir(root, level).join(format!("{TABLE_PREFIX}{number:04}.{ext}"))
}

/// Parses `k` out of a `level-<k>` directory name.
fn parse_level_name(name: &str) -> Option<u16> {
    name.strip_prefix(LEVEL_PREFIX)?.parse().ok()
}

/// Parses `NNNN` out of an `sst-NNNN.bin` file name.
fn parse_table_name(name: &str) -> Option<u32> {
    name.strip_prefix(TABLE_PREFIX)?
        .strip_suffix(&format!(".{EXT_DATA}"))?
        .parse()
        .ok()
}

/// Lists the level indices present under `root`, ascending.
pub fn list_levels(root: &Path) -> Result<Vec<u16>, SstError> {
    let mut levels = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(level) = entry.file_name().to_str().and_then(parse_level_name) {
            levels.push(level);
        }
    }
    levels.sort_unstable();
    Ok(levels)
}

/// Lists the table numbers at a level, ascending.
///
/// A level directory that does not exist yet reads as empty.
pub fn list_tables(root: &Path, level: u16) -> Result<Vec<u32>, SstError> {
    let dir = level_dir(root, level);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut numbers = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(number) = entry.file_name().to_str().and_then(parse_table_name) {
            numbers.push(number);
        }
    }
    numbers.sort_unstable();
    Ok(numbers)
}

/// Next free table number at a level.
pub fn next_table_number(root: &Path, level: u16) -> Result<u32, SstError> {
    let numbers = list_tables(root, level)?;
    Ok(numbers.last().map_or(0, |last| last + 1))
}

/// Removes all three files of a table.
pub fn remove_table(root: &Path, level: u16, number: u32) -> Result<(), SstError> {
    for ext in [EXT_DATA, EXT_INDEX, EXT_SPARSE] {
        let path = table_path(root, level, number, ext);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    debug!(level, number, "SSTable removed");
    Ok(())
}

/// Reads the sequence number out of a table's sparse-index header.
pub fn table_sequence(root: &Path, level: u16, number: u32) -> Result<u64, SstError> {
    let path = table_path(root, level, number, EXT_SPARSE);
    let mut reader = BufReader::new(File::open(path)?);
    Ok(encoding::read_u64(&mut reader)?)
}
