//! Level catalog — the in-memory view of the on-disk table layout.
//!
//! Each SSTable is represented by an [`SstDescriptor`] carrying its level,
//! file number, sequence number, key count, and an in-memory Bloom filter.
//! The catalog owns one ordered descriptor list per level:
//!
//! - **Level 0** — insertion order, oldest first; table key ranges may
//!   overlap, so readers must walk the list from the newest end.
//! - **Level k ≥ 1** — compaction outputs with pairwise-disjoint key
//!   ranges.
//!
//! Mutations happen only at flush-commit ([`LevelCatalog::push`]) and
//! compaction-commit ([`LevelCatalog::apply_compaction`]), both under the
//! engine's write lock.
//!
//! # Reconstruction on open
//!
//! [`LevelCatalog::load`] scans the `level-<k>/` directories, reads each
//! table's sequence number out of the sparse-index header, and rebuilds the
//! Bloom filter by streaming the dense index. A table whose files are
//! corrupt (for instance a triple torn by a crash mid-flush) is skipped
//! with a warning; the WAL still holds anything that never committed.

#[cfg(test)]
mod tests;

use std::path::Path;

use bloomfilter::Bloom;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::encoding::EncodingError;
use crate::sstable::{self, SstError, TableIterator};

/// False-positive budget for every table's Bloom filter.
pub const BLOOM_FP_RATE: f64 = 0.01;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned while building or loading catalog state.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    /// Error reading table files during reconstruction.
    #[error("SSTable error: {0}")]
    Sst(#[from] SstError),

    /// Internal invariant violation (filter sizing, etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Descriptors
// ------------------------------------------------------------------------------------------------

/// One SSTable as the engine sees it: identity plus its membership filter.
pub struct SstDescriptor {
    /// Level the table lives at.
    pub level: u16,

    /// File number within the level directory.
    pub number: u32,

    /// Sequence number; larger means newer data for the same key.
    pub seq: u64,

    /// Number of records in the table.
    pub keys: u64,

    /// Membership filter over the table's keys; conservative, so a negative
    /// answer is definitive.
    pub bloom: Bloom<Vec<u8>>,
}

/// Allocates an empty Bloom filter sized for `expected_keys` entries.
pub fn new_bloom(expected_keys: usize) -> Result<Bloom<Vec<u8>>, CatalogError> {
    Bloom::new_for_fp_rate(expected_keys.max(1), BLOOM_FP_RATE)
        .map_err(|e| CatalogError::Internal(e.to_string()))
}

/// Builds a Bloom filter over an already-collected key set.
pub fn build_bloom(keys: &[Vec<u8>]) -> Result<Bloom<Vec<u8>>, CatalogError> {
    let mut bloom = new_bloom(keys.len())?;
    for key in keys {
        bloom.set(key);
    }
    Ok(bloom)
}

// ------------------------------------------------------------------------------------------------
// LevelCatalog
// ------------------------------------------------------------------------------------------------

/// Ordered per-level descriptor lists mirroring the level directories.
pub struct LevelCatalog {
    levels: Vec<Vec<SstDescriptor>>,
}

impl LevelCatalog {
    /// An empty catalog with level 0 present.
    pub fn new() -> Self {
        Self {
            levels: vec![Vec::new()],
        }
    }

    /// Reconstructs the catalog by scanning the level directories.
    pub fn load(root: &Path) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();

        for level in sstable::list_levels(root)? {
            for number in sstable::list_tables(root, level)? {
                match load_descriptor(root, level, number) {
                    Ok(descriptor) => catalog.push(descriptor),
                    Err(e) if is_torn_table(&e) => {
                        warn!(level, number, error = %e, "skipping unreadable SSTable during catalog scan");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        info!(
            levels = catalog.levels.len(),
            tables = catalog.table_count(),
            "level catalog reconstructed"
        );
        Ok(catalog)
    }

    /// Appends a descriptor to its level, growing the level list as needed.
    pub fn push(&mut self, descriptor: SstDescriptor) {
        self.ensure_level(descriptor.level);
        self.levels[descriptor.level as usize].push(descriptor);
    }

    /// Number of levels the catalog currently tracks.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Descriptors at one level, oldest first.
    pub fn tables(&self, level: u16) -> &[SstDescriptor] {
        self.levels
            .get(level as usize)
            .map_or(&[][..], |tables| tables.as_slice())
    }

    /// Iterates levels in order; within a level, descriptors are oldest
    /// first (readers walk each slice from the back).
    pub fn iter_levels(&self) -> impl Iterator<Item = &[SstDescriptor]> {
        self.levels.iter().map(|tables| tables.as_slice())
    }

    /// Total number of tables across all levels.
    pub fn table_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Commits a compaction: drops the consumed `(level, number)` tables
    /// and adopts the outputs.
    ///
    /// Only the tables named in `consumed` are removed, so a flush that
    /// landed a new level-0 table while the merge ran is preserved.
    pub fn apply_compaction(&mut self, consumed: &[(u16, u32)], outputs: Vec<SstDescriptor>) {
        for tables in &mut self.levels {
            tables.retain(|d| !consumed.contains(&(d.level, d.number)));
        }
        for descriptor in outputs {
            self.push(descriptor);
        }
    }

    fn ensure_level(&mut self, level: u16) {
        while self.levels.len() <= level as usize {
            self.levels.push(Vec::new());
        }
    }
}

impl Default for LevelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a scan error describes a torn table (crash mid-flush) rather
/// than a real I/O failure: a corrupt frame, or a missing companion file.
fn is_torn_table(e: &CatalogError) -> bool {
    match e {
        CatalogError::Sst(SstError::Encoding(EncodingError::Corrupt(_))) => true,
        CatalogError::Sst(SstError::Io(io)) => io.kind() == std::io::ErrorKind::NotFound,
        _ => false,
    }
}

/// Rebuilds one descriptor from a table's files.
fn load_descriptor(root: &Path, level: u16, number: u32) -> Result<SstDescriptor, CatalogError> {
    let seq = sstable::table_sequence(root, level, number)?;

    let mut keys = Vec::new();
    for record in TableIterator::open_index(root, level, number)? {
        let (key, _) = record?;
        keys.push(key);
    }
    let bloom = build_bloom(&keys)?;

    debug!(level, number, seq, keys = keys.len(), "SSTable descriptor rebuilt");

    Ok(SstDescriptor {
        level,
        number,
        seq,
        keys: keys.len() as u64,
        bloom,
    })
}
