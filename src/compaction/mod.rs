//! Compaction — k-way merge of adjacent levels.
//!
//! A compaction of level `k` streams the data files of every table at
//! levels `k` and `k+1` through a min-heap keyed `(key ASC, source)` and
//! writes the merged stream to fresh tables at level `k+1`:
//!
//! - **Freshest wins** — when the same key surfaces from several sources,
//!   only the candidate with the largest sequence number is emitted.
//! - **Tombstones** — carried through verbatim, except when the output
//!   level is the terminal level, where they are dropped permanently
//!   (nothing below can resurrect the key).
//! - **Rollover** — when the running payload of the current output exceeds
//!   the per-level byte budget, the writer is sealed and a fresh one is
//!   opened, so one compaction may produce several outputs.
//!
//! Outputs carry `seq = max(input seqs)` and a Bloom filter built while
//! writing. On a mid-merge failure every output written so far is deleted
//! and the inputs stay untouched; the caller commits the swap (catalog
//! rewrite plus input removal) under the engine lock only after this
//! module returns successfully.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;

use bloomfilter::Bloom;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::{self, CatalogError, SstDescriptor};
use crate::encoding::{EncodingError, value};
use crate::sstable::{self, SstError, SstWriter, TableIterator};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by compaction.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CompactionError {
    /// Error reading an input or writing an output table.
    #[error("SSTable error: {0}")]
    Sst(#[from] SstError),

    /// Error building a descriptor for an output table.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Corrupt record in an input stream.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested level does not exist in the catalog.
    #[error("cannot compact level {0}: no such level")]
    UnknownLevel(u16),

    /// The requested level is at or beyond the terminal level.
    #[error("cannot compact level {0}: at or beyond the maximum level")]
    BeyondMaxLevel(u16),
}

// ------------------------------------------------------------------------------------------------
// Inputs
// ------------------------------------------------------------------------------------------------

/// Identity of one input table, snapshotted from the catalog.
#[derive(Debug, Clone, Copy)]
pub struct SourceTable {
    /// Level the table lives at (`k` or `k+1`).
    pub level: u16,

    /// File number within its level directory.
    pub number: u32,

    /// Sequence number; carried on every heap entry for dedup.
    pub seq: u64,

    /// Record count, used to size the output Bloom filters.
    pub keys: u64,
}

// ------------------------------------------------------------------------------------------------
// Heap entry — (key ASC, source) min-ordering
// ------------------------------------------------------------------------------------------------

struct HeapEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    seq: u64,
    source: usize,
}

impl Ord for HeapEntry {
    /// Min-heap: smallest key pops first; ties break by source identity.
    fn cmp(&self, other: &Self) -> Ordering {
        match self.key.cmp(&other.key) {
            Ordering::Equal => self.source.cmp(&other.source),
            ord => ord,
        }
        .reverse()
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

// ------------------------------------------------------------------------------------------------
// Output builder — rollover, bloom, cleanup
// ------------------------------------------------------------------------------------------------

/// Accumulates merged records into level-`k+1` tables, rolling to a fresh
/// writer whenever the current one exceeds the byte budget.
struct OutputBuilder<'a> {
    root: &'a Path,
    level: u16,
    seq: u64,
    sparse_distance: u32,
    max_table_bytes: u64,
    expected_keys: usize,

    current: Option<(SstWriter, Bloom<Vec<u8>>)>,
    finished: Vec<SstDescriptor>,
    created: Vec<u32>,
}

impl<'a> OutputBuilder<'a> {
    fn new(
        root: &'a Path,
        level: u16,
        seq: u64,
        sparse_distance: u32,
        max_table_bytes: u64,
        expected_keys: usize,
    ) -> Self {
        Self {
            root,
            level,
            seq,
            sparse_distance,
            max_table_bytes,
            expected_keys,
            current: None,
            finished: Vec::new(),
            created: Vec::new(),
        }
    }

    /// Writes one record, rolling to a new table when the budget is spent.
    fn emit(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), CompactionError> {
        let over_budget = self
            .current
            .as_ref()
            .is_some_and(|(writer, _)| writer.written_bytes() > self.max_table_bytes);
        if over_budget {
            self.seal_current()?;
        }

        if self.current.is_none() {
            let writer = SstWriter::create(self.root, self.level, self.seq, self.sparse_distance)?;
            self.created.push(writer.number());
            let bloom = catalog::new_bloom(self.expected_keys)?;
            self.current = Some((writer, bloom));
        }

        if let Some((writer, bloom)) = self.current.as_mut() {
            bloom.set(&key);
            writer.add(&key, &value)?;
        }
        Ok(())
    }

    /// Seals the in-progress writer into a finished descriptor.
    fn seal_current(&mut self) -> Result<(), CompactionError> {
        if let Some((writer, bloom)) = self.current.take() {
            let meta = writer.close()?;
            self.finished.push(SstDescriptor {
                level: meta.level,
                number: meta.number,
                seq: meta.seq,
                keys: meta.keys,
                bloom,
            });
        }
        Ok(())
    }

    /// Deletes every table this builder created, finished or not.
    fn abort(mut self) {
        // Drop the open writer first so its buffers release the files.
        self.current = None;
        for number in &self.created {
            if let Err(e) = sstable::remove_table(self.root, self.level, *number) {
                warn!(level = self.level, number, error = %e, "failed to remove partial compaction output");
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Merge
// ------------------------------------------------------------------------------------------------

/// Merges the given input tables into fresh tables at `level + 1`.
///
/// Returns descriptors for the outputs, ready for the catalog. The caller
/// removes input files and rewrites the catalog only after this returns.
pub fn compact(
    root: &Path,
    level: u16,
    inputs: &[SourceTable],
    max_table_bytes: u64,
    sparse_distance: u32,
    drop_tombstones: bool,
) -> Result<Vec<SstDescriptor>, CompactionError> {
    if inputs.is_empty() {
        return Ok(Vec::new());
    }

    let output_level = level + 1;
    let output_seq = inputs.iter().map(|t| t.seq).max().unwrap_or(0);
    let expected_keys = inputs.iter().map(|t| t.keys).sum::<u64>() as usize;

    info!(
        level,
        output_level,
        inputs = inputs.len(),
        expected_keys,
        drop_tombstones,
        "compaction started"
    );

    let mut builder = OutputBuilder::new(
        root,
        output_level,
        output_seq,
        sparse_distance,
        max_table_bytes,
        expected_keys,
    );

    match merge_inputs(root, inputs, drop_tombstones, &mut builder) {
        Ok(()) => {
            let outputs = std::mem::take(&mut builder.finished);
            info!(
                level,
                output_level,
                outputs = outputs.len(),
                "compaction merge complete"
            );
            Ok(outputs)
        }
        Err(e) => {
            warn!(level, error = %e, "compaction failed, discarding partial outputs");
            builder.abort();
            Err(e)
        }
    }
}

/// The heap-merge loop: pops candidates, dedups by sequence, emits.
fn merge_inputs(
    root: &Path,
    inputs: &[SourceTable],
    drop_tombstones: bool,
    builder: &mut OutputBuilder<'_>,
) -> Result<(), CompactionError> {
    let mut iters = Vec::with_capacity(inputs.len());
    for table in inputs {
        iters.push(TableIterator::open_data(root, table.level, table.number)?);
    }

    let mut heap = BinaryHeap::new();
    for source in 0..iters.len() {
        push_next(&mut heap, &mut iters, inputs, source)?;
    }

    let mut cur = match heap.pop() {
        Some(entry) => entry,
        None => return Ok(()),
    };
    push_next(&mut heap, &mut iters, inputs, cur.source)?;

    while let Some(next) = heap.pop() {
        push_next(&mut heap, &mut iters, inputs, next.source)?;

        if next.key == cur.key {
            // Same key from an older table: keep the freshest candidate.
            if next.seq > cur.seq {
                cur = next;
            }
            continue;
        }

        emit_candidate(builder, cur, drop_tombstones)?;
        cur = next;
    }
    emit_candidate(builder, cur, drop_tombstones)?;

    builder.seal_current()
}

/// Advances one source iterator and pushes its head onto the heap.
fn push_next(
    heap: &mut BinaryHeap<HeapEntry>,
    iters: &mut [TableIterator],
    inputs: &[SourceTable],
    source: usize,
) -> Result<(), CompactionError> {
    if let Some(record) = iters[source].next() {
        let (key, value) = record?;
        heap.push(HeapEntry {
            key,
            value,
            seq: inputs[source].seq,
            source,
        });
    }
    Ok(())
}

/// Writes the winning candidate for a key, honoring the tombstone policy.
fn emit_candidate(
    builder: &mut OutputBuilder<'_>,
    entry: HeapEntry,
    drop_tombstones: bool,
) -> Result<(), CompactionError> {
    if drop_tombstones && value::decode(&entry.value)?.is_tombstone() {
        debug!(seq = entry.seq, "tombstone dropped at terminal level");
        return Ok(());
    }
    builder.emit(entry.key, entry.value)
}
