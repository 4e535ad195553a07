//! SSTable point lookup — sparse bracket, dense scan, data seek.
//!
//! A lookup resolves in three hops, each against one file of the triple:
//!
//! 1. **Sparse index** — scanned linearly from its header to find the
//!    tightest bracket `[from, to]` of dense-index offsets whose keys
//!    surround the search key. A first sparse key already greater than the
//!    search key is a definite miss; an exact sparse hit collapses the
//!    bracket to a single offset.
//! 2. **Dense index** — scanned forward from `from` until the key matches
//!    (yielding the data-file offset), the cursor passes `to`, or the file
//!    ends.
//! 3. **Data file** — positioned at that offset and scanned forward until
//!    the key matches, yielding the stored (encoded) value.
//!
//! Files are opened per lookup and closed when the lookup returns on any
//! path; there is no shared reader cache. The table's Bloom filter lives in
//! the catalog and is consulted by the engine before this module is ever
//! reached.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::trace;

use super::{EXT_DATA, EXT_INDEX, EXT_SPARSE, SstError, table_path};
use crate::encoding;

/// A bracket of dense-index offsets produced by the sparse scan.
///
/// `to == None` means the search key lies beyond the last sparse entry and
/// the dense scan runs to end-of-file.
struct Bracket {
    from: u64,
    to: Option<u64>,
}

/// Looks up `key` in one table, returning its stored (encoded) value.
pub fn search_table(
    root: &Path,
    level: u16,
    number: u32,
    key: &[u8],
) -> Result<Option<Vec<u8>>, SstError> {
    let sparse_file = File::open(table_path(root, level, number, EXT_SPARSE))?;
    let bracket = match search_sparse(&mut BufReader::new(sparse_file), key)? {
        Some(bracket) => bracket,
        None => return Ok(None),
    };

    let index_file = File::open(table_path(root, level, number, EXT_INDEX))?;
    let offset = match search_dense(&mut BufReader::new(index_file), &bracket, key)? {
        Some(offset) => offset,
        None => return Ok(None),
    };

    let data_file = File::open(table_path(root, level, number, EXT_DATA))?;
    let value = search_data(&mut BufReader::new(data_file), offset, key)?;

    trace!(level, number, found = value.is_some(), "SSTable lookup");
    Ok(value)
}

/// Walks the sparse index to bracket the search key.
fn search_sparse<R: Read>(r: &mut R, key: &[u8]) -> Result<Option<Bracket>, SstError> {
    // 8-byte sequence header precedes the entries.
    let _seq = encoding::read_u64(r)?;

    let mut from: Option<u64> = None;
    loop {
        let (sparse_key, payload) = match encoding::read_record(r)? {
            Some(record) => record,
            // Ran off the end: the key sits past the last sparse entry.
            None => return Ok(from.map(|f| Bracket { from: f, to: None })),
        };
        let offset = encoding::decode_u64(&payload)?;

        match sparse_key.as_slice().cmp(key) {
            Ordering::Equal => {
                return Ok(Some(Bracket {
                    from: offset,
                    to: Some(offset),
                }));
            }
            Ordering::Less => from = Some(offset),
            Ordering::Greater => {
                return match from {
                    // First sparse key already greater: definite miss.
                    None => Ok(None),
                    Some(f) => Ok(Some(Bracket {
                        from: f,
                        to: Some(offset),
                    })),
                };
            }
        }
    }
}

/// Scans the dense index inside the bracket for the exact key.
fn search_dense<R: Read + Seek>(
    r: &mut R,
    bracket: &Bracket,
    key: &[u8],
) -> Result<Option<u64>, SstError> {
    r.seek(SeekFrom::Start(bracket.from))?;
    let mut pos = bracket.from;

    loop {
        if let Some(to) = bracket.to {
            if pos > to {
                return Ok(None);
            }
        }

        let (index_key, payload) = match encoding::read_record(r)? {
            Some(record) => record,
            None => return Ok(None),
        };

        if index_key == key {
            return Ok(Some(encoding::decode_u64(&payload)?));
        }
        pos += encoding::frame_size(index_key.len(), payload.len());
    }
}

/// Scans the data file from `offset` for the record carrying the key.
///
/// The offset always points at the beginning of a record.
fn search_data<R: Read + Seek>(
    r: &mut R,
    offset: u64,
    key: &[u8],
) -> Result<Option<Vec<u8>>, SstError> {
    r.seek(SeekFrom::Start(offset))?;

    loop {
        let (data_key, value) = match encoding::read_record(r)? {
            Some(record) => record,
            None => return Ok(None),
        };
        if data_key == key {
            return Ok(Some(value));
        }
    }
}
