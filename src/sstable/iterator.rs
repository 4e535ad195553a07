//! Streaming record iterator over a single SSTable file.
//!
//! Reads framed records front to back through a buffered reader, yielding
//! one `(key, value)` pair per step. Compaction drives it over data files;
//! catalog reconstruction drives it over dense-index files to recover key
//! sets. The iterator fuses after the first error or end-of-file.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::{EXT_DATA, EXT_INDEX, SstError, table_path};
use crate::encoding;

/// Forward iterator over the framed records of one table file.
pub struct TableIterator {
    reader: BufReader<File>,
    done: bool,
}

impl TableIterator {
    /// Opens the data file of a table for streaming.
    pub fn open_data(root: &Path, level: u16, number: u32) -> Result<Self, SstError> {
        Self::open(&table_path(root, level, number, EXT_DATA))
    }

    /// Opens the dense-index file of a table for streaming.
    pub fn open_index(root: &Path, level: u16, number: u32) -> Result<Self, SstError> {
        Self::open(&table_path(root, level, number, EXT_INDEX))
    }

    fn open(path: &Path) -> Result<Self, SstError> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            done: false,
        })
    }
}

impl Iterator for TableIterator {
    type Item = Result<(Vec<u8>, Vec<u8>), SstError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match encoding::read_record(&mut self.reader) {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}
