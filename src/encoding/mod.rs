//! Binary record framing shared by every on-disk file.
//!
//! The WAL, the SSTable data file, the dense index, and the sparse index all
//! store the same length-prefixed frame, so one codec serves the whole
//! engine. Because the crate owns this format, the on-disk representation
//! never changes due to a dependency upgrade.
//!
//! # Wire format
//!
//! ```text
//! [total_len: u64 BE][key_len: u64 BE][key bytes][value bytes]
//! ```
//!
//! - `total_len` counts everything after itself: `8 + len(key) + len(value)`.
//! - An empty value is legal and is recognised by `total_len == 8 + key_len`
//!   (index files store an 8-byte offset as the value; the WAL and data
//!   files store [`value`]-encoded payloads).
//! - All integers are **big-endian** fixed width.
//!
//! # Corruption handling
//!
//! A record that ends early, or whose length fields are inconsistent,
//! surfaces as [`EncodingError::Corrupt`]. A frame length above
//! [`MAX_FRAME_LEN`] is rejected before any allocation happens, so a
//! corrupted length prefix cannot trigger an allocation bomb.
//!
//! [`value`]: crate::encoding::value

pub mod value;


use std::io::{self, Read, Write};

use thiserror::Error;

/// Size of one big-endian length field.
pub const LEN_SIZE: usize = std::mem::size_of::<u64>();

/// Upper bound on `total_len` accepted while decoding.
///
/// Keys and values are each capped at 64 KiB by the engine, so any frame
/// claiming more than this is corrupt, not merely large.
pub const MAX_FRAME_LEN: u64 = 256 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors produced while framing or unframing records.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EncodingError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A short read or inconsistent length fields.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// An encoded value carried an unknown operation tag.
    #[error("invalid value tag: 0x{0:02X}")]
    InvalidTag(u8),
}

// ------------------------------------------------------------------------------------------------
// Integer helpers
// ------------------------------------------------------------------------------------------------

/// Writes a `u64` as 8 big-endian bytes.
#[inline]
pub fn write_u64<W: Write>(w: &mut W, x: u64) -> Result<(), EncodingError> {
    w.write_all(&x.to_be_bytes())?;
    Ok(())
}

/// Reads a `u64` from 8 big-endian bytes.
#[inline]
pub fn read_u64<R: Read>(r: &mut R) -> Result<u64, EncodingError> {
    let mut buf = [0u8; LEN_SIZE];
    r.read_exact(&mut buf)
        .map_err(|e| short_read(e, "u64 field"))?;
    Ok(u64::from_be_bytes(buf))
}

/// Decodes a `u64` from an 8-byte big-endian slice.
///
/// Index records carry their offset as the frame value; this turns that
/// value back into a number.
#[inline]
pub fn decode_u64(buf: &[u8]) -> Result<u64, EncodingError> {
    let bytes: [u8; LEN_SIZE] = buf
        .try_into()
        .map_err(|_| EncodingError::Corrupt(format!("offset payload is {} bytes, want 8", buf.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

// ------------------------------------------------------------------------------------------------
// Record framing
// ------------------------------------------------------------------------------------------------

/// On-disk size of one framed record.
#[inline]
pub fn frame_size(key_len: usize, value_len: usize) -> u64 {
    (2 * LEN_SIZE + key_len + value_len) as u64
}

/// Frames `(key, value)` and writes it to `w`.
///
/// Returns the number of bytes written. Must stay compatible with
/// [`read_record`]: decoding what this writes yields `(key, value)` back.
pub fn write_record<W: Write>(w: &mut W, key: &[u8], value: &[u8]) -> Result<u64, EncodingError> {
    let total_len = (LEN_SIZE + key.len() + value.len()) as u64;

    write_u64(w, total_len)?;
    write_u64(w, key.len() as u64)?;
    w.write_all(key)?;
    w.write_all(value)?;

    Ok(frame_size(key.len(), value.len()))
}

/// Reads one framed record from `r`.
///
/// Returns `Ok(None)` on a clean end-of-file (no bytes available where the
/// next frame would start). Anything between — a truncated frame, a length
/// prefix that cannot hold its own key, an implausibly large frame — is
/// [`EncodingError::Corrupt`].
pub fn read_record<R: Read>(r: &mut R) -> Result<Option<(Vec<u8>, Vec<u8>)>, EncodingError> {
    let mut len_buf = [0u8; LEN_SIZE];
    if !fill_or_eof(r, &mut len_buf)? {
        return Ok(None);
    }

    let total_len = u64::from_be_bytes(len_buf);
    if total_len < LEN_SIZE as u64 || total_len > MAX_FRAME_LEN {
        return Err(EncodingError::Corrupt(format!(
            "frame length {total_len} out of range"
        )));
    }

    let mut body = vec![0u8; total_len as usize];
    r.read_exact(&mut body)
        .map_err(|e| short_read(e, "record body"))?;

    let key_len_bytes: [u8; LEN_SIZE] = match body[..LEN_SIZE].try_into() {
        Ok(bytes) => bytes,
        Err(_) => return Err(EncodingError::Corrupt("frame body shorter than its key length field".into())),
    };
    let key_len = u64::from_be_bytes(key_len_bytes) as usize;
    // body.len() >= LEN_SIZE was established by the range check above.
    if key_len > body.len() - LEN_SIZE {
        return Err(EncodingError::Corrupt(format!(
            "key length {key_len} exceeds frame body {}",
            body.len()
        )));
    }

    let value = body.split_off(LEN_SIZE + key_len);
    let key = body.split_off(LEN_SIZE);

    Ok(Some((key, value)))
}

// ------------------------------------------------------------------------------------------------
// Internal helpers
// ------------------------------------------------------------------------------------------------

/// Fills `buf` completely, or returns `false` when the stream ends before
/// the first byte. A stream that ends partway through is a short read.
fn fill_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool, EncodingError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(EncodingError::Corrupt(format!(
                "truncated length prefix ({filled} of {} bytes)",
                buf.len()
            )));
        }
        filled += n;
    }
    Ok(true)
}

/// Maps an `UnexpectedEof` onto a corruption error; other I/O errors pass
/// through untouched.
fn short_read(e: io::Error, what: &str) -> EncodingError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        EncodingError::Corrupt(format!("truncated {what}"))
    } else {
        EncodingError::Io(e)
    }
}
