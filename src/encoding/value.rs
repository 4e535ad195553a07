//! Value codec — tags stored values with an operation kind.
//!
//! Every value persisted by the engine is prefixed with a one-byte
//! operation tag so that tombstones travel through exactly the same
//! key/value plumbing as live values:
//!
//! ```text
//! [op_kind: u8][payload bytes]
//! ```
//!
//! `op_kind` is `0` for a delete (tombstone, empty payload) and `1` for a
//! set. Lookups unwrap the prefix and report tombstones as "not found".

use super::EncodingError;

/// The operation a stored value represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// A tombstone masking all older records for its key.
    Delete,

    /// A live value.
    Set,
}

impl OpKind {
    /// Wire tag for this kind.
    #[inline]
    pub fn as_u8(self) -> u8 {
        match self {
            OpKind::Delete => 0,
            OpKind::Set => 1,
        }
    }

    /// Parses a wire tag.
    #[inline]
    pub fn from_u8(tag: u8) -> Result<Self, EncodingError> {
        match tag {
            0 => Ok(OpKind::Delete),
            1 => Ok(OpKind::Set),
            other => Err(EncodingError::InvalidTag(other)),
        }
    }
}

/// A decoded stored value, borrowing the payload from the encoded bytes.
#[derive(Debug, PartialEq, Eq)]
pub struct Decoded<'a> {
    /// Operation this value represents.
    pub kind: OpKind,

    /// Raw payload; empty for tombstones.
    pub payload: &'a [u8],
}

impl Decoded<'_> {
    /// Whether this value is a delete marker.
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.kind == OpKind::Delete
    }
}

/// Encodes `payload` under the given operation tag.
pub fn encode(kind: OpKind, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(kind.as_u8());
    buf.extend_from_slice(payload);
    buf
}

/// Decodes a stored value back into `(kind, payload)`.
///
/// Must stay compatible with [`encode`]: `decode(encode(k, p))` yields
/// `(k, p)` for every kind and payload, including the empty tombstone
/// payload.
pub fn decode(buf: &[u8]) -> Result<Decoded<'_>, EncodingError> {
    let (&tag, payload) = buf
        .split_first()
        .ok_or_else(|| EncodingError::Corrupt("empty encoded value".into()))?;

    Ok(Decoded {
        kind: OpKind::from_u8(tag)?,
        payload,
    })
}
