//! Binary codecs for bucket keys and values.
//!
//! A codec writes a value into a byte slice and reads it back. The encoded
//! size of a stored value must be derivable from the bytes alone so that a
//! bucket can walk its entries without external metadata. Decoding checks
//! the stored bytes and reports damage instead of guessing.

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Result type for decoding.
pub type CodecResult<T> = Result<T, CodecError>;

/// Stored bytes that do not decode to a value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes than the encoding needs.
    #[error("encoded value needs {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the encoding needs.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },

    /// A stored string is not valid UTF-8.
    #[error("stored string is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

fn need(buf: &[u8], needed: usize) -> CodecResult<()> {
    if buf.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

/// Splits a u16 length prefix and its payload off the front of `buf`.
fn length_prefixed(mut buf: &[u8]) -> CodecResult<&[u8]> {
    need(buf, 2)?;
    let len = buf.get_u16_le() as usize;
    need(buf, len)?;
    Ok(&buf[..len])
}

/// Encoding of a key or value stored in a bucket.
pub trait Codec: Sized {
    /// Identifier written into the bucket header.
    const SERIALIZER_ID: u8;

    /// Encoded size if every value has the same size.
    const FIXED_SIZE: Option<usize>;

    /// Returns the number of bytes `encode_into` writes.
    fn encoded_size(&self) -> usize;

    /// Encodes the value into the front of `buf`.
    ///
    /// `buf` must hold at least `encoded_size()` bytes.
    fn encode_into(&self, buf: &mut [u8]);

    /// Decodes a value from the front of `buf`.
    fn decode(buf: &[u8]) -> CodecResult<Self>;

    /// Returns the size of the encoded value at the front of `buf`.
    fn encoded_size_in(buf: &[u8]) -> usize;

    /// Encodes the value into a fresh buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_size()];
        self.encode_into(&mut buf);
        buf
    }
}

impl Codec for i64 {
    const SERIALIZER_ID: u8 = 1;
    const FIXED_SIZE: Option<usize> = Some(8);

    fn encoded_size(&self) -> usize {
        8
    }

    fn encode_into(&self, mut buf: &mut [u8]) {
        buf.put_i64_le(*self);
    }

    fn decode(mut buf: &[u8]) -> CodecResult<Self> {
        need(buf, 8)?;
        Ok(buf.get_i64_le())
    }

    fn encoded_size_in(_buf: &[u8]) -> usize {
        8
    }
}

impl Codec for u64 {
    const SERIALIZER_ID: u8 = 2;
    const FIXED_SIZE: Option<usize> = Some(8);

    fn encoded_size(&self) -> usize {
        8
    }

    fn encode_into(&self, mut buf: &mut [u8]) {
        buf.put_u64_le(*self);
    }

    fn decode(mut buf: &[u8]) -> CodecResult<Self> {
        need(buf, 8)?;
        Ok(buf.get_u64_le())
    }

    fn encoded_size_in(_buf: &[u8]) -> usize {
        8
    }
}

/// Byte strings are prefixed with a u16 length.
impl Codec for Vec<u8> {
    const SERIALIZER_ID: u8 = 3;
    const FIXED_SIZE: Option<usize> = None;

    fn encoded_size(&self) -> usize {
        2 + self.len()
    }

    fn encode_into(&self, mut buf: &mut [u8]) {
        debug_assert!(self.len() <= u16::MAX as usize);
        buf.put_u16_le(self.len() as u16);
        buf.put_slice(self);
    }

    fn decode(buf: &[u8]) -> CodecResult<Self> {
        length_prefixed(buf).map(<[u8]>::to_vec)
    }

    fn encoded_size_in(mut buf: &[u8]) -> usize {
        2 + buf.get_u16_le() as usize
    }
}

impl Codec for String {
    const SERIALIZER_ID: u8 = 4;
    const FIXED_SIZE: Option<usize> = None;

    fn encoded_size(&self) -> usize {
        2 + self.len()
    }

    fn encode_into(&self, mut buf: &mut [u8]) {
        debug_assert!(self.len() <= u16::MAX as usize);
        buf.put_u16_le(self.len() as u16);
        buf.put_slice(self.as_bytes());
    }

    fn decode(buf: &[u8]) -> CodecResult<Self> {
        let bytes = length_prefixed(buf)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    fn encoded_size_in(mut buf: &[u8]) -> usize {
        2 + buf.get_u16_le() as usize
    }
}

/// Physical address of a record: cluster id and position inside the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId {
    /// Cluster the record belongs to.
    pub cluster_id: u16,
    /// Position of the record inside its cluster.
    pub position: i64,
}

impl RecordId {
    /// Creates a new record id.
    pub const fn new(cluster_id: u16, position: i64) -> Self {
        Self {
            cluster_id,
            position,
        }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}:{}", self.cluster_id, self.position)
    }
}

impl Codec for RecordId {
    const SERIALIZER_ID: u8 = 5;
    const FIXED_SIZE: Option<usize> = Some(10);

    fn encoded_size(&self) -> usize {
        10
    }

    fn encode_into(&self, mut buf: &mut [u8]) {
        buf.put_u16_le(self.cluster_id);
        buf.put_i64_le(self.position);
    }

    fn decode(mut buf: &[u8]) -> CodecResult<Self> {
        need(buf, 10)?;
        let cluster_id = buf.get_u16_le();
        let position = buf.get_i64_le();
        Ok(Self {
            cluster_id,
            position,
        })
    }

    fn encoded_size_in(_buf: &[u8]) -> usize {
        10
    }
}
