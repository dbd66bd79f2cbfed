//! Opaque metadata attached to an atomic-unit-end record.

use std::collections::BTreeMap;
use std::fmt;

use bytes::{Buf, BufMut, Bytes};

use crate::error::{WalError, WalResult};

/// A metadata value carried by the end record of an atomic operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    /// Unsigned integer.
    U64(u64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Bytes),
}

impl MetadataValue {
    const TAG_U64: u8 = 1;
    const TAG_TEXT: u8 = 2;
    const TAG_BYTES: u8 = 3;

    /// Returns the integer value, if this is one.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text value, if this is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    fn encoded_len(&self) -> usize {
        1 + match self {
            Self::U64(_) => 8,
            Self::Text(s) => 4 + s.len(),
            Self::Bytes(b) => 4 + b.len(),
        }
    }

    fn encode(&self, buf: &mut impl BufMut) {
        match self {
            Self::U64(v) => {
                buf.put_u8(Self::TAG_U64);
                buf.put_u64_le(*v);
            }
            Self::Text(s) => {
                buf.put_u8(Self::TAG_TEXT);
                buf.put_u32_le(s.len() as u32);
                buf.put_slice(s.as_bytes());
            }
            Self::Bytes(b) => {
                buf.put_u8(Self::TAG_BYTES);
                buf.put_u32_le(b.len() as u32);
                buf.put_slice(b);
            }
        }
    }

    fn decode(buf: &mut impl Buf) -> WalResult<Self> {
        if !buf.has_remaining() {
            return Err(WalError::decode("truncated metadata value"));
        }
        match buf.get_u8() {
            Self::TAG_U64 => {
                if buf.remaining() < 8 {
                    return Err(WalError::decode("truncated u64 metadata value"));
                }
                Ok(Self::U64(buf.get_u64_le()))
            }
            Self::TAG_TEXT => {
                let raw = get_sized(buf)?;
                String::from_utf8(raw.to_vec())
                    .map(Self::Text)
                    .map_err(|e| WalError::decode(format!("metadata text: {}", e)))
            }
            Self::TAG_BYTES => Ok(Self::Bytes(get_sized(buf)?)),
            tag => Err(WalError::decode(format!("unknown metadata tag {}", tag))),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U64(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "{:?}", s),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<u64> for MetadataValue {
    fn from(v: u64) -> Self {
        Self::U64(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Bytes> for MetadataValue {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

fn get_sized(buf: &mut impl Buf) -> WalResult<Bytes> {
    if buf.remaining() < 4 {
        return Err(WalError::decode("truncated length prefix"));
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(WalError::decode(format!(
            "value needs {} bytes, {} left",
            len,
            buf.remaining()
        )));
    }
    Ok(buf.copy_to_bytes(len))
}

/// Returns the encoded size of a metadata map.
pub(crate) fn encoded_map_len(map: &BTreeMap<String, MetadataValue>) -> usize {
    4 + map
        .iter()
        .map(|(k, v)| 4 + k.len() + v.encoded_len())
        .sum::<usize>()
}

/// Encodes a metadata map in key order.
pub(crate) fn encode_map(map: &BTreeMap<String, MetadataValue>, buf: &mut impl BufMut) {
    buf.put_u32_le(map.len() as u32);
    for (key, value) in map {
        buf.put_u32_le(key.len() as u32);
        buf.put_slice(key.as_bytes());
        value.encode(buf);
    }
}

/// Decodes a metadata map.
pub(crate) fn decode_map(buf: &mut impl Buf) -> WalResult<BTreeMap<String, MetadataValue>> {
    if buf.remaining() < 4 {
        return Err(WalError::decode("truncated metadata count"));
    }
    let count = buf.get_u32_le();
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let key = get_sized(buf)?;
        let key = String::from_utf8(key.to_vec())
            .map_err(|e| WalError::decode(format!("metadata key: {}", e)))?;
        let value = MetadataValue::decode(buf)?;
        map.insert(key, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_encoding() {
        let mut map = BTreeMap::new();
        map.insert("records".to_string(), MetadataValue::from(12u64));
        map.insert("index".to_string(), MetadataValue::from("by_name"));
        map.insert(
            "blob".to_string(),
            MetadataValue::from(Bytes::from_static(&[1, 2, 3])),
        );

        let mut buf = Vec::new();
        encode_map(&map, &mut buf);
        assert_eq!(buf.len(), encoded_map_len(&map));
        assert_eq!(decode_map(&mut &buf[..]).unwrap(), map);
    }

    #[test]
    fn test_unknown_tag() {
        let mut buf = Vec::new();
        buf.put_u32_le(1);
        buf.put_u32_le(1);
        buf.put_u8(b'k');
        buf.put_u8(99);
        assert!(decode_map(&mut &buf[..]).is_err());
    }

    #[test]
    fn test_accessors() {
        assert_eq!(MetadataValue::U64(5).as_u64(), Some(5));
        assert_eq!(MetadataValue::from("x").as_text(), Some("x"));
        assert_eq!(MetadataValue::from("x").as_u64(), None);
        assert_eq!(MetadataValue::U64(5).to_string(), "5");
    }
}
