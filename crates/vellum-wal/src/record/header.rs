//! WAL record and file headers.
//!
//! The record header is a fixed 40-byte structure that precedes every WAL
//! record. The log file itself starts with a 16-byte file header.

use bytes::{Buf, BufMut};
use vellum_common::constants::{WAL_FILE_HEADER_SIZE, WAL_RECORD_HEADER_SIZE};
use vellum_common::types::{Lsn, OperationUnitId};

use super::types::{RecordFlags, RecordType};
use crate::error::{WalError, WalResult};

/// Magic bytes at the start of every log file.
pub const WAL_MAGIC: [u8; 8] = *b"VLMWAL\0\0";

/// Current log file format version.
pub const WAL_FORMAT_VERSION: u32 = 1;

/// Fixed header in front of every record payload.
///
/// ```text
///  0        8        16       24  25  26   28      32        36      40
///  ┌────────┬────────┬────────┬───┬───┬────┬───────┬─────────┬───────┐
///  │  lsn   │prev_lsn│ unit   │typ│flg│rsvd│pay len│checksum │  pad  │
///  └────────┴────────┴────────┴───┴───┴────┴───────┴─────────┴───────┘
/// ```
///
/// All integers are little-endian. The checksum is the CRC32 of bytes
/// `0..32` followed by the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Byte offset of this record in the log.
    pub lsn: Lsn,
    /// Previous record of the same unit, or `Lsn::INVALID` for its first.
    pub prev_lsn: Lsn,
    /// Operation unit that produced the record.
    pub unit_id: OperationUnitId,
    /// Payload discriminant.
    pub record_type: RecordType,
    /// Record flags.
    pub flags: RecordFlags,
    /// Payload length in bytes.
    pub payload_length: u32,
    /// CRC32 of the checksummed prefix and the payload.
    pub checksum: u32,
}

const CHECKSUMMED_PREFIX: usize = 32;

impl RecordHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = WAL_RECORD_HEADER_SIZE;

    /// Creates a header with a zero checksum.
    pub fn new(
        lsn: Lsn,
        prev_lsn: Lsn,
        unit_id: OperationUnitId,
        record_type: RecordType,
        flags: RecordFlags,
        payload_length: u32,
    ) -> Self {
        Self {
            lsn,
            prev_lsn,
            unit_id,
            record_type,
            flags,
            payload_length,
            checksum: 0,
        }
    }

    /// Encodes the header.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        {
            let mut cursor = &mut buf[..];
            cursor.put_u64_le(self.lsn.as_u64());
            cursor.put_u64_le(self.prev_lsn.as_u64());
            cursor.put_u64_le(self.unit_id.as_u64());
            cursor.put_u8(self.record_type.as_u8());
            cursor.put_u8(self.flags.bits());
            cursor.put_u16_le(0);
            cursor.put_u32_le(self.payload_length);
            cursor.put_u32_le(self.checksum);
        }
        buf
    }

    /// Decodes a header from the first [`Self::SIZE`] bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> WalResult<Self> {
        if bytes.len() < Self::SIZE {
            return Err(WalError::decode(format!(
                "record header needs {} bytes, got {}",
                Self::SIZE,
                bytes.len()
            )));
        }

        let mut buf = bytes;
        let lsn = Lsn::new(buf.get_u64_le());
        let prev_lsn = Lsn::new(buf.get_u64_le());
        let unit_id = OperationUnitId::new(buf.get_u64_le());
        let raw_type = buf.get_u8();
        let record_type = RecordType::from_u8(raw_type).ok_or(WalError::InvalidRecordType {
            lsn,
            value: raw_type,
        })?;
        let flags = RecordFlags::from_bits_truncate(buf.get_u8());
        buf.advance(2);
        let payload_length = buf.get_u32_le();
        let checksum = buf.get_u32_le();

        Ok(Self {
            lsn,
            prev_lsn,
            unit_id,
            record_type,
            flags,
            payload_length,
            checksum,
        })
    }

    /// Header plus payload length.
    pub fn total_size(&self) -> usize {
        Self::SIZE + self.payload_length as usize
    }

    /// Computes the checksum this header should carry for `payload`.
    pub fn compute_checksum(&self, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.to_bytes()[..CHECKSUMMED_PREFIX]);
        hasher.update(payload);
        hasher.finalize()
    }

    /// Stamps the checksum for `payload`.
    pub fn set_checksum(&mut self, payload: &[u8]) {
        self.checksum = self.compute_checksum(payload);
    }

    /// Returns true if the stored checksum matches `payload`.
    pub fn verify_checksum(&self, payload: &[u8]) -> bool {
        self.checksum == self.compute_checksum(payload)
    }
}

/// Encodes the 16-byte log file header: magic, version, CRC32 of both.
pub fn encode_file_header() -> [u8; WAL_FILE_HEADER_SIZE] {
    let mut buf = [0u8; WAL_FILE_HEADER_SIZE];
    {
        let mut cursor = &mut buf[..];
        cursor.put_slice(&WAL_MAGIC);
        cursor.put_u32_le(WAL_FORMAT_VERSION);
    }
    let crc = crc32fast::hash(&buf[..12]);
    (&mut buf[12..]).put_u32_le(crc);
    buf
}

/// Validates a log file header.
pub fn validate_file_header(buf: &[u8]) -> WalResult<()> {
    if buf.len() < WAL_FILE_HEADER_SIZE {
        return Err(WalError::corrupted(
            Lsn::INVALID,
            format!("file header is {} bytes", buf.len()),
        ));
    }

    let mut magic = [0u8; 8];
    magic.copy_from_slice(&buf[..8]);
    if magic != WAL_MAGIC {
        return Err(WalError::InvalidMagic { found: magic });
    }

    let version = (&buf[8..12]).get_u32_le();
    if version != WAL_FORMAT_VERSION {
        return Err(WalError::UnsupportedVersion {
            expected: WAL_FORMAT_VERSION,
            found: version,
        });
    }

    let stored = (&buf[12..16]).get_u32_le();
    let computed = crc32fast::hash(&buf[..12]);
    if stored != computed {
        return Err(WalError::checksum_mismatch(Lsn::INVALID, stored, computed));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(record_type: RecordType, payload_length: u32) -> RecordHeader {
        RecordHeader::new(
            Lsn::new(1000),
            Lsn::new(500),
            OperationUnitId::new(42),
            record_type,
            RecordFlags::empty(),
            payload_length,
        )
    }

    #[test]
    fn test_header_layout() {
        let mut original = header(RecordType::AtomicUnitEnd, 256);
        original.flags = RecordFlags::ROLLBACK;
        original.set_checksum(&[7u8; 256]);

        let bytes = original.to_bytes();
        assert_eq!(bytes.len(), 40);
        assert_eq!(&bytes[..8], &1000u64.to_le_bytes());
        assert_eq!(bytes[24], RecordType::AtomicUnitEnd.as_u8());
        assert_eq!(&bytes[28..32], &256u32.to_le_bytes());
        assert_eq!(&bytes[36..], &[0u8; 4]);
        assert_eq!(RecordHeader::from_bytes(&bytes).unwrap(), original);
    }

    #[test]
    fn test_truncated_header() {
        let bytes = header(RecordType::UpdatePage, 0).to_bytes();
        assert!(matches!(
            RecordHeader::from_bytes(&bytes[..39]),
            Err(WalError::Decode { .. })
        ));
    }

    #[test]
    fn test_unknown_record_type() {
        let mut bytes = header(RecordType::UpdatePage, 0).to_bytes();
        bytes[24] = 0xEE;
        let err = RecordHeader::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, WalError::InvalidRecordType { value: 0xEE, .. }));
    }

    #[test]
    fn test_checksum_covers_header_fields() {
        let mut header = header(RecordType::UpdatePage, 10);
        let payload = b"diff bytes";
        header.set_checksum(payload);
        assert!(header.verify_checksum(payload));
        assert!(!header.verify_checksum(b"other data"));

        let mut moved = header;
        moved.prev_lsn = Lsn::new(501);
        assert!(!moved.verify_checksum(payload));
    }

    #[test]
    fn test_total_size() {
        assert_eq!(header(RecordType::FileDeleted, 100).total_size(), 140);
    }

    #[test]
    fn test_file_header() {
        let bytes = encode_file_header();
        assert!(validate_file_header(&bytes).is_ok());

        let mut bad = bytes;
        bad[0] = b'X';
        assert!(matches!(
            validate_file_header(&bad),
            Err(WalError::InvalidMagic { .. })
        ));

        let mut bad = bytes;
        bad[13] ^= 0xFF;
        assert!(validate_file_header(&bad).unwrap_err().is_corruption());
    }
}
