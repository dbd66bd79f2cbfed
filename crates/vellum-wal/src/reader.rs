//! WAL reader for recovery.
//!
//! This module provides the reader component for:
//! - Validating the log file header
//! - Iterating over records in LSN order
//! - Validating record framing and checksums

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use vellum_common::constants::WAL_FILE_HEADER_SIZE;
use vellum_common::types::Lsn;

use crate::error::{WalError, WalResult};
use crate::record::header::{validate_file_header, RecordHeader};
use crate::record::types::WalRecord;

/// Sequential reader over one log file.
///
/// Every record is checked for framing (its stored LSN must equal its byte
/// offset, its payload must be complete) and, if enabled, its checksum.
/// Any violation is reported as a corruption error.
pub struct WalReader {
    file: File,
    /// Offset of the next record.
    position: u64,
    /// Bytes of the log visible to this reader.
    limit: u64,
    max_record_size: usize,
    verify_checksums: bool,
}

impl WalReader {
    /// Opens the log at `path` and validates its header.
    pub fn open(
        path: impl AsRef<Path>,
        max_record_size: usize,
        verify_checksums: bool,
    ) -> WalResult<Self> {
        let mut file = File::open(path.as_ref())?;
        let limit = file.metadata()?.len();

        let mut header = [0u8; WAL_FILE_HEADER_SIZE];
        if limit < WAL_FILE_HEADER_SIZE as u64 {
            return Err(WalError::corrupted(
                Lsn::INVALID,
                format!("log file is only {} bytes", limit),
            ));
        }
        file.read_exact(&mut header)?;
        validate_file_header(&header)?;

        Ok(Self {
            file,
            position: WAL_FILE_HEADER_SIZE as u64,
            limit,
            max_record_size,
            verify_checksums,
        })
    }

    /// Restricts the reader to the first `limit` bytes of the log.
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = self.limit.min(limit);
        self
    }

    /// Returns the offset of the next record, i.e. the end of the valid prefix
    /// read so far.
    pub fn position(&self) -> Lsn {
        Lsn::new(self.position)
    }

    /// Returns the number of bytes of the log visible to this reader.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Reads the next record.
    ///
    /// Returns `Ok(None)` at the clean end of the log. The position only
    /// advances past records that decoded successfully.
    pub fn next_record(&mut self) -> WalResult<Option<(Lsn, WalRecord)>> {
        if self.position >= self.limit {
            return Ok(None);
        }

        let lsn = Lsn::new(self.position);
        let remaining = self.limit - self.position;
        if remaining < RecordHeader::SIZE as u64 {
            return Err(WalError::corrupted(
                lsn,
                format!("torn record header: {} bytes", remaining),
            ));
        }

        self.file.seek(SeekFrom::Start(self.position))?;
        let mut header_buf = [0u8; RecordHeader::SIZE];
        self.file.read_exact(&mut header_buf)?;
        let header = RecordHeader::from_bytes(&header_buf)?;

        if header.lsn != lsn {
            return Err(WalError::corrupted(
                lsn,
                format!("record claims LSN {}", header.lsn),
            ));
        }
        if header.total_size() > self.max_record_size {
            return Err(WalError::corrupted(
                lsn,
                format!("record of {} bytes exceeds maximum", header.total_size()),
            ));
        }
        if (header.total_size() as u64) > remaining {
            return Err(WalError::corrupted(
                lsn,
                format!(
                    "torn record: {} bytes framed, {} available",
                    header.total_size(),
                    remaining
                ),
            ));
        }

        let mut payload = vec![0u8; header.payload_length as usize];
        self.file.read_exact(&mut payload)?;

        if self.verify_checksums && !header.verify_checksum(&payload) {
            return Err(WalError::checksum_mismatch(
                lsn,
                header.checksum,
                header.compute_checksum(&payload),
            ));
        }

        let record = WalRecord::decode(&header, &payload)?;
        self.position += header.total_size() as u64;
        Ok(Some((lsn, record)))
    }

    /// Reads every remaining record starting at or after `start`.
    pub fn read_from(&mut self, start: Lsn) -> WalResult<Vec<(Lsn, WalRecord)>> {
        let mut records = Vec::new();
        while let Some((lsn, record)) = self.next_record()? {
            if lsn >= start {
                records.push((lsn, record));
            }
        }
        Ok(records)
    }
}

impl Iterator for WalReader {
    type Item = WalResult<(Lsn, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::header::encode_file_header;
    use std::io::Write;
    use vellum_common::constants::MAX_WAL_RECORD_SIZE;
    use vellum_common::types::{FileId, OperationUnitId};

    fn write_log(path: &Path, records: &[WalRecord]) -> Vec<Lsn> {
        let mut file = File::create(path).unwrap();
        file.write_all(&encode_file_header()).unwrap();
        let mut lsn = WAL_FILE_HEADER_SIZE as u64;
        let mut lsns = Vec::new();
        for record in records {
            let frame = record.encode(Lsn::new(lsn), Lsn::INVALID);
            file.write_all(&frame).unwrap();
            lsns.push(Lsn::new(lsn));
            lsn += frame.len() as u64;
        }
        lsns
    }

    fn records() -> Vec<WalRecord> {
        let unit = OperationUnitId::new(1);
        vec![
            WalRecord::AtomicUnitStart { unit },
            WalRecord::FileDeleted {
                unit,
                file_id: FileId::new(2),
            },
            WalRecord::AtomicUnitEnd {
                unit,
                rollback: false,
                metadata: Default::default(),
            },
        ]
    }

    #[test]
    fn test_read_written_records() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.wal");
        let lsns = write_log(&path, &records());

        let reader = WalReader::open(&path, MAX_WAL_RECORD_SIZE, true).unwrap();
        let read: Vec<_> = reader.collect::<Result<_, _>>().unwrap();

        assert_eq!(read.len(), 3);
        assert_eq!(read[0].0, lsns[0]);
        assert_eq!(read[0].0, Lsn::new(WAL_FILE_HEADER_SIZE as u64));
        assert_eq!(read[2].1, records()[2]);
    }

    #[test]
    fn test_read_from_lsn() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.wal");
        let lsns = write_log(&path, &records());

        let mut reader = WalReader::open(&path, MAX_WAL_RECORD_SIZE, true).unwrap();
        let read = reader.read_from(lsns[1]).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].0, lsns[1]);
    }

    #[test]
    fn test_torn_tail_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.wal");
        let lsns = write_log(&path, &records());

        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();

        let mut reader = WalReader::open(&path, MAX_WAL_RECORD_SIZE, true).unwrap();
        assert!(reader.next_record().unwrap().is_some());
        assert!(reader.next_record().unwrap().is_some());
        let err = reader.next_record().unwrap_err();
        assert!(err.is_corruption());
        assert_eq!(reader.position(), lsns[2]);
    }

    #[test]
    fn test_checksum_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.wal");
        let lsns = write_log(&path, &records());

        // Flip a payload byte of the FileDeleted record
        let mut bytes = std::fs::read(&path).unwrap();
        let at = lsns[1].as_u64() as usize + RecordHeader::SIZE;
        bytes[at] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let mut reader = WalReader::open(&path, MAX_WAL_RECORD_SIZE, true).unwrap();
        assert!(reader.next_record().unwrap().is_some());
        assert!(matches!(
            reader.next_record(),
            Err(WalError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.wal");
        let lsns = write_log(&path, &records());

        let reader = WalReader::open(&path, MAX_WAL_RECORD_SIZE, true)
            .unwrap()
            .with_limit(lsns[1].as_u64());
        assert_eq!(reader.count(), 1);
    }
}
