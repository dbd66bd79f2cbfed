//! WAL record types and flags.
//!
//! This module defines the record types and the main WalRecord enum.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use vellum_common::types::{FileId, Lsn, OperationUnitId};

use super::header::RecordHeader;
use crate::diff::PageDiff;
use crate::error::{WalError, WalResult};
use crate::metadata::{self, MetadataValue};

/// Record type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    /// Start of an atomic operation.
    AtomicUnitStart = 1,
    /// A file was created by an atomic operation.
    FileCreated = 2,
    /// A file was deleted by an atomic operation.
    FileDeleted = 3,
    /// Binary diff of one page.
    UpdatePage = 4,
    /// End of an atomic operation.
    AtomicUnitEnd = 5,
    /// All pages of a file were dropped by an atomic operation.
    FileTruncated = 6,
}

impl RecordType {
    /// Converts the record type to a u8.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Creates a record type from a u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::AtomicUnitStart),
            2 => Some(Self::FileCreated),
            3 => Some(Self::FileDeleted),
            4 => Some(Self::UpdatePage),
            5 => Some(Self::AtomicUnitEnd),
            6 => Some(Self::FileTruncated),
            _ => None,
        }
    }

    /// Returns true for records that bracket an atomic operation.
    pub const fn is_unit_marker(self) -> bool {
        matches!(self, Self::AtomicUnitStart | Self::AtomicUnitEnd)
    }
}

bitflags::bitflags! {
    /// Flags for WAL records.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RecordFlags: u8 {
        /// The operation was rolled back (end records only).
        const ROLLBACK = 0b0000_0001;
        /// The payload carries a metadata map (end records only).
        const METADATA = 0b0000_0010;
    }
}

/// A logical WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// First record of an atomic operation.
    AtomicUnitStart {
        /// Operation unit.
        unit: OperationUnitId,
    },
    /// A file created inside the operation, under its booked id.
    FileCreated {
        /// Operation unit.
        unit: OperationUnitId,
        /// Name of the new file.
        file_name: String,
        /// Booked file id.
        file_id: FileId,
    },
    /// A file deleted inside the operation.
    FileDeleted {
        /// Operation unit.
        unit: OperationUnitId,
        /// Deleted file.
        file_id: FileId,
    },
    /// A file cut back to zero pages inside the operation.
    FileTruncated {
        /// Operation unit.
        unit: OperationUnitId,
        /// Truncated file.
        file_id: FileId,
    },
    /// Diff of one page.
    UpdatePage {
        /// Operation unit.
        unit: OperationUnitId,
        /// Owning file.
        file_id: FileId,
        /// Page index inside the file.
        page_index: u64,
        /// Page LSN when the operation first touched the page.
        initial_lsn: Lsn,
        /// Changes to apply.
        diff: PageDiff,
    },
    /// Last record of an atomic operation. Its LSN is the commit LSN.
    AtomicUnitEnd {
        /// Operation unit.
        unit: OperationUnitId,
        /// Whether the operation was rolled back.
        rollback: bool,
        /// Metadata attached by the operation.
        metadata: BTreeMap<String, MetadataValue>,
    },
}

impl WalRecord {
    /// Returns the operation unit that produced the record.
    pub fn unit(&self) -> OperationUnitId {
        match self {
            Self::AtomicUnitStart { unit }
            | Self::FileCreated { unit, .. }
            | Self::FileDeleted { unit, .. }
            | Self::FileTruncated { unit, .. }
            | Self::UpdatePage { unit, .. }
            | Self::AtomicUnitEnd { unit, .. } => *unit,
        }
    }

    /// Returns the record type.
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::AtomicUnitStart { .. } => RecordType::AtomicUnitStart,
            Self::FileCreated { .. } => RecordType::FileCreated,
            Self::FileDeleted { .. } => RecordType::FileDeleted,
            Self::FileTruncated { .. } => RecordType::FileTruncated,
            Self::UpdatePage { .. } => RecordType::UpdatePage,
            Self::AtomicUnitEnd { .. } => RecordType::AtomicUnitEnd,
        }
    }

    /// Returns the header flags for this record.
    pub fn flags(&self) -> RecordFlags {
        match self {
            Self::AtomicUnitEnd {
                rollback, metadata, ..
            } => {
                let mut flags = RecordFlags::empty();
                flags.set(RecordFlags::ROLLBACK, *rollback);
                flags.set(RecordFlags::METADATA, !metadata.is_empty());
                flags
            }
            _ => RecordFlags::empty(),
        }
    }

    /// Returns the file a record refers to, if any.
    pub fn file_id(&self) -> Option<FileId> {
        match self {
            Self::FileCreated { file_id, .. }
            | Self::FileDeleted { file_id, .. }
            | Self::FileTruncated { file_id, .. }
            | Self::UpdatePage { file_id, .. } => Some(*file_id),
            _ => None,
        }
    }

    /// Returns the payload size in bytes.
    pub fn payload_len(&self) -> usize {
        match self {
            Self::AtomicUnitStart { .. } => 0,
            Self::FileCreated { file_name, .. } => 8 + 4 + file_name.len(),
            Self::FileDeleted { .. } | Self::FileTruncated { .. } => 8,
            Self::UpdatePage { diff, .. } => 8 + 8 + 8 + diff.encoded_len(),
            Self::AtomicUnitEnd { metadata, .. } => {
                if metadata.is_empty() {
                    0
                } else {
                    metadata::encoded_map_len(metadata)
                }
            }
        }
    }

    /// Returns the framed size (header + payload).
    pub fn frame_len(&self) -> usize {
        RecordHeader::SIZE + self.payload_len()
    }

    fn encode_payload(&self, buf: &mut impl BufMut) {
        match self {
            Self::AtomicUnitStart { .. } => {}
            Self::FileCreated {
                file_name, file_id, ..
            } => {
                buf.put_u64_le(file_id.as_u64());
                buf.put_u32_le(file_name.len() as u32);
                buf.put_slice(file_name.as_bytes());
            }
            Self::FileDeleted { file_id, .. } | Self::FileTruncated { file_id, .. } => {
                buf.put_u64_le(file_id.as_u64())
            }
            Self::UpdatePage {
                file_id,
                page_index,
                initial_lsn,
                diff,
                ..
            } => {
                buf.put_u64_le(file_id.as_u64());
                buf.put_u64_le(*page_index);
                buf.put_u64_le(initial_lsn.as_u64());
                diff.encode(buf);
            }
            Self::AtomicUnitEnd { metadata, .. } => {
                if !metadata.is_empty() {
                    metadata::encode_map(metadata, buf);
                }
            }
        }
    }

    /// Frames the record at `lsn`: header with checksum followed by payload.
    pub fn encode(&self, lsn: Lsn, prev_lsn: Lsn) -> Bytes {
        let payload_len = self.payload_len();
        let mut buf = BytesMut::with_capacity(RecordHeader::SIZE + payload_len);
        buf.resize(RecordHeader::SIZE, 0);
        self.encode_payload(&mut buf);

        let mut header = RecordHeader::new(
            lsn,
            prev_lsn,
            self.unit(),
            self.record_type(),
            self.flags(),
            payload_len as u32,
        );
        header.set_checksum(&buf[RecordHeader::SIZE..]);
        buf[..RecordHeader::SIZE].copy_from_slice(&header.to_bytes());

        buf.freeze()
    }

    /// Decodes the payload of a record whose header has been validated.
    pub fn decode(header: &RecordHeader, payload: &[u8]) -> WalResult<Self> {
        let unit = header.unit_id;
        let mut buf = payload;
        let record = match header.record_type {
            RecordType::AtomicUnitStart => Self::AtomicUnitStart { unit },
            RecordType::FileCreated => {
                need(&buf, 12, header.lsn)?;
                let file_id = FileId::new(buf.get_u64_le());
                let len = buf.get_u32_le() as usize;
                need(&buf, len, header.lsn)?;
                let file_name = String::from_utf8(buf.copy_to_bytes(len).to_vec())
                    .map_err(|e| WalError::decode(format!("file name: {}", e)))?;
                Self::FileCreated {
                    unit,
                    file_name,
                    file_id,
                }
            }
            RecordType::FileDeleted => {
                need(&buf, 8, header.lsn)?;
                Self::FileDeleted {
                    unit,
                    file_id: FileId::new(buf.get_u64_le()),
                }
            }
            RecordType::FileTruncated => {
                need(&buf, 8, header.lsn)?;
                Self::FileTruncated {
                    unit,
                    file_id: FileId::new(buf.get_u64_le()),
                }
            }
            RecordType::UpdatePage => {
                need(&buf, 24, header.lsn)?;
                let file_id = FileId::new(buf.get_u64_le());
                let page_index = buf.get_u64_le();
                let initial_lsn = Lsn::new(buf.get_u64_le());
                let diff = PageDiff::decode(&mut buf)?;
                Self::UpdatePage {
                    unit,
                    file_id,
                    page_index,
                    initial_lsn,
                    diff,
                }
            }
            RecordType::AtomicUnitEnd => {
                let metadata = if header.flags.contains(RecordFlags::METADATA) {
                    metadata::decode_map(&mut buf)?
                } else {
                    BTreeMap::new()
                };
                Self::AtomicUnitEnd {
                    unit,
                    rollback: header.flags.contains(RecordFlags::ROLLBACK),
                    metadata,
                }
            }
        };

        if buf.has_remaining() {
            return Err(WalError::corrupted(
                header.lsn,
                format!("{} trailing payload bytes", buf.remaining()),
            ));
        }
        Ok(record)
    }
}

fn need(buf: &&[u8], len: usize, lsn: Lsn) -> WalResult<()> {
    if buf.len() < len {
        return Err(WalError::corrupted(
            lsn,
            format!("payload needs {} bytes, {} left", len, buf.len()),
        ));
    }
    Ok(())
}
