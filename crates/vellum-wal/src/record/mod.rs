//! WAL record types and serialization.
//!
//! This module defines the record types used in the Write-Ahead Log.
//! Records are serialized with a fixed-size header followed by variable-length payload.

pub mod header;
pub mod types;

pub use header::{
    encode_file_header, validate_file_header, RecordHeader, WAL_FORMAT_VERSION, WAL_MAGIC,
};
pub use types::{RecordFlags, RecordType, WalRecord};
