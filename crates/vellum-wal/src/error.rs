//! WAL error types.
//!
//! This module defines all error types for the Write-Ahead Log.

use std::io;
use thiserror::Error;

use vellum_common::types::Lsn;

/// Result type for WAL operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
#[allow(missing_docs)] // Fields are documented by variant docs
pub enum WalError {
    /// I/O error during WAL operations.
    #[error("WAL I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// The log contains a damaged or incomplete record.
    #[error("WAL corrupted at LSN {lsn}: {reason}")]
    Corrupted { lsn: Lsn, reason: String },

    /// Invalid log file magic.
    #[error("Invalid WAL file magic: {found:02x?}")]
    InvalidMagic { found: [u8; 8] },

    /// Unsupported log file version.
    #[error("Unsupported WAL version: expected {expected}, found {found}")]
    UnsupportedVersion { expected: u32, found: u32 },

    /// WAL record checksum mismatch.
    #[error("WAL record checksum mismatch at LSN {lsn}: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        lsn: Lsn,
        expected: u32,
        computed: u32,
    },

    /// WAL record too large.
    #[error("WAL record too large: {size} bytes exceeds maximum {max} bytes")]
    RecordTooLarge { size: usize, max: usize },

    /// Unknown record type byte.
    #[error("Unknown WAL record type {value} at LSN {lsn}")]
    InvalidRecordType { lsn: Lsn, value: u8 },

    /// A page diff reaches outside the page it is applied to.
    #[error("Page diff run at offset {offset} with {len} bytes exceeds page size {page_size}")]
    DiffOutOfBounds {
        offset: usize,
        len: usize,
        page_size: usize,
    },

    /// WAL record payload could not be decoded.
    #[error("Failed to decode WAL record: {reason}")]
    Decode { reason: String },

    /// WAL is closed.
    #[error("WAL is closed")]
    Closed,

    /// Configuration error.
    #[error("WAL configuration error: {reason}")]
    Config { reason: String },
}

impl WalError {
    /// Creates a corruption error.
    pub fn corrupted(lsn: Lsn, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            lsn,
            reason: reason.into(),
        }
    }

    /// Creates a checksum mismatch error.
    pub fn checksum_mismatch(lsn: Lsn, expected: u32, computed: u32) -> Self {
        Self::ChecksumMismatch {
            lsn,
            expected,
            computed,
        }
    }

    /// Creates a record too large error.
    pub fn record_too_large(size: usize, max: usize) -> Self {
        Self::RecordTooLarge { size, max }
    }

    /// Creates a decode error.
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// Creates a config error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Returns true if this is a transient error that can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { source } if matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            )
        )
    }

    /// Returns true if this is a corruption error.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corrupted { .. }
                | Self::ChecksumMismatch { .. }
                | Self::InvalidMagic { .. }
                | Self::InvalidRecordType { .. }
                | Self::Decode { .. }
        )
    }

    /// Returns true if the error stems from misuse rather than the environment.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RecordTooLarge { .. }
                | Self::DiffOutOfBounds { .. }
                | Self::Closed
                | Self::Config { .. }
        )
    }
}
