//! # vellum-wal
//!
//! Write-ahead logging for Vellum atomic operations.
//!
//! This crate implements the log behind the log-then-apply commit:
//! - A single append-only log file where an LSN is the byte offset of a record
//! - Page changes logged as binary diffs
//! - Records of one operation unit chained through `prev_lsn`
//! - Torn-tail detection and truncation on open
//!
//! # Architecture
//!
//! An atomic operation logs `AtomicUnitStart`, its file creations and
//! deletions, one `UpdatePage` per changed page, and finally
//! `AtomicUnitEnd`. The LSN of the end record is the commit LSN.
//!
//! ## Record Format
//!
//! Each record consists of a 40-byte header followed by a variable-length payload:
//!
//! ```text
//! +----------+----------+-----------+------+-------+----------+--------+----------+---------+
//! | LSN (8)  | Prev (8) | Unit (8)  | Type | Flags | Reserved | Length | Checksum | Padding |
//! +----------+----------+-----------+------+-------+----------+--------+----------+---------+
//! |                                  Payload (variable)                                     |
//! +-----------------------------------------------------------------------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod error;

/// WAL record types and serialization.
pub mod record;

/// Binary page diffs.
pub mod diff;

/// Metadata values carried by end records.
pub mod metadata;

/// WAL reader for recovery.
pub mod reader;

/// Main WAL manager.
pub mod wal;

// Re-exports for convenience
pub use config::{SyncPolicy, WalConfig};
pub use diff::{DiffRun, PageDiff};
pub use error::{WalError, WalResult};
pub use metadata::MetadataValue;
pub use reader::WalReader;
pub use record::{RecordFlags, RecordHeader, RecordType, WalRecord};
pub use wal::{Wal, WalStats, WriteAheadLog};
