//! System-wide constants for Vellum.
//!
//! This module defines constants used across the storage core.

// =============================================================================
// Page Constants
// =============================================================================

/// Default page size in bytes (8 KB).
pub const DEFAULT_PAGE_SIZE: usize = 8 * 1024;

/// Minimum page size in bytes (1 KB).
pub const MIN_PAGE_SIZE: usize = 1024;

/// Maximum page size in bytes (64 KB).
///
/// In-page offsets are stored as u32, but the bucket layout and diff runs
/// are only exercised up to this bound.
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// Size of the durable page header (magic, checksum, LSN).
pub const DURABLE_PAGE_HEADER_SIZE: usize = 16;

/// Magic stamped on every page written through the page cache ("VL").
pub const PAGE_MAGIC: u16 = 0x564C;

// =============================================================================
// File Constants
// =============================================================================

/// Size of the reserved header region at the front of every paginated file.
///
/// Logical page offsets start right after this region.
pub const FILE_HEADER_SIZE: u64 = 1024;

/// Magic bytes at the start of a paginated file header.
pub const FILE_MAGIC: [u8; 8] = *b"VLMFILE\0";

/// Current paginated file format version.
pub const FILE_FORMAT_VERSION: u32 = 1;

/// Maximum number of concurrent writes admitted by a file's flush gate.
pub const MAX_CONCURRENT_IOS: usize = 256;

// =============================================================================
// Bucket Constants
// =============================================================================

/// Default hard limit for a serialized key + value pair (24 KB).
pub const DEFAULT_MAX_ENTRY_SIZE: usize = 24 * 1024;

// =============================================================================
// WAL Constants
// =============================================================================

/// Maximum WAL record size (16 MB).
pub const MAX_WAL_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// WAL record header size.
pub const WAL_RECORD_HEADER_SIZE: usize = 40;

/// WAL file header size.
pub const WAL_FILE_HEADER_SIZE: usize = 16;
