//! Page formats for Vellum.
//!
//! All data is organized into fixed-size pages (default 8KB). Every page
//! starts with a durable header carrying the page LSN and checksum; B-tree
//! pages then lay out a slotted bucket.
//!
//! # Page Format
//!
//! ```text
//! +------------------+
//! |  Durable Header  |  16 bytes
//! +------------------+
//! |  Bucket Header   |  43 bytes
//! +------------------+
//! |  Positions       |  grows toward the page end (4 bytes per slot)
//! |        ↓         |
//! +------------------+
//! |   Free Space     |
//! +------------------+
//! |        ↑         |
//! |  Entry Payloads  |  grows toward the header
//! +------------------+
//! ```

mod bucket;
mod checksum;
mod codec;
mod durable;

pub use bucket::{
    Bucket, BucketEntry, BucketError, BucketFlags, BucketResult, SearchResult, NO_SIBLING,
    POSITIONS_ARRAY_OFFSET,
};
pub use checksum::{compute_page_checksum, ChecksumResult};
pub use codec::{Codec, CodecError, CodecResult, RecordId};
pub use durable::DurablePage;
