//! # vellum-storage
//!
//! Page storage for Vellum.
//!
//! This crate provides the layers below atomic operations:
//! - Paginated files with a reserved header region and async I/O
//! - The durable page header and the slotted B-tree bucket format
//! - A shared write-back page cache

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Page layout and disk format
pub mod page;

/// File management and I/O
pub mod file;

/// Shared page cache
pub mod cache;

pub use cache::{CacheError, CachePointer, CacheResult, PageCache, WriteCache};
pub use file::{IoError, IoResult, PaginatedFile};
