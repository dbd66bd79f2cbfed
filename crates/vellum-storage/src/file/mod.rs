//! Async file I/O layer for Vellum.
//!
//! This module provides:
//!
//! - **FileHandle**: positioned async I/O over a raw file
//! - **StandardFile**: the tokio-backed implementation
//! - **PaginatedFile**: page-addressed files with a reserved header region
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             PaginatedFile               │
//! │  (logical offsets, size, flush gate)    │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │           FileHandle Trait              │
//! │  (read_at, write_at, sync, set_len)     │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │   StandardFile (tokio spawn_blocking)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use vellum_storage::file::{IoResult, PaginatedFile};
//!
//! async fn example() -> IoResult<()> {
//!     let file = PaginatedFile::new("data.pcl", 8192);
//!     file.create().await?;
//!
//!     let offset = file.allocate_space(8192);
//!     file.write(offset, &[0u8; 8192]).await?;
//!     file.synch().await?;
//!
//!     Ok(())
//! }
//! ```

mod error;
mod handle;
mod options;
mod paginated;
mod std_io;

pub use error::{IoError, IoResult};
pub use handle::{FileHandle, FileManager};
pub use options::OpenOptions;
pub use paginated::PaginatedFile;
pub use std_io::StandardFile;
