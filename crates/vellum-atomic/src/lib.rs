//! # vellum-atomic
//!
//! Atomic operations for Vellum.
//!
//! This crate turns page and file mutations into units that become durable
//! all at once:
//!
//! - **Staging**: pages touched by an operation are copied out of the page
//!   cache; the operation mutates and reads its private copies.
//!
//! - **Log-then-apply commit**: every change is written to the write-ahead
//!   log as a page diff before any of it reaches the page cache.
//!
//! - **Rollback**: an operation that is not committed leaves no trace.
//!
//! - **Recovery**: committed operations are replayed from the log after a
//!   crash.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   AtomicOperationsManager                    │
//! │                             │                                │
//! │                             ▼                                │
//! │                    ┌─────────────────┐                       │
//! │                    │ AtomicOperation │──── StagedPage *      │
//! │                    └─────────────────┘                       │
//! │                     │               │                        │
//! │          log_changes│               │apply_changes           │
//! │                     ▼               ▼                        │
//! │          ┌─────────────────┐  ┌────────────┐                 │
//! │          │ WriteAheadLog   │  │ WriteCache │                 │
//! │          │  (vellum-wal)   │  │ (storage)  │                 │
//! │          └─────────────────┘  └────────────┘                 │
//! │                     │               ▲                        │
//! │                     └── recover ────┘                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use vellum_atomic::AtomicOperationsManager;
//! use vellum_common::config::StorageConfig;
//! use vellum_storage::PageCache;
//! use vellum_wal::{Wal, WalConfig};
//!
//! let cache = Arc::new(PageCache::open("data", StorageConfig::default()).await?);
//! let wal = Arc::new(Wal::open(WalConfig::new("data/wal.log"))?);
//! let manager = AtomicOperationsManager::new(cache, wal);
//!
//! let mut op = manager.start_atomic_operation();
//! let file_id = op.add_file("people.pcl")?;
//! let page = op.add_page(file_id)?;
//! page.write(64, b"hello")?;
//! let commit_lsn = manager.end_atomic_operation(op, false).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;

/// Staged file and page changes.
pub mod changes;

/// The atomic operation and its commit protocol.
pub mod operation;

/// Starting and ending atomic operations.
pub mod manager;

/// Log replay after a crash.
pub mod recovery;

// Re-export commonly used types

pub use changes::{FileChanges, MaxNewPage, PageView, StagedPage};
pub use error::{AtomicOperationError, AtomicResult};
pub use manager::{AtomicOperationsConfig, AtomicOperationsManager, AtomicOperationsStats};
pub use operation::{AtomicOperation, BonsaiPointer};
pub use recovery::{recover, recover_from_wal, RecoveryReport};
