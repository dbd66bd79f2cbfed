//! Atomic operation errors.

use thiserror::Error;
use vellum_common::types::{FileId, OperationUnitId};
use vellum_storage::CacheError;
use vellum_wal::WalError;

/// Result type for atomic operations.
pub type AtomicResult<T> = Result<T, AtomicOperationError>;

/// Errors that can occur while staging or committing an atomic operation.
#[derive(Debug, Error)]
#[allow(missing_docs)] // Fields are documented by variant docs
pub enum AtomicOperationError {
    /// The file was deleted earlier in the same operation.
    #[error("file {file_id} is deleted in this atomic operation")]
    FileDeleted { file_id: FileId },

    /// A file with this name already exists.
    #[error("file {name} already exists")]
    FileAlreadyExists { name: String },

    /// No file with this name exists.
    #[error("file {name} not found")]
    FileNotFound { name: String },

    /// No file with this id exists.
    #[error("file with id {file_id} not found")]
    FileIdNotFound { file_id: FileId },

    /// A staged page could not be loaded or allocated while applying a commit.
    #[error("page {page_index} of file {file_id} is missing")]
    PageMissing { file_id: FileId, page_index: u64 },

    /// A write does not fit inside the page.
    #[error("write of {len} bytes at offset {offset} exceeds page size {page_size}")]
    PageOverflow {
        offset: usize,
        len: usize,
        page_size: usize,
    },

    /// The operation is flagged for rollback and cannot be committed.
    #[error("atomic operation {unit} is rolled back")]
    RollbackInProgress { unit: OperationUnitId },

    /// The operation was already committed.
    #[error("atomic operation {unit} is already committed")]
    AlreadyCommitted { unit: OperationUnitId },

    /// Page cache failure.
    #[error("page cache error: {0}")]
    Cache(#[from] CacheError),

    /// Write-ahead log failure.
    #[error("write-ahead log error: {0}")]
    Wal(#[from] WalError),
}

impl AtomicOperationError {
    /// Creates a page missing error.
    pub fn page_missing(file_id: FileId, page_index: u64) -> Self {
        Self::PageMissing {
            file_id,
            page_index,
        }
    }

    /// Creates a file already exists error.
    pub fn file_already_exists(name: impl Into<String>) -> Self {
        Self::FileAlreadyExists { name: name.into() }
    }

    /// Creates a file not found error.
    pub fn file_not_found(name: impl Into<String>) -> Self {
        Self::FileNotFound { name: name.into() }
    }

    /// Returns true if this is a transient error that can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cache(err) => err.is_retryable(),
            Self::Wal(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if persisted data failed validation.
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::Cache(err) => err.is_corruption(),
            Self::Wal(err) => err.is_corruption(),
            _ => false,
        }
    }

    /// Returns true for usage and consistency errors.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::FileDeleted { .. }
            | Self::FileAlreadyExists { .. }
            | Self::PageMissing { .. }
            | Self::PageOverflow { .. }
            | Self::RollbackInProgress { .. }
            | Self::AlreadyCommitted { .. } => true,
            Self::Wal(err) => err.is_fatal(),
            _ => false,
        }
    }
}
