//! Page cache errors.

use thiserror::Error;
use vellum_common::types::FileId;

use crate::file::IoError;

/// Result type for page cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur during page cache operations.
#[derive(Debug, Error)]
#[allow(missing_docs)] // Fields are documented by variant docs
pub enum CacheError {
    /// No file is registered under this name.
    #[error("file {name} not found")]
    FileNotFound { name: String },

    /// No file is registered under this id.
    #[error("file with id {file_id} not found")]
    FileIdNotFound { file_id: FileId },

    /// A file with this name or id is already registered.
    #[error("file {name} already exists")]
    FileAlreadyExists { name: String },

    /// The page does not exist in the file.
    #[error("page {page_index} of file {file_id} not found")]
    PageNotFound { file_id: FileId, page_index: u64 },

    /// Checksum mismatch when loading a page.
    #[error("checksum mismatch for page {page_index} of file {file_id}: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        file_id: FileId,
        page_index: u64,
        expected: u32,
        computed: u32,
    },

    /// Invalid cache configuration.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// File I/O error.
    #[error("file I/O error: {0}")]
    Io(#[from] IoError),
}

impl CacheError {
    /// Creates a file not found error.
    pub fn file_not_found(name: impl Into<String>) -> Self {
        Self::FileNotFound { name: name.into() }
    }

    /// Creates a file already exists error.
    pub fn file_already_exists(name: impl Into<String>) -> Self {
        Self::FileAlreadyExists { name: name.into() }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a page not found error.
    pub fn page_not_found(file_id: FileId, page_index: u64) -> Self {
        Self::PageNotFound {
            file_id,
            page_index,
        }
    }

    /// Returns true if this is a transient error that can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(err) if err.is_retryable())
    }

    /// Returns true if on-disk data failed validation.
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::ChecksumMismatch { .. } => true,
            Self::Io(err) => err.is_corruption(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CacheError::page_not_found(FileId::new(3), 42);
        assert!(matches!(
            err,
            CacheError::PageNotFound { file_id, page_index: 42 } if file_id == FileId::new(3)
        ));
        assert_eq!(err.to_string(), "page 42 of file 3 not found");
    }

    #[test]
    fn test_classification() {
        let err = CacheError::ChecksumMismatch {
            file_id: FileId::new(1),
            page_index: 0,
            expected: 123,
            computed: 456,
        };
        assert!(err.is_corruption());
        assert!(!err.is_retryable());

        let err: CacheError =
            IoError::from(std::io::Error::from(std::io::ErrorKind::Interrupted)).into();
        assert!(err.is_retryable());
        assert!(!CacheError::file_not_found("a.pcl").is_corruption());
    }
}
