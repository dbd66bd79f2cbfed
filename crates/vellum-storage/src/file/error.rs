//! Errors raised by the file layer.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for file operations.
pub type IoResult<T> = Result<T, IoError>;

/// Failure of a file operation, carrying the path where one is known.
#[derive(Debug, Error)]
#[allow(missing_docs)] // Fields are documented by variant docs
pub enum IoError {
    /// Any other operating system error.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// The file does not exist.
    #[error("file not found: {path}")]
    NotFound { path: PathBuf },

    /// The file was opened read-only or the OS refused access.
    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Exclusive creation hit an existing file.
    #[error("file already exists: {path}")]
    AlreadyExists { path: PathBuf },

    /// `create` or `open` on a file that already holds a handle.
    #[error("file already open: {path}")]
    AlreadyOpen { path: PathBuf },

    /// Access to a file that was never opened or has been closed.
    #[error("file not open: {path}")]
    NotOpen { path: PathBuf },

    /// Access outside the logical bounds of the file.
    #[error("out of bounds: [{offset}, {end}) exceeds file size {file_size}")]
    OutOfBounds { offset: u64, end: u64, file_size: u64 },

    /// The physical file ended before a read completed.
    #[error("unexpected end of file at offset {offset}: {remaining} bytes missing")]
    UnexpectedEof { offset: u64, remaining: usize },

    /// The file header failed validation.
    #[error("corrupted file {path}: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    /// A positioned read or write made no progress.
    #[error("short {operation}: expected {expected} bytes, got {actual}")]
    ShortIo {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The blocking pool task running the I/O panicked or was cancelled.
    #[error("background I/O task failed: {message}")]
    TaskFailed { message: String },
}

impl IoError {
    /// Creates a PermissionDenied error.
    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        Self::PermissionDenied { path: path.into() }
    }

    /// Creates an AlreadyOpen error.
    pub fn already_open(path: impl Into<PathBuf>) -> Self {
        Self::AlreadyOpen { path: path.into() }
    }

    /// Creates a NotOpen error.
    pub fn not_open(path: impl Into<PathBuf>) -> Self {
        Self::NotOpen { path: path.into() }
    }

    /// Creates an OutOfBounds error for the range `offset..offset + len`.
    pub fn out_of_bounds(offset: u64, len: usize, file_size: u64) -> Self {
        Self::OutOfBounds {
            offset,
            end: offset.saturating_add(len as u64),
            file_size,
        }
    }

    /// Creates a Corrupted error.
    pub fn corrupted(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn short_read(expected: usize, actual: usize) -> Self {
        Self::ShortIo {
            operation: "read",
            expected,
            actual,
        }
    }

    pub(crate) fn short_write(expected: usize, actual: usize) -> Self {
        Self::ShortIo {
            operation: "write",
            expected,
            actual,
        }
    }

    fn kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Io { source } => Some(source.kind()),
            Self::NotFound { .. } => Some(io::ErrorKind::NotFound),
            Self::PermissionDenied { .. } => Some(io::ErrorKind::PermissionDenied),
            _ => None,
        }
    }

    /// Returns true if repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            Some(io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
        )
    }

    /// Returns true if the on-disk data failed validation.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupted { .. })
    }

    /// Returns true for misuse of the file API rather than an
    /// environmental failure.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::OutOfBounds { .. } | Self::AlreadyOpen { .. } | Self::NotOpen { .. }
        )
    }

    /// Returns true if the file does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind() == Some(io::ErrorKind::NotFound)
    }

    /// Returns true if access was refused.
    pub fn is_permission_denied(&self) -> bool {
        self.kind() == Some(io::ErrorKind::PermissionDenied)
    }

    /// Attaches `path` to the error kinds callers branch on.
    pub fn from_io_with_path(err: io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            io::ErrorKind::AlreadyExists => Self::AlreadyExists { path },
            _ => Self::Io { source: err },
        }
    }
}

impl From<tokio::task::JoinError> for IoError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed {
            message: err.to_string(),
        }
    }
}
