//! Positioned file access and directory-level helpers.

use std::path::Path;

use super::error::{IoError, IoResult};

/// Positioned asynchronous access to a single open file.
///
/// Every call carries its own offset, so one handle can be shared by
/// concurrent page loads without a cursor.
#[allow(async_fn_in_trait)]
pub trait FileHandle: Send + Sync {
    /// Returns the file path.
    fn path(&self) -> &Path;

    /// Returns the current physical file size.
    async fn size(&self) -> IoResult<u64>;

    /// Reads data from the file at the specified offset.
    ///
    /// Returns the number of bytes read. May return less than the buffer
    /// size if EOF is reached.
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> IoResult<usize>;

    /// Reads exactly `buf.len()` bytes from the file at the specified offset.
    ///
    /// Returns an error if EOF is reached before the buffer is filled.
    async fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> IoResult<()> {
        let mut total_read = 0;
        while total_read < buf.len() {
            let n = self
                .read_at(&mut buf[total_read..], offset + total_read as u64)
                .await?;
            if n == 0 {
                return Err(IoError::short_read(buf.len(), total_read));
            }
            total_read += n;
        }
        Ok(())
    }

    /// Writes data to the file at the specified offset.
    ///
    /// Returns the number of bytes written.
    async fn write_at(&self, buf: &[u8], offset: u64) -> IoResult<usize>;

    /// Writes all bytes to the file at the specified offset.
    ///
    /// Returns an error if not all bytes could be written.
    async fn write_all_at(&self, buf: &[u8], offset: u64) -> IoResult<()> {
        let mut total_written = 0;
        while total_written < buf.len() {
            let n = self
                .write_at(&buf[total_written..], offset + total_written as u64)
                .await?;
            if n == 0 {
                return Err(IoError::short_write(buf.len(), total_written));
            }
            total_written += n;
        }
        Ok(())
    }

    /// Syncs all data and metadata to disk.
    async fn sync(&self) -> IoResult<()>;

    /// Syncs file content, skipping metadata that is not needed to read it back.
    async fn datasync(&self) -> IoResult<()>;

    /// Truncates or extends the file to the specified size.
    async fn set_len(&self, size: u64) -> IoResult<()>;
}

/// Directory-level operations used by the file store.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileManager;

fn with_path<T>(result: std::io::Result<T>, path: &Path) -> IoResult<T> {
    result.map_err(|e| IoError::from_io_with_path(e, path))
}

impl FileManager {
    /// Creates a new file manager.
    pub fn new() -> Self {
        Self
    }

    /// Returns true if anything exists at `path`.
    pub async fn exists(&self, path: impl AsRef<Path>) -> bool {
        tokio::fs::try_exists(path.as_ref()).await.unwrap_or(false)
    }

    /// Removes a file.
    pub async fn remove(&self, path: impl AsRef<Path>) -> IoResult<()> {
        let path = path.as_ref();
        with_path(tokio::fs::remove_file(path).await, path)
    }

    /// Renames `from` to `to`, replacing `to` if present.
    pub async fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> IoResult<()> {
        let from = from.as_ref();
        with_path(tokio::fs::rename(from, to.as_ref()).await, from)
    }

    /// Creates `path` and any missing parents.
    pub async fn create_dir_all(&self, path: impl AsRef<Path>) -> IoResult<()> {
        let path = path.as_ref();
        with_path(tokio::fs::create_dir_all(path).await, path)
    }
}
