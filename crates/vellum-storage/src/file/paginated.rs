//! Page-addressed files with a reserved header region.
//!
//! A [`PaginatedFile`] exposes logical offsets starting right after a
//! `FILE_HEADER_SIZE` byte header. The header identifies the file format and
//! records the page size so a reopen can detect a foreign or damaged file.
//!
//! # Locking
//!
//! - Reads, writes and `synch` take the structural lock shared.
//! - `create`, `open`, `close`, `shrink`, `rename_to`, `replace_content_with`
//!   and `delete` take it exclusively.
//! - Writes hold one permit of the flush gate; `synch` takes all of them so
//!   it never runs concurrently with a write.
//!
//! # File Layout
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ Header (FILE_HEADER_SIZE bytes)            │
//! │  magic (8) | version (4) | page size (4)   │
//! │  crc32 (4) | zero padding                  │
//! ├────────────────────────────────────────────┤
//! │ Page 0                                     │
//! ├────────────────────────────────────────────┤
//! │ Page 1                                     │
//! │ ...                                        │
//! └────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, warn};

use vellum_common::constants::{
    FILE_FORMAT_VERSION, FILE_HEADER_SIZE, FILE_MAGIC, MAX_CONCURRENT_IOS,
};

use super::error::{IoError, IoResult};
use super::handle::{FileHandle, FileManager};
use super::options::OpenOptions;
use super::std_io::StandardFile;

/// Number of meaningful bytes at the front of the header region.
const HEADER_FIELDS_SIZE: usize = 8 + 4 + 4;

/// A file addressed in logical offsets, sized in whole pages.
pub struct PaginatedFile {
    path: parking_lot::RwLock<PathBuf>,
    page_size: usize,
    /// Open handle; the lock doubles as the structural lock.
    handle: RwLock<Option<Arc<StandardFile>>>,
    /// Logical size in bytes, excluding the header region.
    size: AtomicU64,
    /// Writes issued since the last successful `synch`.
    dirty_counter: AtomicU64,
    flush_gate: Semaphore,
}

impl PaginatedFile {
    /// Creates a closed paginated file bound to `path`.
    pub fn new(path: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            path: parking_lot::RwLock::new(path.into()),
            page_size,
            handle: RwLock::new(None),
            size: AtomicU64::new(0),
            dirty_counter: AtomicU64::new(0),
            flush_gate: Semaphore::new(MAX_CONCURRENT_IOS),
        }
    }

    /// Returns the backing path.
    pub fn path(&self) -> PathBuf {
        self.path.read().clone()
    }

    /// Returns the file name component of the backing path.
    pub fn name(&self) -> String {
        self.path
            .read()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Returns the page size this file was created with.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the logical size in bytes.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Returns the number of whole pages covered by the logical size.
    pub fn page_count(&self) -> u64 {
        self.size() / self.page_size as u64
    }

    /// Returns the number of writes not yet made durable by `synch`.
    pub fn dirty_writes(&self) -> u64 {
        self.dirty_counter.load(Ordering::Acquire)
    }

    /// Returns true if the file currently has an open handle.
    pub async fn is_open(&self) -> bool {
        self.handle.read().await.is_some()
    }

    /// Returns true if the backing file exists on disk.
    pub async fn exists(&self) -> bool {
        FileManager::new().exists(self.path()).await
    }

    /// Creates the backing file and writes a fresh header.
    pub async fn create(&self) -> IoResult<()> {
        let mut handle = self.handle.write().await;
        let path = self.path();
        if handle.is_some() {
            return Err(IoError::already_open(path));
        }

        let file = StandardFile::open(&path, OpenOptions::for_create()).await?;
        file.write_all_at(&encode_header(self.page_size), 0).await?;
        file.sync().await?;

        self.size.store(0, Ordering::Release);
        self.dirty_counter.store(0, Ordering::Release);
        *handle = Some(Arc::new(file));

        debug!(path = %path.display(), page_size = self.page_size, "created paginated file");
        Ok(())
    }

    /// Opens an existing file, validating its header.
    ///
    /// A trailing partial page left by an interrupted write is cut off.
    pub async fn open(&self) -> IoResult<()> {
        let mut handle = self.handle.write().await;
        if handle.is_some() {
            return Err(IoError::already_open(self.path()));
        }
        *handle = Some(self.open_handle().await?);
        Ok(())
    }

    async fn open_handle(&self) -> IoResult<Arc<StandardFile>> {
        let path = self.path();
        let file = StandardFile::open(&path, OpenOptions::for_write()).await?;

        let physical = file.size().await?;
        if physical < FILE_HEADER_SIZE {
            return Err(IoError::corrupted(
                &path,
                format!("file size {physical} is smaller than the header region"),
            ));
        }

        let mut header = [0u8; HEADER_FIELDS_SIZE + 4];
        file.read_exact_at(&mut header, 0).await?;
        decode_header(&header, self.page_size).map_err(|reason| IoError::corrupted(&path, reason))?;

        let data_len = physical - FILE_HEADER_SIZE;
        let trailing = data_len % self.page_size as u64;
        if trailing != 0 {
            warn!(
                path = %path.display(),
                physical_size = physical,
                trailing_bytes = trailing,
                "truncating partial trailing page"
            );
            file.set_len(physical - trailing).await?;
            file.sync().await?;
        }

        self.size.store(data_len - trailing, Ordering::Release);
        self.dirty_counter.store(0, Ordering::Release);
        Ok(Arc::new(file))
    }

    /// Closes the open handle, if any.
    pub async fn close(&self) -> IoResult<()> {
        let mut handle = self.handle.write().await;
        handle.take();
        Ok(())
    }

    /// Reserves `len` bytes at the end of the logical file.
    ///
    /// Returns the offset of the reserved region. The physical file grows
    /// when the region is written.
    pub fn allocate_space(&self, len: u64) -> u64 {
        self.size.fetch_add(len, Ordering::AcqRel)
    }

    fn check_bounds(&self, offset: u64, len: usize) -> IoResult<()> {
        let size = self.size();
        match offset.checked_add(len as u64) {
            Some(end) if end <= size => Ok(()),
            _ => Err(IoError::out_of_bounds(offset, len, size)),
        }
    }

    /// Writes `buf` at logical `offset`.
    pub async fn write(&self, offset: u64, buf: &[u8]) -> IoResult<()> {
        let handle = self.handle.read().await;
        let file = handle
            .as_ref()
            .ok_or_else(|| IoError::not_open(self.path()))?;
        self.write_locked(file, offset, buf).await
    }

    /// Writes a batch of `(offset, bytes)` pairs under a single shared lock.
    pub async fn write_pages(&self, pages: &[(u64, Bytes)]) -> IoResult<()> {
        let handle = self.handle.read().await;
        let file = handle
            .as_ref()
            .ok_or_else(|| IoError::not_open(self.path()))?;
        for (offset, buf) in pages {
            self.write_locked(file, *offset, buf).await?;
        }
        Ok(())
    }

    async fn write_locked(&self, file: &StandardFile, offset: u64, buf: &[u8]) -> IoResult<()> {
        self.check_bounds(offset, buf.len())?;

        let _permit = self
            .flush_gate
            .acquire()
            .await
            .map_err(|_| IoError::not_open(self.path()))?;
        file.write_all_at(buf, offset + FILE_HEADER_SIZE).await?;
        self.dirty_counter.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Reads `buf.len()` bytes at logical `offset`.
    ///
    /// When the physical file ends early the remainder is zero-filled, or
    /// `UnexpectedEof` is returned if `throw_on_eof` is set.
    pub async fn read(&self, offset: u64, buf: &mut [u8], throw_on_eof: bool) -> IoResult<()> {
        let handle = self.handle.read().await;
        let file = handle
            .as_ref()
            .ok_or_else(|| IoError::not_open(self.path()))?;
        self.check_bounds(offset, buf.len())?;

        let mut filled = 0;
        while filled < buf.len() {
            let position = offset + filled as u64;
            let n = file
                .read_at(&mut buf[filled..], position + FILE_HEADER_SIZE)
                .await?;
            if n == 0 {
                if throw_on_eof {
                    return Err(IoError::UnexpectedEof {
                        offset: position,
                        remaining: buf.len() - filled,
                    });
                }
                buf[filled..].fill(0);
                break;
            }
            filled += n;
        }
        Ok(())
    }

    /// Makes all completed writes durable.
    ///
    /// Does nothing if no write happened since the last call.
    pub async fn synch(&self) -> IoResult<()> {
        let handle = self.handle.read().await;
        let file = handle
            .as_ref()
            .ok_or_else(|| IoError::not_open(self.path()))?;

        let _permits = self
            .flush_gate
            .acquire_many(MAX_CONCURRENT_IOS as u32)
            .await
            .map_err(|_| IoError::not_open(self.path()))?;
        if self.dirty_counter.load(Ordering::Acquire) > 0 {
            file.datasync().await?;
            self.dirty_counter.store(0, Ordering::Release);
        }
        Ok(())
    }

    /// Cuts the file down to `size` logical bytes.
    pub async fn shrink(&self, size: u64) -> IoResult<()> {
        let handle = self.handle.write().await;
        let file = handle
            .as_ref()
            .ok_or_else(|| IoError::not_open(self.path()))?;

        let current = self.size();
        if size > current {
            return Err(IoError::out_of_bounds(current, (size - current) as usize, current));
        }
        file.set_len(FILE_HEADER_SIZE + size).await?;
        self.size.store(size, Ordering::Release);
        Ok(())
    }

    /// Moves the backing file to `new_path` and reopens it there.
    pub async fn rename_to(&self, new_path: impl AsRef<Path>) -> IoResult<()> {
        let new_path = new_path.as_ref().to_path_buf();
        let mut handle = self.handle.write().await;
        let was_open = handle.take().is_some();

        FileManager::new().rename(self.path(), &new_path).await?;
        *self.path.write() = new_path;

        if was_open {
            *handle = Some(self.open_handle().await?);
        }
        Ok(())
    }

    /// Replaces this file's content with the file at `other`.
    ///
    /// The other file is moved into place and must carry a valid header.
    pub async fn replace_content_with(&self, other: impl AsRef<Path>) -> IoResult<()> {
        let mut handle = self.handle.write().await;
        handle.take();

        FileManager::new().rename(other.as_ref(), self.path()).await?;
        *handle = Some(self.open_handle().await?);
        Ok(())
    }

    /// Closes and removes the backing file.
    pub async fn delete(&self) -> IoResult<()> {
        let mut handle = self.handle.write().await;
        handle.take();

        FileManager::new().remove(self.path()).await?;
        self.size.store(0, Ordering::Release);
        self.dirty_counter.store(0, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for PaginatedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginatedFile")
            .field("path", &*self.path.read())
            .field("page_size", &self.page_size)
            .field("size", &self.size())
            .field("dirty_writes", &self.dirty_writes())
            .finish()
    }
}

fn encode_header(page_size: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FILE_HEADER_SIZE as usize);
    buf.put_slice(&FILE_MAGIC);
    buf.put_u32_le(FILE_FORMAT_VERSION);
    buf.put_u32_le(page_size as u32);
    let crc = crc32fast::hash(&buf[..HEADER_FIELDS_SIZE]);
    buf.put_u32_le(crc);
    buf.resize(FILE_HEADER_SIZE as usize, 0);
    buf
}

fn decode_header(header: &[u8], page_size: usize) -> Result<(), String> {
    let expected_crc = crc32fast::hash(&header[..HEADER_FIELDS_SIZE]);

    let mut buf = header;
    let mut magic = [0u8; 8];
    buf.copy_to_slice(&mut magic);
    let version = buf.get_u32_le();
    let stored_page_size = buf.get_u32_le();
    let crc = buf.get_u32_le();

    if magic != FILE_MAGIC {
        return Err("bad magic".to_string());
    }
    if crc != expected_crc {
        return Err(format!(
            "header checksum mismatch: stored {crc:#010x}, computed {expected_crc:#010x}"
        ));
    }
    if version != FILE_FORMAT_VERSION {
        return Err(format!("unsupported format version {version}"));
    }
    if stored_page_size as usize != page_size {
        return Err(format!(
            "page size mismatch: file has {stored_page_size}, expected {page_size}"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PAGE: usize = 4096;

    async fn created(dir: &Path, name: &str) -> PaginatedFile {
        let file = PaginatedFile::new(dir.join(name), PAGE);
        file.create().await.unwrap();
        file
    }

    #[tokio::test]
    async fn test_create_then_reopen() {
        let dir = tempdir().unwrap();
        let file = created(dir.path(), "a.pcl").await;
        assert!(file.is_open().await);
        assert_eq!(file.name(), "a.pcl");

        let offset = file.allocate_space(PAGE as u64);
        assert_eq!(offset, 0);
        file.write(0, &[7u8; PAGE]).await.unwrap();
        file.synch().await.unwrap();
        file.close().await.unwrap();

        let reopened = PaginatedFile::new(dir.path().join("a.pcl"), PAGE);
        reopened.open().await.unwrap();
        assert_eq!(reopened.size(), PAGE as u64);

        let mut buf = vec![0u8; PAGE];
        reopened.read(0, &mut buf, true).await.unwrap();
        assert!(buf.iter().all(|&b| b == 7));
    }

    #[tokio::test]
    async fn test_create_errors() {
        let dir = tempdir().unwrap();
        let file = created(dir.path(), "b.pcl").await;
        assert!(matches!(file.create().await, Err(IoError::AlreadyOpen { .. })));
        assert!(matches!(file.open().await, Err(IoError::AlreadyOpen { .. })));

        let other = PaginatedFile::new(dir.path().join("b.pcl"), PAGE);
        assert!(matches!(other.create().await, Err(IoError::AlreadyExists { .. })));

        let missing = PaginatedFile::new(dir.path().join("missing.pcl"), PAGE);
        assert!(missing.open().await.unwrap_err().is_not_found());
        assert!(!missing.exists().await);
    }

    #[tokio::test]
    async fn test_partial_trailing_page_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.pcl");
        {
            let file = created(dir.path(), "torn.pcl").await;
            file.allocate_space(2 * PAGE as u64);
            file.write(0, &[1u8; PAGE]).await.unwrap();
            file.write(PAGE as u64, &[2u8; PAGE]).await.unwrap();
            file.close().await.unwrap();
        }

        let std_file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        std::io::Write::write_all(&mut &std_file, &[9u8; 100]).unwrap();
        drop(std_file);

        let file = PaginatedFile::new(&path, PAGE);
        file.open().await.unwrap();
        assert_eq!(file.size(), 2 * PAGE as u64);
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            FILE_HEADER_SIZE + 2 * PAGE as u64
        );

        let mut buf = vec![0u8; PAGE];
        file.read(PAGE as u64, &mut buf, true).await.unwrap();
        assert!(buf.iter().all(|&b| b == 2));
    }

    #[tokio::test]
    async fn test_header_validation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.pcl");
        {
            let file = created(dir.path(), "bad.pcl").await;
            file.close().await.unwrap();
        }

        let wrong_size = PaginatedFile::new(&path, PAGE * 2);
        assert!(wrong_size.open().await.unwrap_err().is_corruption());

        let mut raw = std::fs::read(&path).unwrap();
        raw[0] = b'X';
        std::fs::write(&path, &raw).unwrap();
        let file = PaginatedFile::new(&path, PAGE);
        assert!(file.open().await.unwrap_err().is_corruption());

        std::fs::write(&path, [0u8; 10]).unwrap();
        assert!(file.open().await.unwrap_err().is_corruption());
    }

    #[tokio::test]
    async fn test_read_past_physical_end() {
        let dir = tempdir().unwrap();
        let file = created(dir.path(), "eof.pcl").await;
        file.allocate_space(PAGE as u64);

        let mut buf = vec![0xAAu8; PAGE];
        file.read(0, &mut buf, false).await.unwrap();
        assert!(buf.iter().all(|&b| b == 0));

        let result = file.read(0, &mut buf, true).await;
        assert!(matches!(
            result,
            Err(IoError::UnexpectedEof { offset: 0, remaining }) if remaining == PAGE
        ));
    }

    #[tokio::test]
    async fn test_bounds_checked() {
        let dir = tempdir().unwrap();
        let file = created(dir.path(), "bounds.pcl").await;
        file.allocate_space(PAGE as u64);

        let err = file.write(PAGE as u64 - 1, &[0u8; 2]).await.unwrap_err();
        assert!(matches!(err, IoError::OutOfBounds { .. }));

        let mut buf = [0u8; 1];
        let err = file.read(PAGE as u64, &mut buf, false).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_synch_resets_dirty_counter() {
        let dir = tempdir().unwrap();
        let file = created(dir.path(), "dirty.pcl").await;
        file.allocate_space(2 * PAGE as u64);

        file.write_pages(&[
            (0, Bytes::from(vec![1u8; PAGE])),
            (PAGE as u64, Bytes::from(vec![2u8; PAGE])),
        ])
        .await
        .unwrap();
        assert_eq!(file.dirty_writes(), 2);

        file.synch().await.unwrap();
        assert_eq!(file.dirty_writes(), 0);

        file.synch().await.unwrap();
        assert_eq!(file.dirty_writes(), 0);
    }

    #[tokio::test]
    async fn test_shrink() {
        let dir = tempdir().unwrap();
        let file = created(dir.path(), "shrink.pcl").await;
        file.allocate_space(3 * PAGE as u64);
        file.write(2 * PAGE as u64, &[5u8; PAGE]).await.unwrap();

        file.shrink(PAGE as u64).await.unwrap();
        assert_eq!(file.size(), PAGE as u64);
        assert_eq!(file.page_count(), 1);
        assert!(file.shrink(2 * PAGE as u64).await.is_err());
    }

    #[tokio::test]
    async fn test_rename_replace_delete() {
        let dir = tempdir().unwrap();
        let file = created(dir.path(), "old.pcl").await;
        file.allocate_space(PAGE as u64);
        file.write(0, &[3u8; PAGE]).await.unwrap();

        file.rename_to(dir.path().join("new.pcl")).await.unwrap();
        assert_eq!(file.name(), "new.pcl");
        assert!(file.is_open().await);
        assert_eq!(file.size(), PAGE as u64);

        let other = created(dir.path(), "other.pcl").await;
        other.allocate_space(2 * PAGE as u64);
        other.write(PAGE as u64, &[4u8; PAGE]).await.unwrap();
        other.close().await.unwrap();

        file.replace_content_with(dir.path().join("other.pcl"))
            .await
            .unwrap();
        assert_eq!(file.size(), 2 * PAGE as u64);
        let mut buf = vec![0u8; PAGE];
        file.read(PAGE as u64, &mut buf, true).await.unwrap();
        assert!(buf.iter().all(|&b| b == 4));

        file.delete().await.unwrap();
        assert!(!file.exists().await);
        assert!(!file.is_open().await);
    }
}
