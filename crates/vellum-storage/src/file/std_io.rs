//! Tokio-backed file handle.
//!
//! Positioned std I/O runs on tokio's blocking pool. The std file sits behind
//! a mutex so that the seek fallback on non-Unix platforms stays consistent.

use std::fs::File as StdFile;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task;

use super::error::{IoError, IoResult};
use super::handle::FileHandle;
use super::options::OpenOptions;

/// File handle running blocking std I/O on the tokio blocking pool.
pub struct StandardFile {
    file: Arc<Mutex<StdFile>>,
    path: PathBuf,
    writable: bool,
}

impl StandardFile {
    /// Opens a file in the given mode.
    pub async fn open(path: impl AsRef<Path>, options: OpenOptions) -> IoResult<Self> {
        let path = path.as_ref().to_path_buf();
        let open_path = path.clone();

        let file = task::spawn_blocking(move || {
            options
                .to_std_options()
                .open(&open_path)
                .map_err(|e| IoError::from_io_with_path(e, &open_path))
        })
        .await??;

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path,
            writable: options.is_write(),
        })
    }

    /// Runs `op` against the std file on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> IoResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&StdFile) -> io::Result<T> + Send + 'static,
    {
        let file = Arc::clone(&self.file);
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let file = file.lock();
            op(&file).map_err(|e| IoError::from_io_with_path(e, &path))
        })
        .await?
    }

    fn check_writable(&self) -> IoResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(IoError::permission_denied(&self.path))
        }
    }
}

#[cfg(unix)]
fn pread(file: &StdFile, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(unix)]
fn pwrite(file: &StdFile, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(not(unix))]
fn pread(mut file: &StdFile, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(offset))?;
    file.read(buf)
}

#[cfg(not(unix))]
fn pwrite(mut file: &StdFile, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::io::{Seek, SeekFrom, Write};
    file.seek(SeekFrom::Start(offset))?;
    file.write(buf)
}

impl FileHandle for StandardFile {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn size(&self) -> IoResult<u64> {
        self.blocking(|file| file.metadata().map(|m| m.len())).await
    }

    async fn read_at(&self, buf: &mut [u8], offset: u64) -> IoResult<usize> {
        let mut owned = vec![0u8; buf.len()];
        let (n, owned) = self
            .blocking(move |file| {
                let n = pread(file, &mut owned, offset)?;
                Ok((n, owned))
            })
            .await?;
        buf[..n].copy_from_slice(&owned[..n]);
        Ok(n)
    }

    async fn write_at(&self, buf: &[u8], offset: u64) -> IoResult<usize> {
        self.check_writable()?;
        let owned = buf.to_vec();
        self.blocking(move |file| pwrite(file, &owned, offset)).await
    }

    async fn sync(&self) -> IoResult<()> {
        self.blocking(StdFile::sync_all).await
    }

    async fn datasync(&self) -> IoResult<()> {
        self.blocking(StdFile::sync_data).await
    }

    async fn set_len(&self, size: u64) -> IoResult<()> {
        self.check_writable()?;
        self.blocking(move |file| file.set_len(size)).await
    }
}

impl std::fmt::Debug for StandardFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardFile")
            .field("path", &self.path)
            .field("writable", &self.writable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn created(dir: &Path, name: &str) -> StandardFile {
        StandardFile::open(dir.join(name), OpenOptions::for_create())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_positioned_round_trip() {
        let dir = tempdir().unwrap();
        let file = created(dir.path(), "rw.pcl").await;
        assert_eq!(file.path(), dir.path().join("rw.pcl"));

        file.write_all_at(b"page image", 4096).await.unwrap();
        file.sync().await.unwrap();
        assert_eq!(file.size().await.unwrap(), 4096 + 10);

        let mut buf = [0u8; 10];
        file.read_exact_at(&mut buf, 4096).await.unwrap();
        assert_eq!(&buf, b"page image");

        // The gap before the write reads back as zeros
        let mut hole = vec![0xFFu8; 64];
        file.read_exact_at(&mut hole, 0).await.unwrap();
        assert!(hole.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_short_read_past_end() {
        let dir = tempdir().unwrap();
        let file = created(dir.path(), "short.pcl").await;
        file.write_all_at(b"Short", 0).await.unwrap();

        let mut buf = vec![0u8; 100];
        let result = file.read_exact_at(&mut buf, 0).await;
        assert!(matches!(result, Err(IoError::ShortIo { actual: 5, .. })));
    }

    #[tokio::test]
    async fn test_set_len_cuts_trailing_bytes() {
        let dir = tempdir().unwrap();
        let file = created(dir.path(), "len.pcl").await;

        file.set_len(3 * 1024 + 100).await.unwrap();
        file.set_len(3 * 1024).await.unwrap();
        file.datasync().await.unwrap();
        assert_eq!(file.size().await.unwrap(), 3 * 1024);
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.pcl");
        created(dir.path(), "ro.pcl")
            .await
            .write_all_at(b"data", 0)
            .await
            .unwrap();

        let file = StandardFile::open(&path, OpenOptions::for_read())
            .await
            .unwrap();
        assert!(matches!(
            file.write_at(b"new", 0).await,
            Err(IoError::PermissionDenied { .. })
        ));
        assert!(matches!(
            file.set_len(0).await,
            Err(IoError::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_existing_fails() {
        let dir = tempdir().unwrap();
        drop(created(dir.path(), "twice.pcl").await);

        let result = StandardFile::open(dir.path().join("twice.pcl"), OpenOptions::for_create()).await;
        assert!(matches!(result, Err(IoError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_page_reads() {
        let dir = tempdir().unwrap();
        let file = created(dir.path(), "concurrent.pcl").await;
        for i in 0..8u8 {
            file.write_all_at(&[i; 256], i as u64 * 256).await.unwrap();
        }

        let file = Arc::new(file);
        let mut handles = vec![];
        for i in 0..8u8 {
            let file = Arc::clone(&file);
            handles.push(tokio::spawn(async move {
                let mut buf = vec![0u8; 256];
                file.read_exact_at(&mut buf, i as u64 * 256).await.unwrap();
                assert!(buf.iter().all(|&b| b == i));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
