//! Shared page cache for Vellum.
//!
//! The page cache owns every open paginated file and the in-memory images
//! of their pages. Atomic operations read through it and, at commit, write
//! their changes into it; dirty pages reach disk on [`WriteCache::flush`].
//!
//! - **File Registry**: name ↔ id mapping, id booking and reuse of the id
//!   of a deleted file when its name comes back
//! - **Pin/Unpin**: reference counting for loaded pages
//! - **Dirty Tracking**: modified pages are written back on flush
//! - **Checksums**: stamped on write-back, verified on load
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      PageCache                       │
//! │  ┌────────────────────────────────────────────────┐  │
//! │  │ File Table   FileId -> (name, PaginatedFile)   │  │
//! │  └────────────────────────────────────────────────┘  │
//! │  ┌────────────────────────────────────────────────┐  │
//! │  │ Page Table   (FileId, page) -> CacheEntry      │  │
//! │  │              data[] | dirty | pin_count        │  │
//! │  └────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────┘
//! ```

mod entry;
mod error;
mod page_cache;

pub use entry::{CacheEntry, CachePointer};
pub use error::{CacheError, CacheResult};
pub use page_cache::PageCache;

use vellum_common::types::FileId;

/// Write-back page cache shared by all atomic operations.
///
/// All methods are internally synchronised.
#[allow(async_fn_in_trait)]
pub trait WriteCache: Send + Sync {
    /// Returns the page size of every cached file.
    fn page_size(&self) -> usize;

    /// Loads a page for reading and pins it.
    ///
    /// Returns `None` if the page lies beyond the end of the file. On a miss
    /// up to `page_count` consecutive pages are read.
    async fn load_for_read(
        &self,
        file_id: FileId,
        page_index: u64,
        page_count: usize,
        verify_checksums: bool,
    ) -> CacheResult<Option<CachePointer>>;

    /// Loads a page for writing and pins it.
    async fn load_for_write(
        &self,
        file_id: FileId,
        page_index: u64,
        page_count: usize,
        verify_checksums: bool,
    ) -> CacheResult<Option<CachePointer>>;

    /// Releases a page loaded for reading.
    fn release_from_read(&self, pointer: &CachePointer);

    /// Releases a page loaded for writing, marking it dirty if `changed`.
    fn release_from_write(&self, pointer: &CachePointer, changed: bool);

    /// Appends a zeroed page to the file and returns it pinned for writing.
    async fn allocate_new_page(&self, file_id: FileId) -> CacheResult<CachePointer>;

    /// Reserves an id for `name` without creating the file.
    ///
    /// A name whose file was deleted gets its previous id back.
    fn book_file_id(&self, name: &str) -> CacheResult<FileId>;

    /// Creates the file `name` under a previously booked id.
    async fn add_file(&self, name: &str, file_id: FileId) -> CacheResult<FileId>;

    /// Opens an existing file, registering it if needed.
    async fn load_file(&self, name: &str) -> CacheResult<FileId>;

    /// Deletes a file and drops its cached pages.
    async fn delete_file(&self, file_id: FileId) -> CacheResult<()>;

    /// Cuts a file down to zero pages and drops its cached pages.
    async fn truncate_file(&self, file_id: FileId) -> CacheResult<()>;

    /// Returns the name of a registered file.
    fn file_name_by_id(&self, file_id: FileId) -> Option<String>;

    /// Returns the id of a registered file.
    fn file_id_by_name(&self, name: &str) -> Option<FileId>;

    /// Returns true if a file with this name is registered.
    fn exists(&self, name: &str) -> bool;

    /// Returns true if a file with this id is registered.
    fn exists_id(&self, file_id: FileId) -> bool;

    /// Returns the number of pages in the file, including pages allocated in
    /// the cache but not yet written back.
    fn filled_up_to(&self, file_id: FileId) -> CacheResult<u64>;

    /// Writes every dirty page back and syncs the files.
    ///
    /// Dirty pages may carry changes whose log records are not yet durable.
    /// Callers flush the write-ahead log first; the atomic operations
    /// manager does both in that order.
    async fn flush(&self) -> CacheResult<()>;
}

/// Statistics for page cache monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of page loads served from memory.
    pub hits: u64,
    /// Number of page loads that required a disk read.
    pub misses: u64,
    /// Number of dirty pages written back.
    pub flushes: u64,
    /// Number of pages currently cached.
    pub cached_pages: usize,
    /// Number of cached pages awaiting write-back.
    pub dirty_pages: usize,
    /// Number of cached pages currently pinned.
    pub pinned_pages: usize,
}

impl CacheStats {
    /// Returns the cache hit ratio (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let loads = self.hits + self.misses;
        if loads == 0 {
            0.0
        } else {
            self.hits as f64 / loads as f64
        }
    }
}
