//! Cache entry - a cached page image with pin count and dirty flag.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use vellum_common::types::{FileId, Lsn, PageKey};

use crate::page::DurablePage;

/// Shared handle to a cached page.
pub type CachePointer = Arc<CacheEntry>;

/// A cached page.
///
/// The pin count and dirty flag are atomics so that pinning never contends
/// with readers of the page image.
pub struct CacheEntry {
    key: PageKey,
    data: RwLock<Vec<u8>>,
    pin_count: AtomicU32,
    dirty: AtomicBool,
}

impl CacheEntry {
    /// Creates an entry holding `data`.
    pub fn new(key: PageKey, data: Vec<u8>) -> Self {
        Self {
            key,
            data: RwLock::new(data),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    /// Returns the page key.
    #[inline]
    pub fn key(&self) -> PageKey {
        self.key
    }

    /// Returns the owning file.
    #[inline]
    pub fn file_id(&self) -> FileId {
        self.key.file_id
    }

    /// Returns the page index inside the file.
    #[inline]
    pub fn page_index(&self) -> u64 {
        self.key.page_index
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "unpinned cache entry with pin_count = 0");
        old - 1
    }

    /// Returns true if the entry is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Returns true if the page differs from its on-disk image.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sets the dirty flag.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// Returns the LSN stamped in the page header.
    pub fn lsn(&self) -> Lsn {
        DurablePage::new(&self.data.read()[..]).lsn()
    }

    /// Returns a read lock on the page data.
    #[inline]
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Vec<u8>> {
        self.data.read()
    }

    /// Returns a write lock on the page data.
    #[inline]
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Vec<u8>> {
        self.data.write()
    }

    /// Copies the page image.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("pin_count", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
