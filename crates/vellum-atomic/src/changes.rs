//! Staged changes of an atomic operation.
//!
//! Pages touched by an operation are copied out of the page cache into a
//! [`StagedPage`]. All reads and writes of the operation go to that copy;
//! the cache only sees the changes when the operation commits.
//!
//! ```text
//!            FileChanges (per file)
//!   ┌────────────────────────────────────────┐
//!   │ is_new | truncate | file_name          │
//!   │ max_new_page: Unknown | Empty | Index  │
//!   │ pages: page_index -> StagedPage        │
//!   └───────────────────┬────────────────────┘
//!                       ▼
//!   StagedPage: original image | current image | diffs | LSNs
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use vellum_common::types::{FileId, Lsn, PageKey};
use vellum_storage::cache::CachePointer;
use vellum_wal::PageDiff;

use crate::error::{AtomicOperationError, AtomicResult};

/// Highest page index allocated by an operation in one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaxNewPage {
    /// No page was added yet; the file length comes from the cache.
    #[default]
    Unknown,
    /// The file is empty as far as the operation is concerned.
    Empty,
    /// Highest page index added by the operation.
    Index(u64),
}

impl MaxNewPage {
    /// Returns the index the next added page takes, if known locally.
    pub fn next_index(self) -> Option<u64> {
        match self {
            Self::Unknown => None,
            Self::Empty => Some(0),
            Self::Index(n) => Some(n + 1),
        }
    }

    /// Returns the legacy numeric encoding: -2 unknown, -1 empty, else the index.
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Unknown => -2,
            Self::Empty => -1,
            Self::Index(n) => n as i64,
        }
    }
}

/// Staged changes of one file.
#[derive(Debug, Default)]
pub struct FileChanges {
    /// The file is created by the operation.
    pub is_new: bool,
    /// The file is cut to zero pages by the operation. Together with
    /// `is_new` it marks a file deleted and created again under its old id.
    pub truncate: bool,
    /// Name of a file created by the operation.
    pub file_name: Option<String>,
    /// Highest page index added by the operation.
    pub max_new_page: MaxNewPage,
    /// Staged pages in index order.
    pub pages: BTreeMap<u64, StagedPage>,
}

impl FileChanges {
    /// Creates the changes of a file created by the operation.
    pub fn created(file_name: impl Into<String>) -> Self {
        Self {
            is_new: true,
            truncate: false,
            file_name: Some(file_name.into()),
            max_new_page: MaxNewPage::Empty,
            pages: BTreeMap::new(),
        }
    }

    /// Returns true if the file existed before and is recreated by the operation.
    pub fn is_revived(&self) -> bool {
        self.is_new && self.truncate
    }

    /// Drops every staged page and returns the cache pointers they still hold.
    pub(crate) fn clear_pages(&mut self) -> Vec<CachePointer> {
        let pointers = self
            .pages
            .values()
            .filter_map(StagedPage::take_delegate)
            .collect();
        self.pages.clear();
        pointers
    }
}

/// Mutable state behind a [`StagedPage`].
struct PageChanges {
    key: PageKey,
    /// Cache entry pinned while the page is loaded by the operation.
    delegate: Option<CachePointer>,
    is_new: bool,
    original: Vec<u8>,
    current: Vec<u8>,
    /// Diffs of every mutation, in application order.
    changes: Vec<PageDiff>,
    initial_lsn: Lsn,
    change_lsn: Lsn,
}

/// Shared handle to a page staged by an atomic operation.
///
/// Clones refer to the same staged page, so changes made through one handle
/// are seen through every other.
#[derive(Clone)]
pub struct StagedPage(Arc<Mutex<PageChanges>>);

impl StagedPage {
    /// Stages a page loaded from the cache. The pointer stays pinned until
    /// the page is released.
    pub(crate) fn from_cache(pointer: CachePointer) -> Self {
        let image = pointer.snapshot();
        Self(Arc::new(Mutex::new(PageChanges {
            key: pointer.key(),
            initial_lsn: pointer.lsn(),
            delegate: Some(pointer),
            is_new: false,
            original: image.clone(),
            current: image,
            changes: Vec::new(),
            change_lsn: Lsn::INVALID,
        })))
    }

    /// Stages a zeroed page added by the operation.
    pub(crate) fn new_page(key: PageKey, page_size: usize) -> Self {
        Self(Arc::new(Mutex::new(PageChanges {
            key,
            delegate: None,
            is_new: true,
            original: vec![0u8; page_size],
            current: vec![0u8; page_size],
            changes: Vec::new(),
            initial_lsn: Lsn::INVALID,
            change_lsn: Lsn::INVALID,
        })))
    }

    /// Returns the page key.
    pub fn key(&self) -> PageKey {
        self.0.lock().key
    }

    /// Returns the owning file.
    pub fn file_id(&self) -> FileId {
        self.key().file_id
    }

    /// Returns the page index inside the file.
    pub fn page_index(&self) -> u64 {
        self.key().page_index
    }

    /// Returns true if the page was added by the operation.
    pub fn is_new(&self) -> bool {
        self.0.lock().is_new
    }

    /// Returns the page LSN at the time the operation first loaded the page.
    pub fn initial_lsn(&self) -> Lsn {
        self.0.lock().initial_lsn
    }

    /// Returns the LSN of the update record logged for this page.
    pub fn change_lsn(&self) -> Lsn {
        self.0.lock().change_lsn
    }

    pub(crate) fn set_change_lsn(&self, lsn: Lsn) {
        self.0.lock().change_lsn = lsn;
    }

    /// Returns the page size.
    pub fn page_size(&self) -> usize {
        self.0.lock().current.len()
    }

    /// Runs `f` over the staged page image.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(self.0.lock().current.as_slice())
    }

    /// Runs `f` over the staged page image and records the resulting diff.
    pub fn update<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut state = self.0.lock();
        let before = state.current.clone();
        let result = f(state.current.as_mut_slice());
        let diff = PageDiff::between(&before, &state.current);
        if !diff.is_empty() {
            state.changes.push(diff);
        }
        result
    }

    /// Writes `bytes` at `offset`.
    pub fn write(&self, offset: usize, bytes: &[u8]) -> AtomicResult<()> {
        let range = page_range(offset, bytes.len(), self.page_size())?;
        self.update(|data| data[range].copy_from_slice(bytes));
        Ok(())
    }

    /// Copies `len` bytes at `offset` out of the staged image.
    pub fn read_at(&self, offset: usize, len: usize) -> AtomicResult<Bytes> {
        self.read(|data| {
            let range = page_range(offset, len, data.len())?;
            Ok(Bytes::copy_from_slice(&data[range]))
        })
    }

    /// Returns a copy of the staged image.
    pub fn snapshot(&self) -> Vec<u8> {
        self.0.lock().current.clone()
    }

    /// Returns the recorded diffs, in application order.
    pub fn changes(&self) -> Vec<PageDiff> {
        self.0.lock().changes.clone()
    }

    /// Returns true if the staged image differs from the loaded one.
    ///
    /// Mutations that were reverted later do not count.
    pub fn has_changes(&self) -> bool {
        let state = self.0.lock();
        !state.changes.is_empty() && state.original != state.current
    }

    /// Returns the canonical diff from the loaded image to the staged one.
    pub fn net_diff(&self) -> PageDiff {
        let state = self.0.lock();
        PageDiff::between(&state.original, &state.current)
    }

    pub(crate) fn has_delegate(&self) -> bool {
        self.0.lock().delegate.is_some()
    }

    pub(crate) fn set_delegate(&self, pointer: CachePointer) {
        self.0.lock().delegate = Some(pointer);
    }

    pub(crate) fn take_delegate(&self) -> Option<CachePointer> {
        self.0.lock().delegate.take()
    }
}

impl fmt::Debug for StagedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.lock();
        f.debug_struct("StagedPage")
            .field("key", &state.key)
            .field("is_new", &state.is_new)
            .field("changes", &state.changes.len())
            .field("initial_lsn", &state.initial_lsn)
            .field("change_lsn", &state.change_lsn)
            .finish()
    }
}

/// A page loaded for reading by an atomic operation.
#[derive(Debug, Clone)]
pub enum PageView {
    /// The page is staged by the operation.
    Staged(StagedPage),
    /// The page comes straight from the cache and is pinned there.
    Cached(CachePointer),
}

impl PageView {
    /// Returns the page key.
    pub fn key(&self) -> PageKey {
        match self {
            Self::Staged(page) => page.key(),
            Self::Cached(pointer) => pointer.key(),
        }
    }

    /// Returns the page index inside the file.
    pub fn page_index(&self) -> u64 {
        self.key().page_index
    }

    /// Runs `f` over the page image visible to the operation.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        match self {
            Self::Staged(page) => page.read(f),
            Self::Cached(pointer) => f(pointer.read_data().as_slice()),
        }
    }

    /// Copies `len` bytes at `offset`.
    pub fn read_at(&self, offset: usize, len: usize) -> AtomicResult<Bytes> {
        self.read(|data| {
            let range = page_range(offset, len, data.len())?;
            Ok(Bytes::copy_from_slice(&data[range]))
        })
    }

    /// Returns true if the page is staged by the operation.
    pub fn is_staged(&self) -> bool {
        matches!(self, Self::Staged(_))
    }
}

/// Bounds `len` bytes at `offset` inside a page of `page_size` bytes.
fn page_range(offset: usize, len: usize, page_size: usize) -> AtomicResult<Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= page_size => Ok(offset..end),
        _ => Err(AtomicOperationError::PageOverflow {
            offset,
            len,
            page_size,
        }),
    }
}
