//! Atomic operations.
//!
//! An [`AtomicOperation`] stages every page and file mutation of one unit of
//! work. Nothing reaches the page cache before commit; the operation reads
//! its own writes through the staged copies.
//!
//! # Page access
//!
//! ```text
//! load_page_for_*(file, page)
//!        │
//!        ├── file deleted in this operation ──────▶ FileDeleted
//!        ├── page staged ─────────────────────────▶ staged copy
//!        ├── file created or truncated here ──────▶ None
//!        └── otherwise ───────────────────────────▶ page cache
//! ```

mod commit;

pub(crate) use commit::{apply_diff, load_or_allocate};

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use vellum_common::types::{FileId, Lsn, OperationUnitId, PageKey};
use vellum_storage::cache::{CachePointer, WriteCache};
use vellum_wal::MetadataValue;

use crate::changes::{FileChanges, MaxNewPage, PageView, StagedPage};
use crate::error::{AtomicOperationError, AtomicResult};

/// Position of a bucket inside a bonsai tree file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BonsaiPointer {
    /// Page holding the bucket.
    pub page_index: u64,
    /// Offset of the bucket inside the page.
    pub page_offset: u32,
}

impl BonsaiPointer {
    /// Creates a pointer.
    pub const fn new(page_index: u64, page_offset: u32) -> Self {
        Self {
            page_index,
            page_offset,
        }
    }
}

/// One unit of work over the paginated files of a page cache.
///
/// An operation is used by a single writer. It is consumed by exactly one
/// successful [`commit_changes`](Self::commit_changes), or dropped, which
/// discards every staged change.
pub struct AtomicOperation<C: WriteCache> {
    unit: OperationUnitId,
    cache: Arc<C>,
    verify_checksums: bool,
    prefetch_pages: usize,

    file_changes: BTreeMap<FileId, FileChanges>,
    new_file_names: HashMap<String, FileId>,
    deleted_files: BTreeSet<FileId>,
    deleted_file_name_ids: HashMap<String, FileId>,

    locked_objects: HashSet<String>,
    metadata: BTreeMap<String, MetadataValue>,
    deleted_bonsai_pointers: HashSet<BonsaiPointer>,
    deleted_record_positions: HashMap<(i32, u64), HashSet<u32>>,
    rollback: bool,
    component_operations: u32,

    start_lsn: Option<Lsn>,
    commit_lsn: Option<Lsn>,
    applied: bool,
}

impl<C: WriteCache> AtomicOperation<C> {
    /// Creates an empty operation over `cache`.
    pub fn new(unit: OperationUnitId, cache: Arc<C>) -> Self {
        Self {
            unit,
            cache,
            verify_checksums: true,
            prefetch_pages: 1,
            file_changes: BTreeMap::new(),
            new_file_names: HashMap::new(),
            deleted_files: BTreeSet::new(),
            deleted_file_name_ids: HashMap::new(),
            locked_objects: HashSet::new(),
            metadata: BTreeMap::new(),
            deleted_bonsai_pointers: HashSet::new(),
            deleted_record_positions: HashMap::new(),
            rollback: false,
            component_operations: 0,
            start_lsn: None,
            commit_lsn: None,
            applied: false,
        }
    }

    /// Sets whether page checksums are verified on read.
    #[must_use]
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Sets how many pages a read miss loads ahead.
    #[must_use]
    pub fn with_prefetch_pages(mut self, pages: usize) -> Self {
        self.prefetch_pages = pages.max(1);
        self
    }

    /// Returns the operation unit id.
    pub fn unit_id(&self) -> OperationUnitId {
        self.unit
    }

    /// Returns the log position taken right before the first record of this
    /// operation was written.
    pub fn start_lsn(&self) -> Option<Lsn> {
        self.start_lsn
    }

    /// Returns the LSN of the atomic-unit-end record, once logged.
    pub fn commit_lsn(&self) -> Option<Lsn> {
        self.commit_lsn
    }

    /// Returns true once the changes were logged.
    pub fn is_committed(&self) -> bool {
        self.commit_lsn.is_some()
    }

    /// Returns the staged changes of a file.
    pub fn file_changes(&self, file_id: FileId) -> Option<&FileChanges> {
        self.file_changes.get(&file_id)
    }

    fn ensure_active(&self) -> AtomicResult<()> {
        if self.is_committed() {
            return Err(AtomicOperationError::AlreadyCommitted { unit: self.unit });
        }
        Ok(())
    }

    fn check_not_deleted(&self, file_id: FileId) -> AtomicResult<()> {
        if self.deleted_files.contains(&file_id) {
            return Err(AtomicOperationError::FileDeleted { file_id });
        }
        Ok(())
    }

    fn release_pointers(&self, pointers: Vec<CachePointer>) {
        for pointer in pointers {
            self.cache.release_from_write(&pointer, false);
        }
    }

    // -------------------------------------------------------------------
    // Page access
    // -------------------------------------------------------------------

    /// Loads a page for writing.
    ///
    /// The first load copies the page out of the cache; later loads return
    /// the same staged page. Returns `None` if the page does not exist for
    /// this operation.
    pub async fn load_page_for_write(
        &mut self,
        file_id: FileId,
        page_index: u64,
        page_count: usize,
        verify_checksums: bool,
    ) -> AtomicResult<Option<StagedPage>> {
        self.ensure_active()?;
        self.check_not_deleted(file_id)?;

        if let Some(changes) = self.file_changes.get(&file_id) {
            if let Some(page) = changes.pages.get(&page_index) {
                let page = page.clone();
                if !page.is_new() && !page.has_delegate() {
                    let pointer = self
                        .cache
                        .load_for_write(file_id, page_index, page_count, verify_checksums)
                        .await?;
                    if let Some(pointer) = pointer {
                        page.set_delegate(pointer);
                    }
                }
                return Ok(Some(page));
            }
            if changes.is_new || changes.truncate {
                return Ok(None);
            }
        }

        let pointer = self
            .cache
            .load_for_write(file_id, page_index, page_count, verify_checksums)
            .await?;
        let Some(pointer) = pointer else {
            return Ok(None);
        };

        let page = StagedPage::from_cache(pointer);
        self.file_changes
            .entry(file_id)
            .or_default()
            .pages
            .insert(page_index, page.clone());
        Ok(Some(page))
    }

    /// Loads a page for reading.
    ///
    /// Staged pages are returned as they are, so the operation sees its own
    /// writes. Other pages are read from the cache and stay pinned until
    /// [`release_page_from_read`](Self::release_page_from_read).
    pub async fn load_page_for_read(
        &self,
        file_id: FileId,
        page_index: u64,
    ) -> AtomicResult<Option<PageView>> {
        self.ensure_active()?;
        self.check_not_deleted(file_id)?;

        if let Some(changes) = self.file_changes.get(&file_id) {
            if let Some(page) = changes.pages.get(&page_index) {
                return Ok(Some(PageView::Staged(page.clone())));
            }
            if changes.is_new || changes.truncate {
                return Ok(None);
            }
        }

        let pointer = self
            .cache
            .load_for_read(
                file_id,
                page_index,
                self.prefetch_pages,
                self.verify_checksums,
            )
            .await?;
        Ok(pointer.map(PageView::Cached))
    }

    /// Releases a page loaded for reading.
    pub fn release_page_from_read(&self, view: PageView) {
        if let PageView::Cached(pointer) = view {
            self.cache.release_from_read(&pointer);
        }
    }

    /// Releases the cache pin of a page loaded for writing. The staged
    /// changes are kept.
    pub fn release_page_from_write(&self, page: StagedPage) {
        if let Some(pointer) = page.take_delegate() {
            self.cache.release_from_write(&pointer, false);
        }
    }

    /// Adds a zeroed page at the end of the file.
    pub fn add_page(&mut self, file_id: FileId) -> AtomicResult<StagedPage> {
        self.ensure_active()?;
        self.check_not_deleted(file_id)?;

        let local_next = self
            .file_changes
            .get(&file_id)
            .and_then(|changes| changes.max_new_page.next_index());
        let page_index = match local_next {
            Some(next) => next,
            None => self.cache.filled_up_to(file_id)?,
        };

        let page = StagedPage::new_page(PageKey::new(file_id, page_index), self.cache.page_size());
        let changes = self.file_changes.entry(file_id).or_default();
        changes.max_new_page = MaxNewPage::Index(page_index);
        changes.pages.insert(page_index, page.clone());
        Ok(page)
    }

    /// Returns the number of pages of the file as seen by this operation.
    pub fn filled_up_to(&self, file_id: FileId) -> AtomicResult<u64> {
        self.check_not_deleted(file_id)?;

        match self.file_changes.get(&file_id) {
            Some(changes) if changes.is_new || changes.truncate => {
                Ok(changes.max_new_page.next_index().unwrap_or(0))
            }
            Some(changes) => {
                let cached = self.cache.filled_up_to(file_id)?;
                Ok(changes
                    .max_new_page
                    .next_index()
                    .map_or(cached, |next| next.max(cached)))
            }
            None => Ok(self.cache.filled_up_to(file_id)?),
        }
    }

    // -------------------------------------------------------------------
    // File lifecycle
    // -------------------------------------------------------------------

    /// Creates a file.
    ///
    /// A file deleted earlier in this operation comes back under its
    /// original id, with no pages.
    pub fn add_file(&mut self, name: &str) -> AtomicResult<FileId> {
        self.ensure_active()?;

        if self.new_file_names.contains_key(name) {
            return Err(AtomicOperationError::file_already_exists(name));
        }

        let (file_id, revived) = match self.deleted_file_name_ids.remove(name) {
            Some(file_id) => {
                self.deleted_files.remove(&file_id);
                (file_id, true)
            }
            None => {
                if self.cache.exists(name) {
                    return Err(AtomicOperationError::file_already_exists(name));
                }
                (self.cache.book_file_id(name)?, false)
            }
        };

        self.new_file_names.insert(name.to_string(), file_id);
        let mut changes = FileChanges::created(name);
        changes.truncate = revived;
        if let Some(mut previous) = self.file_changes.insert(file_id, changes) {
            let pointers = previous.clear_pages();
            self.release_pointers(pointers);
        }

        debug!(unit = %self.unit, name, %file_id, revived, "staged file creation");
        Ok(file_id)
    }

    /// Opens an existing file.
    pub async fn load_file(&mut self, name: &str) -> AtomicResult<FileId> {
        self.ensure_active()?;

        if let Some(file_id) = self.new_file_names.get(name) {
            return Ok(*file_id);
        }
        if let Some(file_id) = self.deleted_file_name_ids.get(name) {
            return Err(AtomicOperationError::FileDeleted { file_id: *file_id });
        }
        Ok(self.cache.load_file(name).await?)
    }

    /// Deletes a file.
    ///
    /// Deleting a file created by this operation cancels the creation.
    pub fn delete_file(&mut self, file_id: FileId) -> AtomicResult<()> {
        self.ensure_active()?;
        self.check_not_deleted(file_id)?;

        let created_here = self
            .file_changes
            .get(&file_id)
            .map_or(false, |changes| changes.is_new);

        let name = if created_here {
            None
        } else {
            Some(
                self.cache
                    .file_name_by_id(file_id)
                    .ok_or(AtomicOperationError::FileIdNotFound { file_id })?,
            )
        };

        if let Some(mut changes) = self.file_changes.remove(&file_id) {
            let pointers = changes.clear_pages();
            self.release_pointers(pointers);

            if created_here {
                let revived = changes.is_revived();
                if let Some(name) = changes.file_name.take() {
                    self.new_file_names.remove(&name);
                    if revived {
                        self.deleted_files.insert(file_id);
                        self.deleted_file_name_ids.insert(name, file_id);
                    }
                }
                return Ok(());
            }
        }

        if let Some(name) = name {
            self.deleted_files.insert(file_id);
            self.deleted_file_name_ids.insert(name, file_id);
        }
        Ok(())
    }

    /// Cuts a file down to zero pages.
    ///
    /// Truncation of a file that existed before the operation is applied at
    /// commit but is not restored by log replay.
    pub fn truncate_file(&mut self, file_id: FileId) -> AtomicResult<()> {
        self.ensure_active()?;
        self.check_not_deleted(file_id)?;

        let is_new = self
            .file_changes
            .get(&file_id)
            .map_or(false, |changes| changes.is_new);
        if !is_new && !self.cache.exists_id(file_id) {
            return Err(AtomicOperationError::FileIdNotFound { file_id });
        }

        let changes = self.file_changes.entry(file_id).or_default();
        let pointers = changes.clear_pages();
        changes.max_new_page = MaxNewPage::Empty;
        if !changes.is_new {
            changes.truncate = true;
            warn!(unit = %self.unit, %file_id, "file truncated inside an atomic operation");
        }
        self.release_pointers(pointers);
        Ok(())
    }

    /// Returns true if the file exists as seen by this operation.
    pub fn is_file_exists(&self, name: &str) -> bool {
        if self.new_file_names.contains_key(name) {
            return true;
        }
        if self.deleted_file_name_ids.contains_key(name) {
            return false;
        }
        self.cache.exists(name)
    }

    /// Returns the name of a file as seen by this operation.
    pub fn file_name_by_id(&self, file_id: FileId) -> Option<String> {
        if self.deleted_files.contains(&file_id) {
            return None;
        }
        if let Some(name) = self
            .file_changes
            .get(&file_id)
            .and_then(|changes| changes.file_name.clone())
        {
            return Some(name);
        }
        self.cache.file_name_by_id(file_id)
    }

    /// Returns the id of a file as seen by this operation.
    pub fn file_id_by_name(&self, name: &str) -> Option<FileId> {
        if let Some(file_id) = self.new_file_names.get(name) {
            return Some(*file_id);
        }
        if self.deleted_file_name_ids.contains_key(name) {
            return None;
        }
        self.cache.file_id_by_name(name)
    }

    // -------------------------------------------------------------------
    // Bookkeeping
    // -------------------------------------------------------------------

    /// Flags the operation for rollback. It can no longer be committed.
    pub fn rollback_in_progress(&mut self) {
        self.rollback = true;
    }

    /// Returns true if the operation is flagged for rollback.
    pub fn is_rollback_in_progress(&self) -> bool {
        self.rollback
    }

    /// Records an object locked by this operation.
    pub fn add_locked_object(&mut self, name: impl Into<String>) {
        self.locked_objects.insert(name.into());
    }

    /// Returns true if the object is locked by this operation.
    pub fn contains_locked_object(&self, name: &str) -> bool {
        self.locked_objects.contains(name)
    }

    /// Returns the objects locked by this operation.
    pub fn locked_objects(&self) -> impl Iterator<Item = &str> + '_ {
        self.locked_objects.iter().map(String::as_str)
    }

    /// Attaches metadata, logged with the atomic-unit-end record.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Returns a metadata value.
    pub fn metadata(&self, key: &str) -> Option<&MetadataValue> {
        self.metadata.get(key)
    }

    /// Returns all metadata in key order.
    pub fn metadata_map(&self) -> &BTreeMap<String, MetadataValue> {
        &self.metadata
    }

    /// Records a bonsai bucket freed by this operation. It must not be handed
    /// out again before the operation ends.
    pub fn add_deleted_bonsai_pointer(&mut self, pointer: BonsaiPointer) {
        self.deleted_bonsai_pointers.insert(pointer);
    }

    /// Returns true if the bonsai bucket was freed by this operation.
    pub fn is_bonsai_pointer_deleted(&self, pointer: &BonsaiPointer) -> bool {
        self.deleted_bonsai_pointers.contains(pointer)
    }

    /// Books a record slot freed by this operation.
    pub fn add_deleted_record_position(
        &mut self,
        cluster_id: i32,
        page_index: u64,
        record_position: u32,
    ) {
        self.deleted_record_positions
            .entry((cluster_id, page_index))
            .or_default()
            .insert(record_position);
    }

    /// Returns the record slots of a cluster page freed by this operation.
    pub fn deleted_record_positions(&self, cluster_id: i32, page_index: u64) -> HashSet<u32> {
        self.deleted_record_positions
            .get(&(cluster_id, page_index))
            .cloned()
            .unwrap_or_default()
    }

    /// Increments the count of nested component operations.
    pub fn increment_component_operations(&mut self) {
        self.component_operations += 1;
    }

    /// Decrements the count of nested component operations.
    pub fn decrement_component_operations(&mut self) {
        debug_assert!(self.component_operations > 0);
        self.component_operations = self.component_operations.saturating_sub(1);
    }

    /// Returns the count of nested component operations.
    pub fn component_operations(&self) -> u32 {
        self.component_operations
    }

    /// Releases every cache pin still held by staged pages.
    fn release_all(&mut self) {
        let pointers: Vec<_> = self
            .file_changes
            .values()
            .flat_map(|changes| changes.pages.values())
            .filter_map(StagedPage::take_delegate)
            .collect();
        self.release_pointers(pointers);
    }
}

impl<C: WriteCache> Drop for AtomicOperation<C> {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl<C: WriteCache> fmt::Debug for AtomicOperation<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicOperation")
            .field("unit", &self.unit)
            .field("files", &self.file_changes.len())
            .field("new_files", &self.new_file_names.len())
            .field("deleted_files", &self.deleted_files.len())
            .field("rollback", &self.rollback)
            .field("commit_lsn", &self.commit_lsn)
            .finish()
    }
}
