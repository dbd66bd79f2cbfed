//! Directory-rooted page cache implementation.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info};

use vellum_common::config::StorageConfig;
use vellum_common::types::{FileId, PageKey};

use super::entry::{CacheEntry, CachePointer};
use super::error::{CacheError, CacheResult};
use super::{CacheStats, WriteCache};
use crate::file::{FileManager, PaginatedFile};
use crate::page::{ChecksumResult, DurablePage};

struct FileSlot {
    name: String,
    file: Arc<PaginatedFile>,
}

#[derive(Default)]
struct FileTable {
    by_id: HashMap<FileId, FileSlot>,
    by_name: HashMap<String, FileId>,
    /// Ids held for names that are not registered: booked ids and the ids
    /// of deleted files.
    reserved: HashMap<String, FileId>,
}

/// Page cache over the files of one directory.
///
/// Pages stay cached until their file is truncated or deleted.
pub struct PageCache {
    root: PathBuf,
    config: StorageConfig,
    files: RwLock<FileTable>,
    next_file_id: AtomicU64,
    pages: RwLock<HashMap<PageKey, CachePointer>>,
    hits: AtomicU64,
    misses: AtomicU64,
    flushes: AtomicU64,
}

impl PageCache {
    /// Creates a cache rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl AsRef<Path>, config: StorageConfig) -> CacheResult<Self> {
        config.validate().map_err(CacheError::config)?;

        let root = root.as_ref().to_path_buf();
        FileManager::new().create_dir_all(&root).await?;

        info!(root = %root.display(), page_size = config.page_size, "opened page cache");
        Ok(Self {
            root,
            config,
            files: RwLock::new(FileTable::default()),
            next_file_id: AtomicU64::new(FileId::FIRST.as_u64()),
            pages: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        })
    }

    /// Returns the directory holding the cached files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Returns the paginated file registered under `file_id`.
    pub fn file(&self, file_id: FileId) -> CacheResult<Arc<PaginatedFile>> {
        self.files
            .read()
            .by_id
            .get(&file_id)
            .map(|slot| Arc::clone(&slot.file))
            .ok_or(CacheError::FileIdNotFound { file_id })
    }

    /// Returns current statistics.
    pub fn stats(&self) -> CacheStats {
        let pages = self.pages.read();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            cached_pages: pages.len(),
            dirty_pages: pages.values().filter(|e| e.is_dirty()).count(),
            pinned_pages: pages.values().filter(|e| e.is_pinned()).count(),
        }
    }

    /// Flushes all dirty pages and closes every file.
    pub async fn close(&self) -> CacheResult<()> {
        self.flush().await?;
        let files: Vec<_> = self
            .files
            .read()
            .by_id
            .values()
            .map(|slot| Arc::clone(&slot.file))
            .collect();
        for file in files {
            file.close().await?;
        }
        Ok(())
    }

    fn register(&self, name: &str, file_id: FileId, file: Arc<PaginatedFile>) {
        let mut files = self.files.write();
        files.reserved.remove(name);
        files.by_name.insert(name.to_string(), file_id);
        files.by_id.insert(
            file_id,
            FileSlot {
                name: name.to_string(),
                file,
            },
        );
        self.next_file_id
            .fetch_max(file_id.as_u64() + 1, Ordering::AcqRel);
    }

    fn drop_pages(&self, file_id: FileId) {
        self.pages.write().retain(|key, _| key.file_id != file_id);
    }

    async fn load(
        &self,
        file_id: FileId,
        page_index: u64,
        page_count: usize,
        verify_checksums: bool,
    ) -> CacheResult<Option<CachePointer>> {
        let file = self.file(file_id)?;
        let filled = file.page_count();
        if page_index >= filled {
            return Ok(None);
        }

        let key = PageKey::new(file_id, page_index);
        if let Some(entry) = self.pages.read().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            entry.pin();
            return Ok(Some(Arc::clone(entry)));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let page_size = self.page_size();
        let count = (page_count.max(1) as u64).min(filled - page_index) as usize;
        let mut buf = vec![0u8; count * page_size];
        file.read(page_index * page_size as u64, &mut buf, false)
            .await?;

        let verify = verify_checksums && self.config.verify_checksums;
        let mut pages = self.pages.write();
        let mut loaded = None;
        for (i, image) in buf.chunks_exact(page_size).enumerate() {
            let key = PageKey::new(file_id, page_index + i as u64);
            if let Some(existing) = pages.get(&key) {
                if i == 0 {
                    loaded = Some(Arc::clone(existing));
                }
                continue;
            }

            if verify {
                if let ChecksumResult::Invalid { expected, computed } =
                    DurablePage::new(image).verify_checksum()
                {
                    if i == 0 {
                        return Err(CacheError::ChecksumMismatch {
                            file_id,
                            page_index: key.page_index,
                            expected,
                            computed,
                        });
                    }
                    // A damaged read-ahead page is reported when it is requested.
                    continue;
                }
            }

            let entry = Arc::new(CacheEntry::new(key, image.to_vec()));
            if i == 0 {
                loaded = Some(Arc::clone(&entry));
            }
            pages.insert(key, entry);
        }

        let entry = loaded.ok_or_else(|| CacheError::page_not_found(file_id, page_index))?;
        entry.pin();
        Ok(Some(entry))
    }
}

impl WriteCache for PageCache {
    fn page_size(&self) -> usize {
        self.config.page_size
    }

    async fn load_for_read(
        &self,
        file_id: FileId,
        page_index: u64,
        page_count: usize,
        verify_checksums: bool,
    ) -> CacheResult<Option<CachePointer>> {
        self.load(file_id, page_index, page_count, verify_checksums)
            .await
    }

    async fn load_for_write(
        &self,
        file_id: FileId,
        page_index: u64,
        page_count: usize,
        verify_checksums: bool,
    ) -> CacheResult<Option<CachePointer>> {
        self.load(file_id, page_index, page_count, verify_checksums)
            .await
    }

    fn release_from_read(&self, pointer: &CachePointer) {
        pointer.unpin();
    }

    fn release_from_write(&self, pointer: &CachePointer, changed: bool) {
        if changed {
            pointer.set_dirty(true);
        }
        pointer.unpin();
    }

    async fn allocate_new_page(&self, file_id: FileId) -> CacheResult<CachePointer> {
        let file = self.file(file_id)?;
        let page_size = self.page_size();
        let offset = file.allocate_space(page_size as u64);
        let key = PageKey::new(file_id, offset / page_size as u64);

        let entry = Arc::new(CacheEntry::new(key, vec![0u8; page_size]));
        entry.set_dirty(true);
        entry.pin();
        self.pages.write().insert(key, Arc::clone(&entry));
        Ok(entry)
    }

    fn book_file_id(&self, name: &str) -> CacheResult<FileId> {
        let mut files = self.files.write();
        if files.by_name.contains_key(name) {
            return Err(CacheError::file_already_exists(name));
        }
        if let Some(file_id) = files.reserved.get(name) {
            return Ok(*file_id);
        }

        let file_id = FileId::new(self.next_file_id.fetch_add(1, Ordering::AcqRel));
        files.reserved.insert(name.to_string(), file_id);
        Ok(file_id)
    }

    async fn add_file(&self, name: &str, file_id: FileId) -> CacheResult<FileId> {
        {
            let files = self.files.read();
            if files.by_name.contains_key(name) || files.by_id.contains_key(&file_id) {
                return Err(CacheError::file_already_exists(name));
            }
        }

        let file = Arc::new(PaginatedFile::new(self.root.join(name), self.page_size()));
        file.create().await?;
        self.register(name, file_id, file);

        debug!(name, %file_id, "added file");
        Ok(file_id)
    }

    async fn load_file(&self, name: &str) -> CacheResult<FileId> {
        if let Some(file_id) = self.file_id_by_name(name) {
            return Ok(file_id);
        }

        let file = Arc::new(PaginatedFile::new(self.root.join(name), self.page_size()));
        if !file.exists().await {
            return Err(CacheError::file_not_found(name));
        }
        file.open().await?;

        let file_id = self
            .files
            .read()
            .reserved
            .get(name)
            .copied()
            .unwrap_or_else(|| FileId::new(self.next_file_id.fetch_add(1, Ordering::AcqRel)));
        self.register(name, file_id, file);

        debug!(name, %file_id, "loaded file");
        Ok(file_id)
    }

    async fn delete_file(&self, file_id: FileId) -> CacheResult<()> {
        let slot = {
            let mut files = self.files.write();
            let slot = files
                .by_id
                .remove(&file_id)
                .ok_or(CacheError::FileIdNotFound { file_id })?;
            files.by_name.remove(&slot.name);
            files.reserved.insert(slot.name.clone(), file_id);
            slot
        };

        self.drop_pages(file_id);
        slot.file.delete().await?;

        debug!(name = %slot.name, %file_id, "deleted file");
        Ok(())
    }

    async fn truncate_file(&self, file_id: FileId) -> CacheResult<()> {
        let file = self.file(file_id)?;
        self.drop_pages(file_id);
        file.shrink(0).await?;
        Ok(())
    }

    fn file_name_by_id(&self, file_id: FileId) -> Option<String> {
        self.files
            .read()
            .by_id
            .get(&file_id)
            .map(|slot| slot.name.clone())
    }

    fn file_id_by_name(&self, name: &str) -> Option<FileId> {
        self.files.read().by_name.get(name).copied()
    }

    fn exists(&self, name: &str) -> bool {
        self.files.read().by_name.contains_key(name)
    }

    fn exists_id(&self, file_id: FileId) -> bool {
        self.files.read().by_id.contains_key(&file_id)
    }

    fn filled_up_to(&self, file_id: FileId) -> CacheResult<u64> {
        Ok(self.file(file_id)?.page_count())
    }

    async fn flush(&self) -> CacheResult<()> {
        let mut dirty: BTreeMap<FileId, Vec<CachePointer>> = BTreeMap::new();
        {
            let pages = self.pages.read();
            let mut keys: Vec<_> = pages
                .iter()
                .filter(|(_, entry)| entry.is_dirty())
                .map(|(key, _)| *key)
                .collect();
            keys.sort();
            for key in keys {
                if let Some(entry) = pages.get(&key) {
                    dirty.entry(key.file_id).or_default().push(Arc::clone(entry));
                }
            }
        }

        let page_size = self.page_size() as u64;
        for (file_id, entries) in dirty {
            let file = self.file(file_id)?;
            let batch: Vec<(u64, Bytes)> = entries
                .iter()
                .map(|entry| {
                    entry.set_dirty(false);
                    let mut data = entry.write_data();
                    DurablePage::new(&mut data[..]).stamp();
                    (entry.page_index() * page_size, Bytes::copy_from_slice(&data))
                })
                .collect();

            if let Err(err) = file.write_pages(&batch).await {
                for entry in &entries {
                    entry.set_dirty(true);
                }
                return Err(err.into());
            }
            self.flushes
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
        }

        let files: Vec<_> = self
            .files
            .read()
            .by_id
            .values()
            .map(|slot| Arc::clone(&slot.file))
            .collect();
        for file in files {
            file.synch().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("root", &self.root)
            .field("page_size", &self.config.page_size)
            .field("files", &self.files.read().by_id.len())
            .field("pages", &self.pages.read().len())
            .finish()
    }
}
