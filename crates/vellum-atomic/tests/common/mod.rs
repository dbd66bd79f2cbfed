#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use vellum_atomic::AtomicOperationsManager;
use vellum_common::config::StorageConfig;
use vellum_common::types::FileId;
use vellum_storage::{PageCache, WriteCache};
use vellum_wal::{Wal, WalConfig};

pub type Manager = AtomicOperationsManager<PageCache, Wal>;

pub async fn open_cache(dir: &Path) -> Arc<PageCache> {
    Arc::new(
        PageCache::open(dir.join("data"), StorageConfig::for_testing())
            .await
            .unwrap(),
    )
}

pub fn open_wal(dir: &Path) -> Arc<Wal> {
    Arc::new(Wal::open(WalConfig::new(dir.join("wal.log"))).unwrap())
}

pub async fn open_manager(dir: &Path) -> Manager {
    AtomicOperationsManager::new(open_cache(dir).await, open_wal(dir))
}

/// Returns a copy of a page as the cache holds it.
pub async fn page_image(cache: &PageCache, file_id: FileId, page_index: u64) -> Vec<u8> {
    let pointer = cache
        .load_for_read(file_id, page_index, 1, true)
        .await
        .unwrap()
        .unwrap();
    let image = pointer.snapshot();
    cache.release_from_read(&pointer);
    image
}
