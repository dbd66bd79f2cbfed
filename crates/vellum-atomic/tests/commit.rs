//! Commit behaviour across operations.

mod common;

use tempfile::TempDir;

use vellum_atomic::AtomicOperationError;
use vellum_common::types::FileId;
use vellum_storage::page::{Bucket, BucketEntry, SearchResult};
use vellum_storage::WriteCache;
use vellum_wal::{PageDiff, RecordType, WalRecord, WriteAheadLog};

use common::{open_manager, page_image, Manager};

async fn file_with_pages(manager: &Manager, name: &str, pages: u64) -> FileId {
    let mut op = manager.start_atomic_operation();
    let file_id = op.add_file(name).unwrap();
    for _ in 0..pages {
        op.add_page(file_id).unwrap();
    }
    manager.end_atomic_operation(op, false).await.unwrap();
    file_id
}

fn logged_diffs(manager: &Manager, from: vellum_common::types::Lsn) -> Vec<(u64, PageDiff)> {
    manager
        .wal()
        .read_from(from)
        .unwrap()
        .into_iter()
        .filter_map(|(_, record)| match record {
            WalRecord::UpdatePage {
                page_index, diff, ..
            } => Some((page_index, diff)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_write_then_read_in_next_operation() {
    let tmp = TempDir::new().unwrap();
    let manager = open_manager(tmp.path()).await;

    let mut a = manager.start_atomic_operation();
    let file_id = a.add_file("f.pcl").unwrap();
    let page = a.add_page(file_id).unwrap();
    assert_eq!(page.page_index(), 0);
    page.write(0, &[0x01, 0x02]).unwrap();
    manager.end_atomic_operation(a, false).await.unwrap();

    let b = manager.start_atomic_operation();
    let view = b.load_page_for_read(file_id, 0).await.unwrap().unwrap();
    assert!(!view.is_staged());
    assert_eq!(&view.read_at(0, 2).unwrap()[..], &[0x01, 0x02]);
    b.release_page_from_read(view);
    manager.end_atomic_operation(b, true).await.unwrap();
}

#[tokio::test]
async fn test_staged_content_visible_before_commit() {
    let tmp = TempDir::new().unwrap();
    let manager = open_manager(tmp.path()).await;
    let file_id = file_with_pages(&manager, "f.pcl", 2).await;

    let mut op = manager.start_atomic_operation();
    let added = op.add_page(file_id).unwrap();
    added.write(500, b"fresh").unwrap();
    let loaded = op
        .load_page_for_write(file_id, 1, 1, true)
        .await
        .unwrap()
        .unwrap();
    loaded.write(700, b"edit").unwrap();

    let view = op.load_page_for_read(file_id, 2).await.unwrap().unwrap();
    assert_eq!(&view.read_at(500, 5).unwrap()[..], b"fresh");
    let again = op
        .load_page_for_write(file_id, 1, 1, true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&again.read_at(700, 4).unwrap()[..], b"edit");

    // Other operations still see the committed state
    let other = manager.start_atomic_operation();
    assert!(other.load_page_for_read(file_id, 2).await.unwrap().is_none());
    manager.end_atomic_operation(other, true).await.unwrap();
    manager.end_atomic_operation(op, true).await.unwrap();
    assert_eq!(manager.cache().filled_up_to(file_id).unwrap(), 2);
}

#[tokio::test]
async fn test_mutation_order_does_not_matter() {
    let mut images = Vec::new();
    let mut diffs = Vec::new();

    for reversed in [false, true] {
        let tmp = TempDir::new().unwrap();
        let manager = open_manager(tmp.path()).await;
        let file_id = file_with_pages(&manager, "f.pcl", 1).await;
        let before = manager.wal().end();

        let mut op = manager.start_atomic_operation();
        let page = op
            .load_page_for_write(file_id, 0, 1, true)
            .await
            .unwrap()
            .unwrap();
        let writes: [(usize, &[u8]); 3] = [(100, &[1, 1]), (300, &[2]), (104, &[3, 3, 3])];
        if reversed {
            for (offset, bytes) in writes.iter().rev() {
                page.write(*offset, bytes).unwrap();
            }
        } else {
            for (offset, bytes) in writes.iter() {
                page.write(*offset, bytes).unwrap();
            }
        }
        manager.end_atomic_operation(op, false).await.unwrap();

        images.push(page_image(manager.cache(), file_id, 0).await);
        diffs.push(logged_diffs(&manager, before));
    }

    assert_eq!(images[0], images[1]);
    assert_eq!(diffs[0], diffs[1]);
    assert_eq!(diffs[0].len(), 1);
}

#[tokio::test]
async fn test_reverted_page_is_not_logged_or_written() {
    let tmp = TempDir::new().unwrap();
    let manager = open_manager(tmp.path()).await;
    let file_id = file_with_pages(&manager, "f.pcl", 1).await;
    manager.cache().flush().await.unwrap();
    assert_eq!(manager.cache().stats().dirty_pages, 0);
    let before = manager.wal().end();

    let mut op = manager.start_atomic_operation();
    let page = op
        .load_page_for_write(file_id, 0, 1, true)
        .await
        .unwrap()
        .unwrap();
    page.write(900, &[0xAA, 0xBB]).unwrap();
    page.write(900, &[0x00, 0x00]).unwrap();
    assert!(!page.has_changes());
    manager.end_atomic_operation(op, false).await.unwrap();

    assert!(logged_diffs(&manager, before).is_empty());
    assert_eq!(manager.cache().stats().dirty_pages, 0);
    assert_eq!(manager.cache().stats().pinned_pages, 0);
}

#[tokio::test]
async fn test_deleted_file_is_not_read_from_cache() {
    let tmp = TempDir::new().unwrap();
    let manager = open_manager(tmp.path()).await;
    let file_id = file_with_pages(&manager, "f.pcl", 2).await;

    let mut op = manager.start_atomic_operation();
    op.delete_file(file_id).unwrap();
    let stats_before = manager.cache().stats();

    assert!(matches!(
        op.load_page_for_read(file_id, 0).await,
        Err(AtomicOperationError::FileDeleted { .. })
    ));
    assert!(matches!(
        op.load_page_for_write(file_id, 1, 1, true).await,
        Err(AtomicOperationError::FileDeleted { .. })
    ));

    let stats_after = manager.cache().stats();
    assert_eq!(stats_before.hits, stats_after.hits);
    assert_eq!(stats_before.misses, stats_after.misses);
    assert_eq!(stats_before.pinned_pages, stats_after.pinned_pages);

    manager.end_atomic_operation(op, false).await.unwrap();
    assert!(!manager.cache().exists("f.pcl"));
}

#[tokio::test]
async fn test_bucket_on_staged_page() {
    let tmp = TempDir::new().unwrap();
    let manager = open_manager(tmp.path()).await;

    let mut op = manager.start_atomic_operation();
    let file_id = op.add_file("tree.sbt").unwrap();
    let page = op.add_page(file_id).unwrap();
    page.update(|data| {
        let mut bucket: Bucket<_, i64, u64> = Bucket::new(data);
        bucket.init(true);
        for (index, key) in [10i64, 20, 30].into_iter().enumerate() {
            let entry = BucketEntry::Leaf {
                key,
                value: key as u64 * 10,
            };
            assert!(bucket.add_entry(index, &entry, false).unwrap());
        }
    });
    manager.end_atomic_operation(op, false).await.unwrap();

    let op = manager.start_atomic_operation();
    let view = op.load_page_for_read(file_id, 0).await.unwrap().unwrap();
    view.read(|data| {
        let bucket: Bucket<_, i64, u64> = Bucket::new(data);
        assert_eq!(bucket.size(), 3);
        assert_eq!(bucket.find(&20).unwrap(), SearchResult::Found(1));
        assert_eq!(bucket.get_value(2).unwrap(), 300);
        assert_eq!(bucket.find(&25).unwrap(), SearchResult::NotFound(2));
    });
    op.release_page_from_read(view);
    manager.end_atomic_operation(op, true).await.unwrap();
}

#[tokio::test]
async fn test_commit_records_are_chained() {
    let tmp = TempDir::new().unwrap();
    let manager = open_manager(tmp.path()).await;
    let start = manager.wal().end();

    let mut op = manager.start_atomic_operation();
    let unit = op.unit_id();
    let file_id = op.add_file("f.pcl").unwrap();
    op.add_page(file_id).unwrap().write(64, b"x").unwrap();
    op.add_metadata("sequence", 7u64);
    let commit_lsn = manager
        .end_atomic_operation(op, false)
        .await
        .unwrap()
        .unwrap();

    let records = manager.wal().read_from(start).unwrap();
    assert_eq!(records.first().map(|(lsn, _)| *lsn), Some(start));
    assert_eq!(records.last().map(|(lsn, _)| *lsn), Some(commit_lsn));
    assert!(records.iter().all(|(_, record)| record.unit() == unit));
    assert_eq!(
        records
            .iter()
            .map(|(_, record)| record.record_type())
            .collect::<Vec<_>>(),
        vec![
            RecordType::AtomicUnitStart,
            RecordType::FileCreated,
            RecordType::UpdatePage,
            RecordType::AtomicUnitEnd,
        ]
    );
}
