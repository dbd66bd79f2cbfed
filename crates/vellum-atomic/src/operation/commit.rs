//! Log-then-apply commit.
//!
//! ```text
//! log_changes                         apply_changes
//! ───────────                         ─────────────
//! AtomicUnitStart                     delete files
//! FileDeleted *                       create files
//! FileCreated *                       truncate files
//! FileTruncated *                     apply diffs, stamp commit LSN
//! UpdatePage *  (net diff per page)
//! AtomicUnitEnd ──▶ commit LSN
//! ```
//!
//! A crash after the end record is written leaves the log as the only
//! durable trace of the operation; recovery replays it.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};

use vellum_common::types::{FileId, Lsn};
use vellum_storage::cache::{CachePointer, WriteCache};
use vellum_storage::page::DurablePage;
use vellum_wal::{PageDiff, WalRecord, WriteAheadLog};

use super::AtomicOperation;
use crate::error::{AtomicOperationError, AtomicResult};

impl<C: WriteCache> AtomicOperation<C> {
    /// Logs and applies every staged change. Returns the commit LSN.
    pub async fn commit_changes<W>(&mut self, wal: &W) -> AtomicResult<Lsn>
    where
        W: WriteAheadLog + ?Sized,
    {
        let commit_lsn = self.log_changes(wal)?;
        self.apply_changes(commit_lsn).await?;

        debug!(
            unit = %self.unit,
            %commit_lsn,
            files = self.file_changes.len(),
            "committed atomic operation"
        );
        Ok(commit_lsn)
    }

    /// Writes the records of this operation to the log and returns the LSN
    /// of the atomic-unit-end record.
    ///
    /// Pages whose content ended up unchanged are not logged. Pages added by
    /// this operation are always logged so that replay allocates them.
    pub fn log_changes<W>(&mut self, wal: &W) -> AtomicResult<Lsn>
    where
        W: WriteAheadLog + ?Sized,
    {
        self.ensure_active()?;
        let unit = self.unit;
        if self.rollback {
            return Err(AtomicOperationError::RollbackInProgress { unit });
        }

        let start_lsn = wal.end();
        wal.log(&WalRecord::AtomicUnitStart { unit })?;

        for &file_id in &self.deleted_files {
            wal.log(&WalRecord::FileDeleted { unit, file_id })?;
        }

        let cache = &self.cache;
        let mut pages_logged = 0usize;
        for (&file_id, changes) in &mut self.file_changes {
            if changes.is_new {
                let file_name = changes
                    .file_name
                    .clone()
                    .ok_or(AtomicOperationError::FileIdNotFound { file_id })?;
                if changes.truncate {
                    wal.log(&WalRecord::FileDeleted { unit, file_id })?;
                }
                wal.log(&WalRecord::FileCreated {
                    unit,
                    file_name,
                    file_id,
                })?;
            } else if changes.truncate {
                wal.log(&WalRecord::FileTruncated { unit, file_id })?;
            }

            changes.pages.retain(|_, page| {
                let keep = page.is_new() || page.has_changes();
                if !keep {
                    if let Some(pointer) = page.take_delegate() {
                        cache.release_from_write(&pointer, false);
                    }
                }
                keep
            });

            for (&page_index, page) in &changes.pages {
                let lsn = wal.log(&WalRecord::UpdatePage {
                    unit,
                    file_id,
                    page_index,
                    initial_lsn: page.initial_lsn(),
                    diff: page.net_diff(),
                })?;
                page.set_change_lsn(lsn);
                pages_logged += 1;
            }
        }

        let commit_lsn = wal.log(&WalRecord::AtomicUnitEnd {
            unit,
            rollback: false,
            metadata: self.metadata.clone(),
        })?;

        self.start_lsn = Some(start_lsn);
        self.commit_lsn = Some(commit_lsn);

        debug!(%unit, %start_lsn, %commit_lsn, pages = pages_logged, "logged atomic operation");
        Ok(commit_lsn)
    }

    /// Applies the logged changes to the page cache, stamping every touched
    /// page with `commit_lsn`.
    pub async fn apply_changes(&mut self, commit_lsn: Lsn) -> AtomicResult<()> {
        if self.applied {
            return Err(AtomicOperationError::AlreadyCommitted { unit: self.unit });
        }
        let cache = Arc::clone(&self.cache);

        for &file_id in &self.deleted_files {
            if cache.exists_id(file_id) {
                cache.delete_file(file_id).await?;
            }
        }

        for (&file_id, changes) in &self.file_changes {
            if changes.is_new {
                let name = changes
                    .file_name
                    .as_deref()
                    .ok_or(AtomicOperationError::FileIdNotFound { file_id })?;
                if changes.truncate && cache.exists_id(file_id) {
                    cache.delete_file(file_id).await?;
                }
                cache.add_file(name, file_id).await?;
            } else if changes.truncate {
                warn!(unit = %self.unit, %file_id, "truncating file");
                cache.truncate_file(file_id).await?;
            }

            for (&page_index, page) in &changes.pages {
                let pointer = if page.is_new() {
                    load_or_allocate(&*cache, file_id, page_index).await?
                } else {
                    cache
                        .load_for_write(file_id, page_index, 1, false)
                        .await?
                        .ok_or_else(|| AtomicOperationError::page_missing(file_id, page_index))?
                };

                let applied = apply_diff(&pointer, &page.net_diff(), commit_lsn);
                cache.release_from_write(&pointer, applied.is_ok());
                applied?;

                if let Some(delegate) = page.take_delegate() {
                    cache.release_from_write(&delegate, false);
                }
            }
        }

        self.applied = true;
        Ok(())
    }
}

/// Applies `diff` to a cached page and stamps the page LSN.
pub(crate) fn apply_diff(pointer: &CachePointer, diff: &PageDiff, lsn: Lsn) -> AtomicResult<()> {
    let mut data = pointer.write_data();
    diff.apply(&mut data[..])?;
    DurablePage::new(&mut data[..]).set_lsn(lsn);
    Ok(())
}

/// Loads a page for writing, allocating pages up to `page_index` if the file
/// is shorter.
pub(crate) async fn load_or_allocate<C>(
    cache: &C,
    file_id: FileId,
    page_index: u64,
) -> AtomicResult<CachePointer>
where
    C: WriteCache + ?Sized,
{
    if page_index < cache.filled_up_to(file_id)? {
        return cache
            .load_for_write(file_id, page_index, 1, false)
            .await?
            .ok_or_else(|| AtomicOperationError::page_missing(file_id, page_index));
    }

    loop {
        let pointer = cache.allocate_new_page(file_id).await?;
        match pointer.page_index().cmp(&page_index) {
            Ordering::Equal => return Ok(pointer),
            Ordering::Less => cache.release_from_write(&pointer, true),
            Ordering::Greater => {
                cache.release_from_write(&pointer, true);
                return Err(AtomicOperationError::page_missing(file_id, page_index));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vellum_common::config::StorageConfig;
    use vellum_common::types::OperationUnitId;
    use vellum_storage::PageCache;
    use vellum_wal::{RecordType, Wal, WalConfig};

    struct Env {
        _tmp: TempDir,
        cache: Arc<PageCache>,
        wal: Wal,
    }

    async fn env() -> Env {
        let tmp = TempDir::new().unwrap();
        let cache = PageCache::open(tmp.path().join("data"), StorageConfig::for_testing())
            .await
            .unwrap();
        let wal = Wal::open(WalConfig::new(tmp.path().join("wal.log"))).unwrap();
        Env {
            _tmp: tmp,
            cache: Arc::new(cache),
            wal,
        }
    }

    fn operation(env: &Env, unit: u64) -> AtomicOperation<PageCache> {
        AtomicOperation::new(OperationUnitId::new(unit), Arc::clone(&env.cache))
    }

    fn record_types(env: &Env) -> Vec<RecordType> {
        env.wal
            .read_from(env.wal.first_lsn())
            .unwrap()
            .into_iter()
            .map(|(_, record)| record.record_type())
            .collect()
    }

    #[tokio::test]
    async fn test_commit_new_file() {
        let env = env().await;
        let mut op = operation(&env, 1);

        let file_id = op.add_file("people.pcl").unwrap();
        let page = op.add_page(file_id).unwrap();
        page.write(64, &[1, 2, 3]).unwrap();
        let commit_lsn = op.commit_changes(&env.wal).await.unwrap();

        assert_eq!(op.start_lsn(), Some(env.wal.first_lsn()));
        assert_eq!(op.commit_lsn(), Some(commit_lsn));
        assert!(env.cache.exists("people.pcl"));
        assert_eq!(env.cache.filled_up_to(file_id).unwrap(), 1);

        let pointer = env
            .cache
            .load_for_read(file_id, 0, 1, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&pointer.read_data()[64..67], &[1, 2, 3]);
        assert_eq!(pointer.lsn(), commit_lsn);
        env.cache.release_from_read(&pointer);

        assert_eq!(
            record_types(&env),
            vec![
                RecordType::AtomicUnitStart,
                RecordType::FileCreated,
                RecordType::UpdatePage,
                RecordType::AtomicUnitEnd,
            ]
        );
        assert_eq!(env.cache.stats().pinned_pages, 0);
    }

    #[tokio::test]
    async fn test_unchanged_pages_are_not_logged() {
        let env = env().await;
        let file_id = {
            let mut op = operation(&env, 1);
            let file_id = op.add_file("t.pcl").unwrap();
            op.add_page(file_id).unwrap();
            op.commit_changes(&env.wal).await.unwrap();
            file_id
        };
        let before = env.wal.end();

        let mut op = operation(&env, 2);
        let page = op
            .load_page_for_write(file_id, 0, 1, true)
            .await
            .unwrap()
            .unwrap();
        page.write(100, &[5]).unwrap();
        page.write(100, &[0]).unwrap();
        op.commit_changes(&env.wal).await.unwrap();

        let records = env.wal.read_from(before).unwrap();
        let types: Vec<_> = records.iter().map(|(_, r)| r.record_type()).collect();
        assert_eq!(
            types,
            vec![RecordType::AtomicUnitStart, RecordType::AtomicUnitEnd]
        );
        assert_eq!(env.cache.stats().pinned_pages, 0);
    }

    #[tokio::test]
    async fn test_rollback_cannot_commit() {
        let env = env().await;
        let mut op = operation(&env, 1);
        op.add_file("r.pcl").unwrap();
        op.rollback_in_progress();

        let before = env.wal.end();
        assert!(matches!(
            op.commit_changes(&env.wal).await,
            Err(AtomicOperationError::RollbackInProgress { .. })
        ));
        assert_eq!(env.wal.end(), before);
        assert!(!env.cache.exists("r.pcl"));
    }

    #[tokio::test]
    async fn test_commit_twice_fails() {
        let env = env().await;
        let mut op = operation(&env, 1);
        op.add_file("twice.pcl").unwrap();
        op.commit_changes(&env.wal).await.unwrap();

        assert!(matches!(
            op.commit_changes(&env.wal).await,
            Err(AtomicOperationError::AlreadyCommitted { .. })
        ));
        assert!(matches!(
            op.add_file("other.pcl"),
            Err(AtomicOperationError::AlreadyCommitted { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_and_revive_file() {
        let env = env().await;
        let file_id = {
            let mut op = operation(&env, 1);
            let file_id = op.add_file("cycle.pcl").unwrap();
            for _ in 0..3 {
                op.add_page(file_id).unwrap().write(80, &[7]).unwrap();
            }
            op.commit_changes(&env.wal).await.unwrap();
            file_id
        };
        assert_eq!(env.cache.filled_up_to(file_id).unwrap(), 3);

        let mut op = operation(&env, 2);
        op.delete_file(file_id).unwrap();
        assert_eq!(op.add_file("cycle.pcl").unwrap(), file_id);
        op.add_page(file_id).unwrap().write(90, &[9]).unwrap();
        op.commit_changes(&env.wal).await.unwrap();

        assert_eq!(env.cache.file_id_by_name("cycle.pcl"), Some(file_id));
        assert_eq!(env.cache.filled_up_to(file_id).unwrap(), 1);
        let pointer = env
            .cache
            .load_for_read(file_id, 0, 1, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pointer.read_data()[80], 0);
        assert_eq!(pointer.read_data()[90], 9);
        env.cache.release_from_read(&pointer);
    }

    #[tokio::test]
    async fn test_delete_existing_file() {
        let env = env().await;
        let file_id = {
            let mut op = operation(&env, 1);
            let file_id = op.add_file("gone.pcl").unwrap();
            op.add_page(file_id).unwrap();
            op.commit_changes(&env.wal).await.unwrap();
            file_id
        };

        let mut op = operation(&env, 2);
        op.delete_file(file_id).unwrap();
        op.commit_changes(&env.wal).await.unwrap();

        assert!(!env.cache.exists("gone.pcl"));
        assert!(!env.cache.exists_id(file_id));
    }

    #[tokio::test]
    async fn test_truncate_existing_file() {
        let env = env().await;
        let file_id = {
            let mut op = operation(&env, 1);
            let file_id = op.add_file("trunc.pcl").unwrap();
            op.add_page(file_id).unwrap();
            op.add_page(file_id).unwrap();
            op.commit_changes(&env.wal).await.unwrap();
            file_id
        };

        let mut op = operation(&env, 2);
        op.truncate_file(file_id).unwrap();
        op.add_page(file_id).unwrap().write(50, &[4]).unwrap();
        let before = env.wal.end();
        op.commit_changes(&env.wal).await.unwrap();

        assert_eq!(env.cache.filled_up_to(file_id).unwrap(), 1);
        let records = env.wal.read_from(before).unwrap();
        let types: Vec<_> = records.iter().map(|(_, r)| r.record_type()).collect();
        assert_eq!(
            types,
            vec![
                RecordType::AtomicUnitStart,
                RecordType::FileTruncated,
                RecordType::UpdatePage,
                RecordType::AtomicUnitEnd,
            ]
        );
        assert_eq!(records[1].1.file_id(), Some(file_id));
    }

    #[tokio::test]
    async fn test_metadata_is_logged() {
        let env = env().await;
        let mut op = operation(&env, 1);
        op.add_metadata("rows", 12u64);
        let commit_lsn = op.commit_changes(&env.wal).await.unwrap();

        let records = env.wal.read_from(commit_lsn).unwrap();
        match &records[0].1 {
            WalRecord::AtomicUnitEnd {
                metadata, rollback, ..
            } => {
                assert!(!rollback);
                assert_eq!(metadata.get("rows").and_then(|v| v.as_u64()), Some(12));
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_or_allocate_fills_gap() {
        let env = env().await;
        let file_id = env.cache.book_file_id("gap.pcl").unwrap();
        env.cache.add_file("gap.pcl", file_id).await.unwrap();

        let pointer = load_or_allocate(&*env.cache, file_id, 2).await.unwrap();
        assert_eq!(pointer.page_index(), 2);
        env.cache.release_from_write(&pointer, true);
        assert_eq!(env.cache.filled_up_to(file_id).unwrap(), 3);

        let pointer = load_or_allocate(&*env.cache, file_id, 1).await.unwrap();
        assert_eq!(pointer.page_index(), 1);
        env.cache.release_from_write(&pointer, false);
        assert_eq!(env.cache.stats().pinned_pages, 0);
    }
}
