//! Log replay.
//!
//! Replays committed atomic operations from the write-ahead log onto the page
//! cache. A unit is replayed when its end record is reached, so units are
//! applied in commit order. Units without an end record, or ending with the
//! rollback flag, are skipped.
//!
//! Each page diff is applied only when the page LSN is below the LSN of the
//! update record, which makes replay idempotent: pages already written back
//! carry the end LSN of the last unit applied to them.
//!
//! Truncation records cut a file back to zero pages, so pages regrown by
//! the diffs of earlier units are dropped again before later diffs apply.
//!
//! File ids are reassigned when the cache registers files again after a
//! restart, so records are resolved through a map from logged ids to live
//! ids, built from the file creation records.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use vellum_common::types::{FileId, Lsn, OperationUnitId};
use vellum_storage::cache::{CacheError, WriteCache};
use vellum_wal::{Wal, WalRecord};

use crate::error::AtomicResult;
use crate::operation::{apply_diff, load_or_allocate};

/// Summary of a replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Committed units replayed.
    pub units_replayed: u64,
    /// Units skipped because they were rolled back or never ended.
    pub units_skipped: u64,
    /// Page diffs applied.
    pub pages_applied: u64,
    /// Page diffs skipped because the page already carried them.
    pub pages_skipped: u64,
    /// Files created during replay.
    pub files_created: u64,
    /// Files deleted during replay.
    pub files_deleted: u64,
    /// Files truncated during replay.
    pub files_truncated: u64,
    /// Highest unit id found in the log.
    pub last_unit: OperationUnitId,
}

/// Replays every record of `wal` onto `cache`.
pub async fn recover_from_wal<C>(wal: &Wal, cache: &C) -> AtomicResult<RecoveryReport>
where
    C: WriteCache + ?Sized,
{
    let records = wal.read_from(wal.first_lsn())?;
    recover(&records, cache).await
}

/// Replays `records`, in log order, onto `cache` and flushes it.
pub async fn recover<C>(records: &[(Lsn, WalRecord)], cache: &C) -> AtomicResult<RecoveryReport>
where
    C: WriteCache + ?Sized,
{
    let mut report = RecoveryReport::default();
    let mut pending: HashMap<OperationUnitId, Vec<&(Lsn, WalRecord)>> = HashMap::new();
    let mut file_ids: HashMap<FileId, FileId> = HashMap::new();

    for entry in records {
        let (end_lsn, record) = entry;
        let unit = record.unit();
        report.last_unit = report.last_unit.max(unit);

        match record {
            WalRecord::AtomicUnitStart { .. } => {
                pending.insert(unit, Vec::new());
            }
            WalRecord::AtomicUnitEnd { rollback, .. } => {
                let group = pending.remove(&unit).unwrap_or_default();
                if *rollback {
                    debug!(%unit, "skipping rolled back unit");
                    report.units_skipped += 1;
                    continue;
                }
                replay_unit(&group, *end_lsn, cache, &mut file_ids, &mut report).await?;
                report.units_replayed += 1;
            }
            _ => pending.entry(unit).or_default().push(entry),
        }
    }

    if !pending.is_empty() {
        warn!(units = pending.len(), "discarding atomic units without an end record");
        report.units_skipped += pending.len() as u64;
    }

    cache.flush().await?;

    info!(
        units_replayed = report.units_replayed,
        units_skipped = report.units_skipped,
        pages_applied = report.pages_applied,
        pages_skipped = report.pages_skipped,
        "log replay complete"
    );
    Ok(report)
}

fn resolve<C: WriteCache + ?Sized>(
    cache: &C,
    file_ids: &HashMap<FileId, FileId>,
    logged: FileId,
) -> Option<FileId> {
    match file_ids.get(&logged) {
        Some(live) => Some(*live),
        None if cache.exists_id(logged) => Some(logged),
        None => None,
    }
}

async fn replay_unit<C: WriteCache + ?Sized>(
    group: &[&(Lsn, WalRecord)],
    end_lsn: Lsn,
    cache: &C,
    file_ids: &mut HashMap<FileId, FileId>,
    report: &mut RecoveryReport,
) -> AtomicResult<()> {
    for (lsn, record) in group.iter().copied() {
        match record {
            WalRecord::FileDeleted { file_id, .. } => {
                if let Some(live) = resolve(cache, file_ids, *file_id) {
                    if cache.exists_id(live) {
                        cache.delete_file(live).await?;
                        report.files_deleted += 1;
                    }
                }
                file_ids.remove(file_id);
            }
            WalRecord::FileTruncated { file_id, .. } => {
                if let Some(live) = resolve(cache, file_ids, *file_id) {
                    if cache.exists_id(live) {
                        cache.truncate_file(live).await?;
                        report.files_truncated += 1;
                    }
                }
            }
            WalRecord::FileCreated {
                file_name, file_id, ..
            } => {
                let live = match cache.load_file(file_name).await {
                    Ok(live) => live,
                    Err(CacheError::FileNotFound { .. }) => {
                        let id = if cache.exists_id(*file_id) {
                            cache.book_file_id(file_name)?
                        } else {
                            *file_id
                        };
                        report.files_created += 1;
                        cache.add_file(file_name, id).await?
                    }
                    Err(err) => return Err(err.into()),
                };
                file_ids.insert(*file_id, live);
            }
            WalRecord::UpdatePage {
                file_id,
                page_index,
                diff,
                ..
            } => {
                let Some(live) = resolve(cache, file_ids, *file_id) else {
                    debug!(%file_id, page_index, "skipping update of a missing file");
                    report.pages_skipped += 1;
                    continue;
                };

                let pointer = load_or_allocate(cache, live, *page_index).await?;
                if pointer.lsn() < *lsn {
                    let applied = apply_diff(&pointer, diff, end_lsn);
                    cache.release_from_write(&pointer, applied.is_ok());
                    applied?;
                    report.pages_applied += 1;
                } else {
                    cache.release_from_write(&pointer, false);
                    report.pages_skipped += 1;
                }
            }
            WalRecord::AtomicUnitStart { .. } | WalRecord::AtomicUnitEnd { .. } => {}
        }
    }
    Ok(())
}
