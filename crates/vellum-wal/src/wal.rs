//! Main WAL manager.
//!
//! This module provides the [`WriteAheadLog`] trait consumed by atomic
//! operations and the file-backed [`Wal`] implementing it.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use vellum_common::constants::WAL_FILE_HEADER_SIZE;
use vellum_common::types::{Lsn, OperationUnitId};

use crate::config::{SyncPolicy, WalConfig};
use crate::error::{WalError, WalResult};
use crate::reader::WalReader;
use crate::record::header::encode_file_header;
use crate::record::types::{RecordType, WalRecord};

/// Append-only log used by the commit protocol.
///
/// Implementations are internally synchronised. LSNs grow strictly with
/// every appended record.
pub trait WriteAheadLog: Send + Sync {
    /// Appends a record and returns the LSN it was written at.
    fn log(&self, record: &WalRecord) -> WalResult<Lsn>;

    /// Returns the LSN the next record will take.
    fn end(&self) -> Lsn;

    /// Makes every appended record durable.
    fn flush(&self) -> WalResult<()>;
}

/// WAL statistics.
#[derive(Debug, Default)]
pub struct WalStats {
    /// Total bytes written.
    pub bytes_written: AtomicU64,
    /// Total records written.
    pub records_written: AtomicU64,
    /// Number of syncs performed.
    pub syncs: AtomicU64,
}

struct LogState {
    file: File,
    /// Last LSN of every unit that has not logged its end record yet.
    unit_last_lsn: HashMap<OperationUnitId, Lsn>,
    /// Highest unit id seen in the log.
    last_unit: OperationUnitId,
    unsynced: bool,
}

/// The file-backed Write-Ahead Log.
///
/// ```text
/// +-------------+----------------+----------------+-----
/// | header (16) | record @ 16    | record @ 16+n  | ...
/// +-------------+----------------+----------------+-----
///                 ^ LSN = byte offset of the record
/// ```
pub struct Wal {
    config: WalConfig,
    state: Mutex<LogState>,
    /// Mirrors the append position so `end()` never waits on a writer.
    end: AtomicU64,
    stats: WalStats,
    closed: AtomicBool,
}

impl Wal {
    /// Opens the log at `config.path`, creating it if needed.
    ///
    /// A damaged or incomplete tail left by a crash is cut off so that the
    /// next record is appended right after the last valid one.
    pub fn open(config: WalConfig) -> WalResult<Self> {
        config.validate().map_err(WalError::config)?;

        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&config.path)?;
        let file_len = file.metadata()?.len();

        let mut unit_last_lsn = HashMap::new();
        let mut last_unit = OperationUnitId::INVALID;

        let end = if file_len < WAL_FILE_HEADER_SIZE as u64 {
            if file_len > 0 {
                warn!(
                    path = %config.path.display(),
                    len = file_len,
                    "WAL header incomplete, reinitialising log"
                );
            }
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&encode_file_header())?;
            file.sync_all()?;
            WAL_FILE_HEADER_SIZE as u64
        } else {
            let mut reader =
                WalReader::open(&config.path, config.max_record_size, config.verify_checksums)?;
            let mut records = 0u64;
            loop {
                match reader.next_record() {
                    Ok(Some((lsn, record))) => {
                        records += 1;
                        let unit = record.unit();
                        last_unit = last_unit.max(unit);
                        if record.record_type() == RecordType::AtomicUnitEnd {
                            unit_last_lsn.remove(&unit);
                        } else {
                            unit_last_lsn.insert(unit, lsn);
                        }
                    }
                    Ok(None) => break,
                    Err(err) if err.is_corruption() => {
                        warn!(
                            path = %config.path.display(),
                            at = %reader.position(),
                            discarded = file_len - reader.position().as_u64(),
                            error = %err,
                            "Discarding damaged WAL tail"
                        );
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }

            let end = reader.position().as_u64();
            if end < file_len {
                file.set_len(end)?;
                file.sync_all()?;
            }
            info!(path = %config.path.display(), records, end, "WAL opened");
            end
        };

        Ok(Self {
            config,
            state: Mutex::new(LogState {
                file,
                unit_last_lsn,
                last_unit,
                unsynced: false,
            }),
            end: AtomicU64::new(end),
            stats: WalStats::default(),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// Returns the LSN of the first record slot.
    pub fn first_lsn(&self) -> Lsn {
        Lsn::new(WAL_FILE_HEADER_SIZE as u64)
    }

    /// Returns the highest operation unit id written to the log.
    pub fn last_unit_id(&self) -> OperationUnitId {
        self.state.lock().last_unit
    }

    /// Reads every record at or after `start`, in LSN order.
    pub fn read_from(&self, start: Lsn) -> WalResult<Vec<(Lsn, WalRecord)>> {
        let end = self.end.load(Ordering::Acquire);
        let mut reader = WalReader::open(
            &self.config.path,
            self.config.max_record_size,
            self.config.verify_checksums,
        )?
        .with_limit(end);
        reader.read_from(start)
    }

    /// Returns WAL statistics.
    pub fn stats(&self) -> &WalStats {
        &self.stats
    }

    /// Syncs outstanding records and closes the WAL.
    pub fn close(&self) -> WalResult<()> {
        self.flush()?;
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    /// Returns true if the WAL is closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_closed(&self) -> WalResult<()> {
        if self.is_closed() {
            Err(WalError::Closed)
        } else {
            Ok(())
        }
    }

    fn sync_locked(&self, state: &mut LogState) -> WalResult<()> {
        state.file.sync_data()?;
        state.unsynced = false;
        self.stats.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl WriteAheadLog for Wal {
    fn log(&self, record: &WalRecord) -> WalResult<Lsn> {
        self.check_closed()?;

        let frame_len = record.frame_len();
        if frame_len > self.config.max_record_size {
            return Err(WalError::record_too_large(
                frame_len,
                self.config.max_record_size,
            ));
        }

        let mut state = self.state.lock();
        let unit = record.unit();
        let lsn = Lsn::new(self.end.load(Ordering::Acquire));
        let prev_lsn = state
            .unit_last_lsn
            .get(&unit)
            .copied()
            .unwrap_or(Lsn::INVALID);

        let frame = record.encode(lsn, prev_lsn);
        state.file.seek(SeekFrom::Start(lsn.as_u64()))?;
        state.file.write_all(&frame)?;
        self.end
            .store(lsn.as_u64() + frame.len() as u64, Ordering::Release);

        let record_type = record.record_type();
        if record_type == RecordType::AtomicUnitEnd {
            state.unit_last_lsn.remove(&unit);
        } else {
            state.unit_last_lsn.insert(unit, lsn);
        }
        state.last_unit = state.last_unit.max(unit);
        state.unsynced = true;

        self.stats
            .bytes_written
            .fetch_add(frame.len() as u64, Ordering::Relaxed);
        self.stats.records_written.fetch_add(1, Ordering::Relaxed);

        match self.config.sync_policy {
            SyncPolicy::EveryWrite => self.sync_locked(&mut state)?,
            SyncPolicy::OnCommit if record_type == RecordType::AtomicUnitEnd => {
                self.sync_locked(&mut state)?
            }
            _ => {}
        }

        debug!(%lsn, %unit, ?record_type, len = frame.len(), "WAL record appended");
        Ok(lsn)
    }

    fn end(&self) -> Lsn {
        Lsn::new(self.end.load(Ordering::Acquire))
    }

    fn flush(&self) -> WalResult<()> {
        let mut state = self.state.lock();
        if state.unsynced {
            self.sync_locked(&mut state)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("config", &self.config)
            .field("end", &self.end())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::PageDiff;
    use crate::record::header::RecordHeader;
    use std::collections::BTreeMap;
    use std::path::Path;
    use tempfile::TempDir;
    use vellum_common::types::FileId;

    fn test_config(dir: &Path) -> WalConfig {
        WalConfig::new(dir.join("vellum.wal")).with_sync_policy(SyncPolicy::EveryWrite)
    }

    fn update(unit: u64, page_index: u64) -> WalRecord {
        WalRecord::UpdatePage {
            unit: OperationUnitId::new(unit),
            file_id: FileId::new(1),
            page_index,
            initial_lsn: Lsn::INVALID,
            diff: PageDiff::single(16, &[0xAA; 4]),
        }
    }

    fn end(unit: u64) -> WalRecord {
        WalRecord::AtomicUnitEnd {
            unit: OperationUnitId::new(unit),
            rollback: false,
            metadata: BTreeMap::new(),
        }
    }

    fn read_header(path: &Path, lsn: Lsn) -> RecordHeader {
        let bytes = std::fs::read(path).unwrap();
        let at = lsn.as_u64() as usize;
        RecordHeader::from_bytes(&bytes[at..at + RecordHeader::SIZE]).unwrap()
    }

    #[test]
    fn test_wal_creation() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(test_config(tmp.path())).unwrap();

        assert!(!wal.is_closed());
        assert_eq!(wal.end(), wal.first_lsn());
        assert_eq!(wal.last_unit_id(), OperationUnitId::INVALID);
    }

    #[test]
    fn test_lsn_is_byte_offset() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(test_config(tmp.path())).unwrap();

        let first = update(1, 0);
        let lsn1 = wal.log(&first).unwrap();
        let lsn2 = wal.log(&end(1)).unwrap();

        assert_eq!(lsn1, wal.first_lsn());
        assert_eq!(lsn2.as_u64(), lsn1.as_u64() + first.frame_len() as u64);
        assert_eq!(
            wal.end().as_u64(),
            lsn2.as_u64() + end(1).frame_len() as u64
        );
        assert_eq!(wal.stats().records_written.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_unit_lsn_chain() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let path = config.path.clone();
        let wal = Wal::open(config).unwrap();

        let a1 = wal.log(&update(1, 0)).unwrap();
        let b1 = wal.log(&update(2, 0)).unwrap();
        let a2 = wal.log(&update(1, 1)).unwrap();
        let a_end = wal.log(&end(1)).unwrap();
        let a_next = wal.log(&update(1, 2)).unwrap();

        assert_eq!(read_header(&path, a1).prev_lsn, Lsn::INVALID);
        assert_eq!(read_header(&path, b1).prev_lsn, Lsn::INVALID);
        assert_eq!(read_header(&path, a2).prev_lsn, a1);
        assert_eq!(read_header(&path, a_end).prev_lsn, a2);
        // The end record closes the chain
        assert_eq!(read_header(&path, a_next).prev_lsn, Lsn::INVALID);
    }

    #[test]
    fn test_read_from() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(test_config(tmp.path())).unwrap();

        wal.log(&update(1, 0)).unwrap();
        let mid = wal.log(&update(1, 1)).unwrap();
        wal.log(&end(1)).unwrap();

        let all = wal.read_from(Lsn::INVALID).unwrap();
        assert_eq!(all.len(), 3);

        let tail = wal.read_from(mid).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0], (mid, update(1, 1)));
    }

    #[test]
    fn test_wal_reopen() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());

        let final_end = {
            let wal = Wal::open(config.clone()).unwrap();
            wal.log(&update(7, 0)).unwrap();
            wal.log(&end(7)).unwrap();
            wal.close().unwrap();
            wal.end()
        };

        let wal = Wal::open(config).unwrap();
        assert_eq!(wal.end(), final_end);
        assert_eq!(wal.last_unit_id(), OperationUnitId::new(7));
        assert_eq!(wal.read_from(Lsn::INVALID).unwrap().len(), 2);
    }

    #[test]
    fn test_torn_tail_discarded() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());

        let (committed_end, torn_at) = {
            let wal = Wal::open(config.clone()).unwrap();
            wal.log(&update(1, 0)).unwrap();
            wal.log(&end(1)).unwrap();
            let committed_end = wal.end();
            wal.log(&update(2, 0)).unwrap();
            (committed_end, wal.end())
        };

        // Cut the last record in half
        let file = OpenOptions::new().write(true).open(&config.path).unwrap();
        file.set_len(torn_at.as_u64() - 10).unwrap();
        drop(file);

        let wal = Wal::open(config.clone()).unwrap();
        assert_eq!(wal.end(), committed_end);
        assert_eq!(
            std::fs::metadata(&config.path).unwrap().len(),
            committed_end.as_u64()
        );

        // New records are appended after the last valid one
        let lsn = wal.log(&update(3, 0)).unwrap();
        assert_eq!(lsn, committed_end);
        assert_eq!(wal.read_from(Lsn::INVALID).unwrap().len(), 3);
    }

    #[test]
    fn test_record_too_large() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path()).with_max_record_size(64);
        let wal = Wal::open(config).unwrap();

        let record = WalRecord::UpdatePage {
            unit: OperationUnitId::new(1),
            file_id: FileId::new(1),
            page_index: 0,
            initial_lsn: Lsn::INVALID,
            diff: PageDiff::single(0, &[1u8; 128]),
        };
        assert!(matches!(
            wal.log(&record),
            Err(WalError::RecordTooLarge { .. })
        ));
        assert_eq!(wal.end(), wal.first_lsn());
    }

    #[test]
    fn test_wal_close() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(test_config(tmp.path())).unwrap();

        wal.log(&update(1, 0)).unwrap();
        wal.close().unwrap();
        assert!(wal.is_closed());
        assert!(matches!(wal.log(&update(1, 1)), Err(WalError::Closed)));
    }

    #[test]
    fn test_sync_policy_on_commit() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path()).with_sync_policy(SyncPolicy::OnCommit);
        let wal = Wal::open(config).unwrap();

        wal.log(&update(1, 0)).unwrap();
        assert_eq!(wal.stats().syncs.load(Ordering::Relaxed), 0);
        wal.log(&end(1)).unwrap();
        assert_eq!(wal.stats().syncs.load(Ordering::Relaxed), 1);

        // Nothing left to sync
        wal.flush().unwrap();
        assert_eq!(wal.stats().syncs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_sync_policy_never() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path()).with_sync_policy(SyncPolicy::Never);
        let wal = Wal::open(config).unwrap();

        wal.log(&update(1, 0)).unwrap();
        wal.log(&end(1)).unwrap();
        assert_eq!(wal.stats().syncs.load(Ordering::Relaxed), 0);

        wal.flush().unwrap();
        assert_eq!(wal.stats().syncs.load(Ordering::Relaxed), 1);
    }
}
