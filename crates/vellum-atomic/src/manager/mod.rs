//! Atomic operations manager.
//!
//! The manager hands out operation unit ids and ends operations, either by
//! committing them against the write-ahead log or by discarding them.
//!
//! # Operation States
//!
//! ```text
//! ┌───────┐  start_atomic_operation()  ┌────────┐
//! │ Start │───────────────────────────▶│ Active │
//! └───────┘                            └────────┘
//!                                           │
//!                           end_atomic_operation(op, rollback)
//!                                           │
//!                              ┌────────────┴────────────┐
//!                              │                         │
//!                         rollback = false          rollback = true
//!                              │                         │
//!                              ▼                         ▼
//!                       ┌───────────┐            ┌─────────────┐
//!                       │ Committed │            │ Rolled back │
//!                       └───────────┘            └─────────────┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use vellum_common::config::StorageConfig;
use vellum_common::types::{Lsn, OperationUnitId};
use vellum_storage::cache::WriteCache;
use vellum_wal::WriteAheadLog;

use crate::error::AtomicResult;
use crate::operation::AtomicOperation;

/// Configuration for the operations manager.
#[derive(Debug, Clone)]
pub struct AtomicOperationsConfig {
    /// Verify page checksums when operations read pages.
    pub verify_checksums: bool,
    /// Pages loaded ahead on a read miss.
    pub prefetch_pages: usize,
    /// First unit id handed out.
    pub first_unit_id: OperationUnitId,
}

impl Default for AtomicOperationsConfig {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            prefetch_pages: 1,
            first_unit_id: OperationUnitId::MIN,
        }
    }
}

impl AtomicOperationsConfig {
    /// Derives the read settings from the storage configuration.
    pub fn from_storage(config: &StorageConfig) -> Self {
        Self {
            verify_checksums: config.verify_checksums,
            prefetch_pages: config.prefetch_pages,
            ..Self::default()
        }
    }

    /// Sets the first unit id, typically one past the last id found in the
    /// log.
    #[must_use]
    pub fn with_first_unit_id(mut self, unit: OperationUnitId) -> Self {
        self.first_unit_id = unit;
        self
    }
}

/// Operations manager statistics.
#[derive(Debug, Default)]
pub struct AtomicOperationsStats {
    /// Total operations started.
    pub started: AtomicU64,
    /// Total operations committed.
    pub committed: AtomicU64,
    /// Total operations rolled back.
    pub rolled_back: AtomicU64,
    /// Currently active operations.
    pub active: AtomicU64,
}

/// Starts and ends atomic operations over one page cache and one log.
pub struct AtomicOperationsManager<C: WriteCache, W: WriteAheadLog> {
    cache: Arc<C>,
    wal: Arc<W>,
    config: AtomicOperationsConfig,
    next_unit: AtomicU64,
    stats: AtomicOperationsStats,
}

impl<C: WriteCache, W: WriteAheadLog> AtomicOperationsManager<C, W> {
    /// Creates a manager with the default configuration.
    pub fn new(cache: Arc<C>, wal: Arc<W>) -> Self {
        Self::with_config(cache, wal, AtomicOperationsConfig::default())
    }

    /// Creates a manager with a custom configuration.
    pub fn with_config(cache: Arc<C>, wal: Arc<W>, config: AtomicOperationsConfig) -> Self {
        let first = config.first_unit_id.max(OperationUnitId::MIN);
        Self {
            cache,
            wal,
            next_unit: AtomicU64::new(first.as_u64()),
            config,
            stats: AtomicOperationsStats::default(),
        }
    }

    /// Starts a new operation with a fresh unit id.
    pub fn start_atomic_operation(&self) -> AtomicOperation<C> {
        let unit = OperationUnitId::new(self.next_unit.fetch_add(1, Ordering::AcqRel));
        self.stats.started.fetch_add(1, Ordering::Relaxed);
        self.stats.active.fetch_add(1, Ordering::Relaxed);

        debug!(%unit, "started atomic operation");
        AtomicOperation::new(unit, Arc::clone(&self.cache))
            .with_verify_checksums(self.config.verify_checksums)
            .with_prefetch_pages(self.config.prefetch_pages)
    }

    /// Ends an operation.
    ///
    /// Commits it unless `rollback` is set or the operation was flagged for
    /// rollback, in which case every staged change is discarded. Returns the
    /// commit LSN of a committed operation.
    pub async fn end_atomic_operation(
        &self,
        mut operation: AtomicOperation<C>,
        rollback: bool,
    ) -> AtomicResult<Option<Lsn>> {
        self.stats.active.fetch_sub(1, Ordering::Relaxed);
        let unit = operation.unit_id();

        if rollback || operation.is_rollback_in_progress() {
            operation.rollback_in_progress();
            drop(operation);
            self.stats.rolled_back.fetch_add(1, Ordering::Relaxed);
            debug!(%unit, "rolled back atomic operation");
            return Ok(None);
        }

        let commit_lsn = operation.commit_changes(&*self.wal).await?;
        self.stats.committed.fetch_add(1, Ordering::Relaxed);
        Ok(Some(commit_lsn))
    }

    /// Makes every committed operation durable.
    ///
    /// The log is synced before pages are written back, so no page on disk
    /// carries a change the log could still lose.
    pub async fn flush(&self) -> AtomicResult<()> {
        self.wal.flush()?;
        self.cache.flush().await?;
        debug!("flushed log and page cache");
        Ok(())
    }

    /// Returns the page cache.
    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    /// Returns the write-ahead log.
    pub fn wal(&self) -> &Arc<W> {
        &self.wal
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AtomicOperationsConfig {
        &self.config
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &AtomicOperationsStats {
        &self.stats
    }

    /// Returns the number of operations started and not yet ended.
    pub fn active_operations(&self) -> u64 {
        self.stats.active.load(Ordering::Relaxed)
    }
}

impl<C: WriteCache, W: WriteAheadLog> fmt::Debug for AtomicOperationsManager<C, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicOperationsManager")
            .field("config", &self.config)
            .field("next_unit", &self.next_unit.load(Ordering::Relaxed))
            .field("stats", &self.stats)
            .finish()
    }
}
