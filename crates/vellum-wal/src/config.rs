//! WAL configuration.
//!
//! This module provides configuration options for the Write-Ahead Log.

use std::path::PathBuf;

use vellum_common::constants::{MAX_WAL_RECORD_SIZE, WAL_RECORD_HEADER_SIZE};

/// Sync policy for WAL writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// Sync after every appended record (safest, slowest).
    EveryWrite,
    /// Sync after every atomic-unit-end record.
    #[default]
    OnCommit,
    /// Never sync implicitly; only an explicit `flush()` reaches disk.
    ///
    /// Committed pages can then be written back ahead of their records, so
    /// the log must be flushed before the page cache.
    Never,
}

/// Configuration for the Write-Ahead Log.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Path of the log file.
    pub path: PathBuf,

    /// Maximum size of a single framed record (header + payload).
    pub max_record_size: usize,

    /// Sync policy for durability.
    pub sync_policy: SyncPolicy,

    /// Whether to verify record checksums on read.
    pub verify_checksums: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/vellum.wal"),
            max_record_size: MAX_WAL_RECORD_SIZE,
            sync_policy: SyncPolicy::default(),
            verify_checksums: true,
        }
    }
}

impl WalConfig {
    /// Creates a new WAL configuration for the given log file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Sets the maximum record size.
    #[must_use]
    pub fn with_max_record_size(mut self, size: usize) -> Self {
        self.max_record_size = size;
        self
    }

    /// Sets the sync policy.
    #[must_use]
    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    /// Sets whether to verify checksums on read.
    #[must_use]
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("WAL path must not be empty".to_string());
        }

        if self.max_record_size <= WAL_RECORD_HEADER_SIZE {
            return Err(format!(
                "Max record size must exceed the {} byte record header",
                WAL_RECORD_HEADER_SIZE
            ));
        }

        if self.max_record_size > u32::MAX as usize {
            return Err("Max record size must fit in 32 bits".to_string());
        }

        Ok(())
    }
}
