//! Storage core configuration.
//!
//! These settings are shared by the paginated file store, the bucket page
//! layout and the page cache. They are fixed for the lifetime of a store.

use serde::{Deserialize, Serialize};

use super::platform::PlatformProbe;
use crate::constants::{DEFAULT_MAX_ENTRY_SIZE, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE};

/// Storage configuration.
///
/// # Example
///
/// ```rust
/// use vellum_common::config::StorageConfig;
///
/// let config = StorageConfig::default().with_page_size(4096);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.page_size, 4096);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Size of each page in bytes. Must be a power of 2.
    /// Default: 8192 (8 KB)
    pub page_size: usize,

    /// Hard maximum for one serialized key + value pair in a bucket.
    /// Exceeding it is a configuration error, never retried.
    /// Default: 24576 (24 KB)
    pub max_entry_size: usize,

    /// Verify page checksums when pages are loaded from disk.
    /// Default: true
    pub verify_checksums: bool,

    /// Number of consecutive pages read on a cache miss.
    /// Default: 1
    pub prefetch_pages: usize,

    /// Upper bound on simultaneously open files, if known.
    /// Default: None (no limit enforced)
    pub max_open_files: Option<u64>,

    /// Soft capacity of the page cache, in pages.
    /// Default: 16384 (128 MB with 8 KB pages)
    pub cache_capacity_pages: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            verify_checksums: true,
            prefetch_pages: 1,
            max_open_files: None,
            cache_capacity_pages: 16 * 1024,
        }
    }
}

impl StorageConfig {
    /// Creates a small configuration for testing.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            page_size: 4096,
            cache_capacity_pages: 256,
            ..Default::default()
        }
    }

    /// Sets the page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the maximum serialized entry size.
    #[must_use]
    pub fn with_max_entry_size(mut self, max_entry_size: usize) -> Self {
        self.max_entry_size = max_entry_size;
        self
    }

    /// Enables or disables checksum verification.
    #[must_use]
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Sets the number of pages read ahead on a cache miss.
    #[must_use]
    pub fn with_prefetch_pages(mut self, pages: usize) -> Self {
        self.prefetch_pages = pages;
        self
    }

    /// Applies resource limits discovered by a platform probe.
    ///
    /// The probe is queried once; the cache capacity is capped at a quarter of
    /// physical memory and the open-file limit is recorded.
    #[must_use]
    pub fn with_platform(mut self, probe: &dyn PlatformProbe) -> Self {
        if let Some(limit) = probe.max_open_files() {
            self.max_open_files = Some(limit);
        }
        if let Some(memory) = probe.physical_memory() {
            let budget = (memory / 4) / self.page_size.max(1) as u64;
            let budget = usize::try_from(budget).unwrap_or(usize::MAX).max(1);
            self.cache_capacity_pages = self.cache_capacity_pages.min(budget);
        }
        self
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.page_size < MIN_PAGE_SIZE {
            return Err(format!("page_size must be at least {MIN_PAGE_SIZE} bytes"));
        }

        if self.page_size > MAX_PAGE_SIZE {
            return Err(format!("page_size must be at most {MAX_PAGE_SIZE} bytes"));
        }

        if !self.page_size.is_power_of_two() {
            return Err("page_size must be a power of 2".to_string());
        }

        if self.max_entry_size == 0 {
            return Err("max_entry_size must be greater than 0".to_string());
        }

        if self.prefetch_pages == 0 {
            return Err("prefetch_pages must be at least 1".to_string());
        }

        if self.cache_capacity_pages == 0 {
            return Err("cache_capacity_pages must be at least 1".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe {
        files: Option<u64>,
        memory: Option<u64>,
    }

    impl PlatformProbe for FixedProbe {
        fn max_open_files(&self) -> Option<u64> {
            self.files
        }

        fn physical_memory(&self) -> Option<u64> {
            self.memory
        }
    }

    #[test]
    fn test_default_is_valid() {
        assert!(StorageConfig::default().validate().is_ok());
        assert!(StorageConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_invalid_page_size() {
        let config = StorageConfig::default().with_page_size(3000);
        assert!(config.validate().is_err());

        let config = StorageConfig::default().with_page_size(512);
        assert!(config.validate().is_err());

        let config = StorageConfig::default().with_page_size(128 * 1024);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_prefetch_rejected() {
        let config = StorageConfig::default().with_prefetch_pages(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_platform_caps_cache() {
        let probe = FixedProbe {
            files: Some(1024),
            memory: Some(4 * 1024 * 1024),
        };
        let config = StorageConfig::default().with_platform(&probe);

        assert_eq!(config.max_open_files, Some(1024));
        // A quarter of 4 MB in 8 KB pages.
        assert_eq!(config.cache_capacity_pages, 128);
    }

    #[test]
    fn test_with_platform_unknown_limits() {
        let probe = FixedProbe {
            files: None,
            memory: None,
        };
        let config = StorageConfig::default().with_platform(&probe);
        assert_eq!(config, StorageConfig::default());
    }
}
