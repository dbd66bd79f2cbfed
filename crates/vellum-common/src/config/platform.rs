//! Operating system resource probing.
//!
//! Resource limits are discovered once at startup through [`PlatformProbe`]
//! and injected into [`StorageConfig`](super::StorageConfig). Nothing in the
//! storage core queries the OS directly.
//!
//! # Platform Support
//!
//! - **Unix**: `getrlimit(RLIMIT_NOFILE)` and `sysconf(_SC_PHYS_PAGES)`
//! - **Other**: limits are reported as unknown

/// Source of operating system resource limits.
pub trait PlatformProbe: Send + Sync {
    /// Returns the soft limit on open file descriptors, if known.
    fn max_open_files(&self) -> Option<u64>;

    /// Returns the amount of physical memory in bytes, if known.
    fn physical_memory(&self) -> Option<u64>;
}

/// Probe backed by the host operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProbe;

impl PlatformProbe for OsProbe {
    #[cfg(unix)]
    fn max_open_files(&self) -> Option<u64> {
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        let ret = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
        if ret != 0 || limit.rlim_cur == libc::RLIM_INFINITY {
            return None;
        }
        Some(limit.rlim_cur as u64)
    }

    #[cfg(not(unix))]
    fn max_open_files(&self) -> Option<u64> {
        None
    }

    #[cfg(unix)]
    fn physical_memory(&self) -> Option<u64> {
        let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if pages <= 0 || page_size <= 0 {
            return None;
        }
        (pages as u64).checked_mul(page_size as u64)
    }

    #[cfg(not(unix))]
    fn physical_memory(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn test_os_probe_reports_limits() {
        let probe = OsProbe;
        if let Some(files) = probe.max_open_files() {
            assert!(files > 0);
        }
        assert!(probe.physical_memory().unwrap_or(1) > 0);
    }
}
