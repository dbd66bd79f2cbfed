//! Open modes for paginated files.

use std::fs;

/// How a backing file is opened.
///
/// Paginated files only ever need three modes: read-only inspection,
/// read-write access to an existing file, and exclusive creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    write: bool,
    create_new: bool,
}

impl OpenOptions {
    /// Opens an existing file read-only.
    #[must_use]
    pub const fn for_read() -> Self {
        Self {
            write: false,
            create_new: false,
        }
    }

    /// Opens an existing file for reading and writing.
    #[must_use]
    pub const fn for_write() -> Self {
        Self {
            write: true,
            create_new: false,
        }
    }

    /// Creates a file that must not exist yet.
    #[must_use]
    pub const fn for_create() -> Self {
        Self {
            write: true,
            create_new: true,
        }
    }

    /// Returns true if writes are allowed.
    #[inline]
    pub fn is_write(&self) -> bool {
        self.write
    }

    /// Returns true if the file is created by the open.
    #[inline]
    pub fn is_create(&self) -> bool {
        self.create_new
    }

    pub(crate) fn to_std_options(self) -> fs::OpenOptions {
        let mut opts = fs::OpenOptions::new();
        opts.read(true)
            .write(self.write)
            .create_new(self.create_new);
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modes() {
        assert!(!OpenOptions::for_read().is_write());
        assert!(OpenOptions::for_write().is_write());
        assert!(!OpenOptions::for_write().is_create());

        let create = OpenOptions::for_create();
        assert!(create.is_write());
        assert!(create.is_create());
    }
}
