//! Identifier newtypes.
//!
//! Each identifier wraps a `u64` where zero is reserved as the invalid
//! sentinel, so a default-initialized id never names a real object.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Sentinel meaning "no id".
            pub const INVALID: Self = Self(0);

            /// Wraps a raw value.
            #[inline]
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw value.
            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            /// Returns false for the sentinel.
            #[inline]
            #[must_use]
            pub const fn is_valid(self) -> bool {
                self.0 != 0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, concat!(stringify!($name), "({})"), self.0)
                } else {
                    f.write_str(concat!(stringify!($name), "(INVALID)"))
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<u64> for $name {
            #[inline]
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u64 {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Identifies a file registered in the page cache.
    ///
    /// Ids are booked by the cache when a file is created and stay stable for
    /// the lifetime of the file. A file deleted and recreated inside one
    /// atomic operation keeps its id.
    ///
    /// ```rust
    /// use vellum_common::types::FileId;
    ///
    /// let file = FileId::new(7);
    /// assert_eq!(file.as_u64(), 7);
    /// assert!(file.is_valid());
    /// ```
    FileId
}

impl FileId {
    /// First id handed out by a fresh cache.
    pub const FIRST: Self = Self(1);
}

define_id! {
    /// Identifies one atomic operation.
    ///
    /// Assigned monotonically by the atomic operations manager. Every log
    /// record an operation produces carries its unit id.
    OperationUnitId
}

impl OperationUnitId {
    /// Smallest id the manager assigns.
    pub const MIN: Self = Self(1);

    /// Returns the id following this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

define_id! {
    /// Log sequence number.
    ///
    /// The byte offset of a record inside the log file. LSNs grow strictly in
    /// append order, and a page stamped with LSN `n` already contains every
    /// change logged at or before `n`.
    ///
    /// ```rust
    /// use vellum_common::types::Lsn;
    ///
    /// assert!(Lsn::new(16) > Lsn::INVALID);
    /// ```
    Lsn
}

/// Address of a single page: the file it lives in and its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageKey {
    /// File the page belongs to.
    pub file_id: FileId,
    /// Zero-based page index inside the file.
    pub page_index: u64,
}

impl PageKey {
    /// Creates a new page key.
    #[inline]
    #[must_use]
    pub const fn new(file_id: FileId, page_index: u64) -> Self {
        Self {
            file_id,
            page_index,
        }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_id, self.page_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_and_formatting() {
        assert!(!FileId::default().is_valid());
        assert!(!Lsn::INVALID.is_valid());
        assert!(OperationUnitId::MIN.is_valid());

        assert_eq!(format!("{:?}", FileId::INVALID), "FileId(INVALID)");
        assert_eq!(format!("{:?}", Lsn::new(16)), "Lsn(16)");
        assert_eq!(Lsn::new(16).to_string(), "16");
        assert_eq!(u64::from(FileId::from(9)), 9);
    }

    #[test]
    fn test_unit_id_sequence() {
        let unit = OperationUnitId::new(100);
        assert_eq!(unit.next().as_u64(), 101);
        assert_eq!(OperationUnitId::new(u64::MAX).next().as_u64(), u64::MAX);
    }

    #[test]
    fn test_page_key_order() {
        let key = PageKey::new(FileId::new(3), 9);
        assert_eq!(key.to_string(), "3:9");
        assert!(PageKey::new(FileId::new(3), 1) < PageKey::new(FileId::new(3), 2));
        assert!(PageKey::new(FileId::new(2), 9) < PageKey::new(FileId::new(3), 0));
    }
}
