//! Page checksums.
//!
//! A page checksum is the CRC32 of the whole page image with the 4-byte
//! checksum field itself skipped, so the stored value never feeds into its
//! own computation.

/// CRC32 over `page` excluding `page[field..field + 4]`.
pub fn compute_page_checksum(page: &[u8], field: usize) -> u32 {
    debug_assert!(field + 4 <= page.len());

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page[..field]);
    hasher.update(&page[field + 4..]);
    hasher.finalize()
}

/// Outcome of verifying a page checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumResult {
    /// The checksum matches, or the page was never stamped.
    Valid,
    /// The stored checksum does not match the page content.
    Invalid {
        /// Value stored in the page header.
        expected: u32,
        /// Value computed over the page.
        computed: u32,
    },
}

impl ChecksumResult {
    /// Returns true if the page passed verification.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }
}
