//! Durable page header.
//!
//! Every page handled by the page cache starts with a 16-byte header that
//! carries the page LSN and a checksum of the page contents.
//!
//! # Header Layout (16 bytes)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       2   magic (0x564C = "VL"), zero on never-written pages
//!   2       2   reserved
//!   4       4   checksum (CRC32 of the page, excluding this field)
//!   8       8   lsn (position of the last applied log record)
//! ```

use bytes::{Buf, BufMut};

use vellum_common::constants::{DURABLE_PAGE_HEADER_SIZE, PAGE_MAGIC};
use vellum_common::types::Lsn;

use super::checksum::{compute_page_checksum, ChecksumResult};

const MAGIC_OFFSET: usize = 0;
const CHECKSUM_OFFSET: usize = 4;
const LSN_OFFSET: usize = 8;

/// View over the durable header of a page.
///
/// # Example
///
/// ```rust
/// use vellum_storage::page::DurablePage;
/// use vellum_common::types::Lsn;
///
/// let mut buffer = vec![0u8; 4096];
/// let mut page = DurablePage::new(&mut buffer[..]);
/// assert!(!page.is_initialized());
///
/// page.set_lsn(Lsn::new(42));
/// page.stamp();
/// assert!(page.verify_checksum().is_valid());
/// ```
#[derive(Debug)]
pub struct DurablePage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> DurablePage<B> {
    /// Creates a header view over a full page buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than the durable header.
    pub fn new(data: B) -> Self {
        assert!(
            data.as_ref().len() >= DURABLE_PAGE_HEADER_SIZE,
            "buffer too small for durable page header"
        );
        Self { data }
    }

    /// Returns the magic value.
    #[inline]
    pub fn magic(&self) -> u16 {
        (&self.data.as_ref()[MAGIC_OFFSET..]).get_u16_le()
    }

    /// Returns true if the page was stamped by a previous write-back.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.magic() == PAGE_MAGIC
    }

    /// Returns the stored checksum.
    #[inline]
    pub fn checksum(&self) -> u32 {
        (&self.data.as_ref()[CHECKSUM_OFFSET..]).get_u32_le()
    }

    /// Returns the page LSN.
    #[inline]
    pub fn lsn(&self) -> Lsn {
        Lsn::new((&self.data.as_ref()[LSN_OFFSET..]).get_u64_le())
    }

    /// Verifies the page checksum.
    ///
    /// Pages that were never stamped are always valid.
    pub fn verify_checksum(&self) -> ChecksumResult {
        if !self.is_initialized() {
            return ChecksumResult::Valid;
        }
        let expected = self.checksum();
        let computed = compute_page_checksum(self.data.as_ref(), CHECKSUM_OFFSET);
        if expected == computed {
            ChecksumResult::Valid
        } else {
            ChecksumResult::Invalid { expected, computed }
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> DurablePage<B> {
    /// Sets the page LSN.
    #[inline]
    pub fn set_lsn(&mut self, lsn: Lsn) {
        (&mut self.data.as_mut()[LSN_OFFSET..]).put_u64_le(lsn.as_u64());
    }

    /// Writes the magic and recomputes the checksum.
    ///
    /// Call this after all other modifications to the page are complete.
    pub fn stamp(&mut self) {
        (&mut self.data.as_mut()[MAGIC_OFFSET..]).put_u16_le(PAGE_MAGIC);
        let checksum = compute_page_checksum(self.data.as_ref(), CHECKSUM_OFFSET);
        (&mut self.data.as_mut()[CHECKSUM_OFFSET..]).put_u32_le(checksum);
    }
}
