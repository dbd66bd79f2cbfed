//! Binary page diffs.
//!
//! A [`PageDiff`] is an ordered list of non-overlapping byte runs. Applying
//! it to the page image it was computed against yields the new image.
//!
//! ```text
//! encoded:  run_count u32 | { offset u32 | len u32 | bytes[len] } * run_count
//! ```

use bytes::{Buf, BufMut, Bytes};

use crate::error::{WalError, WalResult};

/// Equal bytes needed between two changed regions to keep them as separate runs.
pub const MERGE_GAP: usize = 8;

/// A contiguous run of new bytes at a page offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRun {
    /// Offset of the first byte inside the page.
    pub offset: u32,
    /// New bytes.
    pub data: Bytes,
}

impl DiffRun {
    /// Returns the offset one past the last byte of the run.
    #[inline]
    pub fn end(&self) -> usize {
        self.offset as usize + self.data.len()
    }
}

/// Ordered byte runs describing a page mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageDiff {
    runs: Vec<DiffRun>,
}

impl PageDiff {
    /// Creates an empty diff.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a diff that writes `data` at `offset`.
    pub fn single(offset: usize, data: &[u8]) -> Self {
        if data.is_empty() {
            return Self::new();
        }
        Self {
            runs: vec![DiffRun {
                offset: offset as u32,
                data: Bytes::copy_from_slice(data),
            }],
        }
    }

    /// Computes the canonical diff turning `old` into `new`.
    ///
    /// Changed regions separated by fewer than [`MERGE_GAP`] equal bytes are
    /// merged into a single run. Bytes of `new` past the end of `old` count
    /// as changed.
    pub fn between(old: &[u8], new: &[u8]) -> Self {
        let differs = |i: usize| old.get(i) != Some(&new[i]);
        let len = new.len();
        let mut runs = Vec::new();

        let mut i = 0;
        while i < len {
            if !differs(i) {
                i += 1;
                continue;
            }

            let start = i;
            let mut end = i + 1;
            let mut j = end;
            while j < len {
                if differs(j) {
                    end = j + 1;
                } else if j + 1 - end >= MERGE_GAP {
                    break;
                }
                j += 1;
            }

            runs.push(DiffRun {
                offset: start as u32,
                data: Bytes::copy_from_slice(&new[start..end]),
            });
            i = j;
        }

        Self { runs }
    }

    /// Returns true if the diff changes nothing.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Returns the runs in offset order.
    #[inline]
    pub fn runs(&self) -> &[DiffRun] {
        &self.runs
    }

    /// Returns the number of changed bytes.
    pub fn changed_bytes(&self) -> usize {
        self.runs.iter().map(|run| run.data.len()).sum()
    }

    /// Writes every run into `page`.
    pub fn apply(&self, page: &mut [u8]) -> WalResult<()> {
        for run in &self.runs {
            if run.end() > page.len() {
                return Err(WalError::DiffOutOfBounds {
                    offset: run.offset as usize,
                    len: run.data.len(),
                    page_size: page.len(),
                });
            }
        }
        for run in &self.runs {
            page[run.offset as usize..run.end()].copy_from_slice(&run.data);
        }
        Ok(())
    }

    /// Returns the encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        4 + self.runs.iter().map(|run| 8 + run.data.len()).sum::<usize>()
    }

    /// Encodes the diff.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.runs.len() as u32);
        for run in &self.runs {
            buf.put_u32_le(run.offset);
            buf.put_u32_le(run.data.len() as u32);
            buf.put_slice(&run.data);
        }
    }

    /// Decodes a diff, rejecting overlapping or unordered runs.
    pub fn decode(buf: &mut impl Buf) -> WalResult<Self> {
        if buf.remaining() < 4 {
            return Err(WalError::decode("truncated diff run count"));
        }
        let count = buf.get_u32_le() as usize;

        let mut runs = Vec::with_capacity(count.min(1024));
        let mut last_end = 0usize;
        for _ in 0..count {
            if buf.remaining() < 8 {
                return Err(WalError::decode("truncated diff run header"));
            }
            let offset = buf.get_u32_le();
            let len = buf.get_u32_le() as usize;
            if buf.remaining() < len {
                return Err(WalError::decode(format!(
                    "diff run at offset {} needs {} bytes, {} left",
                    offset,
                    len,
                    buf.remaining()
                )));
            }
            if (offset as usize) < last_end {
                return Err(WalError::decode(format!(
                    "diff run at offset {} overlaps previous run ending at {}",
                    offset, last_end
                )));
            }
            let data = buf.copy_to_bytes(len);
            last_end = offset as usize + len;
            runs.push(DiffRun { offset, data });
        }

        Ok(Self { runs })
    }
}
