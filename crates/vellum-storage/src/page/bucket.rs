//! Slotted B-tree bucket page.
//!
//! A bucket holds the sorted entries of one B-tree node. The slot array grows
//! forward from the bucket header; entry payloads grow backward from the end
//! of the page. The two regions never overlap: every insert checks the gap.
//!
//! # Page Layout
//!
//! ```text
//! +-----------------------------+
//! | Durable header (16 bytes)   |  see durable.rs
//! +-----------------------------+
//! | free pointer         u32    |
//! | size                 u32    |
//! | flags                u8     |
//! | free list pointer    u64    |
//! | left sibling         i64    |
//! | right sibling        i64    |
//! | tree size            u64    |
//! | key serializer id    u8     |
//! | value serializer id  u8     |
//! +-----------------------------+
//! | positions [u32; size]  -->  |
//! +-----------------------------+
//! |         free space          |
//! +-----------------------------+
//! |  <-- entry payloads         |  leaf: key | value
//! |                             |  internal: left | right | key
//! +-----------------------------+
//! ```

use std::marker::PhantomData;

use bytes::{Buf, BufMut};
use thiserror::Error;

use vellum_common::constants::{DEFAULT_MAX_ENTRY_SIZE, DURABLE_PAGE_HEADER_SIZE};

use super::codec::{Codec, CodecError};

const FREE_POINTER_OFFSET: usize = DURABLE_PAGE_HEADER_SIZE;
const SIZE_OFFSET: usize = FREE_POINTER_OFFSET + 4;
const FLAGS_OFFSET: usize = SIZE_OFFSET + 4;
const FREE_LIST_POINTER_OFFSET: usize = FLAGS_OFFSET + 1;
const LEFT_SIBLING_OFFSET: usize = FREE_LIST_POINTER_OFFSET + 8;
const RIGHT_SIBLING_OFFSET: usize = LEFT_SIBLING_OFFSET + 8;
const TREE_SIZE_OFFSET: usize = RIGHT_SIBLING_OFFSET + 8;
const KEY_SERIALIZER_OFFSET: usize = TREE_SIZE_OFFSET + 8;
const VALUE_SERIALIZER_OFFSET: usize = KEY_SERIALIZER_OFFSET + 1;

/// Offset of the first slot in the positions array.
pub const POSITIONS_ARRAY_OFFSET: usize = VALUE_SERIALIZER_OFFSET + 1;

/// Size of one slot in the positions array.
const SLOT_SIZE: usize = 4;

/// Size of the two child pointers in front of an internal entry's key.
const CHILD_POINTERS_SIZE: usize = 16;

/// Sibling pointer value meaning "no sibling".
pub const NO_SIBLING: i64 = -1;

bitflags::bitflags! {
    /// Bucket state flags. Each bit is independent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BucketFlags: u8 {
        /// Bucket is a leaf.
        const LEAF = 0b0000_0001;
        /// Bucket was removed from the tree.
        const DELETED = 0b0000_0010;
        /// Bucket is scheduled for removal.
        const TO_DELETE = 0b0000_0100;
    }
}

/// Result type for bucket operations.
pub type BucketResult<T> = Result<T, BucketError>;

/// Errors raised by bucket mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BucketError {
    /// The entry exceeds the configured maximum or cannot fit in a page.
    #[error("entry of {size} bytes exceeds the limit of {max} bytes")]
    EntryTooLarge {
        /// Serialized entry size.
        size: usize,
        /// Limit that was exceeded.
        max: usize,
    },

    /// A leaf-only operation was applied to an internal bucket.
    #[error("operation requires a leaf bucket")]
    NotALeaf,

    /// In-place value updates need fixed-size values.
    #[error("value codec {serializer_id} is not fixed-length")]
    VariableLengthValue {
        /// Serializer id of the value codec.
        serializer_id: u8,
    },

    /// An insertion point past the last entry.
    #[error("insertion index {index} is past the {size} stored entries")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Entries in the bucket.
        size: usize,
    },

    /// A stored key or value failed to decode.
    #[error("corrupted bucket entry: {0}")]
    Decode(#[from] CodecError),

    /// A batch of entries did not fit into the bucket.
    #[error("bucket full after {entries} entries")]
    Full {
        /// Entries present when the bucket ran out of space.
        entries: usize,
    },
}

impl BucketError {
    /// Returns true if the error can never succeed on retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EntryTooLarge { .. }
                | Self::VariableLengthValue { .. }
                | Self::IndexOutOfBounds { .. }
                | Self::Decode(_)
        )
    }
}

/// Outcome of a binary search over bucket keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// The key is stored at this index.
    Found(usize),
    /// The key is absent and would be inserted at this index.
    NotFound(usize),
}

impl SearchResult {
    /// Encodes the result as a single integer.
    ///
    /// A found index is returned as is; an insertion point `p` as `-(p + 1)`.
    pub fn encode(self) -> i64 {
        match self {
            Self::Found(index) => index as i64,
            Self::NotFound(point) => -(point as i64) - 1,
        }
    }

    /// Decodes an integer produced by [`SearchResult::encode`].
    pub fn decode(value: i64) -> Self {
        if value >= 0 {
            Self::Found(value as usize)
        } else {
            Self::NotFound((-(value + 1)) as usize)
        }
    }

    /// Returns the index of the key if it was found.
    pub fn found(self) -> Option<usize> {
        match self {
            Self::Found(index) => Some(index),
            Self::NotFound(_) => None,
        }
    }

    /// Returns the index where the key is or would be.
    pub fn index(self) -> usize {
        match self {
            Self::Found(index) | Self::NotFound(index) => index,
        }
    }
}

/// A decoded bucket entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketEntry<K, V> {
    /// Entry of a leaf bucket.
    Leaf {
        /// Entry key.
        key: K,
        /// Entry value.
        value: V,
    },
    /// Entry of an internal bucket: a separator key and its two children.
    Internal {
        /// Page index of the child holding keys below `key`.
        left_child: i64,
        /// Page index of the child holding keys from `key` on.
        right_child: i64,
        /// Separator key.
        key: K,
    },
}

impl<K: Codec, V: Codec> BucketEntry<K, V> {
    /// Returns the entry key.
    pub fn key(&self) -> &K {
        match self {
            Self::Leaf { key, .. } | Self::Internal { key, .. } => key,
        }
    }

    fn encoded_size(&self) -> usize {
        match self {
            Self::Leaf { key, value } => key.encoded_size() + value.encoded_size(),
            Self::Internal { key, .. } => CHILD_POINTERS_SIZE + key.encoded_size(),
        }
    }
}

/// Typed view of a bucket over a page buffer.
///
/// Read accessors need `B: AsRef<[u8]>`, mutations additionally
/// `B: AsMut<[u8]>`.
///
/// # Example
///
/// ```rust
/// use vellum_storage::page::{Bucket, BucketEntry, SearchResult};
///
/// let mut page = vec![0u8; 4096];
/// let mut bucket: Bucket<_, i64, u64> = Bucket::new(&mut page[..]);
/// bucket.init(true);
///
/// let entry = BucketEntry::Leaf { key: 10, value: 100 };
/// assert!(bucket.add_entry(0, &entry, false).unwrap());
/// assert_eq!(bucket.find(&10).unwrap(), SearchResult::Found(0));
/// assert_eq!(bucket.find(&5).unwrap().encode(), -1);
/// ```
pub struct Bucket<B, K, V> {
    data: B,
    max_entry_size: usize,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<B: AsRef<[u8]>, K: Codec + Ord, V: Codec> Bucket<B, K, V> {
    /// Creates a bucket view with the default entry size limit.
    pub fn new(data: B) -> Self {
        debug_assert!(data.as_ref().len() > POSITIONS_ARRAY_OFFSET);
        Self {
            data,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            _marker: PhantomData,
        }
    }

    /// Sets the hard limit on serialized leaf entries.
    #[must_use]
    pub fn with_max_entry_size(mut self, max_entry_size: usize) -> Self {
        self.max_entry_size = max_entry_size;
        self
    }

    /// Returns the underlying buffer.
    pub fn into_inner(self) -> B {
        self.data
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn read_u32(&self, offset: usize) -> u32 {
        (&self.bytes()[offset..]).get_u32_le()
    }

    fn read_u64(&self, offset: usize) -> u64 {
        (&self.bytes()[offset..]).get_u64_le()
    }

    fn read_i64(&self, offset: usize) -> i64 {
        (&self.bytes()[offset..]).get_i64_le()
    }

    fn free_pointer(&self) -> usize {
        self.read_u32(FREE_POINTER_OFFSET) as usize
    }

    fn position(&self, index: usize) -> usize {
        self.read_u32(POSITIONS_ARRAY_OFFSET + index * SLOT_SIZE) as usize
    }

    fn entry_size_at(&self, position: usize) -> usize {
        if self.is_leaf() {
            let key_size = K::encoded_size_in(&self.bytes()[position..]);
            key_size + V::encoded_size_in(&self.bytes()[position + key_size..])
        } else {
            CHILD_POINTERS_SIZE + K::encoded_size_in(&self.bytes()[position + CHILD_POINTERS_SIZE..])
        }
    }

    /// Returns the number of entries.
    pub fn size(&self) -> usize {
        self.read_u32(SIZE_OFFSET) as usize
    }

    /// Returns true if the bucket holds no entries.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns the bytes left between the slot array and the payloads.
    pub fn free_space(&self) -> usize {
        self.free_pointer()
            .saturating_sub(POSITIONS_ARRAY_OFFSET + self.size() * SLOT_SIZE)
    }

    /// Returns the state flags.
    pub fn flags(&self) -> BucketFlags {
        BucketFlags::from_bits_truncate(self.bytes()[FLAGS_OFFSET])
    }

    /// Returns true if this is a leaf bucket.
    pub fn is_leaf(&self) -> bool {
        self.flags().contains(BucketFlags::LEAF)
    }

    /// Returns true if the bucket was removed from the tree.
    pub fn is_deleted(&self) -> bool {
        self.flags().contains(BucketFlags::DELETED)
    }

    /// Returns true if the bucket is scheduled for removal.
    pub fn is_to_delete(&self) -> bool {
        self.flags().contains(BucketFlags::TO_DELETE)
    }

    /// Returns the next page in the bucket free list.
    pub fn free_list_pointer(&self) -> u64 {
        self.read_u64(FREE_LIST_POINTER_OFFSET)
    }

    /// Returns the left sibling page, or [`NO_SIBLING`].
    pub fn left_sibling(&self) -> i64 {
        self.read_i64(LEFT_SIBLING_OFFSET)
    }

    /// Returns the right sibling page, or [`NO_SIBLING`].
    pub fn right_sibling(&self) -> i64 {
        self.read_i64(RIGHT_SIBLING_OFFSET)
    }

    /// Returns the number of entries in the whole tree (root bucket only).
    pub fn tree_size(&self) -> u64 {
        self.read_u64(TREE_SIZE_OFFSET)
    }

    /// Returns the key serializer id recorded at init.
    pub fn key_serializer_id(&self) -> u8 {
        self.bytes()[KEY_SERIALIZER_OFFSET]
    }

    /// Returns the value serializer id recorded at init.
    pub fn value_serializer_id(&self) -> u8 {
        self.bytes()[VALUE_SERIALIZER_OFFSET]
    }

    /// Binary search for `key`.
    pub fn find(&self, key: &K) -> BucketResult<SearchResult> {
        let mut low = 0usize;
        let mut high = self.size();

        while low < high {
            let mid = low + (high - low) / 2;
            match self.get_key(mid)?.cmp(key) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Ok(SearchResult::Found(mid)),
            }
        }
        Ok(SearchResult::NotFound(low))
    }

    /// Returns the key at `index`.
    pub fn get_key(&self, index: usize) -> BucketResult<K> {
        let mut position = self.position(index);
        if !self.is_leaf() {
            position += CHILD_POINTERS_SIZE;
        }
        Ok(K::decode(&self.bytes()[position..])?)
    }

    /// Returns the value at `index` of a leaf bucket.
    pub fn get_value(&self, index: usize) -> BucketResult<V> {
        if !self.is_leaf() {
            return Err(BucketError::NotALeaf);
        }
        let position = self.position(index);
        let key_size = K::encoded_size_in(&self.bytes()[position..]);
        Ok(V::decode(&self.bytes()[position + key_size..])?)
    }

    /// Returns the left child at `index` of an internal bucket.
    pub fn left_child(&self, index: usize) -> i64 {
        debug_assert!(!self.is_leaf());
        self.read_i64(self.position(index))
    }

    /// Returns the right child at `index` of an internal bucket.
    pub fn right_child(&self, index: usize) -> i64 {
        debug_assert!(!self.is_leaf());
        self.read_i64(self.position(index) + 8)
    }

    /// Decodes the entry at `index`.
    pub fn get_entry(&self, index: usize) -> BucketResult<BucketEntry<K, V>> {
        let entry = if self.is_leaf() {
            BucketEntry::Leaf {
                key: self.get_key(index)?,
                value: self.get_value(index)?,
            }
        } else {
            BucketEntry::Internal {
                left_child: self.left_child(index),
                right_child: self.right_child(index),
                key: self.get_key(index)?,
            }
        };
        Ok(entry)
    }

    /// Iterates over all entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = BucketResult<BucketEntry<K, V>>> + '_ {
        (0..self.size()).map(move |index| self.get_entry(index))
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>, K: Codec + Ord, V: Codec> Bucket<B, K, V> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        (&mut self.bytes_mut()[offset..]).put_u32_le(value);
    }

    fn write_u64(&mut self, offset: usize, value: u64) {
        (&mut self.bytes_mut()[offset..]).put_u64_le(value);
    }

    fn write_i64(&mut self, offset: usize, value: i64) {
        (&mut self.bytes_mut()[offset..]).put_i64_le(value);
    }

    fn set_free_pointer(&mut self, free_pointer: usize) {
        self.write_u32(FREE_POINTER_OFFSET, free_pointer as u32);
    }

    fn set_size(&mut self, size: usize) {
        self.write_u32(SIZE_OFFSET, size as u32);
    }

    fn set_position(&mut self, index: usize, position: usize) {
        self.write_u32(POSITIONS_ARRAY_OFFSET + index * SLOT_SIZE, position as u32);
    }

    fn set_flag(&mut self, flag: BucketFlags, value: bool) {
        let mut flags = self.flags();
        flags.set(flag, value);
        self.bytes_mut()[FLAGS_OFFSET] = flags.bits();
    }

    /// Resets the bucket to an empty leaf or internal node.
    pub fn init(&mut self, is_leaf: bool) {
        let page_size = self.bytes().len();
        self.bytes_mut()[FREE_POINTER_OFFSET..POSITIONS_ARRAY_OFFSET].fill(0);
        self.set_free_pointer(page_size);
        self.set_size(0);
        self.set_flag(BucketFlags::LEAF, is_leaf);
        self.set_left_sibling(NO_SIBLING);
        self.set_right_sibling(NO_SIBLING);
        self.bytes_mut()[KEY_SERIALIZER_OFFSET] = K::SERIALIZER_ID;
        self.bytes_mut()[VALUE_SERIALIZER_OFFSET] = V::SERIALIZER_ID;
    }

    /// Marks the bucket as removed from the tree.
    pub fn set_deleted(&mut self, deleted: bool) {
        self.set_flag(BucketFlags::DELETED, deleted);
    }

    /// Marks the bucket as scheduled for removal.
    pub fn set_to_delete(&mut self, to_delete: bool) {
        self.set_flag(BucketFlags::TO_DELETE, to_delete);
    }

    /// Sets the next page in the bucket free list.
    pub fn set_free_list_pointer(&mut self, pointer: u64) {
        self.write_u64(FREE_LIST_POINTER_OFFSET, pointer);
    }

    /// Sets the left sibling page.
    pub fn set_left_sibling(&mut self, page_index: i64) {
        self.write_i64(LEFT_SIBLING_OFFSET, page_index);
    }

    /// Sets the right sibling page.
    pub fn set_right_sibling(&mut self, page_index: i64) {
        self.write_i64(RIGHT_SIBLING_OFFSET, page_index);
    }

    /// Sets the number of entries in the whole tree.
    pub fn set_tree_size(&mut self, size: u64) {
        self.write_u64(TREE_SIZE_OFFSET, size);
    }

    /// Inserts `entry` at `index`, shifting later slots right.
    ///
    /// Returns `Ok(false)` if the bucket lacks room and holds more than one
    /// entry, so the caller can split it. With `update_neighbors` on an
    /// internal bucket the adjacent entries are relinked to the new children.
    pub fn add_entry(
        &mut self,
        index: usize,
        entry: &BucketEntry<K, V>,
        update_neighbors: bool,
    ) -> BucketResult<bool> {
        let size = self.size();
        if index > size {
            return Err(BucketError::IndexOutOfBounds { index, size });
        }

        let entry_size = entry.encoded_size();
        if matches!(entry, BucketEntry::Leaf { .. }) && entry_size > self.max_entry_size {
            return Err(BucketError::EntryTooLarge {
                size: entry_size,
                max: self.max_entry_size,
            });
        }

        let free_pointer = self.free_pointer();
        let slots_end = POSITIONS_ARRAY_OFFSET + (size + 1) * SLOT_SIZE;
        if slots_end + entry_size > free_pointer {
            if size > 1 {
                return Ok(false);
            }
            return Err(BucketError::EntryTooLarge {
                size: entry_size,
                max: self.bytes().len() - POSITIONS_ARRAY_OFFSET - SLOT_SIZE,
            });
        }
        if index < size {
            let from = POSITIONS_ARRAY_OFFSET + index * SLOT_SIZE;
            let to = POSITIONS_ARRAY_OFFSET + size * SLOT_SIZE;
            self.bytes_mut().copy_within(from..to, from + SLOT_SIZE);
        }

        let position = free_pointer - entry_size;
        self.set_free_pointer(position);
        self.set_position(index, position);
        self.set_size(size + 1);

        match entry {
            BucketEntry::Leaf { key, value } => {
                let key_size = key.encoded_size();
                key.encode_into(&mut self.bytes_mut()[position..]);
                value.encode_into(&mut self.bytes_mut()[position + key_size..]);
            }
            BucketEntry::Internal {
                left_child,
                right_child,
                key,
            } => {
                self.write_i64(position, *left_child);
                self.write_i64(position + 8, *right_child);
                key.encode_into(&mut self.bytes_mut()[position + CHILD_POINTERS_SIZE..]);

                if update_neighbors {
                    if index + 1 < size + 1 {
                        let next = self.position(index + 1);
                        self.write_i64(next, *right_child);
                    }
                    if index > 0 {
                        let previous = self.position(index - 1);
                        self.write_i64(previous + 8, *left_child);
                    }
                }
            }
        }

        Ok(true)
    }

    /// Removes the entry at `index` and compacts the payload region.
    pub fn remove(&mut self, index: usize) {
        let size = self.size();
        debug_assert!(index < size);

        let position = self.position(index);
        let entry_size = self.entry_size_at(position);

        if index + 1 < size {
            let from = POSITIONS_ARRAY_OFFSET + (index + 1) * SLOT_SIZE;
            let to = POSITIONS_ARRAY_OFFSET + size * SLOT_SIZE;
            self.bytes_mut().copy_within(from..to, from - SLOT_SIZE);
        }
        let size = size - 1;
        self.set_size(size);

        let free_pointer = self.free_pointer();
        if free_pointer < position {
            self.bytes_mut()
                .copy_within(free_pointer..position, free_pointer + entry_size);
        }
        self.set_free_pointer(free_pointer + entry_size);

        for i in 0..size {
            let current = self.position(i);
            if current < position {
                self.set_position(i, current + entry_size);
            }
        }
    }

    /// Overwrites the value at `index` of a leaf bucket in place.
    ///
    /// Returns whether the stored bytes changed.
    pub fn update_value(&mut self, index: usize, value: &V) -> BucketResult<bool> {
        if !self.is_leaf() {
            return Err(BucketError::NotALeaf);
        }
        let Some(value_size) = V::FIXED_SIZE else {
            return Err(BucketError::VariableLengthValue {
                serializer_id: V::SERIALIZER_ID,
            });
        };

        let position = self.position(index);
        let value_position = position + K::encoded_size_in(&self.bytes()[position..]);
        let encoded = value.to_bytes();
        let current = &self.bytes()[value_position..value_position + value_size];
        if current == encoded.as_slice() {
            return Ok(false);
        }

        self.bytes_mut()[value_position..value_position + value_size].copy_from_slice(&encoded);
        Ok(true)
    }

    /// Keeps only the first `new_size` entries, rewriting them compactly.
    pub fn shrink(&mut self, new_size: usize) -> BucketResult<()> {
        let kept: Vec<_> = (0..new_size.min(self.size()))
            .map(|index| self.get_entry(index))
            .collect::<BucketResult<_>>()?;

        let page_size = self.bytes().len();
        self.set_free_pointer(page_size);
        self.set_size(0);
        self.add_all(&kept)
    }

    /// Appends `entries` in order.
    ///
    /// The entries must sort after every entry already present.
    pub fn add_all(&mut self, entries: &[BucketEntry<K, V>]) -> BucketResult<()> {
        for entry in entries {
            let index = self.size();
            if !self.add_entry(index, entry, false)? {
                return Err(BucketError::Full { entries: index });
            }
        }
        Ok(())
    }
}

impl<B: AsRef<[u8]>, K: Codec + Ord + std::fmt::Debug, V: Codec + std::fmt::Debug> std::fmt::Debug
    for Bucket<B, K, V>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("size", &self.size())
            .field("is_leaf", &self.is_leaf())
            .field("free_space", &self.free_space())
            .field("left_sibling", &self.left_sibling())
            .field("right_sibling", &self.right_sibling())
            .finish()
    }
}
