//! On-page node structures for the B+ tree.
//!
//! All three page kinds are fixed layouts over the 8 KB page, specialized to
//! `i32` keys. Views own a copy of the page image: read the pinned page into
//! a view, mutate it, write the image back through the guard.
//!
//! Meta page (first page of the index file):
//! ```text
//! | relation_name: [u8; 20] | attr_byte_offset: i32 | attr_type: i32 | root_page_num: u32 |
//! ```
//!
//! Leaf page (level 0):
//! ```text
//! | level: i32 | keys: [i32; L] | rids: [RecordId; L] | right_sibling: u32 |
//! ```
//!
//! Non-leaf page (level >= 1, counting height above the leaf layer):
//! ```text
//! | level: i32 | keys: [i32; N] | children: [u32; N + 1] |
//! ```
//!
//! Used entries occupy a prefix of the arrays; a leaf slot is free iff its
//! rid has page number 0, a child slot is free iff the page number is 0.
//! Both layouts fill the page exactly at the capacities below.

use karst_common::page::{INVALID_PAGE_NUM, PAGE_SIZE};
use karst_common::record::RecordId;
use karst_common::{KarstError, Result};

/// Maximum number of (key, rid) pairs in a leaf.
pub const LEAF_CAPACITY: usize =
    (PAGE_SIZE - 4 - 4) / (KEY_SIZE + RecordId::SIZE); // 682 at 8 KB pages

/// Maximum number of keys in a non-leaf node (one less than its child count).
pub const NONLEAF_CAPACITY: usize = (PAGE_SIZE - 4 - 4) / (KEY_SIZE + 4); // 1023 at 8 KB pages

/// Fixed width of the relation name in the meta page.
pub const RELATION_NAME_LEN: usize = 20;

const KEY_SIZE: usize = 4;
const LEVEL_OFFSET: usize = 0;

/// A (key, record id) pair staged outside the page arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RidKeyPair {
    pub key: i32,
    pub rid: RecordId,
}

/// A promoted entry: separator key plus the page to its right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageKeyPair {
    pub key: i32,
    pub page_num: u32,
}

#[inline]
fn read_i32(data: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[inline]
fn write_i32(data: &mut [u8], offset: usize, value: i32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[inline]
fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// The index meta page: identifies the indexed relation/attribute and points
/// at the current root.
pub struct MetaNode {
    data: Box<[u8; PAGE_SIZE]>,
}

impl MetaNode {
    const NAME_OFFSET: usize = 0;
    const ATTR_OFFSET: usize = RELATION_NAME_LEN;
    const TYPE_OFFSET: usize = RELATION_NAME_LEN + 4;
    const ROOT_OFFSET: usize = RELATION_NAME_LEN + 8;

    /// Creates a meta page. The relation name must fit the fixed-width field.
    pub fn new(relation_name: &str, attr_byte_offset: i32, attr_type: i32, root: u32) -> Self {
        debug_assert!(relation_name.len() <= RELATION_NAME_LEN);

        let mut data = Box::new([0u8; PAGE_SIZE]);
        let name = relation_name.as_bytes();
        data[Self::NAME_OFFSET..Self::NAME_OFFSET + name.len()].copy_from_slice(name);
        write_i32(&mut *data, Self::ATTR_OFFSET, attr_byte_offset);
        write_i32(&mut *data, Self::TYPE_OFFSET, attr_type);
        write_u32(&mut *data, Self::ROOT_OFFSET, root);
        Self { data }
    }

    /// Creates a meta view from a raw page image.
    pub fn from_bytes(bytes: &[u8; PAGE_SIZE]) -> Self {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        data.copy_from_slice(bytes);
        Self { data }
    }

    /// Returns the raw page image.
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Returns the relation name, trimmed of NUL padding.
    pub fn relation_name(&self) -> String {
        let raw = &self.data[Self::NAME_OFFSET..Self::NAME_OFFSET + RELATION_NAME_LEN];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(RELATION_NAME_LEN);
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    /// Returns the byte offset of the indexed attribute within a record.
    pub fn attr_byte_offset(&self) -> i32 {
        read_i32(&*self.data, Self::ATTR_OFFSET)
    }

    /// Returns the attribute type tag.
    pub fn attr_type(&self) -> i32 {
        read_i32(&*self.data, Self::TYPE_OFFSET)
    }

    /// Returns the current root page number.
    pub fn root_page_num(&self) -> u32 {
        read_u32(&*self.data, Self::ROOT_OFFSET)
    }

    /// Points the meta page at a new root.
    pub fn set_root_page_num(&mut self, root: u32) {
        write_u32(&mut *self.data, Self::ROOT_OFFSET, root);
    }
}

/// A leaf node: sorted (key, rid) pairs plus the right-sibling link.
pub struct LeafNode {
    data: Box<[u8; PAGE_SIZE]>,
}

impl LeafNode {
    const KEYS_OFFSET: usize = 4;
    const RIDS_OFFSET: usize = Self::KEYS_OFFSET + KEY_SIZE * LEAF_CAPACITY;
    const RIGHT_SIB_OFFSET: usize = Self::RIDS_OFFSET + RecordId::SIZE * LEAF_CAPACITY;

    /// Creates an empty leaf.
    pub fn new() -> Self {
        // A zeroed page is a valid empty leaf: level 0, no used slots,
        // no right sibling.
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    /// Creates a leaf view from a raw page image.
    pub fn from_bytes(bytes: &[u8; PAGE_SIZE]) -> Self {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        data.copy_from_slice(bytes);
        Self { data }
    }

    /// Returns the raw page image.
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Returns the node level (always 0 for a leaf).
    pub fn level(&self) -> i32 {
        read_i32(&*self.data, LEVEL_OFFSET)
    }

    /// Returns the key in a slot.
    pub fn key(&self, slot: usize) -> i32 {
        read_i32(&*self.data, Self::KEYS_OFFSET + KEY_SIZE * slot)
    }

    fn set_key(&mut self, slot: usize, key: i32) {
        write_i32(&mut *self.data, Self::KEYS_OFFSET + KEY_SIZE * slot, key);
    }

    /// Returns the record ID in a slot.
    pub fn rid(&self, slot: usize) -> RecordId {
        let offset = Self::RIDS_OFFSET + RecordId::SIZE * slot;
        RecordId::from_bytes(&self.data[offset..offset + RecordId::SIZE])
    }

    fn set_rid(&mut self, slot: usize, rid: RecordId) {
        let offset = Self::RIDS_OFFSET + RecordId::SIZE * slot;
        self.data[offset..offset + RecordId::SIZE].copy_from_slice(&rid.to_bytes());
    }

    /// Returns the right sibling page number (0 = rightmost leaf).
    pub fn right_sibling(&self) -> u32 {
        read_u32(&*self.data, Self::RIGHT_SIB_OFFSET)
    }

    /// Sets the right sibling page number.
    pub fn set_right_sibling(&mut self, page_num: u32) {
        write_u32(&mut *self.data, Self::RIGHT_SIB_OFFSET, page_num);
    }

    /// Returns the number of used slots. Used slots form a prefix.
    pub fn num_entries(&self) -> usize {
        (0..LEAF_CAPACITY)
            .find(|&slot| !self.rid(slot).is_valid())
            .unwrap_or(LEAF_CAPACITY)
    }

    /// Returns true if every slot is used.
    pub fn is_full(&self) -> bool {
        self.rid(LEAF_CAPACITY - 1).is_valid()
    }

    /// Returns the used entries in slot order.
    pub fn entries(&self) -> Vec<RidKeyPair> {
        (0..self.num_entries())
            .map(|slot| RidKeyPair {
                key: self.key(slot),
                rid: self.rid(slot),
            })
            .collect()
    }

    /// Replaces the node's entries, zeroing every slot past the new prefix.
    pub fn write_entries(&mut self, entries: &[RidKeyPair]) {
        debug_assert!(entries.len() <= LEAF_CAPACITY);
        for slot in 0..LEAF_CAPACITY {
            match entries.get(slot) {
                Some(entry) => {
                    self.set_key(slot, entry.key);
                    self.set_rid(slot, entry.rid);
                }
                None => {
                    self.set_key(slot, 0);
                    self.set_rid(slot, RecordId::INVALID);
                }
            }
        }
    }

    /// Inserts a pair at its sorted position, shifting the tail one slot
    /// right. Equal keys land after existing ones, preserving insertion
    /// order. The caller must ensure the leaf is not full.
    pub fn insert_sorted(&mut self, key: i32, rid: RecordId) {
        debug_assert!(!self.is_full());

        let n = self.num_entries();
        let pos = (0..n).find(|&slot| self.key(slot) > key).unwrap_or(n);

        if pos < n {
            let keys_start = Self::KEYS_OFFSET + KEY_SIZE * pos;
            let keys_end = Self::KEYS_OFFSET + KEY_SIZE * n;
            self.data.copy_within(keys_start..keys_end, keys_start + KEY_SIZE);

            let rids_start = Self::RIDS_OFFSET + RecordId::SIZE * pos;
            let rids_end = Self::RIDS_OFFSET + RecordId::SIZE * n;
            self.data
                .copy_within(rids_start..rids_end, rids_start + RecordId::SIZE);
        }

        self.set_key(pos, key);
        self.set_rid(pos, rid);
    }
}

impl Default for LeafNode {
    fn default() -> Self {
        Self::new()
    }
}

/// A non-leaf node: separator keys and child page pointers.
///
/// For used children `c[0..k]` and keys `s[0..k-1]`, every key in the
/// subtree under `c[i]` is `< s[i]`, and every key under `c[i+1]` is
/// `>= s[i]`.
pub struct NonLeafNode {
    data: Box<[u8; PAGE_SIZE]>,
}

impl NonLeafNode {
    const KEYS_OFFSET: usize = 4;
    const CHILDREN_OFFSET: usize = Self::KEYS_OFFSET + KEY_SIZE * NONLEAF_CAPACITY;

    /// Creates an empty non-leaf node at the given level (1 = parent of
    /// leaves).
    pub fn new(level: i32) -> Self {
        debug_assert!(level >= 1);
        let mut data = Box::new([0u8; PAGE_SIZE]);
        write_i32(&mut *data, LEVEL_OFFSET, level);
        Self { data }
    }

    /// Creates a non-leaf view from a raw page image.
    pub fn from_bytes(bytes: &[u8; PAGE_SIZE]) -> Self {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        data.copy_from_slice(bytes);
        Self { data }
    }

    /// Returns the raw page image.
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Returns the node level: height above the leaf layer.
    pub fn level(&self) -> i32 {
        read_i32(&*self.data, LEVEL_OFFSET)
    }

    /// Returns the key in a slot.
    pub fn key(&self, slot: usize) -> i32 {
        read_i32(&*self.data, Self::KEYS_OFFSET + KEY_SIZE * slot)
    }

    fn set_key(&mut self, slot: usize, key: i32) {
        write_i32(&mut *self.data, Self::KEYS_OFFSET + KEY_SIZE * slot, key);
    }

    /// Returns the child page number in a slot (0 = unused).
    pub fn child(&self, slot: usize) -> u32 {
        read_u32(&*self.data, Self::CHILDREN_OFFSET + 4 * slot)
    }

    fn set_child(&mut self, slot: usize, page_num: u32) {
        write_u32(&mut *self.data, Self::CHILDREN_OFFSET + 4 * slot, page_num);
    }

    /// Returns the number of used child pointers. Used slots form a prefix.
    pub fn num_children(&self) -> usize {
        (0..=NONLEAF_CAPACITY)
            .find(|&slot| self.child(slot) == INVALID_PAGE_NUM)
            .unwrap_or(NONLEAF_CAPACITY + 1)
    }

    /// Returns the number of used keys.
    pub fn num_keys(&self) -> usize {
        self.num_children().saturating_sub(1)
    }

    /// Returns true if every child slot is used.
    pub fn is_full(&self) -> bool {
        self.child(NONLEAF_CAPACITY) != INVALID_PAGE_NUM
    }

    /// Picks the child to descend into for a key: the first child whose
    /// separator exceeds the key, else the last used child. Keys equal to a
    /// separator descend right.
    pub fn find_child(&self, key: i32) -> u32 {
        let k = self.num_children();
        if k == 0 {
            return INVALID_PAGE_NUM;
        }

        for slot in 0..k - 1 {
            if key < self.key(slot) {
                return self.child(slot);
            }
        }
        self.child(k - 1)
    }

    /// Returns the used keys and children.
    pub fn keys_and_children(&self) -> (Vec<i32>, Vec<u32>) {
        let keys = (0..self.num_keys()).map(|slot| self.key(slot)).collect();
        let children = (0..self.num_children())
            .map(|slot| self.child(slot))
            .collect();
        (keys, children)
    }

    /// Replaces the node's keys and children, zeroing every slot past the
    /// new prefixes. `children` must hold exactly one more entry than `keys`.
    pub fn write_entries(&mut self, keys: &[i32], children: &[u32]) {
        debug_assert!(keys.len() <= NONLEAF_CAPACITY);
        debug_assert_eq!(children.len(), keys.len() + 1);

        for slot in 0..NONLEAF_CAPACITY {
            self.set_key(slot, keys.get(slot).copied().unwrap_or(0));
        }
        for slot in 0..=NONLEAF_CAPACITY {
            self.set_child(
                slot,
                children.get(slot).copied().unwrap_or(INVALID_PAGE_NUM),
            );
        }
    }

    /// Installs a promoted entry: the separator at its sorted key position
    /// and the new right page just after the corresponding child. The caller
    /// must ensure the node is not full.
    pub fn insert_entry(&mut self, entry: PageKeyPair) {
        debug_assert!(!self.is_full());

        let n = self.num_keys();
        let k = self.num_children();
        let pos = (0..n).find(|&slot| self.key(slot) > entry.key).unwrap_or(n);

        if pos < n {
            let keys_start = Self::KEYS_OFFSET + KEY_SIZE * pos;
            let keys_end = Self::KEYS_OFFSET + KEY_SIZE * n;
            self.data.copy_within(keys_start..keys_end, keys_start + KEY_SIZE);
        }
        if pos + 1 < k {
            let children_start = Self::CHILDREN_OFFSET + 4 * (pos + 1);
            let children_end = Self::CHILDREN_OFFSET + 4 * k;
            self.data
                .copy_within(children_start..children_end, children_start + 4);
        }

        self.set_key(pos, entry.key);
        self.set_child(pos + 1, entry.page_num);
    }
}

/// A typed view over a node page, discriminated by the level field.
pub enum NodeView {
    Leaf(LeafNode),
    NonLeaf(NonLeafNode),
}

impl NodeView {
    /// Decodes a node page image, validating the level tag.
    pub fn from_bytes(bytes: &[u8; PAGE_SIZE]) -> Result<Self> {
        let level = read_i32(bytes, LEVEL_OFFSET);
        match level {
            0 => Ok(NodeView::Leaf(LeafNode::from_bytes(bytes))),
            l if l > 0 => Ok(NodeView::NonLeaf(NonLeafNode::from_bytes(bytes))),
            l => Err(KarstError::Internal(format!("corrupt node level {l}"))),
        }
    }
}
