//! The B+ tree index: lifecycle and insertion.
//!
//! An index file holds the meta page (always page 1) followed by node pages.
//! The root starts out as a single empty leaf and grows by root splits only;
//! no other node ever changes its page number. Insertion descends
//! recursively, and a split hands a promoted `(separator, right page)` entry
//! back up the stack for the parent to install.

use crate::bufmgr::{BufMgr, PageGuard};
use crate::heap::HeapFile;
use karst_common::page::PageId;
use karst_common::record::RecordId;
use karst_common::types::AttrType;
use karst_common::{KarstError, Result};
use log::debug;

use super::node::{
    LeafNode, MetaNode, NodeView, NonLeafNode, PageKeyPair, RidKeyPair, RELATION_NAME_LEN,
};
use super::scan::ScanState;

/// Page number of the index meta page: the first page of the file.
pub(crate) const META_PAGE_NUM: u32 = 1;

/// A disk-resident B+ tree index over one `i32` attribute of a relation.
///
/// The index owns its file exclusively and is not safe for concurrent use;
/// callers serialize access externally.
pub struct BTreeIndex {
    pub(crate) mgr: BufMgr,
    pub(crate) file_id: u32,
    index_name: String,
    relation_name: String,
    attr_byte_offset: usize,
    attr_type: AttrType,
    /// Cached copy of the meta page's root pointer. The meta page itself is
    /// re-pinned only when the root changes.
    pub(crate) root_page_num: u32,
    /// Active range scan, if any. Holds the cursor's single leaf pin.
    pub(crate) scan: Option<ScanState>,
}

impl BTreeIndex {
    /// Opens the index for `relation_name` on the attribute at
    /// `attr_byte_offset`, creating and bulk-loading it from the relation if
    /// the index file does not exist yet.
    ///
    /// The index file is named `"<relationName>.<attrByteOffset>"`; the
    /// computed name is available via [`index_name`](Self::index_name).
    pub fn open(
        mgr: BufMgr,
        relation_name: &str,
        attr_byte_offset: usize,
        attr_type: AttrType,
    ) -> Result<Self> {
        if attr_type != AttrType::Int {
            return Err(KarstError::UnsupportedType(attr_type.to_string()));
        }
        if relation_name.len() > RELATION_NAME_LEN {
            return Err(KarstError::BadIndexInfo(format!(
                "relation name {relation_name:?} exceeds {RELATION_NAME_LEN} bytes"
            )));
        }

        let index_name = format!("{relation_name}.{attr_byte_offset}");

        if mgr.disk().exists(&index_name) {
            Self::open_existing(mgr, relation_name, attr_byte_offset, attr_type, index_name)
        } else {
            Self::create_and_load(mgr, relation_name, attr_byte_offset, attr_type, index_name)
        }
    }

    fn open_existing(
        mgr: BufMgr,
        relation_name: &str,
        attr_byte_offset: usize,
        attr_type: AttrType,
        index_name: String,
    ) -> Result<Self> {
        let file_id = mgr.disk().open(&index_name)?;

        let meta = {
            let guard = mgr.read_page(PageId::new(file_id, META_PAGE_NUM))?;
            let meta = MetaNode::from_bytes(&guard.read());
            meta
        };

        if meta.relation_name() != relation_name {
            return Err(KarstError::BadIndexInfo(format!(
                "index is over relation {:?}, not {:?}",
                meta.relation_name(),
                relation_name
            )));
        }
        if meta.attr_byte_offset() != attr_byte_offset as i32 {
            return Err(KarstError::BadIndexInfo(format!(
                "index is over attribute offset {}, not {}",
                meta.attr_byte_offset(),
                attr_byte_offset
            )));
        }
        if AttrType::from_i32(meta.attr_type()) != Some(attr_type) {
            return Err(KarstError::BadIndexInfo(format!(
                "index attribute type tag {} does not match {}",
                meta.attr_type(),
                attr_type
            )));
        }

        let root_page_num = meta.root_page_num();
        Ok(Self {
            mgr,
            file_id,
            index_name,
            relation_name: relation_name.to_string(),
            attr_byte_offset,
            attr_type,
            root_page_num,
            scan: None,
        })
    }

    fn create_and_load(
        mgr: BufMgr,
        relation_name: &str,
        attr_byte_offset: usize,
        attr_type: AttrType,
        index_name: String,
    ) -> Result<Self> {
        let file_id = mgr.disk().create(&index_name)?;

        let mut meta_guard = mgr.alloc_page(file_id)?;
        debug_assert_eq!(meta_guard.page_id().page_num, META_PAGE_NUM);

        let root_page_num = {
            let mut root_guard = mgr.alloc_page(file_id)?;
            root_guard.write_from(LeafNode::new().as_bytes());
            root_guard.page_id().page_num
        };

        let meta = MetaNode::new(
            relation_name,
            attr_byte_offset as i32,
            attr_type.as_i32(),
            root_page_num,
        );
        meta_guard.write_from(meta.as_bytes());
        drop(meta_guard);

        let mut index = Self {
            mgr,
            file_id,
            index_name,
            relation_name: relation_name.to_string(),
            attr_byte_offset,
            attr_type,
            root_page_num,
            scan: None,
        };

        index.bulk_load()?;
        index.mgr.flush_file(file_id)?;
        Ok(index)
    }

    /// Inserts every record of the base relation.
    fn bulk_load(&mut self) -> Result<()> {
        let relation = HeapFile::open(self.mgr.clone(), &self.relation_name)?;
        let mut scan = relation.scan();
        let mut loaded = 0u64;

        loop {
            let rid = match scan.scan_next() {
                Ok(rid) => rid,
                Err(KarstError::EndOfFile) => break,
                Err(e) => return Err(e),
            };
            let record = scan.get_record()?;
            let key = key_from_record(&record, self.attr_byte_offset)?;
            self.insert(key, rid)?;
            loaded += 1;
        }

        debug!("bulk loaded {loaded} entries into {}", self.index_name);
        Ok(())
    }

    /// Returns the computed index file name.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Returns the name of the indexed relation.
    pub fn relation_name(&self) -> &str {
        &self.relation_name
    }

    /// Returns the byte offset of the indexed attribute.
    pub fn attr_byte_offset(&self) -> usize {
        self.attr_byte_offset
    }

    /// Returns the indexed attribute's type.
    pub fn attr_type(&self) -> AttrType {
        self.attr_type
    }

    /// Inserts a (key, rid) entry.
    ///
    /// Duplicate keys are allowed. An out-of-space failure (buffer pool or
    /// disk) leaves the tree in an undefined state; the caller must discard
    /// the index.
    pub fn insert(&mut self, key: i32, rid: RecordId) -> Result<()> {
        if let Some(promoted) = self.insert_into(self.root_page_num, key, rid)? {
            self.grow_root(promoted)?;
        }
        Ok(())
    }

    /// Recursive descent: inserts under the subtree rooted at `page_num` and
    /// returns the promoted entry if that subtree's root split.
    fn insert_into(
        &mut self,
        page_num: u32,
        key: i32,
        rid: RecordId,
    ) -> Result<Option<PageKeyPair>> {
        let mut guard = self.mgr.read_page(PageId::new(self.file_id, page_num))?;
        let view = NodeView::from_bytes(&guard.read())?;

        match view {
            NodeView::Leaf(mut leaf) => {
                if !leaf.is_full() {
                    leaf.insert_sorted(key, rid);
                    guard.write_from(leaf.as_bytes());
                    Ok(None)
                } else {
                    self.split_leaf(&mut guard, &leaf, key, rid).map(Some)
                }
            }
            NodeView::NonLeaf(mut node) => {
                let child = node.find_child(key);
                // The child (and on split, this node too) is pinned below us
                // for the duration of the recursive call.
                let Some(promoted) = self.insert_into(child, key, rid)? else {
                    return Ok(None);
                };

                if !node.is_full() {
                    node.insert_entry(promoted);
                    guard.write_from(node.as_bytes());
                    Ok(None)
                } else {
                    self.split_nonleaf(&mut guard, &node, promoted).map(Some)
                }
            }
        }
    }

    /// Splits a full leaf around an incoming entry.
    ///
    /// The merged entries are cut at the midpoint; the new right sibling is
    /// spliced into the chain and the first key of the right half is copied
    /// up as the separator.
    fn split_leaf(
        &mut self,
        guard: &mut PageGuard,
        leaf: &LeafNode,
        key: i32,
        rid: RecordId,
    ) -> Result<PageKeyPair> {
        let mut entries = leaf.entries();
        let pos = entries.partition_point(|e| e.key <= key);
        entries.insert(pos, RidKeyPair { key, rid });

        let mid = entries.len() / 2;

        let mut right_guard = self.mgr.alloc_page(self.file_id)?;
        let right_page_num = right_guard.page_id().page_num;

        let mut right = LeafNode::new();
        right.write_entries(&entries[mid..]);
        right.set_right_sibling(leaf.right_sibling());

        let mut left = LeafNode::new();
        left.write_entries(&entries[..mid]);
        left.set_right_sibling(right_page_num);

        right_guard.write_from(right.as_bytes());
        guard.write_from(left.as_bytes());

        let separator = right.key(0);
        debug!(
            "leaf split: page {} keeps {}, page {} takes {}, separator {}",
            guard.page_id().page_num,
            mid,
            right_page_num,
            entries.len() - mid,
            separator
        );

        Ok(PageKeyPair {
            key: separator,
            page_num: right_page_num,
        })
    }

    /// Splits a full non-leaf around an incoming promoted entry.
    ///
    /// The median key of the merged sequence is promoted and removed from
    /// the node; keys and children to its right move to the new page.
    fn split_nonleaf(
        &mut self,
        guard: &mut PageGuard,
        node: &NonLeafNode,
        promoted: PageKeyPair,
    ) -> Result<PageKeyPair> {
        let (mut keys, mut children) = node.keys_and_children();
        let pos = keys.partition_point(|&k| k <= promoted.key);
        keys.insert(pos, promoted.key);
        children.insert(pos + 1, promoted.page_num);

        let mid = keys.len() / 2;
        let separator = keys[mid];

        let mut right_guard = self.mgr.alloc_page(self.file_id)?;
        let right_page_num = right_guard.page_id().page_num;

        let mut right = NonLeafNode::new(node.level());
        right.write_entries(&keys[mid + 1..], &children[mid + 1..]);

        let mut left = NonLeafNode::new(node.level());
        left.write_entries(&keys[..mid], &children[..=mid]);

        right_guard.write_from(right.as_bytes());
        guard.write_from(left.as_bytes());

        debug!(
            "non-leaf split at level {}: page {} -> page {}, separator {}",
            node.level(),
            guard.page_id().page_num,
            right_page_num,
            separator
        );

        Ok(PageKeyPair {
            key: separator,
            page_num: right_page_num,
        })
    }

    /// Installs a new root above the old one after a root split, and points
    /// the meta page at it.
    fn grow_root(&mut self, promoted: PageKeyPair) -> Result<()> {
        let old_root = self.root_page_num;

        let old_level = {
            let guard = self.mgr.read_page(PageId::new(self.file_id, old_root))?;
            let view = NodeView::from_bytes(&guard.read())?;
            match view {
                NodeView::Leaf(leaf) => leaf.level(),
                NodeView::NonLeaf(node) => node.level(),
            }
        };

        let mut root = NonLeafNode::new(old_level + 1);
        root.write_entries(&[promoted.key], &[old_root, promoted.page_num]);

        let new_root_num = {
            let mut guard = self.mgr.alloc_page(self.file_id)?;
            guard.write_from(root.as_bytes());
            guard.page_id().page_num
        };

        let mut meta_guard = self.mgr.read_page(PageId::new(self.file_id, META_PAGE_NUM))?;
        let mut meta = MetaNode::from_bytes(&meta_guard.read());
        meta.set_root_page_num(new_root_num);
        meta_guard.write_from(meta.as_bytes());
        drop(meta_guard);

        self.root_page_num = new_root_num;
        debug!(
            "root grew: page {} -> page {} at level {}",
            old_root,
            new_root_num,
            old_level + 1
        );
        Ok(())
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        // Release the cursor's pin, if any, then flush. Close never raises.
        self.scan = None;
        let _ = self.mgr.flush_file(self.file_id);
    }
}

/// Slices the `i32` key out of a raw record.
fn key_from_record(record: &[u8], attr_byte_offset: usize) -> Result<i32> {
    let end = attr_byte_offset + 4;
    if record.len() < end {
        return Err(KarstError::Internal(format!(
            "record of {} bytes is too short for attribute offset {}",
            record.len(),
            attr_byte_offset
        )));
    }
    Ok(i32::from_le_bytes([
        record[attr_byte_offset],
        record[attr_byte_offset + 1],
        record[attr_byte_offset + 2],
        record[attr_byte_offset + 3],
    ]))
}
