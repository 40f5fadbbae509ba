//! Range scans over the B+ tree.
//!
//! A scan descends to the leaf that could hold the first qualifying key,
//! then walks the sibling chain. Between a successful `start_scan` and the
//! scan's end the cursor holds exactly one pinned leaf; every terminating
//! path (completion, error, `end_scan`, index drop) releases that pin by
//! dropping the cursor state.

use karst_common::page::{PageId, INVALID_PAGE_NUM};
use karst_common::record::RecordId;
use karst_common::{KarstError, Result};

use super::index::BTreeIndex;
use super::node::{LeafNode, NodeView, LEAF_CAPACITY};
use crate::bufmgr::PageGuard;

/// Comparison operators for scan bounds.
///
/// The low bound takes `Gt`/`Gte`, the high bound `Lt`/`Lte`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
}

/// State of an active range scan. Owns the pin on the current leaf.
pub(crate) struct ScanState {
    guard: PageGuard,
    /// Decoded copy of the pinned leaf.
    leaf: LeafNode,
    /// Next slot to evaluate in the current leaf.
    next_slot: usize,
    low: i32,
    low_op: Operator,
    high: i32,
    high_op: Operator,
}

fn satisfies_low(key: i32, low: i32, low_op: Operator) -> bool {
    match low_op {
        Operator::Gt => key > low,
        Operator::Gte => key >= low,
        _ => false,
    }
}

fn satisfies_high(key: i32, high: i32, high_op: Operator) -> bool {
    match high_op {
        Operator::Lt => key < high,
        Operator::Lte => key <= high,
        _ => false,
    }
}

impl BTreeIndex {
    /// Positions a scan on the first entry inside the range.
    ///
    /// Fails with `BadOpcodes` for operators outside `{Gt, Gte}` /
    /// `{Lt, Lte}`, `BadScanRange` if `low > high`, and `NoSuchKey` if no
    /// entry falls inside the range. An already-active scan is ended first.
    pub fn start_scan(
        &mut self,
        low: i32,
        low_op: Operator,
        high: i32,
        high_op: Operator,
    ) -> Result<()> {
        if !matches!(low_op, Operator::Gt | Operator::Gte)
            || !matches!(high_op, Operator::Lt | Operator::Lte)
        {
            return Err(KarstError::BadOpcodes);
        }
        if low > high {
            return Err(KarstError::BadScanRange);
        }
        if self.scan.is_some() {
            self.end_scan()?;
        }

        // Descend toward the low bound
        let mut page_num = self.root_page_num;
        let (mut guard, mut leaf) = loop {
            let guard = self.mgr.read_page(PageId::new(self.file_id, page_num))?;
            let view = NodeView::from_bytes(&guard.read())?;
            match view {
                NodeView::Leaf(leaf) => break (guard, leaf),
                NodeView::NonLeaf(node) => page_num = node.find_child(low),
            }
        };

        // Locate the first in-range entry, stepping through siblings past
        // any prefix of keys below the low bound.
        let mut slot = 0;
        loop {
            if slot >= leaf.num_entries() {
                let sibling = leaf.right_sibling();
                drop(guard);
                if sibling == INVALID_PAGE_NUM {
                    return Err(KarstError::NoSuchKey);
                }
                guard = self.mgr.read_page(PageId::new(self.file_id, sibling))?;
                leaf = LeafNode::from_bytes(&guard.read());
                slot = 0;
                continue;
            }

            let key = leaf.key(slot);
            if !satisfies_low(key, low, low_op) {
                slot += 1;
                continue;
            }
            if !satisfies_high(key, high, high_op) {
                // Keys only grow from here: nothing can qualify
                drop(guard);
                return Err(KarstError::NoSuchKey);
            }

            self.scan = Some(ScanState {
                guard,
                leaf,
                next_slot: slot,
                low,
                low_op,
                high,
                high_op,
            });
            return Ok(());
        }
    }

    /// Returns the record ID of the next entry in the range.
    ///
    /// Fails with `ScanCompleted` past the last in-range entry and with
    /// `ScanNotInitialized` if no scan is active. Both leave the scan
    /// inactive with no pin held.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        let Some(state) = self.scan.take() else {
            return Err(KarstError::ScanNotInitialized);
        };
        let ScanState {
            mut guard,
            mut leaf,
            mut next_slot,
            low,
            low_op,
            high,
            high_op,
        } = state;

        loop {
            if next_slot >= LEAF_CAPACITY || !leaf.rid(next_slot).is_valid() {
                // Leaf exhausted: unpin it and step to the right sibling
                let sibling = leaf.right_sibling();
                drop(guard);
                if sibling == INVALID_PAGE_NUM {
                    return Err(KarstError::ScanCompleted);
                }
                guard = self.mgr.read_page(PageId::new(self.file_id, sibling))?;
                leaf = LeafNode::from_bytes(&guard.read());
                next_slot = 0;
                continue;
            }

            let key = leaf.key(next_slot);
            if !satisfies_high(key, high, high_op) {
                // Sorted leaves: the first key past the high bound ends the scan
                return Err(KarstError::ScanCompleted);
            }

            let rid = leaf.rid(next_slot);
            next_slot += 1;
            self.scan = Some(ScanState {
                guard,
                leaf,
                next_slot,
                low,
                low_op,
                high,
                high_op,
            });
            return Ok(rid);
        }
    }

    /// Ends the active scan, releasing its leaf pin.
    ///
    /// Fails with `ScanNotInitialized` if no scan is active.
    pub fn end_scan(&mut self) -> Result<()> {
        match self.scan.take() {
            Some(_) => Ok(()), // dropping the state unpins the leaf
            None => Err(KarstError::ScanNotInitialized),
        }
    }

    /// Returns true if a scan is currently active.
    pub fn scan_active(&self) -> bool {
        self.scan.is_some()
    }
}
