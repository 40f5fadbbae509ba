//! Storage engine for KarstDB.
//!
//! This crate provides:
//! - Disk manager for page-level I/O over named files
//! - Buffer-manager facade with scoped page pins
//! - Heap files for record storage and sequential relation scans
//! - The disk-resident B+ tree index over an integer attribute

mod btree;
mod bufmgr;
mod disk;
mod heap;

pub use btree::{
    BTreeIndex, Operator, PageKeyPair, RidKeyPair, LEAF_CAPACITY, NONLEAF_CAPACITY,
    RELATION_NAME_LEN,
};
pub use bufmgr::{BufMgr, PageGuard};
pub use disk::{DiskManager, DiskManagerConfig};
pub use heap::{FileScan, HeapFile, HeapPage};
