//! Buffer-manager facade: the disk manager and buffer pool composed behind
//! pin-scoped page access.
//!
//! [`BufMgr`] routes every page read and allocation through the pool,
//! writing evicted dirty pages back to disk as they surface. [`PageGuard`]
//! represents one pin: it is handed out pinned, records dirtiness when write
//! access is taken, and unpins on drop. A control path that returns early or
//! errors therefore cannot leak a pin.

use crate::disk::{DiskManager, DiskManagerConfig};
use karst_buffer::{BufferPool, BufferPoolConfig, EvictedPage, FrameId};
use karst_common::config::StorageConfig;
use karst_common::page::{PageId, PAGE_SIZE};
use karst_common::Result;
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

/// Buffer manager: page cache in front of the disk manager.
///
/// Cloning is cheap (two `Arc`s) and yields a handle to the same pool and
/// files; guards hold such a clone so a pin can outlive the call frame that
/// took it.
#[derive(Clone)]
pub struct BufMgr {
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
}

impl BufMgr {
    /// Creates a buffer manager over the given disk manager.
    pub fn new(disk: Arc<DiskManager>, pool_config: BufferPoolConfig) -> Self {
        Self {
            disk,
            pool: Arc::new(BufferPool::new(pool_config)),
        }
    }

    /// Builds the whole storage stack (disk manager plus pool) from a
    /// storage configuration.
    pub fn from_storage_config(config: &StorageConfig) -> Result<Self> {
        let disk = Arc::new(DiskManager::new(DiskManagerConfig {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        })?);
        Ok(Self::new(
            disk,
            BufferPoolConfig {
                num_frames: config.buffer_pool_frames,
            },
        ))
    }

    /// Returns the underlying disk manager.
    pub fn disk(&self) -> &DiskManager {
        &self.disk
    }

    /// Returns the underlying buffer pool.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Reads a page, pinning it for the lifetime of the returned guard.
    ///
    /// Pool hits pin the resident frame; misses read the page from disk and
    /// load it, writing back any dirty page that gets evicted to make room.
    pub fn read_page(&self, page_id: PageId) -> Result<PageGuard> {
        if let Some(frame_id) = self.pool.fetch_page(page_id) {
            return Ok(PageGuard::new(self.clone(), page_id, frame_id));
        }

        let data = self.disk.read_page(page_id)?;
        let (frame_id, evicted) = self.pool.load_page(page_id, &*data)?;
        self.write_back(evicted)?;

        Ok(PageGuard::new(self.clone(), page_id, frame_id))
    }

    /// Allocates a fresh zero-filled page in a file and pins it.
    pub fn alloc_page(&self, file_id: u32) -> Result<PageGuard> {
        let page_id = self.disk.allocate_page(file_id)?;
        let (frame_id, evicted) = self.pool.new_page(page_id)?;
        self.write_back(evicted)?;

        Ok(PageGuard::new(self.clone(), page_id, frame_id))
    }

    /// Writes all of a file's dirty pages to disk and syncs the file.
    pub fn flush_file(&self, file_id: u32) -> Result<()> {
        self.pool
            .flush_file(file_id, |page_id, data| self.disk.write_page(page_id, data))?;
        self.disk.flush_file(file_id)
    }

    fn write_back(&self, evicted: Option<EvictedPage>) -> Result<()> {
        if let Some(page) = evicted {
            self.disk.write_page(page.page_id, &page.data)?;
        }
        Ok(())
    }
}

/// A pinned page.
///
/// Holds exactly one pin on its page from construction until drop. Taking
/// write access marks the guard dirty; on drop the page is unpinned with the
/// accumulated dirty flag, exactly once, on every exit path.
pub struct PageGuard {
    mgr: BufMgr,
    page_id: PageId,
    frame_id: FrameId,
    dirty: bool,
}

impl PageGuard {
    fn new(mgr: BufMgr, page_id: PageId, frame_id: FrameId) -> Self {
        Self {
            mgr,
            page_id,
            frame_id,
            dirty: false,
        }
    }

    /// Returns the pinned page's ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Read access to the page image.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [u8; PAGE_SIZE]> {
        RwLockReadGuard::map(self.mgr.pool.frame(self.frame_id).read_data(), |data| {
            &**data
        })
    }

    /// Write access to the page image. Marks the guard dirty.
    pub fn write(&mut self) -> MappedRwLockWriteGuard<'_, [u8; PAGE_SIZE]> {
        self.dirty = true;
        RwLockWriteGuard::map(self.mgr.pool.frame(self.frame_id).write_data(), |data| {
            &mut **data
        })
    }

    /// Replaces the whole page image. Marks the guard dirty.
    pub fn write_from(&mut self, image: &[u8; PAGE_SIZE]) {
        self.write().copy_from_slice(image);
    }

    /// Returns true if this guard has taken write access.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.mgr.pool.unpin_page(self.page_id, self.dirty);
    }
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManagerConfig;
    use tempfile::tempdir;

    fn create_test_bufmgr(num_frames: usize) -> (BufMgr, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        };
        let disk = Arc::new(DiskManager::new(config).unwrap());
        let mgr = BufMgr::new(disk, BufferPoolConfig { num_frames });
        (mgr, dir)
    }

    #[test]
    fn test_guard_unpins_on_drop() {
        let (mgr, _dir) = create_test_bufmgr(8);
        let file_id = mgr.disk().create("f").unwrap();

        {
            let guard = mgr.alloc_page(file_id).unwrap();
            assert_eq!(guard.page_id().page_num, 1);
            assert_eq!(mgr.pool().stats().pinned_frames, 1);
        }

        assert_eq!(mgr.pool().stats().pinned_frames, 0);
    }

    #[test]
    fn test_guard_clean_read_leaves_page_clean() {
        let (mgr, _dir) = create_test_bufmgr(8);
        let file_id = mgr.disk().create("f").unwrap();

        let page_id = {
            let guard = mgr.alloc_page(file_id).unwrap();
            guard.page_id()
        };

        {
            let guard = mgr.read_page(page_id).unwrap();
            let _ = guard.read()[0];
            assert!(!guard.is_dirty());
        }

        assert_eq!(mgr.pool().stats().dirty_frames, 0);
    }

    #[test]
    fn test_guard_write_marks_dirty() {
        let (mgr, _dir) = create_test_bufmgr(8);
        let file_id = mgr.disk().create("f").unwrap();

        let page_id = {
            let mut guard = mgr.alloc_page(file_id).unwrap();
            guard.write()[0] = 0xCC;
            assert!(guard.is_dirty());
            guard.page_id()
        };

        assert_eq!(mgr.pool().stats().dirty_frames, 1);

        // The write is visible through a fresh pin
        let guard = mgr.read_page(page_id).unwrap();
        assert_eq!(guard.read()[0], 0xCC);
    }

    #[test]
    fn test_eviction_write_back_preserves_data() {
        // Pool of one frame: every fetch evicts the previous page
        let (mgr, _dir) = create_test_bufmgr(1);
        let file_id = mgr.disk().create("f").unwrap();

        let first = {
            let mut guard = mgr.alloc_page(file_id).unwrap();
            guard.write()[0] = 0x0A;
            guard.page_id()
        };

        let second = {
            let mut guard = mgr.alloc_page(file_id).unwrap();
            guard.write()[0] = 0x0B;
            guard.page_id()
        };

        // Reading the first page evicts the second (dirty) and vice versa
        assert_eq!(mgr.read_page(first).unwrap().read()[0], 0x0A);
        assert_eq!(mgr.read_page(second).unwrap().read()[0], 0x0B);
        assert_eq!(mgr.read_page(first).unwrap().read()[0], 0x0A);
    }

    #[test]
    fn test_flush_file_writes_dirty_pages() {
        let (mgr, _dir) = create_test_bufmgr(8);
        let file_id = mgr.disk().create("f").unwrap();

        let page_id = {
            let mut guard = mgr.alloc_page(file_id).unwrap();
            guard.write()[7] = 0x77;
            guard.page_id()
        };

        mgr.flush_file(file_id).unwrap();
        assert_eq!(mgr.pool().stats().dirty_frames, 0);

        // Bypass the pool: the bytes must be on disk
        let data = mgr.disk().read_page(page_id).unwrap();
        assert_eq!(data[7], 0x77);
    }

    #[test]
    fn test_from_storage_config() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            buffer_pool_frames: 16,
            fsync_enabled: false,
        };

        let mgr = BufMgr::from_storage_config(&config).unwrap();
        assert_eq!(mgr.pool().num_frames(), 16);
        assert_eq!(mgr.disk().data_dir(), dir.path());
    }

    #[test]
    fn test_alloc_page_is_zeroed_and_pinned() {
        let (mgr, _dir) = create_test_bufmgr(8);
        let file_id = mgr.disk().create("f").unwrap();

        let guard = mgr.alloc_page(file_id).unwrap();
        assert!(guard.read().iter().all(|&b| b == 0));
        assert_eq!(mgr.pool().stats().pinned_frames, 1);
    }
}
