//! Disk manager for page-level file I/O.
//!
//! Files are named containers of fixed-size pages inside a data directory.
//! Page numbers are 1-based: page 0 never exists, so it can serve as the
//! null sibling / unused-slot sentinel in on-disk structures. Page `n` lives
//! at byte offset `(n - 1) * PAGE_SIZE`.

use karst_common::page::{PageId, INVALID_PAGE_NUM, PAGE_SIZE};
use karst_common::{KarstError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

/// Handle for an open data file.
struct FileHandle {
    /// The OS file handle.
    file: File,
    /// File name within the data directory.
    name: String,
    /// Number of pages currently in the file.
    num_pages: u32,
}

/// Internal registry of open files.
#[derive(Default)]
struct DiskState {
    files: HashMap<u32, FileHandle>,
    ids_by_name: HashMap<String, u32>,
    next_file_id: u32,
}

/// Manages reading and writing pages to named disk files.
///
/// Each file is registered under a process-local `file_id` when created or
/// opened; `PageId` values combine that id with a 1-based page number.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// Open file registry.
    state: Mutex<DiskState>,
}

impl DiskManager {
    /// Creates a new disk manager rooted at the configured data directory.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            state: Mutex::new(DiskState::default()),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(name)
    }

    /// Returns true if a file with the given name exists on disk.
    pub fn exists(&self, name: &str) -> bool {
        self.file_path(name).exists()
    }

    /// Creates a new empty file and returns its file ID.
    pub fn create(&self, name: &str) -> Result<u32> {
        let path = self.file_path(name);
        if path.exists() {
            return Err(KarstError::FileExists(name.to_string()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        Ok(self.register(name, file, 0))
    }

    /// Opens an existing file and returns its file ID.
    ///
    /// Opening a file that is already open returns the existing ID.
    pub fn open(&self, name: &str) -> Result<u32> {
        if let Some(&file_id) = self.state.lock().ids_by_name.get(name) {
            return Ok(file_id);
        }

        let path = self.file_path(name);
        if !path.exists() {
            return Err(KarstError::FileNotFound(name.to_string()));
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let num_pages = (file.metadata()?.len() / PAGE_SIZE as u64) as u32;

        Ok(self.register(name, file, num_pages))
    }

    fn register(&self, name: &str, file: File, num_pages: u32) -> u32 {
        let mut state = self.state.lock();
        let file_id = state.next_file_id;
        state.next_file_id += 1;
        state.files.insert(
            file_id,
            FileHandle {
                file,
                name: name.to_string(),
                num_pages,
            },
        );
        state.ids_by_name.insert(name.to_string(), file_id);
        file_id
    }

    fn with_handle<R>(
        &self,
        file_id: u32,
        f: impl FnOnce(&mut FileHandle) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.state.lock();
        let handle = state
            .files
            .get_mut(&file_id)
            .ok_or_else(|| KarstError::Internal(format!("file {file_id} not open")))?;
        f(handle)
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<Box<[u8; PAGE_SIZE]>> {
        self.with_handle(page_id.file_id, |handle| {
            if page_id.page_num == INVALID_PAGE_NUM || page_id.page_num > handle.num_pages {
                return Err(KarstError::PageNotFound {
                    file_id: page_id.file_id,
                    page_num: page_id.page_num,
                });
            }

            let offset = (page_id.page_num as u64 - 1) * PAGE_SIZE as u64;
            handle.file.seek(SeekFrom::Start(offset))?;

            let mut buffer = Box::new([0u8; PAGE_SIZE]);
            handle.file.read_exact(&mut *buffer)?;
            Ok(buffer)
        })
    }

    /// Writes a page to disk. The page must have been allocated.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let fsync = self.config.fsync_enabled;
        self.with_handle(page_id.file_id, |handle| {
            if page_id.page_num == INVALID_PAGE_NUM || page_id.page_num > handle.num_pages {
                return Err(KarstError::PageNotFound {
                    file_id: page_id.file_id,
                    page_num: page_id.page_num,
                });
            }

            let offset = (page_id.page_num as u64 - 1) * PAGE_SIZE as u64;
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.write_all(data)?;

            if fsync {
                handle.file.sync_all()?;
            }
            Ok(())
        })
    }

    /// Allocates a new zero-filled page at the end of the file.
    ///
    /// Returns the PageId of the newly allocated page.
    pub fn allocate_page(&self, file_id: u32) -> Result<PageId> {
        let fsync = self.config.fsync_enabled;
        self.with_handle(file_id, |handle| {
            let page_num = handle.num_pages + 1;

            let offset = (page_num as u64 - 1) * PAGE_SIZE as u64;
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.write_all(&[0u8; PAGE_SIZE])?;

            if fsync {
                handle.file.sync_all()?;
            }

            handle.num_pages = page_num;
            Ok(PageId::new(file_id, page_num))
        })
    }

    /// Returns the number of pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        self.with_handle(file_id, |handle| Ok(handle.num_pages))
    }

    /// Returns the name a file was opened under.
    pub fn file_name(&self, file_id: u32) -> Result<String> {
        self.with_handle(file_id, |handle| Ok(handle.name.clone()))
    }

    /// Forces a file's pending writes to stable storage.
    pub fn flush_file(&self, file_id: u32) -> Result<()> {
        self.with_handle(file_id, |handle| {
            handle.file.sync_all()?;
            Ok(())
        })
    }

    /// Closes a file, syncing it first.
    pub fn close_file(&self, file_id: u32) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(handle) = state.files.remove(&file_id) {
            state.ids_by_name.remove(&handle.name);
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Deletes a file from disk, closing it first if open.
    pub fn delete_file(&self, name: &str) -> Result<()> {
        let file_id = self.state.lock().ids_by_name.get(name).copied();
        if let Some(file_id) = file_id {
            self.close_file(file_id)?;
        }

        let path = self.file_path(name);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Closes all open files.
    pub fn close_all(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.ids_by_name.clear();
        for (_, handle) in state.files.drain() {
            handle.file.sync_all()?;
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk_manager() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        };
        let dm = DiskManager::new(config).unwrap();
        (dm, dir)
    }

    #[test]
    fn test_disk_manager_new() {
        let (dm, _dir) = create_test_disk_manager();
        assert!(dm.data_dir().exists());
    }

    #[test]
    fn test_disk_manager_create_and_exists() {
        let (dm, _dir) = create_test_disk_manager();

        assert!(!dm.exists("rel.4"));
        let file_id = dm.create("rel.4").unwrap();
        assert!(dm.exists("rel.4"));
        assert_eq!(dm.num_pages(file_id).unwrap(), 0);
        assert_eq!(dm.file_name(file_id).unwrap(), "rel.4");
    }

    #[test]
    fn test_disk_manager_create_existing_fails() {
        let (dm, _dir) = create_test_disk_manager();

        dm.create("rel.4").unwrap();
        assert!(matches!(
            dm.create("rel.4"),
            Err(KarstError::FileExists(_))
        ));
    }

    #[test]
    fn test_disk_manager_open_missing_fails() {
        let (dm, _dir) = create_test_disk_manager();

        assert!(matches!(
            dm.open("nothere"),
            Err(KarstError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_disk_manager_open_is_idempotent() {
        let (dm, _dir) = create_test_disk_manager();

        let id1 = dm.create("rel.4").unwrap();
        let id2 = dm.open("rel.4").unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_disk_manager_allocate_is_one_based() {
        let (dm, _dir) = create_test_disk_manager();
        let file_id = dm.create("f").unwrap();

        let page1 = dm.allocate_page(file_id).unwrap();
        assert_eq!(page1.page_num, 1);

        let page2 = dm.allocate_page(file_id).unwrap();
        assert_eq!(page2.page_num, 2);

        assert_eq!(dm.num_pages(file_id).unwrap(), 2);
    }

    #[test]
    fn test_disk_manager_allocated_page_is_zeroed() {
        let (dm, _dir) = create_test_disk_manager();
        let file_id = dm.create("f").unwrap();

        let page_id = dm.allocate_page(file_id).unwrap();
        let data = dm.read_page(page_id).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_manager_write_read() {
        let (dm, _dir) = create_test_disk_manager();
        let file_id = dm.create("f").unwrap();

        let page_id = dm.allocate_page(file_id).unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[PAGE_SIZE - 1] = 0xEF;
        dm.write_page(page_id, &data).unwrap();

        let read_data = dm.read_page(page_id).unwrap();
        assert_eq!(read_data[0], 0xAB);
        assert_eq!(read_data[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_disk_manager_rejects_page_zero() {
        let (dm, _dir) = create_test_disk_manager();
        let file_id = dm.create("f").unwrap();
        dm.allocate_page(file_id).unwrap();

        let result = dm.read_page(PageId::new(file_id, 0));
        assert!(matches!(result, Err(KarstError::PageNotFound { .. })));

        let result = dm.write_page(PageId::new(file_id, 0), &[0u8; PAGE_SIZE]);
        assert!(matches!(result, Err(KarstError::PageNotFound { .. })));
    }

    #[test]
    fn test_disk_manager_rejects_unallocated_page() {
        let (dm, _dir) = create_test_disk_manager();
        let file_id = dm.create("f").unwrap();
        dm.allocate_page(file_id).unwrap();

        let result = dm.read_page(PageId::new(file_id, 99));
        assert!(matches!(result, Err(KarstError::PageNotFound { .. })));
    }

    #[test]
    fn test_disk_manager_multiple_files() {
        let (dm, _dir) = create_test_disk_manager();

        let f0 = dm.create("a").unwrap();
        let f1 = dm.create("b").unwrap();

        let p0 = dm.allocate_page(f0).unwrap();
        let p1 = dm.allocate_page(f1).unwrap();

        let mut data0 = [0u8; PAGE_SIZE];
        data0[0] = 0x11;
        dm.write_page(p0, &data0).unwrap();

        let mut data1 = [0u8; PAGE_SIZE];
        data1[0] = 0x22;
        dm.write_page(p1, &data1).unwrap();

        assert_eq!(dm.read_page(p0).unwrap()[0], 0x11);
        assert_eq!(dm.read_page(p1).unwrap()[0], 0x22);
    }

    #[test]
    fn test_disk_manager_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let page_num;

        {
            let config = DiskManagerConfig {
                data_dir: dir.path().to_path_buf(),
                fsync_enabled: true,
            };
            let dm = DiskManager::new(config).unwrap();
            let file_id = dm.create("f").unwrap();
            let page_id = dm.allocate_page(file_id).unwrap();
            page_num = page_id.page_num;

            let mut data = [0u8; PAGE_SIZE];
            data[0] = 0xFF;
            dm.write_page(page_id, &data).unwrap();
        }

        {
            let config = DiskManagerConfig {
                data_dir: dir.path().to_path_buf(),
                fsync_enabled: true,
            };
            let dm = DiskManager::new(config).unwrap();
            let file_id = dm.open("f").unwrap();
            assert_eq!(dm.num_pages(file_id).unwrap(), 1);

            let data = dm.read_page(PageId::new(file_id, page_num)).unwrap();
            assert_eq!(data[0], 0xFF);
        }
    }

    #[test]
    fn test_disk_manager_close_and_reopen() {
        let (dm, _dir) = create_test_disk_manager();

        let file_id = dm.create("f").unwrap();
        dm.allocate_page(file_id).unwrap();
        dm.close_file(file_id).unwrap();

        // Operations on a closed id fail
        assert!(dm.num_pages(file_id).is_err());

        // Reopening picks the file back up with its pages intact
        let file_id = dm.open("f").unwrap();
        assert_eq!(dm.num_pages(file_id).unwrap(), 1);
    }

    #[test]
    fn test_disk_manager_delete_file() {
        let (dm, dir) = create_test_disk_manager();

        dm.create("f").unwrap();
        assert!(dir.path().join("f").exists());

        dm.delete_file("f").unwrap();
        assert!(!dir.path().join("f").exists());
        assert!(!dm.exists("f"));
    }
}
