//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::replacer::{ClockReplacer, Replacer};
use karst_common::page::{PageId, PAGE_SIZE};
use karst_common::{KarstError, Result};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;

/// A dirty page that was evicted from the buffer pool. The caller must write
/// it to disk to prevent data loss.
#[derive(Debug)]
pub struct EvictedPage {
    pub page_id: PageId,
    pub data: Box<[u8; PAGE_SIZE]>,
}

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 256 }
    }
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping
/// - Free frame list for new pages
/// - Clock replacement for eviction
/// - Pin counting to keep in-use pages resident
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page ID to frame ID mapping.
    page_table: Mutex<HashMap<PageId, FrameId>>,
    /// List of free frame IDs.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: ClockReplacer,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames).map(|_| BufferFrame::new()).collect();
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            page_table: Mutex::new(HashMap::with_capacity(num_frames)),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
        }
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.page_table.lock().len()
    }

    /// Checks if a page is in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.lock().contains_key(&page_id)
    }

    /// Returns the frame with the given ID.
    ///
    /// Callers must hold a pin on the frame's page for the frame contents to
    /// remain the same page across calls.
    pub fn frame(&self, frame_id: FrameId) -> &BufferFrame {
        &self.frames[frame_id.0 as usize]
    }

    /// Fetches a page already resident in the pool.
    ///
    /// Returns None if the page is not resident. On success the page is
    /// pinned before the frame ID is returned.
    pub fn fetch_page(&self, page_id: PageId) -> Option<FrameId> {
        let frame_id = *self.page_table.lock().get(&page_id)?;
        self.frames[frame_id.0 as usize].pin();
        self.replacer.record_access(frame_id);
        Some(frame_id)
    }

    /// Allocates a frame, evicting an unpinned page if necessary.
    ///
    /// Returns the frame ID and any evicted dirty page that must be written
    /// back by the caller.
    fn allocate_frame(&self) -> Result<(FrameId, Option<EvictedPage>)> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok((frame_id, None));
        }

        let victim = self.replacer.evict(&|fid| {
            let frame = &self.frames[fid.0 as usize];
            !frame.is_empty() && frame.pin_count() == 0
        });

        let Some(victim_id) = victim else {
            return Err(KarstError::BufferPoolFull);
        };

        let frame = &self.frames[victim_id.0 as usize];
        let old_page_id = frame.page_id();

        // Capture the page image before the frame is reused
        let evicted = if frame.is_dirty() {
            old_page_id.map(|page_id| {
                let data_guard = frame.read_data();
                let mut data = Box::new([0u8; PAGE_SIZE]);
                data.copy_from_slice(&**data_guard);
                EvictedPage { page_id, data }
            })
        } else {
            None
        };

        if let Some(old) = old_page_id {
            self.page_table.lock().remove(&old);
            debug!("evicting page {} from {}", old, victim_id);
        }

        Ok((victim_id, evicted))
    }

    /// Pins a frame for a new page.
    ///
    /// If the page is already resident, the existing frame is pinned and
    /// returned. Otherwise a frame is allocated and zeroed for it. Any
    /// evicted dirty page must be written back by the caller.
    pub fn new_page(&self, page_id: PageId) -> Result<(FrameId, Option<EvictedPage>)> {
        if let Some(frame_id) = self.fetch_page(page_id) {
            return Ok((frame_id, None));
        }

        let (frame_id, evicted) = self.allocate_frame()?;

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();
        self.replacer.record_access(frame_id);

        self.page_table.lock().insert(page_id, frame_id);

        Ok((frame_id, evicted))
    }

    /// Loads page data read from disk into the pool and pins it.
    pub fn load_page(
        &self,
        page_id: PageId,
        data: &[u8],
    ) -> Result<(FrameId, Option<EvictedPage>)> {
        let (frame_id, evicted) = self.new_page(page_id)?;
        self.frames[frame_id.0 as usize].copy_from(data);
        Ok((frame_id, evicted))
    }

    /// Unpins a page.
    ///
    /// The dirty flag is ORed into the frame: a page stays dirty until it is
    /// flushed, no matter how many clean unpins follow.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let Some(&frame_id) = self.page_table.lock().get(&page_id) else {
            return false;
        };

        let frame = &self.frames[frame_id.0 as usize];
        if is_dirty {
            frame.set_dirty(true);
        }
        frame.unpin();
        true
    }

    /// Flushes every dirty page through the write callback.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_all<F>(&self, flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8; PAGE_SIZE]) -> Result<()>,
    {
        self.flush_where(|_| true, flush_fn)
    }

    /// Flushes every dirty page of one file through the write callback.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_file<F>(&self, file_id: u32, flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8; PAGE_SIZE]) -> Result<()>,
    {
        self.flush_where(|page_id| page_id.file_id == file_id, flush_fn)
    }

    fn flush_where<P, F>(&self, predicate: P, mut flush_fn: F) -> Result<usize>
    where
        P: Fn(PageId) -> bool,
        F: FnMut(PageId, &[u8; PAGE_SIZE]) -> Result<()>,
    {
        let candidates: Vec<(PageId, FrameId)> = self
            .page_table
            .lock()
            .iter()
            .filter(|(page_id, _)| predicate(**page_id))
            .map(|(page_id, frame_id)| (*page_id, *frame_id))
            .collect();

        let mut flushed = 0;
        for (page_id, frame_id) in candidates {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                flush_fn(page_id, &data)?;
                drop(data);
                frame.set_dirty(false);
                flushed += 1;
            }
        }

        Ok(flushed)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let page_table = self.page_table.lock();
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;

        for frame_id in page_table.values() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: self.free_list.lock().len(),
            used_frames: page_table.len(),
            pinned_frames,
            dirty_frames,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames holding pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}
