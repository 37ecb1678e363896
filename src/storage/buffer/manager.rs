use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;

/// Per-frame bookkeeping. Page bytes live outside the pool mutex, behind
/// the per-page latch; everything here is guarded by the pool mutex.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.pin_count = 0;
        self.is_dirty = false;
    }
}

struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer,
    meta: Vec<FrameMeta>,
}

/// Fixed-size cache of disk pages with pin counting, dirty tracking and
/// LRU replacement of unpinned frames.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<PagePtr>,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, disk_manager))
    }

    pub fn with_disk_manager(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        let mut meta = Vec::with_capacity(pool_size);

        for frame_id in 0..pool_size {
            frames.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            free_list.push_back(frame_id);
            meta.push(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
        }

        Self {
            pool_size,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                replacer: LruReplacer::new(pool_size),
                meta,
            }),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> Arc<DiskManager> {
        self.disk_manager.clone()
    }

    /// Fetch a page, pinning it. The caller must balance this with
    /// [`unpin_page`](Self::unpin_page).
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.meta[frame_id].pin_count += 1;
            state.replacer.pin(frame_id);
            return Ok(self.frames[frame_id].clone());
        }

        let frame_id = self.find_replaceable_frame(&mut state)?;

        state.page_table.insert(page_id, frame_id);
        let meta = &mut state.meta[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        {
            let mut page = self.frames[frame_id].write();
            self.disk_manager.read_page(page_id, &mut page)?;
        }

        Ok(self.frames[frame_id].clone())
    }

    /// Allocate a brand-new zeroed page, pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = self.find_replaceable_frame(&mut state)?;
        let page_id = self.disk_manager.allocate_page();

        state.page_table.insert(page_id, frame_id);
        let meta = &mut state.meta[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        {
            let mut page = self.frames[frame_id].write();
            page.data.fill(0);
            page.page_id = page_id;
        }

        Ok((self.frames[frame_id].clone(), page_id))
    }

    /// Drop one pin on a page, OR-merging `is_dirty` into its dirty bit.
    ///
    /// Unpinning a page that is not resident returns `true` (the pin was
    /// already gone); unpinning a resident page whose pin count is zero is
    /// a caller bug and returns `false`.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return true;
        };

        let meta = &mut state.meta[frame_id];
        if meta.pin_count == 0 {
            return false;
        }
        meta.pin_count -= 1;
        if is_dirty {
            meta.is_dirty = true;
        }
        if meta.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }
        true
    }

    /// Write a resident page back to disk and clear its dirty bit.
    /// Returns `false` if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        // Take the latch outside the pool mutex so the write-back cannot
        // wedge against a latch holder calling back into the pool.
        let (frame_id, page_ptr) = {
            let state = self.state.lock();
            match state.page_table.get(&page_id) {
                Some(&frame_id) => (frame_id, self.frames[frame_id].clone()),
                None => return Ok(false),
            }
        };

        {
            let page = page_ptr.read();
            self.disk_manager.write_page(&page)?;
        }

        // Re-verify the mapping before clearing the dirty bit: the frame
        // may have been recycled while the I/O was in flight.
        let mut state = self.state.lock();
        if state.page_table.get(&page_id) == Some(&frame_id) {
            state.meta[frame_id].is_dirty = false;
        }
        Ok(true)
    }

    /// Flush every resident page.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let page_ids: Vec<PageId> = {
            let state = self.state.lock();
            state.page_table.keys().copied().collect()
        };

        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Drop a page from the pool and deallocate it on disk.
    ///
    /// Returns `false` when the page is resident and pinned; `true`
    /// otherwise (including when the page was never resident).
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            self.disk_manager.deallocate_page(page_id);
            return Ok(true);
        };

        if state.meta[frame_id].pin_count > 0 {
            return Ok(false);
        }

        if state.meta[frame_id].is_dirty {
            let page = self.frames[frame_id].read();
            self.disk_manager.write_page(&page)?;
        }

        state.page_table.remove(&page_id);
        state.replacer.pin(frame_id);
        state.meta[frame_id].reset();
        self.frames[frame_id].write().reset();
        state.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);
        Ok(true)
    }

    /// Current pin count of a resident page, `None` if not resident.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| state.meta[frame_id].pin_count)
    }

    /// Pick a frame to reuse: free list first, then the LRU victim.
    /// A dirty victim is written back before its frame is handed out.
    fn find_replaceable_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = state.replacer.victim() else {
            return Err(BufferPoolError::BufferPoolFull);
        };

        let old_page_id = state.meta[frame_id].page_id;
        if state.meta[frame_id].is_dirty {
            debug!("evicting dirty page {} from frame {}", old_page_id, frame_id);
            // Victims have pin count 0, so nobody holds this latch.
            let page = self.frames[frame_id].read();
            self.disk_manager.write_page(&page)?;
            drop(page);
            state.meta[frame_id].is_dirty = false;
        }
        if old_page_id != INVALID_PAGE_ID {
            state.page_table.remove(&old_page_id);
        }
        Ok(frame_id)
    }
}
