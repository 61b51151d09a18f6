use std::cell::UnsafeCell;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::buffer::page_guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};
use crate::buffer::{
    AtomicPageId, LruKReplacer, PageId, Replacer, INVALID_PAGE_ID, PAGE_SIZE,
};
use crate::config::BufferPoolConfig;
use crate::error::{GraniteError, GraniteResult};
use crate::storage::disk_manager::DiskManager;

pub type FrameId = usize;

#[derive(Debug, Clone)]
pub struct FrameMeta {
    pub page_id: PageId,
    pub pin_count: u32,
    pub is_dirty: bool,
}

impl FrameMeta {
    fn empty() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }

    fn reset(&mut self) {
        *self = Self::empty();
    }
}

struct Frame {
    latch: RwLock<()>,
    data: UnsafeCell<[u8; PAGE_SIZE]>,
}

// Frame data is only touched through the pool (which owns the metadata under
// its mutex) or through page guards holding the frame latch.
unsafe impl Sync for Frame {}

struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruKReplacer,
    metas: Vec<FrameMeta>,
}

/// Maps page ids to in-memory frames, pinning resident pages and evicting
/// unpinned ones under the LRU-K policy. One mutex guards the page table,
/// free list, replacer, and frame metadata; disk I/O may happen while it is
/// held. Per-frame latches are taken only after pinning, by the guards.
pub struct BufferPoolManager {
    frames: Vec<Frame>,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
    next_page_id: AtomicPageId,
}

impl BufferPoolManager {
    pub fn new(config: BufferPoolConfig, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(config.pool_size);
        let mut free_list = VecDeque::with_capacity(config.pool_size);
        let mut metas = Vec::with_capacity(config.pool_size);
        for i in 0..config.pool_size {
            frames.push(Frame {
                latch: RwLock::new(()),
                data: UnsafeCell::new([0; PAGE_SIZE]),
            });
            free_list.push_back(i);
            metas.push(FrameMeta::empty());
        }
        Self {
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(config.pool_size),
                free_list,
                replacer: LruKReplacer::new(config.pool_size, config.lru_k_k),
                metas,
            }),
            disk_manager,
            next_page_id: AtomicPageId::new(1),
        }
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Allocate a fresh page id, place it in a zeroed frame pinned once, and
    /// hand back a guard owning that pin.
    pub fn new_page(self: &Arc<Self>) -> GraniteResult<BasicPageGuard> {
        let mut state = self.state.lock();
        let frame_id = self.allocate_frame(&mut state)?;
        let page_id = self.next_page_id.fetch_add(1, Ordering::SeqCst);

        unsafe { self.frame_slice_mut(frame_id) }.fill(0);
        let meta = &mut state.metas[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;
        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id)?;
        state.replacer.set_evictable(frame_id, false);
        drop(state);

        debug!("created page {} in frame {}", page_id, frame_id);
        Ok(BasicPageGuard::new(Arc::clone(self), frame_id, page_id))
    }

    /// Pin the page, reading it from disk if it is not resident.
    pub fn fetch_page_basic(self: &Arc<Self>, page_id: PageId) -> GraniteResult<BasicPageGuard> {
        if page_id == INVALID_PAGE_ID {
            return Err(GraniteError::Storage(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.metas[frame_id].pin_count += 1;
            state.replacer.record_access(frame_id)?;
            state.replacer.set_evictable(frame_id, false);
            drop(state);
            return Ok(BasicPageGuard::new(Arc::clone(self), frame_id, page_id));
        }

        let frame_id = self.allocate_frame(&mut state)?;
        self.disk_manager
            .read_page(page_id, unsafe { self.frame_slice_mut(frame_id) })?;
        let meta = &mut state.metas[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;
        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id)?;
        state.replacer.set_evictable(frame_id, false);
        drop(state);

        Ok(BasicPageGuard::new(Arc::clone(self), frame_id, page_id))
    }

    /// Pin the page and take its read latch.
    pub fn fetch_page_read(self: &Arc<Self>, page_id: PageId) -> GraniteResult<ReadPageGuard> {
        Ok(self.fetch_page_basic(page_id)?.upgrade_read())
    }

    /// Pin the page and take its write latch.
    pub fn fetch_page_write(self: &Arc<Self>, page_id: PageId) -> GraniteResult<WritePageGuard> {
        Ok(self.fetch_page_basic(page_id)?.upgrade_write())
    }

    /// Drop one pin. `was_dirtied` is ORed into the dirty flag, never
    /// cleared. Returns false when the page is unknown or not pinned.
    pub fn unpin_page(&self, page_id: PageId, was_dirtied: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let meta = &mut state.metas[frame_id];
        if meta.pin_count == 0 {
            return false;
        }
        if was_dirtied {
            meta.is_dirty = true;
        }
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            state.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Write the page back regardless of its pin count and clear the dirty
    /// flag. Returns false when the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> GraniteResult<bool> {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };
        self.disk_manager
            .write_page(page_id, unsafe { self.frame_slice(frame_id) })?;
        state.metas[frame_id].is_dirty = false;
        Ok(true)
    }

    pub fn flush_all_pages(&self) -> GraniteResult<()> {
        let mut state = self.state.lock();
        let dirty: Vec<(PageId, FrameId)> = state
            .page_table
            .iter()
            .filter(|(_, &frame_id)| state.metas[frame_id].is_dirty)
            .map(|(&page_id, &frame_id)| (page_id, frame_id))
            .collect();
        for (page_id, frame_id) in dirty {
            self.disk_manager
                .write_page(page_id, unsafe { self.frame_slice(frame_id) })?;
            state.metas[frame_id].is_dirty = false;
        }
        Ok(())
    }

    /// Drop a page from the pool, returning its frame to the free list. The
    /// page id is retired, never reused. Returns false when the page is
    /// pinned or unknown.
    pub fn delete_page(&self, page_id: PageId) -> GraniteResult<bool> {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };
        if state.metas[frame_id].pin_count > 0 {
            return Ok(false);
        }
        unsafe { self.frame_slice_mut(frame_id) }.fill(0);
        state.metas[frame_id].reset();
        state.page_table.remove(&page_id);
        state.replacer.remove(frame_id);
        state.free_list.push_back(frame_id);
        debug!("deleted page {} from frame {}", page_id, frame_id);
        Ok(true)
    }

    /// Number of frames the replacer currently considers evictable.
    pub fn evictable_count(&self) -> usize {
        self.state.lock().replacer.size()
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    pub fn frame_meta(&self, frame_id: FrameId) -> FrameMeta {
        self.state.lock().metas[frame_id].clone()
    }

    pub fn frame_of(&self, page_id: PageId) -> Option<FrameId> {
        self.state.lock().page_table.get(&page_id).copied()
    }

    fn allocate_frame(&self, state: &mut PoolState) -> GraniteResult<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }
        let Some(frame_id) = state.replacer.evict() else {
            return Err(GraniteError::Storage(
                "cannot allocate a frame: buffer pool is full and no page is evictable".to_string(),
            ));
        };
        let (victim_page_id, is_dirty) = {
            let meta = &state.metas[frame_id];
            (meta.page_id, meta.is_dirty)
        };
        if is_dirty {
            debug!("evicting dirty page {}, writing back", victim_page_id);
            self.disk_manager
                .write_page(victim_page_id, unsafe { self.frame_slice(frame_id) })?;
        }
        state.page_table.remove(&victim_page_id);
        state.metas[frame_id].reset();
        Ok(frame_id)
    }

    pub(crate) fn frame_latch(&self, frame_id: FrameId) -> &RwLock<()> {
        &self.frames[frame_id].latch
    }

    /// Callers must hold a pin on the frame, and either the frame latch or
    /// knowledge that no latched guard exists (pin-count zero paths).
    pub(crate) unsafe fn frame_slice(&self, frame_id: FrameId) -> &[u8] {
        &*self.frames[frame_id].data.get()
    }

    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn frame_slice_mut(&self, frame_id: FrameId) -> &mut [u8] {
        &mut *self.frames[frame_id].data.get()
    }
}

impl std::fmt::Debug for BufferPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPoolManager")
            .field("pool_size", &self.frames.len())
            .finish()
    }
}
