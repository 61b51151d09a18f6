use std::mem::{self, ManuallyDrop};
use std::sync::Arc;

use log::error;
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::buffer_pool::{BufferPoolManager, FrameId};
use crate::buffer::{PageId, PAGE_SIZE};

/// Scoped ownership of one pin on a buffered page. Dropping the guard unpins
/// the page, handing the dirty flag accumulated through `data_mut` to the
/// pool. Moving a guard leaves nothing behind; the pin is released exactly
/// once.
pub struct BasicPageGuard {
    bpm: Option<Arc<BufferPoolManager>>,
    frame_id: FrameId,
    page_id: PageId,
    is_dirty: bool,
}

impl BasicPageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, frame_id: FrameId, page_id: PageId) -> Self {
        Self {
            bpm: Some(bpm),
            frame_id,
            page_id,
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn data(&self) -> &[u8] {
        let bpm = self.bpm.as_ref().expect("guard is live");
        unsafe { bpm.frame_slice(self.frame_id) }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.is_dirty = true;
        let bpm = self.bpm.as_ref().expect("guard is live");
        unsafe { bpm.frame_slice_mut(self.frame_id) }
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    /// Acquire the page's read latch, keeping the pin alive throughout.
    pub fn upgrade_read(self) -> ReadPageGuard {
        let bpm = self.bpm.as_ref().expect("guard is live").clone();
        let latch = bpm.frame_latch(self.frame_id).read();
        let latch = unsafe {
            mem::transmute::<RwLockReadGuard<'_, ()>, RwLockReadGuard<'static, ()>>(latch)
        };
        ReadPageGuard {
            guard: self,
            latch: ManuallyDrop::new(latch),
        }
    }

    /// Acquire the page's write latch, keeping the pin alive throughout.
    pub fn upgrade_write(self) -> WritePageGuard {
        let bpm = self.bpm.as_ref().expect("guard is live").clone();
        let latch = bpm.frame_latch(self.frame_id).write();
        let latch = unsafe {
            mem::transmute::<RwLockWriteGuard<'_, ()>, RwLockWriteGuard<'static, ()>>(latch)
        };
        WritePageGuard {
            guard: self,
            latch: ManuallyDrop::new(latch),
        }
    }
}

impl Drop for BasicPageGuard {
    fn drop(&mut self) {
        if let Some(bpm) = self.bpm.take() {
            if !bpm.unpin_page(self.page_id, self.is_dirty) {
                error!(
                    "failed to unpin page {} (frame {})",
                    self.page_id, self.frame_id
                );
            }
        }
    }
}

/// A pin plus the page's read latch. The drop order is fixed: release the
/// latch, then unpin.
pub struct ReadPageGuard {
    guard: BasicPageGuard,
    // Borrows the latch owned by the pool; the inner guard keeps the pool
    // alive, so the 'static lifetime never outlives it.
    latch: ManuallyDrop<RwLockReadGuard<'static, ()>>,
}

impl ReadPageGuard {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id()
    }

    pub fn frame_id(&self) -> FrameId {
        self.guard.frame_id()
    }

    pub fn data(&self) -> &[u8] {
        self.guard.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        unsafe {
            ManuallyDrop::drop(&mut self.latch);
        }
    }
}

/// A pin plus the page's write latch; same drop order as `ReadPageGuard`.
pub struct WritePageGuard {
    guard: BasicPageGuard,
    latch: ManuallyDrop<RwLockWriteGuard<'static, ()>>,
}

impl WritePageGuard {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id()
    }

    pub fn frame_id(&self) -> FrameId {
        self.guard.frame_id()
    }

    pub fn data(&self) -> &[u8] {
        self.guard.data()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.guard.data_mut()
    }

    pub fn mark_dirty(&mut self) {
        self.guard.mark_dirty();
    }

    /// Replace the whole page image and mark the frame dirty.
    pub fn overwrite(&mut self, data: &[u8]) {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        self.guard.data_mut().copy_from_slice(data);
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        unsafe {
            ManuallyDrop::drop(&mut self.latch);
        }
    }
}
