use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{BufferPoolManager, PageId, INVALID_PAGE_ID};
use crate::error::{GraniteError, GraniteResult};
use crate::storage::codec::TablePageCodec;
use crate::storage::page::{RecordId, TablePage, TupleMeta};

/// Append-only tuple heap over chained table pages. Tuples are never moved or
/// rewritten in place; deletion flips the tuple's metadata flag so aborts can
/// flip it back.
#[derive(Debug)]
pub struct TableHeap {
    pub buffer_pool: Arc<BufferPoolManager>,
    first_page_id: PageId,
    last_page_id: Mutex<PageId>,
}

impl TableHeap {
    pub fn try_new(buffer_pool: Arc<BufferPoolManager>) -> GraniteResult<Self> {
        let mut first_guard = buffer_pool.new_page()?.upgrade_write();
        first_guard.overwrite(&TablePageCodec::encode(&TablePage::new()));
        let first_page_id = first_guard.page_id();
        drop(first_guard);
        Ok(Self {
            buffer_pool,
            first_page_id,
            last_page_id: Mutex::new(first_page_id),
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    pub fn insert_tuple(&self, meta: TupleMeta, data: &[u8]) -> GraniteResult<RecordId> {
        let mut last = self.last_page_id.lock();
        let mut guard = self.buffer_pool.fetch_page_write(*last)?;
        let (mut page, _) = TablePageCodec::decode(guard.data())?;

        if let Some(slot) = page.insert_tuple(meta, data) {
            guard.overwrite(&TablePageCodec::encode(&page));
            return Ok(RecordId::new(*last, slot));
        }

        // The tail page is full; chain a fresh one.
        let mut new_guard = self.buffer_pool.new_page()?.upgrade_write();
        let mut new_page = TablePage::new();
        let slot = new_page.insert_tuple(meta, data).ok_or_else(|| {
            GraniteError::Storage(format!("tuple of {} bytes exceeds page capacity", data.len()))
        })?;
        page.header.next_page_id = new_guard.page_id();
        guard.overwrite(&TablePageCodec::encode(&page));
        new_guard.overwrite(&TablePageCodec::encode(&new_page));
        *last = new_guard.page_id();
        Ok(RecordId::new(*last, slot))
    }

    pub fn tuple(&self, rid: RecordId) -> GraniteResult<(TupleMeta, Vec<u8>)> {
        let guard = self.buffer_pool.fetch_page_read(rid.page_id)?;
        let (page, _) = TablePageCodec::decode(guard.data())?;
        page.tuple(rid.slot_num)
            .cloned()
            .ok_or_else(|| GraniteError::Storage(format!("no tuple at {}", rid)))
    }

    pub fn tuple_meta(&self, rid: RecordId) -> GraniteResult<TupleMeta> {
        Ok(self.tuple(rid)?.0)
    }

    pub fn update_tuple_meta(&self, rid: RecordId, meta: TupleMeta) -> GraniteResult<()> {
        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        let (mut page, _) = TablePageCodec::decode(guard.data())?;
        if !page.update_tuple_meta(rid.slot_num, meta) {
            return Err(GraniteError::Storage(format!("no tuple at {}", rid)));
        }
        guard.overwrite(&TablePageCodec::encode(&page));
        Ok(())
    }

    /// Forward iterator over every tuple, deleted ones included; callers
    /// filter on the metadata.
    pub fn iter(self: &Arc<Self>) -> TableIterator {
        TableIterator {
            heap: Arc::clone(self),
            page_id: self.first_page_id,
            slot: 0,
        }
    }
}

#[derive(Debug)]
pub struct TableIterator {
    heap: Arc<TableHeap>,
    page_id: PageId,
    slot: u32,
}

impl TableIterator {
    pub fn next(&mut self) -> GraniteResult<Option<(RecordId, TupleMeta, Vec<u8>)>> {
        loop {
            if self.page_id == INVALID_PAGE_ID {
                return Ok(None);
            }
            let guard = self.heap.buffer_pool.fetch_page_read(self.page_id)?;
            let (page, _) = TablePageCodec::decode(guard.data())?;
            if let Some((meta, data)) = page.tuple(self.slot) {
                let rid = RecordId::new(self.page_id, self.slot);
                self.slot += 1;
                return Ok(Some((rid, *meta, data.clone())));
            }
            self.page_id = page.header.next_page_id;
            self.slot = 0;
        }
    }
}
