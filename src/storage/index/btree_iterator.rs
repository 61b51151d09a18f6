use std::cmp::Ordering;
use std::ops::{Bound, RangeBounds};
use std::sync::Arc;

use crate::buffer::{ReadPageGuard, INVALID_PAGE_ID};
use crate::error::GraniteResult;
use crate::storage::codec::BPlusTreeLeafPageCodec;
use crate::storage::index::BPlusTreeIndex;
use crate::storage::page::RecordId;

/// Single-pass forward iterator over a key range. It pins and read-latches
/// one leaf at a time and walks the leaf chain through `next_page_id`; it
/// does not defend against concurrent structural changes (callers arrange
/// higher-level locking).
pub struct TreeIndexIterator {
    index: Arc<BPlusTreeIndex>,
    start_bound: Bound<Vec<u8>>,
    end_bound: Bound<Vec<u8>>,
    current_guard: Option<ReadPageGuard>,
    cursor: usize,
    started: bool,
}

impl TreeIndexIterator {
    pub fn new<R: RangeBounds<Vec<u8>>>(index: Arc<BPlusTreeIndex>, range: R) -> Self {
        Self {
            index,
            start_bound: range.start_bound().cloned(),
            end_bound: range.end_bound().cloned(),
            current_guard: None,
            cursor: 0,
            started: false,
        }
    }

    pub fn next(&mut self) -> GraniteResult<Option<(Vec<u8>, RecordId)>> {
        if !self.started {
            self.seek_start()?;
            self.started = true;
        }

        loop {
            let Some(guard) = self.current_guard.as_ref() else {
                return Ok(None);
            };
            let (leaf, _) = BPlusTreeLeafPageCodec::decode(guard.data())?;

            if self.cursor >= leaf.header.current_size as usize {
                let next_page_id = leaf.header.next_page_id;
                // Release the current leaf before touching the next one; the
                // chain is only ever locked left to right.
                self.current_guard = None;
                if next_page_id == INVALID_PAGE_ID {
                    return Ok(None);
                }
                self.current_guard = Some(self.index.buffer_pool.fetch_page_read(next_page_id)?);
                self.cursor = 0;
                continue;
            }

            let (key, rid) = leaf.kv_at(self.cursor).clone();
            let in_range = match &self.end_bound {
                Bound::Included(end) => {
                    (self.index.comparator)(&key, end) != Ordering::Greater
                }
                Bound::Excluded(end) => (self.index.comparator)(&key, end) == Ordering::Less,
                Bound::Unbounded => true,
            };
            if !in_range {
                self.current_guard = None;
                return Ok(None);
            }
            self.cursor += 1;
            return Ok(Some((key, rid)));
        }
    }

    fn seek_start(&mut self) -> GraniteResult<()> {
        match &self.start_bound {
            Bound::Unbounded => {
                self.current_guard = self.index.find_first_leaf()?;
                self.cursor = 0;
            }
            Bound::Included(key) | Bound::Excluded(key) => {
                let Some(guard) = self.index.find_leaf_for(key)? else {
                    return Ok(());
                };
                let (leaf, _) = BPlusTreeLeafPageCodec::decode(guard.data())?;
                let mut cursor = leaf.lower_bound(key, self.index.comparator);
                if matches!(self.start_bound, Bound::Excluded(_))
                    && cursor < leaf.header.current_size as usize
                    && (self.index.comparator)(leaf.key_at(cursor), key) == Ordering::Equal
                {
                    cursor += 1;
                }
                self.cursor = cursor;
                self.current_guard = Some(guard);
            }
        }
        Ok(())
    }
}
