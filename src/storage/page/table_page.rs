use std::fmt;

use crate::buffer::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// 64-bit record identifier: page id in the high 32 bits, slot number in the
/// low 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl RecordId {
    pub const fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }

    pub fn to_u64(self) -> u64 {
        ((self.page_id as u32 as u64) << 32) | self.slot_num as u64
    }

    pub fn from_u64(raw: u64) -> Self {
        Self {
            page_id: (raw >> 32) as u32 as PageId,
            slot_num: raw as u32,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.page_id, self.slot_num)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleMeta {
    pub is_deleted: bool,
}

pub const EMPTY_TUPLE_META: TupleMeta = TupleMeta { is_deleted: false };

/**
 * Heap page: a header linking to the next page followed by length-prefixed
 * tuples, appended in slot order.
 *
 * Header: | NextPageId (4) | NumTuples (4) |
 * Tuple:  | IsDeleted (1) | DataLen (4) | Data |
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePage {
    pub header: TablePageHeader,
    pub tuples: Vec<(TupleMeta, Vec<u8>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePageHeader {
    pub next_page_id: PageId,
    pub num_tuples: u32,
}

const TABLE_PAGE_HEADER_SIZE: usize = 8;
const TUPLE_OVERHEAD: usize = 5;

impl TablePage {
    pub fn new() -> Self {
        Self {
            header: TablePageHeader {
                next_page_id: INVALID_PAGE_ID,
                num_tuples: 0,
            },
            tuples: Vec::new(),
        }
    }

    pub fn encoded_size(&self) -> usize {
        TABLE_PAGE_HEADER_SIZE
            + self
                .tuples
                .iter()
                .map(|(_, data)| TUPLE_OVERHEAD + data.len())
                .sum::<usize>()
    }

    /// Append a tuple, returning its slot, or `None` when the page is out of
    /// space.
    pub fn insert_tuple(&mut self, meta: TupleMeta, data: &[u8]) -> Option<u32> {
        if self.encoded_size() + TUPLE_OVERHEAD + data.len() > PAGE_SIZE {
            return None;
        }
        let slot = self.tuples.len() as u32;
        self.tuples.push((meta, data.to_vec()));
        self.header.num_tuples += 1;
        Some(slot)
    }

    pub fn tuple(&self, slot: u32) -> Option<&(TupleMeta, Vec<u8>)> {
        self.tuples.get(slot as usize)
    }

    pub fn update_tuple_meta(&mut self, slot: u32, meta: TupleMeta) -> bool {
        match self.tuples.get_mut(slot as usize) {
            Some(entry) => {
                entry.0 = meta;
                true
            }
            None => false,
        }
    }
}

impl Default for TablePage {
    fn default() -> Self {
        Self::new()
    }
}
