mod buffer_pool;
mod lru_k_replacer;
mod page_guard;
mod replacer;

pub use buffer_pool::{BufferPoolManager, FrameId, FrameMeta};
pub use lru_k_replacer::LruKReplacer;
pub use page_guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};
pub use replacer::Replacer;

use std::sync::atomic::AtomicI32;

pub type PageId = i32;
pub type AtomicPageId = AtomicI32;

pub const INVALID_PAGE_ID: PageId = -1;
pub const PAGE_SIZE: usize = 4096;
