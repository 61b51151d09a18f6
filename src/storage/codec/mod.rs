mod btree_page;
mod common;
mod table_page;

pub use btree_page::{
    BPlusTreeHeaderPageCodec, BPlusTreeInternalPageCodec, BPlusTreeLeafPageCodec,
    BPlusTreePageCodec, BPlusTreePageTypeCodec,
};
pub use common::CommonCodec;
pub use table_page::TablePageCodec;

// Decoded value plus the number of bytes consumed.
pub type DecodedData<T> = (T, usize);
