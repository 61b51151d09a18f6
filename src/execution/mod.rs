mod delete;
mod insert;
mod seq_scan;

pub use delete::DeleteExecutor;
pub use insert::InsertExecutor;
pub use seq_scan::SeqScanExecutor;

use std::sync::Arc;

use crate::storage::index::BPlusTreeIndex;

/// An index maintained alongside a table heap, with the function deriving
/// the index key from a stored tuple.
#[derive(Debug, Clone)]
pub struct IndexBinding {
    pub index: Arc<BPlusTreeIndex>,
    pub key_of: fn(&[u8]) -> Vec<u8>,
}
