use std::sync::Arc;

use crate::error::GraniteResult;
use crate::execution::{IndexBinding, SeqScanExecutor};
use crate::storage::page::TupleMeta;
use crate::storage::table_heap::TableHeap;
use crate::transaction::{
    IndexWriteRecord, LockManager, TableOid, TableWriteRecord, Transaction, WriteType,
};

/// Delete executor: a for-delete scan (IX table, X rows) feeding deletion
/// marks on every match, with undo records for each.
pub struct DeleteExecutor<'a> {
    lock_manager: &'a LockManager,
    txn: &'a Transaction,
    table: Arc<TableHeap>,
    oid: TableOid,
    predicate: Option<Box<dyn Fn(&[u8]) -> bool + 'a>>,
    index: Option<IndexBinding>,
}

impl<'a> DeleteExecutor<'a> {
    pub fn new(
        lock_manager: &'a LockManager,
        txn: &'a Transaction,
        table: Arc<TableHeap>,
        oid: TableOid,
        predicate: Option<Box<dyn Fn(&[u8]) -> bool + 'a>>,
        index: Option<IndexBinding>,
    ) -> Self {
        Self {
            lock_manager,
            txn,
            table,
            oid,
            predicate,
            index,
        }
    }

    /// Run the delete, returning the number of rows marked deleted.
    pub fn execute(self) -> GraniteResult<usize> {
        let mut scan = SeqScanExecutor::new(
            self.lock_manager,
            self.txn,
            self.table.clone(),
            self.oid,
            self.predicate,
            true,
        )?;

        let mut deleted = 0;
        while let Some((rid, data)) = scan.next()? {
            self.table
                .update_tuple_meta(rid, TupleMeta { is_deleted: true })?;
            self.txn.append_table_write(TableWriteRecord {
                table: self.table.clone(),
                rid,
                wtype: WriteType::Delete,
            });

            if let Some(binding) = &self.index {
                let key = (binding.key_of)(&data);
                binding.index.remove(&key)?;
                self.txn.append_index_write(IndexWriteRecord {
                    index: binding.index.clone(),
                    key,
                    rid,
                    wtype: WriteType::Delete,
                });
            }
            deleted += 1;
        }
        Ok(deleted)
    }
}
