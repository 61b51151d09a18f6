use std::sync::Arc;

use crate::error::{GraniteError, GraniteResult};
use crate::execution::IndexBinding;
use crate::storage::page::{RecordId, EMPTY_TUPLE_META};
use crate::storage::table_heap::TableHeap;
use crate::transaction::{
    IndexWriteRecord, LockManager, LockMode, TableOid, TableWriteRecord, Transaction, WriteType,
};

/// Insert executor: IX on the table, the tuple appended to the heap, X on
/// the new row, and undo records in the transaction's write logs.
pub struct InsertExecutor<'a> {
    lock_manager: &'a LockManager,
    txn: &'a Transaction,
    table: Arc<TableHeap>,
    oid: TableOid,
    index: Option<IndexBinding>,
}

impl<'a> InsertExecutor<'a> {
    pub fn new(
        lock_manager: &'a LockManager,
        txn: &'a Transaction,
        table: Arc<TableHeap>,
        oid: TableOid,
        index: Option<IndexBinding>,
    ) -> Self {
        Self {
            lock_manager,
            txn,
            table,
            oid,
            index,
        }
    }

    pub fn insert(&self, data: &[u8]) -> GraniteResult<RecordId> {
        if !self
            .lock_manager
            .lock_table(self.txn, LockMode::IntentionExclusive, self.oid)?
        {
            return Err(GraniteError::Execution(format!(
                "transaction {} was aborted while locking table {}",
                self.txn.id(),
                self.oid
            )));
        }

        let rid = self.table.insert_tuple(EMPTY_TUPLE_META, data)?;
        if !self
            .lock_manager
            .lock_row(self.txn, LockMode::Exclusive, self.oid, rid)?
        {
            return Err(GraniteError::Execution(format!(
                "transaction {} was aborted while locking row {}",
                self.txn.id(),
                rid
            )));
        }
        self.txn.append_table_write(TableWriteRecord {
            table: self.table.clone(),
            rid,
            wtype: WriteType::Insert,
        });

        if let Some(binding) = &self.index {
            let key = (binding.key_of)(data);
            if !binding.index.insert(&key, rid)? {
                return Err(GraniteError::Execution(format!(
                    "duplicate key for row {}",
                    rid
                )));
            }
            self.txn.append_index_write(IndexWriteRecord {
                index: binding.index.clone(),
                key,
                rid,
                wtype: WriteType::Insert,
            });
        }

        Ok(rid)
    }
}
