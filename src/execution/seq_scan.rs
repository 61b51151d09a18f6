use std::sync::Arc;

use crate::error::{GraniteError, GraniteResult};
use crate::storage::page::RecordId;
use crate::storage::table_heap::{TableHeap, TableIterator};
use crate::transaction::{IsolationLevel, LockManager, LockMode, TableOid, Transaction};

/// Sequential scan obeying the hierarchical locking contract: an intention
/// lock on the table up front (IX when the scan feeds a delete, IS
/// otherwise), a row lock per returned tuple (X for deletes, S for reads),
/// early release per isolation level, and `force` releases for rows the
/// predicate filters out so the transaction stays in its growing phase.
/// Under read-uncommitted no read locks are taken at all.
pub struct SeqScanExecutor<'a> {
    lock_manager: &'a LockManager,
    txn: &'a Transaction,
    table: Arc<TableHeap>,
    oid: TableOid,
    predicate: Option<Box<dyn Fn(&[u8]) -> bool + 'a>>,
    for_delete: bool,
    iter: TableIterator,
    /// Row whose shared lock is released once the caller asks for the next
    /// tuple (read-committed only).
    pending_release: Option<RecordId>,
}

impl<'a> SeqScanExecutor<'a> {
    pub fn new(
        lock_manager: &'a LockManager,
        txn: &'a Transaction,
        table: Arc<TableHeap>,
        oid: TableOid,
        predicate: Option<Box<dyn Fn(&[u8]) -> bool + 'a>>,
        for_delete: bool,
    ) -> GraniteResult<Self> {
        let table_mode = if for_delete {
            Some(LockMode::IntentionExclusive)
        } else if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            None
        } else {
            Some(LockMode::IntentionShared)
        };
        if let Some(mode) = table_mode {
            if !lock_manager.lock_table(txn, mode, oid)? {
                return Err(cancelled(txn));
            }
        }

        let iter = table.iter();
        Ok(Self {
            lock_manager,
            txn,
            table,
            oid,
            predicate,
            for_delete,
            iter,
            pending_release: None,
        })
    }

    pub fn table(&self) -> &Arc<TableHeap> {
        &self.table
    }

    pub fn next(&mut self) -> GraniteResult<Option<(RecordId, Vec<u8>)>> {
        if let Some(prev) = self.pending_release.take() {
            self.lock_manager.unlock_row(self.txn, self.oid, prev, false)?;
        }

        while let Some((rid, meta, data)) = self.iter.next()? {
            let row_mode = if self.for_delete {
                Some(LockMode::Exclusive)
            } else if self.txn.isolation_level() == IsolationLevel::ReadUncommitted {
                None
            } else {
                Some(LockMode::Shared)
            };
            if let Some(mode) = row_mode {
                if !self.lock_manager.lock_row(self.txn, mode, self.oid, rid)? {
                    return Err(cancelled(self.txn));
                }
            }

            let rejected = meta.is_deleted
                || self
                    .predicate
                    .as_ref()
                    .is_some_and(|predicate| !predicate(&data));
            if rejected {
                if row_mode.is_some() {
                    self.lock_manager.unlock_row(self.txn, self.oid, rid, true)?;
                }
                continue;
            }

            if !self.for_delete && self.txn.isolation_level() == IsolationLevel::ReadCommitted {
                self.pending_release = Some(rid);
            }
            return Ok(Some((rid, data)));
        }
        Ok(None)
    }
}

fn cancelled(txn: &Transaction) -> GraniteError {
    GraniteError::Execution(format!(
        "transaction {} was aborted while waiting for a scan lock",
        txn.id()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolManager;
    use crate::config::{BufferPoolConfig, LockManagerConfig};
    use crate::storage::disk_manager::DiskManager;
    use crate::storage::page::EMPTY_TUPLE_META;
    use crate::transaction::TransactionManager;
    use tempfile::TempDir;

    const OID: TableOid = 1;

    fn setup() -> (TempDir, Arc<TableHeap>, Arc<TransactionManager>) {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
        let pool = Arc::new(BufferPoolManager::new(
            BufferPoolConfig {
                pool_size: 32,
                lru_k_k: 2,
            },
            disk_manager,
        ));
        let heap = Arc::new(TableHeap::try_new(pool).unwrap());
        for row in [b"ant".as_slice(), b"bee", b"cat", b"dog"] {
            heap.insert_tuple(EMPTY_TUPLE_META, row).unwrap();
        }
        let manager = Arc::new(TransactionManager::new(Arc::new(LockManager::new(
            LockManagerConfig::default(),
        ))));
        (temp_dir, heap, manager)
    }

    #[test]
    fn repeatable_read_retains_shared_row_locks() {
        let (_tmp, heap, manager) = setup();
        let lm = manager.lock_manager().clone();
        let txn = manager.begin(IsolationLevel::RepeatableRead);

        let mut scan = SeqScanExecutor::new(&lm, &txn, heap, OID, None, false).unwrap();
        let mut rows = Vec::new();
        while let Some((rid, data)) = scan.next().unwrap() {
            rows.push((rid, data));
        }
        assert_eq!(rows.len(), 4);
        assert!(txn.is_table_intention_shared_locked(OID));
        for (rid, _) in &rows {
            assert!(txn.is_row_shared_locked(OID, *rid));
        }
        manager.commit(&txn).unwrap();
    }

    #[test]
    fn read_committed_releases_rows_as_it_goes() {
        let (_tmp, heap, manager) = setup();
        let lm = manager.lock_manager().clone();
        let txn = manager.begin(IsolationLevel::ReadCommitted);

        let mut scan = SeqScanExecutor::new(&lm, &txn, heap, OID, None, false).unwrap();
        let (first, _) = scan.next().unwrap().unwrap();
        assert!(txn.is_row_shared_locked(OID, first));

        let (second, _) = scan.next().unwrap().unwrap();
        // Advancing released the previous row's shared lock.
        assert!(!txn.is_row_shared_locked(OID, first));
        assert!(txn.is_row_shared_locked(OID, second));
        manager.commit(&txn).unwrap();
    }

    #[test]
    fn read_uncommitted_takes_no_read_locks() {
        let (_tmp, heap, manager) = setup();
        let lm = manager.lock_manager().clone();
        let txn = manager.begin(IsolationLevel::ReadUncommitted);

        let mut scan = SeqScanExecutor::new(&lm, &txn, heap, OID, None, false).unwrap();
        let mut count = 0;
        while let Some((rid, _)) = scan.next().unwrap() {
            assert!(!txn.is_row_shared_locked(OID, rid));
            count += 1;
        }
        assert_eq!(count, 4);
        assert!(!txn.is_table_intention_shared_locked(OID));
        manager.commit(&txn).unwrap();
    }

    #[test]
    fn predicate_misses_release_with_force_and_keep_growing() {
        let (_tmp, heap, manager) = setup();
        let lm = manager.lock_manager().clone();
        let txn = manager.begin(IsolationLevel::RepeatableRead);

        let predicate: Box<dyn Fn(&[u8]) -> bool> = Box::new(|data| data.starts_with(b"c"));
        let mut scan =
            SeqScanExecutor::new(&lm, &txn, heap, OID, Some(predicate), false).unwrap();
        let mut matched = Vec::new();
        while let Some((rid, data)) = scan.next().unwrap() {
            matched.push((rid, data));
        }
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].1, b"cat");

        // Only the matching row kept its lock, and the forced releases did
        // not push the transaction into its shrinking phase.
        use crate::transaction::TransactionState;
        assert_eq!(txn.state(), TransactionState::Growing);
        assert!(txn.is_row_shared_locked(OID, matched[0].0));
        manager.commit(&txn).unwrap();
    }

    #[test]
    fn delete_scan_takes_exclusive_locks() {
        let (_tmp, heap, manager) = setup();
        let lm = manager.lock_manager().clone();
        let txn = manager.begin(IsolationLevel::RepeatableRead);

        let mut scan = SeqScanExecutor::new(&lm, &txn, heap, OID, None, true).unwrap();
        let (rid, _) = scan.next().unwrap().unwrap();
        assert!(txn.is_table_intention_exclusive_locked(OID));
        assert!(txn.is_row_exclusive_locked(OID, rid));
        manager.commit(&txn).unwrap();
    }
}
