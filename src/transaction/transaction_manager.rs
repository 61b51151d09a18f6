use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::debug;

use crate::error::{GraniteError, GraniteResult};
use crate::storage::page::TupleMeta;
use crate::transaction::{
    IsolationLevel, LockManager, Transaction, TransactionId, TransactionState, WriteType,
};

/// Hands out transactions, drives commit, and rolls back aborts by replaying
/// the write logs in reverse. Lock release is delegated to the lock manager.
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    txns: Arc<DashMap<TransactionId, Arc<Transaction>>>,
    lock_manager: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU64::new(1),
            txns: Arc::new(DashMap::new()),
            lock_manager,
        }
    }

    /// Spawn the lock manager's deadlock detector over this manager's live
    /// transactions.
    pub fn start_deadlock_detection(&self) {
        self.lock_manager.start_deadlock_detection(self.txns.clone());
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn transactions(&self) -> &Arc<DashMap<TransactionId, Arc<Transaction>>> {
        &self.txns
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.txns.insert(txn_id, txn.clone());
        debug!("began transaction {} at {:?}", txn_id, isolation_level);
        txn
    }

    pub fn transaction(&self, txn_id: TransactionId) -> Option<Arc<Transaction>> {
        self.txns.get(&txn_id).map(|entry| entry.value().clone())
    }

    pub fn commit(&self, txn: &Transaction) -> GraniteResult<()> {
        match txn.state() {
            TransactionState::Growing | TransactionState::Shrinking => {}
            state => {
                return Err(GraniteError::Internal(format!(
                    "cannot commit transaction {} in state {:?}",
                    txn.id(),
                    state
                )))
            }
        }
        self.lock_manager.release_all(txn);
        txn.clear_write_sets();
        txn.set_state(TransactionState::Committed);
        self.txns.remove(&txn.id());
        debug!("committed transaction {}", txn.id());
        Ok(())
    }

    /// Roll back: replay the table write log in reverse flipping tuple
    /// deletion marks, then the index write log in reverse, then release all
    /// locks.
    pub fn abort(&self, txn: &Transaction) -> GraniteResult<()> {
        if txn.state() == TransactionState::Committed {
            return Err(GraniteError::Internal(format!(
                "cannot abort committed transaction {}",
                txn.id()
            )));
        }

        while let Some(record) = txn.pop_table_write() {
            match record.wtype {
                WriteType::Insert => {
                    record
                        .table
                        .update_tuple_meta(record.rid, TupleMeta { is_deleted: true })?;
                }
                WriteType::Delete => {
                    record
                        .table
                        .update_tuple_meta(record.rid, TupleMeta { is_deleted: false })?;
                }
            }
        }
        while let Some(record) = txn.pop_index_write() {
            match record.wtype {
                WriteType::Insert => record.index.remove(&record.key)?,
                WriteType::Delete => {
                    record.index.insert(&record.key, record.rid)?;
                }
            }
        }

        self.lock_manager.release_all(txn);
        txn.set_state(TransactionState::Aborted);
        self.txns.remove(&txn.id());
        debug!("aborted transaction {}", txn.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockManagerConfig;
    use crate::transaction::LockMode;
    use std::thread;
    use std::time::Duration;

    fn manager_with_detector(interval_ms: u64) -> Arc<TransactionManager> {
        let lock_manager = Arc::new(LockManager::new(LockManagerConfig {
            cycle_detection_interval: Duration::from_millis(interval_ms),
        }));
        let manager = Arc::new(TransactionManager::new(lock_manager));
        manager.start_deadlock_detection();
        manager
    }

    #[test]
    fn txn_ids_are_monotonic() {
        let manager = Arc::new(TransactionManager::new(Arc::new(LockManager::new(
            LockManagerConfig::default(),
        ))));
        let t1 = manager.begin(IsolationLevel::RepeatableRead);
        let t2 = manager.begin(IsolationLevel::ReadCommitted);
        assert!(t2.id() > t1.id());
        assert_eq!(t1.state(), TransactionState::Growing);
    }

    #[test]
    fn commit_releases_locks() {
        let manager = Arc::new(TransactionManager::new(Arc::new(LockManager::new(
            LockManagerConfig::default(),
        ))));
        let lm = manager.lock_manager().clone();
        let t1 = manager.begin(IsolationLevel::RepeatableRead);
        let t2 = manager.begin(IsolationLevel::RepeatableRead);

        assert!(lm.lock_table(&t1, LockMode::Exclusive, 1).unwrap());
        manager.commit(&t1).unwrap();
        assert_eq!(t1.state(), TransactionState::Committed);
        assert!(manager.commit(&t1).is_err());

        // The table is free again.
        assert!(lm.lock_table(&t2, LockMode::Exclusive, 1).unwrap());
    }

    #[test]
    fn deadlock_detector_aborts_youngest() {
        let manager = manager_with_detector(10);
        let lm = manager.lock_manager().clone();

        let t1 = manager.begin(IsolationLevel::RepeatableRead);
        let t2 = manager.begin(IsolationLevel::RepeatableRead);

        assert!(lm.lock_table(&t1, LockMode::Exclusive, 1).unwrap());
        assert!(lm.lock_table(&t2, LockMode::Exclusive, 2).unwrap());

        // T1 waits for table 2 while T2 waits for table 1: a cycle the
        // detector must break by aborting T2, the youngest.
        let lm_clone = lm.clone();
        let t1_clone = t1.clone();
        let handle = thread::spawn(move || {
            lm_clone.lock_table(&t1_clone, LockMode::Exclusive, 2).unwrap()
        });
        thread::sleep(Duration::from_millis(30));

        let cancelled = lm.lock_table(&t2, LockMode::Exclusive, 1).unwrap();
        assert!(!cancelled);
        assert_eq!(t2.state(), TransactionState::Aborted);

        // Rolling T2 back releases table 2 and T1's wait succeeds.
        manager.abort(&t2).unwrap();
        assert!(handle.join().unwrap());
        assert!(t1.is_table_exclusive_locked(2));
        manager.commit(&t1).unwrap();
    }

    #[test]
    fn wait_for_graph_reports_edges() {
        let manager = Arc::new(TransactionManager::new(Arc::new(LockManager::new(
            LockManagerConfig::default(),
        ))));
        let lm = manager.lock_manager().clone();
        let t1 = manager.begin(IsolationLevel::RepeatableRead);
        let t2 = manager.begin(IsolationLevel::RepeatableRead);

        assert!(lm.lock_table(&t1, LockMode::Exclusive, 1).unwrap());

        let lm_clone = lm.clone();
        let t2_clone = t2.clone();
        let handle = thread::spawn(move || {
            let _ = lm_clone.lock_table(&t2_clone, LockMode::Shared, 1);
        });
        thread::sleep(Duration::from_millis(30));

        let edges = lm.edge_list(manager.transactions());
        assert_eq!(edges, vec![(t2.id(), t1.id())]);

        manager.commit(&t1).unwrap();
        handle.join().unwrap();
    }
}
