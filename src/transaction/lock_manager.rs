use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;

use dashmap::DashMap;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::config::LockManagerConfig;
use crate::error::{GraniteError, GraniteResult};
use crate::storage::page::RecordId;
use crate::transaction::{
    AbortReason, IsolationLevel, TableOid, Transaction, TransactionId, TransactionState,
    INVALID_TRANSACTION_ID,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    IntentionShared,
    Shared,
    IntentionExclusive,
    SharedIntentionExclusive,
    Exclusive,
}

#[derive(Debug, Clone)]
struct LockRequest {
    txn_id: TransactionId,
    mode: LockMode,
    oid: TableOid,
    rid: Option<RecordId>,
    granted: bool,
}

#[derive(Debug)]
struct QueueState {
    requests: VecDeque<LockRequest>,
    /// Transaction currently strengthening its lock on this object, if any.
    /// Only one upgrade may be in flight and it beats newly queued peers.
    upgrading: TransactionId,
}

#[derive(Debug)]
struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                requests: VecDeque::new(),
                upgrading: INVALID_TRANSACTION_ID,
            }),
            cv: Condvar::new(),
        }
    }
}

type RowKey = (TableOid, RecordId);

/// Hierarchical two-phase lock manager: table and row locks in five modes
/// with FIFO queues, upgrade priority, and a background deadlock detector
/// that aborts the youngest transaction on each wait-for cycle.
#[derive(Debug)]
pub struct LockManager {
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<RowKey, Arc<LockRequestQueue>>>,
    config: LockManagerConfig,
    detector_stop: Arc<(Mutex<bool>, Condvar)>,
    detector_handle: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub fn new(config: LockManagerConfig) -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            config,
            detector_stop: Arc::new((Mutex::new(false), Condvar::new())),
            detector_handle: Mutex::new(None),
        }
    }

    /// Take a table lock, blocking until granted. `Ok(false)` means the wait
    /// was cancelled because the deadlock detector aborted the transaction;
    /// protocol violations abort the transaction and return the error.
    pub fn lock_table(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
    ) -> GraniteResult<bool> {
        self.check_admission(txn, mode)?;
        let queue = self.table_queue(oid);
        let request = LockRequest {
            txn_id: txn.id(),
            mode,
            oid,
            rid: None,
            granted: false,
        };
        self.acquire(txn, queue, request)
    }

    pub fn unlock_table(&self, txn: &Transaction, oid: TableOid) -> GraniteResult<()> {
        let queue = self.table_lock_map.lock().get(&oid).cloned();
        let Some(queue) = queue else {
            return Err(self.abort_with(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        let mut state = queue.state.lock();
        let Some(pos) = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        else {
            drop(state);
            return Err(self.abort_with(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        if txn.holds_row_locks_on(oid) {
            drop(state);
            return Err(self.abort_with(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let request = state.requests.remove(pos).expect("position is in range");
        self.shrink_on_unlock(txn, request.mode, false);
        txn.remove_table_lock(request.mode, oid);
        drop(state);
        queue.cv.notify_all();
        Ok(())
    }

    /// Take a row lock (S or X only). The matching coarser table lock must
    /// already be held.
    pub fn lock_row(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
        rid: RecordId,
    ) -> GraniteResult<bool> {
        if matches!(
            mode,
            LockMode::IntentionShared
                | LockMode::IntentionExclusive
                | LockMode::SharedIntentionExclusive
        ) {
            return Err(self.abort_with(txn, AbortReason::AttemptedIntentionLockOnRow));
        }
        let table_lock_ok = match mode {
            LockMode::Shared => {
                txn.is_table_shared_locked(oid)
                    || txn.is_table_exclusive_locked(oid)
                    || txn.is_table_intention_shared_locked(oid)
                    || txn.is_table_intention_exclusive_locked(oid)
                    || txn.is_table_shared_intention_exclusive_locked(oid)
            }
            LockMode::Exclusive => {
                txn.is_table_exclusive_locked(oid)
                    || txn.is_table_intention_exclusive_locked(oid)
                    || txn.is_table_shared_intention_exclusive_locked(oid)
            }
            _ => unreachable!("intention modes were rejected above"),
        };
        if !table_lock_ok {
            return Err(self.abort_with(txn, AbortReason::TableLockNotPresent));
        }
        self.check_admission(txn, mode)?;

        let queue = self.row_queue(oid, rid);
        let request = LockRequest {
            txn_id: txn.id(),
            mode,
            oid,
            rid: Some(rid),
            granted: false,
        };
        self.acquire(txn, queue, request)
    }

    /// Release a row lock. With `force` the transaction's 2PL state is left
    /// untouched, used by scans dropping locks on rows their predicate
    /// rejected.
    pub fn unlock_row(
        &self,
        txn: &Transaction,
        oid: TableOid,
        rid: RecordId,
        force: bool,
    ) -> GraniteResult<()> {
        let queue = self.row_lock_map.lock().get(&(oid, rid)).cloned();
        let Some(queue) = queue else {
            return Err(self.abort_with(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        let mut state = queue.state.lock();
        let Some(pos) = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        else {
            drop(state);
            return Err(self.abort_with(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let request = state.requests.remove(pos).expect("position is in range");
        self.shrink_on_unlock(txn, request.mode, force);
        txn.remove_row_lock(request.mode, oid, rid);
        drop(state);
        queue.cv.notify_all();
        Ok(())
    }

    /// Drop every queue entry of a finished transaction, rows before tables,
    /// in a fixed order. Used by commit and abort; performs no 2PL state
    /// transitions.
    pub fn release_all(&self, txn: &Transaction) {
        let (tables, rows) = txn.take_held_locks();
        for (oid, rid, _) in rows {
            if let Some(queue) = self.row_lock_map.lock().get(&(oid, rid)).cloned() {
                Self::drop_requests_of(&queue, txn.id());
            }
        }
        for (oid, _) in tables {
            if let Some(queue) = self.table_lock_map.lock().get(&oid).cloned() {
                Self::drop_requests_of(&queue, txn.id());
            }
        }
    }

    /// Current wait-for edges, (waiter, holder) pairs in ascending order.
    pub fn edge_list(
        &self,
        txns: &DashMap<TransactionId, Arc<Transaction>>,
    ) -> Vec<(TransactionId, TransactionId)> {
        let graph = self.build_wait_graph(txns);
        let mut edges = Vec::new();
        for (from, tos) in graph {
            for to in tos {
                edges.push((from, to));
            }
        }
        edges
    }

    /// Spawn the background detector. It wakes every
    /// `cycle_detection_interval`, rebuilds the wait-for graph, and aborts
    /// the youngest transaction of every cycle found.
    pub fn start_deadlock_detection(
        self: &Arc<Self>,
        txns: Arc<DashMap<TransactionId, Arc<Transaction>>>,
    ) {
        // The thread keeps only a weak handle so dropping the last owner of
        // the lock manager shuts the detector down instead of leaking it.
        let manager = Arc::downgrade(self);
        let stop = Arc::clone(&self.detector_stop);
        let interval = self.config.cycle_detection_interval;
        let handle = std::thread::Builder::new()
            .name("deadlock-detector".to_string())
            .spawn(move || loop {
                {
                    let (stop_lock, stop_cv) = &*stop;
                    let mut stopped = stop_lock.lock();
                    if *stopped {
                        break;
                    }
                    stop_cv.wait_for(&mut stopped, interval);
                    if *stopped {
                        break;
                    }
                }
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.run_cycle_detection(&txns);
            })
            .expect("failed to spawn deadlock detector");
        *self.detector_handle.lock() = Some(handle);
    }

    /// Stop the detector after its current pass and join it.
    pub fn shutdown(&self) {
        {
            let (stop_lock, stop_cv) = &*self.detector_stop;
            *stop_lock.lock() = true;
            stop_cv.notify_all();
        }
        if let Some(handle) = self.detector_handle.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    fn table_queue(&self, oid: TableOid) -> Arc<LockRequestQueue> {
        let mut map = self.table_lock_map.lock();
        map.entry(oid)
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    fn row_queue(&self, oid: TableOid, rid: RecordId) -> Arc<LockRequestQueue> {
        let mut map = self.row_lock_map.lock();
        map.entry((oid, rid))
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    /// Isolation-level admission: which lock modes may be requested in which
    /// 2PL phase.
    fn check_admission(&self, txn: &Transaction, mode: LockMode) -> GraniteResult<()> {
        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                if txn.state() == TransactionState::Shrinking {
                    return Err(self.abort_with(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if txn.state() == TransactionState::Shrinking
                    && !matches!(mode, LockMode::IntentionShared | LockMode::Shared)
                {
                    return Err(self.abort_with(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadUncommitted => {
                if !matches!(mode, LockMode::IntentionExclusive | LockMode::Exclusive) {
                    return Err(self.abort_with(txn, AbortReason::LockSharedOnReadUncommitted));
                }
                if txn.state() != TransactionState::Growing {
                    return Err(self.abort_with(txn, AbortReason::LockSharedOnReadUncommitted));
                }
            }
        }
        Ok(())
    }

    fn abort_with(&self, txn: &Transaction, reason: AbortReason) -> GraniteError {
        txn.set_state(TransactionState::Aborted);
        GraniteError::TransactionAbort {
            txn_id: txn.id(),
            reason,
        }
    }

    fn acquire(
        &self,
        txn: &Transaction,
        queue: Arc<LockRequestQueue>,
        request: LockRequest,
    ) -> GraniteResult<bool> {
        let mut state = queue.state.lock();

        if let Some(pos) = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id())
        {
            let existing = state.requests[pos].clone();
            if existing.mode == request.mode {
                return Ok(true);
            }
            if state.upgrading != INVALID_TRANSACTION_ID {
                drop(state);
                return Err(self.abort_with(txn, AbortReason::UpgradeConflict));
            }
            if !Self::can_upgrade(existing.mode, request.mode) {
                drop(state);
                return Err(self.abort_with(txn, AbortReason::IncompatibleUpgrade));
            }
            // Drop the old lock and re-queue at the tail, reserving the
            // upgrade slot.
            state.requests.remove(pos);
            match existing.rid {
                Some(rid) => txn.remove_row_lock(existing.mode, existing.oid, rid),
                None => txn.remove_table_lock(existing.mode, existing.oid),
            }
            state.requests.push_back(request.clone());
            state.upgrading = txn.id();
        } else {
            state.requests.push_back(request.clone());
        }

        loop {
            if txn.state() == TransactionState::Aborted {
                state.requests.retain(|r| r.txn_id != txn.id());
                if state.upgrading == txn.id() {
                    state.upgrading = INVALID_TRANSACTION_ID;
                }
                drop(state);
                queue.cv.notify_all();
                debug!("transaction {} cancelled while waiting for a lock", txn.id());
                return Ok(false);
            }
            if Self::grant_allowed(&state, txn.id(), request.mode) {
                break;
            }
            queue.cv.wait(&mut state);
        }

        if let Some(req) = state.requests.iter_mut().find(|r| r.txn_id == txn.id()) {
            req.granted = true;
        }
        if state.upgrading == txn.id() {
            state.upgrading = INVALID_TRANSACTION_ID;
        }
        match request.rid {
            Some(rid) => txn.insert_row_lock(request.mode, request.oid, rid),
            None => txn.insert_table_lock(request.mode, request.oid),
        }
        drop(state);
        // Compatible peers at the head may be grantable together.
        queue.cv.notify_all();
        Ok(true)
    }

    /// Grant when (a) the request is compatible with every granted request,
    /// and (b) the upgrade slot is free (or ours), and (c) no earlier
    /// ungranted request is incompatible with ours (FIFO with compatible
    /// coalescing).
    fn grant_allowed(state: &QueueState, txn_id: TransactionId, mode: LockMode) -> bool {
        for granted in state.requests.iter().filter(|r| r.granted) {
            if granted.txn_id == txn_id {
                continue;
            }
            if !Self::compatible(granted.mode, mode) {
                return false;
            }
        }
        if state.upgrading == txn_id {
            return true;
        }
        if state.upgrading != INVALID_TRANSACTION_ID {
            return false;
        }
        for request in &state.requests {
            if request.txn_id == txn_id {
                return true;
            }
            if !request.granted && !Self::compatible(request.mode, mode) {
                return false;
            }
        }
        false
    }

    /// Lock compatibility matrix, `held` row by `requested` column.
    fn compatible(held: LockMode, requested: LockMode) -> bool {
        match held {
            LockMode::IntentionShared => requested != LockMode::Exclusive,
            LockMode::IntentionExclusive => matches!(
                requested,
                LockMode::IntentionShared | LockMode::IntentionExclusive
            ),
            LockMode::Shared => {
                matches!(requested, LockMode::IntentionShared | LockMode::Shared)
            }
            LockMode::SharedIntentionExclusive => requested == LockMode::IntentionShared,
            LockMode::Exclusive => false,
        }
    }

    /// The upgrade lattice: IS -> {S, X, IX, SIX}, S -> {X, SIX},
    /// IX -> {X, SIX}, SIX -> X.
    fn can_upgrade(held: LockMode, requested: LockMode) -> bool {
        match held {
            LockMode::IntentionShared => requested != LockMode::IntentionShared,
            LockMode::Shared | LockMode::IntentionExclusive => matches!(
                requested,
                LockMode::Exclusive | LockMode::SharedIntentionExclusive
            ),
            LockMode::SharedIntentionExclusive => requested == LockMode::Exclusive,
            LockMode::Exclusive => false,
        }
    }

    fn shrink_on_unlock(&self, txn: &Transaction, mode: LockMode, force: bool) {
        if force || txn.state() != TransactionState::Growing {
            return;
        }
        let shrink = match mode {
            LockMode::Shared => txn.isolation_level() == IsolationLevel::RepeatableRead,
            LockMode::Exclusive => true,
            _ => false,
        };
        if shrink {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    fn drop_requests_of(queue: &Arc<LockRequestQueue>, txn_id: TransactionId) {
        let mut state = queue.state.lock();
        let before = state.requests.len();
        state.requests.retain(|r| r.txn_id != txn_id);
        if state.upgrading == txn_id {
            state.upgrading = INVALID_TRANSACTION_ID;
        }
        let removed = state.requests.len() != before;
        drop(state);
        if removed {
            queue.cv.notify_all();
        }
    }

    fn all_queues(&self) -> Vec<Arc<LockRequestQueue>> {
        let mut queues: Vec<Arc<LockRequestQueue>> =
            self.table_lock_map.lock().values().cloned().collect();
        queues.extend(self.row_lock_map.lock().values().cloned());
        queues
    }

    fn run_cycle_detection(&self, txns: &DashMap<TransactionId, Arc<Transaction>>) {
        loop {
            let graph = self.build_wait_graph(txns);
            let Some(cycle) = Self::find_cycle(&graph) else {
                break;
            };
            let victim = *cycle.iter().max().expect("cycle is never empty");
            warn!(
                "deadlock among transactions {:?}; aborting youngest {}",
                cycle, victim
            );
            if let Some(txn) = txns.get(&victim) {
                txn.set_state(TransactionState::Aborted);
            }
            // Wake every queue so the victim's waits observe the abort.
            for queue in self.all_queues() {
                let state = queue.state.lock();
                drop(state);
                queue.cv.notify_all();
            }
        }
    }

    /// Edges from each ungranted request to each granted request of the same
    /// queue, skipping aborted transactions. Sorted maps keep detection
    /// deterministic.
    fn build_wait_graph(
        &self,
        txns: &DashMap<TransactionId, Arc<Transaction>>,
    ) -> BTreeMap<TransactionId, BTreeSet<TransactionId>> {
        let mut graph: BTreeMap<TransactionId, BTreeSet<TransactionId>> = BTreeMap::new();
        for queue in self.all_queues() {
            let state = queue.state.lock();
            let active = |id: TransactionId| {
                txns.get(&id)
                    .map(|t| t.state() != TransactionState::Aborted)
                    .unwrap_or(false)
            };
            let waiters: Vec<TransactionId> = state
                .requests
                .iter()
                .filter(|r| !r.granted && active(r.txn_id))
                .map(|r| r.txn_id)
                .collect();
            let holders: Vec<TransactionId> = state
                .requests
                .iter()
                .filter(|r| r.granted && active(r.txn_id))
                .map(|r| r.txn_id)
                .collect();
            for &waiter in &waiters {
                for &holder in &holders {
                    if waiter != holder {
                        graph.entry(waiter).or_default().insert(holder);
                    }
                }
            }
        }
        graph
    }

    /// Depth-first search in ascending transaction order; returns the first
    /// cycle found as the list of transactions on it.
    fn find_cycle(
        graph: &BTreeMap<TransactionId, BTreeSet<TransactionId>>,
    ) -> Option<Vec<TransactionId>> {
        fn dfs(
            graph: &BTreeMap<TransactionId, BTreeSet<TransactionId>>,
            node: TransactionId,
            path: &mut Vec<TransactionId>,
            visited: &mut BTreeSet<TransactionId>,
        ) -> Option<Vec<TransactionId>> {
            if let Some(pos) = path.iter().position(|&n| n == node) {
                return Some(path[pos..].to_vec());
            }
            if !visited.insert(node) {
                return None;
            }
            path.push(node);
            if let Some(neighbors) = graph.get(&node) {
                for &next in neighbors {
                    if let Some(cycle) = dfs(graph, next, path, visited) {
                        return Some(cycle);
                    }
                }
            }
            path.pop();
            None
        }

        let mut visited = BTreeSet::new();
        for &start in graph.keys() {
            let mut path = Vec::new();
            if let Some(cycle) = dfs(graph, start, &mut path, &mut visited) {
                return Some(cycle);
            }
        }
        None
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn manager() -> Arc<LockManager> {
        Arc::new(LockManager::new(LockManagerConfig::default()))
    }

    fn txn(id: TransactionId, isolation: IsolationLevel) -> Arc<Transaction> {
        Arc::new(Transaction::new(id, isolation))
    }

    #[test]
    fn shared_locks_are_compatible() {
        let lm = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let t2 = txn(2, IsolationLevel::RepeatableRead);

        assert!(lm.lock_table(&t1, LockMode::Shared, 1).unwrap());
        assert!(lm.lock_table(&t2, LockMode::Shared, 1).unwrap());
        assert!(t1.is_table_shared_locked(1));
        assert!(t2.is_table_shared_locked(1));

        lm.unlock_table(&t1, 1).unwrap();
        lm.unlock_table(&t2, 1).unwrap();
    }

    #[test]
    fn same_mode_request_is_idempotent() {
        let lm = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        assert!(lm.lock_table(&t1, LockMode::IntentionShared, 1).unwrap());
        assert!(lm.lock_table(&t1, LockMode::IntentionShared, 1).unwrap());
        lm.unlock_table(&t1, 1).unwrap();
        // The second request did not enqueue a second entry.
        assert!(matches!(
            lm.unlock_table(&t1, 1),
            Err(GraniteError::TransactionAbort {
                reason: AbortReason::AttemptedUnlockButNoLockHeld,
                ..
            })
        ));
    }

    #[test]
    fn exclusive_waits_for_shared() {
        let lm = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let t2 = txn(2, IsolationLevel::RepeatableRead);

        assert!(lm.lock_table(&t1, LockMode::Shared, 7).unwrap());

        let acquired = Arc::new(AtomicBool::new(false));
        let acquired_clone = acquired.clone();
        let lm_clone = lm.clone();
        let t2_clone = t2.clone();
        let handle = thread::spawn(move || {
            let ok = lm_clone.lock_table(&t2_clone, LockMode::Exclusive, 7).unwrap();
            acquired_clone.store(ok, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(30));
        assert!(!acquired.load(Ordering::SeqCst));

        lm.unlock_table(&t1, 7).unwrap();
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert!(t2.is_table_exclusive_locked(7));
    }

    #[test]
    fn upgrade_waits_for_conflicting_peers_then_wins() {
        let lm = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let t2 = txn(2, IsolationLevel::RepeatableRead);

        assert!(lm.lock_table(&t1, LockMode::Shared, 3).unwrap());
        assert!(lm.lock_table(&t2, LockMode::Shared, 3).unwrap());

        let upgraded = Arc::new(AtomicBool::new(false));
        let upgraded_clone = upgraded.clone();
        let lm_clone = lm.clone();
        let t1_clone = t1.clone();
        let handle = thread::spawn(move || {
            let ok = lm_clone.lock_table(&t1_clone, LockMode::Exclusive, 3).unwrap();
            upgraded_clone.store(ok, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(30));
        assert!(!upgraded.load(Ordering::SeqCst));

        lm.unlock_table(&t2, 3).unwrap();
        handle.join().unwrap();
        assert!(upgraded.load(Ordering::SeqCst));
        assert!(t1.is_table_exclusive_locked(3));
        assert!(!t1.is_table_shared_locked(3));
    }

    #[test]
    fn concurrent_upgrade_conflicts_and_first_upgrader_wins() {
        let lm = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let t2 = txn(2, IsolationLevel::RepeatableRead);

        assert!(lm.lock_table(&t1, LockMode::Shared, 9).unwrap());
        assert!(lm.lock_table(&t2, LockMode::Shared, 9).unwrap());

        // T1 starts an upgrade and blocks on T2's shared lock.
        let lm_clone = lm.clone();
        let t1_clone = t1.clone();
        let handle =
            thread::spawn(move || lm_clone.lock_table(&t1_clone, LockMode::Exclusive, 9).unwrap());
        thread::sleep(Duration::from_millis(30));

        // T2's own upgrade hits the occupied upgrade slot and aborts.
        let err = lm.lock_table(&t2, LockMode::Exclusive, 9).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::UpgradeConflict));
        assert_eq!(t2.state(), TransactionState::Aborted);

        // Releasing the aborted transaction's locks unblocks T1's upgrade.
        lm.release_all(&t2);
        assert!(handle.join().unwrap());
        assert!(t1.is_table_exclusive_locked(9));
    }

    #[test]
    fn illegal_upgrade_aborts() {
        let lm = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        assert!(lm.lock_table(&t1, LockMode::Exclusive, 2).unwrap());
        let err = lm.lock_table(&t1, LockMode::Shared, 2).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::IncompatibleUpgrade));
    }

    #[test]
    fn read_uncommitted_rejects_shared() {
        let lm = manager();
        let t1 = txn(1, IsolationLevel::ReadUncommitted);
        let err = lm.lock_table(&t1, LockMode::Shared, 5).unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(AbortReason::LockSharedOnReadUncommitted)
        );
        assert_eq!(t1.state(), TransactionState::Aborted);
    }

    #[test]
    fn shrinking_rejects_new_locks_under_repeatable_read() {
        let lm = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);

        assert!(lm.lock_table(&t1, LockMode::Shared, 1).unwrap());
        lm.unlock_table(&t1, 1).unwrap();
        assert_eq!(t1.state(), TransactionState::Shrinking);

        let err = lm.lock_table(&t1, LockMode::Shared, 2).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::LockOnShrinking));
    }

    #[test]
    fn read_committed_may_reacquire_shared_while_shrinking() {
        let lm = manager();
        let t1 = txn(1, IsolationLevel::ReadCommitted);

        assert!(lm.lock_table(&t1, LockMode::Exclusive, 1).unwrap());
        lm.unlock_table(&t1, 1).unwrap();
        assert_eq!(t1.state(), TransactionState::Shrinking);

        // S and IS stay admissible, stronger modes do not.
        assert!(lm.lock_table(&t1, LockMode::Shared, 2).unwrap());
        let err = lm.lock_table(&t1, LockMode::IntentionExclusive, 3).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::LockOnShrinking));
    }

    #[test]
    fn unlock_without_lock_aborts() {
        let lm = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let err = lm.unlock_table(&t1, 4).unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(AbortReason::AttemptedUnlockButNoLockHeld)
        );
    }

    #[test]
    fn table_must_outlive_its_row_locks() {
        let lm = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let rid = RecordId::new(1, 1);

        assert!(lm.lock_table(&t1, LockMode::IntentionExclusive, 6).unwrap());
        assert!(lm.lock_row(&t1, LockMode::Exclusive, 6, rid).unwrap());

        let err = lm.unlock_table(&t1, 6).unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(AbortReason::TableUnlockedBeforeUnlockingRows)
        );
    }

    #[test]
    fn row_locks_require_coarser_table_lock() {
        let lm = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let rid = RecordId::new(1, 1);

        let err = lm.lock_row(&t1, LockMode::Shared, 8, rid).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::TableLockNotPresent));

        let t2 = txn(2, IsolationLevel::RepeatableRead);
        assert!(lm.lock_table(&t2, LockMode::IntentionShared, 8).unwrap());
        // IS is not strong enough for an exclusive row lock.
        let err = lm.lock_row(&t2, LockMode::Exclusive, 8, rid).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::TableLockNotPresent));
    }

    #[test]
    fn intention_locks_are_rejected_on_rows() {
        let lm = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let rid = RecordId::new(1, 1);
        let err = lm
            .lock_row(&t1, LockMode::IntentionShared, 1, rid)
            .unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(AbortReason::AttemptedIntentionLockOnRow)
        );
    }

    #[test]
    fn forced_row_unlock_keeps_growing() {
        let lm = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let rid = RecordId::new(2, 0);

        assert!(lm.lock_table(&t1, LockMode::IntentionShared, 5).unwrap());
        assert!(lm.lock_row(&t1, LockMode::Shared, 5, rid).unwrap());
        lm.unlock_row(&t1, 5, rid, true).unwrap();
        assert_eq!(t1.state(), TransactionState::Growing);

        // A plain shared-row unlock under repeatable-read shrinks.
        assert!(lm.lock_row(&t1, LockMode::Shared, 5, rid).unwrap());
        lm.unlock_row(&t1, 5, rid, false).unwrap();
        assert_eq!(t1.state(), TransactionState::Shrinking);
    }

    #[test]
    fn row_upgrade_shared_to_exclusive() {
        let lm = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let rid = RecordId::new(3, 3);

        assert!(lm.lock_table(&t1, LockMode::IntentionExclusive, 5).unwrap());
        assert!(lm.lock_row(&t1, LockMode::Shared, 5, rid).unwrap());
        assert!(lm.lock_row(&t1, LockMode::Exclusive, 5, rid).unwrap());
        assert!(t1.is_row_exclusive_locked(5, rid));
        assert!(!t1.is_row_shared_locked(5, rid));
    }
}
