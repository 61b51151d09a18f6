use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::storage::index::BPlusTreeIndex;
use crate::storage::page::RecordId;
use crate::storage::table_heap::TableHeap;
use crate::transaction::{LockMode, TableOid, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Insert,
    Delete,
}

/// One undoable change to a table heap.
#[derive(Debug, Clone)]
pub struct TableWriteRecord {
    pub table: Arc<TableHeap>,
    pub rid: RecordId,
    pub wtype: WriteType,
}

/// One undoable change to an index.
#[derive(Debug, Clone)]
pub struct IndexWriteRecord {
    pub index: Arc<BPlusTreeIndex>,
    pub key: Vec<u8>,
    pub rid: RecordId,
    pub wtype: WriteType,
}

/// The five table-lock sets and two row-lock sets a transaction may hold,
/// mirroring the granted requests in the lock manager's queues.
#[derive(Debug, Default)]
struct HeldLocks {
    shared_tables: HashSet<TableOid>,
    exclusive_tables: HashSet<TableOid>,
    intention_shared_tables: HashSet<TableOid>,
    intention_exclusive_tables: HashSet<TableOid>,
    shared_intention_exclusive_tables: HashSet<TableOid>,
    shared_rows: HashMap<TableOid, HashSet<RecordId>>,
    exclusive_rows: HashMap<TableOid, HashSet<RecordId>>,
}

/// A client transaction. State and held-lock sets are mutated concurrently
/// by the owning thread, the lock manager, and the deadlock detector, so
/// both live behind the transaction's own mutexes.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    held_locks: Mutex<HeldLocks>,
    write_set: Mutex<Vec<TableWriteRecord>>,
    index_write_set: Mutex<Vec<IndexWriteRecord>>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            held_locks: Mutex::new(HeldLocks::default()),
            write_set: Mutex::new(Vec::new()),
            index_write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn append_table_write(&self, record: TableWriteRecord) {
        self.write_set.lock().push(record);
    }

    pub fn append_index_write(&self, record: IndexWriteRecord) {
        self.index_write_set.lock().push(record);
    }

    pub(crate) fn pop_table_write(&self) -> Option<TableWriteRecord> {
        self.write_set.lock().pop()
    }

    pub(crate) fn pop_index_write(&self) -> Option<IndexWriteRecord> {
        self.index_write_set.lock().pop()
    }

    pub(crate) fn clear_write_sets(&self) {
        self.write_set.lock().clear();
        self.index_write_set.lock().clear();
    }

    pub fn is_table_shared_locked(&self, oid: TableOid) -> bool {
        self.held_locks.lock().shared_tables.contains(&oid)
    }

    pub fn is_table_exclusive_locked(&self, oid: TableOid) -> bool {
        self.held_locks.lock().exclusive_tables.contains(&oid)
    }

    pub fn is_table_intention_shared_locked(&self, oid: TableOid) -> bool {
        self.held_locks.lock().intention_shared_tables.contains(&oid)
    }

    pub fn is_table_intention_exclusive_locked(&self, oid: TableOid) -> bool {
        self.held_locks.lock().intention_exclusive_tables.contains(&oid)
    }

    pub fn is_table_shared_intention_exclusive_locked(&self, oid: TableOid) -> bool {
        self.held_locks
            .lock()
            .shared_intention_exclusive_tables
            .contains(&oid)
    }

    pub fn is_row_shared_locked(&self, oid: TableOid, rid: RecordId) -> bool {
        self.held_locks
            .lock()
            .shared_rows
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
    }

    pub fn is_row_exclusive_locked(&self, oid: TableOid, rid: RecordId) -> bool {
        self.held_locks
            .lock()
            .exclusive_rows
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
    }

    /// Whether any row lock under this table is still held; tables must be
    /// unlocked last.
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        let held = self.held_locks.lock();
        held.shared_rows.get(&oid).is_some_and(|rows| !rows.is_empty())
            || held
                .exclusive_rows
                .get(&oid)
                .is_some_and(|rows| !rows.is_empty())
    }

    pub(crate) fn insert_table_lock(&self, mode: LockMode, oid: TableOid) {
        let mut held = self.held_locks.lock();
        match mode {
            LockMode::Shared => held.shared_tables.insert(oid),
            LockMode::Exclusive => held.exclusive_tables.insert(oid),
            LockMode::IntentionShared => held.intention_shared_tables.insert(oid),
            LockMode::IntentionExclusive => held.intention_exclusive_tables.insert(oid),
            LockMode::SharedIntentionExclusive => {
                held.shared_intention_exclusive_tables.insert(oid)
            }
        };
    }

    pub(crate) fn remove_table_lock(&self, mode: LockMode, oid: TableOid) {
        let mut held = self.held_locks.lock();
        match mode {
            LockMode::Shared => held.shared_tables.remove(&oid),
            LockMode::Exclusive => held.exclusive_tables.remove(&oid),
            LockMode::IntentionShared => held.intention_shared_tables.remove(&oid),
            LockMode::IntentionExclusive => held.intention_exclusive_tables.remove(&oid),
            LockMode::SharedIntentionExclusive => {
                held.shared_intention_exclusive_tables.remove(&oid)
            }
        };
    }

    pub(crate) fn insert_row_lock(&self, mode: LockMode, oid: TableOid, rid: RecordId) {
        let mut held = self.held_locks.lock();
        let rows = match mode {
            LockMode::Shared => &mut held.shared_rows,
            LockMode::Exclusive => &mut held.exclusive_rows,
            _ => unreachable!("intention locks are table-level only"),
        };
        rows.entry(oid).or_default().insert(rid);
    }

    pub(crate) fn remove_row_lock(&self, mode: LockMode, oid: TableOid, rid: RecordId) {
        let mut held = self.held_locks.lock();
        let rows = match mode {
            LockMode::Shared => &mut held.shared_rows,
            LockMode::Exclusive => &mut held.exclusive_rows,
            _ => unreachable!("intention locks are table-level only"),
        };
        if let Some(set) = rows.get_mut(&oid) {
            set.remove(&rid);
        }
    }

    /// Drain every held lock, sorted so release order is deterministic.
    /// Returns (table locks, row locks).
    pub(crate) fn take_held_locks(
        &self,
    ) -> (
        Vec<(TableOid, LockMode)>,
        Vec<(TableOid, RecordId, LockMode)>,
    ) {
        let mut held = self.held_locks.lock();
        let mut tables: Vec<(TableOid, LockMode)> = Vec::new();
        tables.extend(held.shared_tables.drain().map(|oid| (oid, LockMode::Shared)));
        tables.extend(
            held.exclusive_tables
                .drain()
                .map(|oid| (oid, LockMode::Exclusive)),
        );
        tables.extend(
            held.intention_shared_tables
                .drain()
                .map(|oid| (oid, LockMode::IntentionShared)),
        );
        tables.extend(
            held.intention_exclusive_tables
                .drain()
                .map(|oid| (oid, LockMode::IntentionExclusive)),
        );
        tables.extend(
            held.shared_intention_exclusive_tables
                .drain()
                .map(|oid| (oid, LockMode::SharedIntentionExclusive)),
        );
        tables.sort_by_key(|(oid, _)| *oid);

        let mut rows: Vec<(TableOid, RecordId, LockMode)> = Vec::new();
        for (oid, rids) in held.shared_rows.drain() {
            rows.extend(rids.into_iter().map(|rid| (oid, rid, LockMode::Shared)));
        }
        for (oid, rids) in held.exclusive_rows.drain() {
            rows.extend(rids.into_iter().map(|rid| (oid, rid, LockMode::Exclusive)));
        }
        rows.sort_by_key(|(oid, rid, _)| (*oid, *rid));

        (tables, rows)
    }
}
