//! `TransactionManager` (spec.md §4.3): isolates writes in private page
//! buffers and resolves reads with snapshot / read-your-own-writes
//! semantics.
//!
//! Grounded on the `engine::transaction_service` +
//! `transaction_monitor` pair (a monitor owning a table of live
//! transactions the service looks up by id) but without a
//! back-reference from a transaction object into its owning engine
//! (spec.md §9 REDESIGN FLAGS: "the transaction holds a non-owning handle
//! to the storage; the storage holds a map of transaction ids to buffers
//! keyed by id, not by pointer"). `Transaction` here is a plain `u64`
//! handle; all state lives in `TransactionManager`, looked up by id.
//!
//! The id itself comes from a dedicated monotonic counter, never from the
//! `Slab`'s own slot index (spec.md §4.3: "id = monotonically increasing
//! u64, never reused") — the `Slab` only stores live-transaction state and
//! frees its slot on commit/rollback, which would otherwise let a later
//! `begin()` reuse a freed slot's index as a transaction id.

use crate::engine::free_space_map::FreeSpaceMap;
use crate::engine::page_file::PageFile;
use crate::engine::wal::{WalIndex, WalLog};
use crate::{Error, Result};
use slab::Slab;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxStatus {
    Active,
    RollbackOnly,
    Committed,
    RolledBack,
}

struct TxState {
    status: Mutex<TxStatus>,
    dirty_pages: Mutex<HashMap<u32, Vec<u8>>>,
    allocated_pages: Mutex<HashSet<u32>>,
}

/// A lightweight handle to a live transaction. All mutable state is kept
/// in `TransactionManager`, keyed by `id()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    id: u64,
}

impl Transaction {
    pub fn id(&self) -> u64 {
        self.id
    }
}

pub(crate) struct TransactionManager {
    next_lsn: AtomicU64,
    /// The sole source of transaction ids. Never decremented or reused,
    /// unlike the `Slab` below whose slots free up on commit/rollback.
    next_tx_id: AtomicU64,
    /// Live transaction state, stored in a `Slab` for cheap insert/remove;
    /// looked up through `slots` rather than by slab index directly, so a
    /// freed slot being reused by a later `begin()` never resurfaces as a
    /// transaction id.
    active: RwLock<Slab<TxState>>,
    slots: RwLock<HashMap<u64, usize>>,
    /// The id of the most recently committed transaction, 0 if none yet.
    /// Surfaced to `FileHeader.last_tx_id` on the next header write.
    last_committed_tx_id: AtomicU64,
    commit_latch: Mutex<()>,
}

impl TransactionManager {
    pub fn new() -> Self {
        TransactionManager {
            next_lsn: AtomicU64::new(1),
            next_tx_id: AtomicU64::new(1),
            active: RwLock::new(Slab::new()),
            slots: RwLock::new(HashMap::new()),
            last_committed_tx_id: AtomicU64::new(0),
            commit_latch: Mutex::new(()),
        }
    }

    pub fn begin(&self) -> Transaction {
        let id = self.next_tx_id.fetch_add(1, Ordering::SeqCst);
        let slot = self.active.write().unwrap().insert(TxState {
            status: Mutex::new(TxStatus::Active),
            dirty_pages: Mutex::new(HashMap::new()),
            allocated_pages: Mutex::new(HashSet::new()),
        });
        self.slots.write().unwrap().insert(id, slot);
        Transaction { id }
    }

    /// The id of the most recently committed transaction, for persisting
    /// into `FileHeader.last_tx_id`.
    pub fn last_committed_tx_id(&self) -> u64 {
        self.last_committed_tx_id.load(Ordering::SeqCst)
    }

    fn with_state<T>(&self, tx_id: u64, f: impl FnOnce(&TxState) -> Result<T>) -> Result<T> {
        let slots = self.slots.read().unwrap();
        let slot = *slots
            .get(&tx_id)
            .ok_or_else(|| Error::other(format!("unknown transaction {tx_id}")))?;
        let guard = self.active.read().unwrap();
        let state = guard
            .get(slot)
            .ok_or_else(|| Error::other(format!("unknown transaction {tx_id}")))?;
        f(state)
    }

    fn remove_slot(&self, tx_id: u64) {
        if let Some(slot) = self.slots.write().unwrap().remove(&tx_id) {
            self.active.write().unwrap().try_remove(slot);
        }
    }

    /// Buffers a page image in the transaction's private map; idempotent
    /// per (pageId, txId) (spec.md §4.3).
    pub fn write_page(&self, tx_id: u64, page_id: u32, bytes: Vec<u8>) -> Result<()> {
        self.with_state(tx_id, |state| {
            if *state.status.lock().unwrap() != TxStatus::Active {
                return Err(Error::transaction_aborted("write on non-active transaction"));
            }
            state.dirty_pages.lock().unwrap().insert(page_id, bytes);
            Ok(())
        })
    }

    pub fn note_allocated_page(&self, tx_id: u64, page_id: u32) -> Result<()> {
        self.with_state(tx_id, |state| {
            state.allocated_pages.lock().unwrap().insert(page_id);
            Ok(())
        })
    }

    /// Resolution order (spec.md §4.3): (1) the transaction's own buffer,
    /// (2) the WAL index's latest committed offset (as long as the
    /// committer is not this same transaction, which cannot currently
    /// happen since a tx's own writes are only in its buffer until
    /// commit), (3) the mapped page file.
    pub fn read_page(
        &self,
        tx_id: Option<u64>,
        page_id: u32,
        wal_index: &WalIndex,
        wal: &WalLog,
        page_file: &PageFile,
    ) -> Result<Vec<u8>> {
        if let Some(tx_id) = tx_id {
            let found = self.with_state(tx_id, |state| {
                Ok(state.dirty_pages.lock().unwrap().get(&page_id).cloned())
            })?;
            if let Some(bytes) = found {
                return Ok(bytes);
            }
        }
        if let Some(offset) = wal_index.find_latest(page_id) {
            return wal.read_at(offset);
        }
        page_file.read_page_positional(page_id)
    }

    /// Commits under the exclusive commit latch: appends every dirty page
    /// as one atomic WAL group, updates the WAL index, clears the
    /// transaction's buffers (spec.md §4.3).
    pub fn commit(&self, tx_id: u64, wal: &WalLog) -> Result<()> {
        let _latch = self.commit_latch.lock().unwrap();
        let pages: Vec<(u32, Vec<u8>)> = self.with_state(tx_id, |state| {
            let status = *state.status.lock().unwrap();
            if status == TxStatus::RollbackOnly {
                return Err(Error::transaction_aborted(
                    "transaction marked rollback-only by a cancelled write",
                ));
            }
            if status != TxStatus::Active {
                return Err(Error::other(format!("transaction {tx_id} is not active")));
            }
            Ok(state
                .dirty_pages
                .lock()
                .unwrap()
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect())
        })?;

        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        if !pages.is_empty() {
            wal.append_commit_group(lsn, tx_id, &pages)?;
        }

        self.with_state(tx_id, |state| {
            *state.status.lock().unwrap() = TxStatus::Committed;
            state.dirty_pages.lock().unwrap().clear();
            Ok(())
        })?;
        self.last_committed_tx_id.store(tx_id, Ordering::SeqCst);
        self.remove_slot(tx_id);
        Ok(())
    }

    /// Discards buffers and returns allocated-but-uncommitted pages to the
    /// free-space map (spec.md §4.3).
    pub fn rollback(&self, tx_id: u64, free_space_map: &FreeSpaceMap) -> Result<()> {
        let allocated: Vec<u32> = self.with_state(tx_id, |state| {
            *state.status.lock().unwrap() = TxStatus::RolledBack;
            state.dirty_pages.lock().unwrap().clear();
            Ok(state.allocated_pages.lock().unwrap().drain().collect())
        })?;
        for page_id in allocated {
            free_space_map.push_free_page(page_id);
        }
        self.remove_slot(tx_id);
        Ok(())
    }

    /// Runs `f` while holding the exclusive commit latch, so no commit can
    /// interleave with it. Used by the checkpointer to snapshot the WAL,
    /// drain it into the page file and truncate it as one atomic step
    /// (spec.md §4.9).
    pub fn run_with_commit_latch<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _latch = self.commit_latch.lock().unwrap();
        f()
    }

    /// Marks a transaction so that a subsequent `commit` refuses instead
    /// of appending a possibly-partial write (spec.md §4.3 cancellation:
    /// "leaves it in a Rollback-Only state that the next commit refuses").
    pub fn mark_rollback_only(&self, tx_id: u64) -> Result<()> {
        self.with_state(tx_id, |state| {
            *state.status.lock().unwrap() = TxStatus::RollbackOnly;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_assigns_increasing_ids() {
        let mgr = TransactionManager::new();
        let a = mgr.begin();
        let b = mgr.begin();
        assert!(b.id() > a.id());
    }

    #[test]
    fn write_then_read_is_read_your_own_write() {
        let mgr = TransactionManager::new();
        let tx = mgr.begin();
        mgr.write_page(tx.id(), 3, vec![0xAA; 4]).unwrap();
        let found = mgr
            .with_state(tx.id(), |s| Ok(s.dirty_pages.lock().unwrap().get(&3).cloned()))
            .unwrap();
        assert_eq!(found, Some(vec![0xAA; 4]));
    }

    #[test]
    fn committed_transaction_ids_are_never_reused() {
        let mgr = TransactionManager::new();
        let wal = crate::engine::wal::WalLog::create_new(
            Box::new(crate::engine::page_file::test_support::MemBacking::new()),
            64,
            crate::FsyncPolicy::Group,
        )
        .unwrap();

        let a = mgr.begin();
        mgr.commit(a.id(), &wal).unwrap();
        assert_eq!(mgr.last_committed_tx_id(), a.id());

        let b = mgr.begin();
        assert!(b.id() > a.id(), "a fresh begin() must never reuse a freed slab slot's id");

        let c = mgr.begin();
        assert!(c.id() > b.id());
        assert_ne!(c.id(), a.id());
    }

    #[test]
    fn rollback_frees_allocated_pages() {
        let mgr = TransactionManager::new();
        let fsm = FreeSpaceMap::new(4096);
        let tx = mgr.begin();
        mgr.note_allocated_page(tx.id(), 9).unwrap();
        mgr.rollback(tx.id(), &fsm).unwrap();
        assert_eq!(fsm.take_free_page(), Some(9));
    }
}
