//! In-process ledger store
//!
//! Used by tests and the `memory` backend setting. Write transactions are
//! serialized by a single writer gate, so concurrent postings behave like
//! row-locked postings do in Postgres, only at a coarser grain. A transaction
//! buffers its writes and applies them to the committed state on commit;
//! non-locking reads only ever see committed state.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use shared::{
    EntryFilter, LedgerReference, Pagination, PositionFilter, PositionKey, Reservation,
    StockLedgerEntry, StockPosition, StockTransfer, TransferStatus,
};

use super::{LedgerStore, ReservationFilter, StoreTx};
use crate::error::{AppError, AppResult};

#[derive(Debug, Default)]
struct MemoryState {
    positions: BTreeMap<PositionKey, StockPosition>,
    entries: Vec<StockLedgerEntry>,
    next_sequence: i64,
    reservations: HashMap<Uuid, Reservation>,
    transfers: HashMap<Uuid, StockTransfer>,
    postings: HashSet<LedgerReference>,
}

/// Writes buffered by an open transaction. A `None` position is a delete.
#[derive(Debug, Default)]
struct WriteSet {
    positions: BTreeMap<PositionKey, Option<StockPosition>>,
    entries: Vec<StockLedgerEntry>,
    reservations: HashMap<Uuid, Reservation>,
    transfers: HashMap<Uuid, StockTransfer>,
    postings: HashSet<LedgerReference>,
}

fn poisoned() -> AppError {
    AppError::Internal("memory store lock poisoned".to_string())
}

fn read_state(state: &RwLock<MemoryState>) -> AppResult<RwLockReadGuard<'_, MemoryState>> {
    state.read().map_err(|_| poisoned())
}

/// Ledger store kept entirely in memory
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    writer: Arc<Mutex<()>>,
    lock_timeout: Duration,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(5))
    }

    /// Store whose transactions give up with `Busy` after `lock_timeout`
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            writer: Arc::new(Mutex::new(())),
            lock_timeout,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let permit = tokio::time::timeout(self.lock_timeout, self.writer.clone().lock_owned())
            .await
            .map_err(|_| AppError::Busy("timed out waiting for stock lock".to_string()))?;
        Ok(Box::new(MemoryTx {
            _permit: permit,
            state: self.state.clone(),
            writes: WriteSet::default(),
        }))
    }

    async fn ping(&self) -> bool {
        self.state.read().is_ok()
    }

    async fn find_position(&self, key: &PositionKey) -> AppResult<Option<StockPosition>> {
        Ok(read_state(&self.state)?.positions.get(key).cloned())
    }

    async fn positions(&self, filter: &PositionFilter) -> AppResult<Vec<StockPosition>> {
        Ok(read_state(&self.state)?
            .positions
            .values()
            .filter(|p| filter.matches(&p.key))
            .cloned()
            .collect())
    }

    async fn entries(
        &self,
        filter: &EntryFilter,
        page: Option<&Pagination>,
    ) -> AppResult<Vec<StockLedgerEntry>> {
        let state = read_state(&self.state)?;
        let matching = state.entries.iter().filter(|e| filter.matches(e));
        Ok(match page {
            Some(page) => matching
                .skip(page.offset())
                .take(page.limit())
                .cloned()
                .collect(),
            None => matching.cloned().collect(),
        })
    }

    async fn find_reservation(&self, id: Uuid) -> AppResult<Option<Reservation>> {
        Ok(read_state(&self.state)?.reservations.get(&id).cloned())
    }

    async fn reservations(&self, filter: &ReservationFilter) -> AppResult<Vec<Reservation>> {
        let mut reservations: Vec<Reservation> = read_state(&self.state)?
            .reservations
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        reservations.sort_by_key(|r| r.created_at);
        Ok(reservations)
    }

    async fn find_transfer(&self, id: Uuid) -> AppResult<Option<StockTransfer>> {
        Ok(read_state(&self.state)?.transfers.get(&id).cloned())
    }

    async fn transfers(&self, status: Option<TransferStatus>) -> AppResult<Vec<StockTransfer>> {
        let mut transfers: Vec<StockTransfer> = read_state(&self.state)?
            .transfers
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        transfers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transfers)
    }
}

struct MemoryTx {
    _permit: OwnedMutexGuard<()>,
    state: Arc<RwLock<MemoryState>>,
    writes: WriteSet,
}

impl MemoryTx {
    fn position(&self, key: &PositionKey) -> AppResult<Option<StockPosition>> {
        match self.writes.positions.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => Ok(read_state(&self.state)?.positions.get(key).cloned()),
        }
    }

    fn reservation(&self, id: Uuid) -> AppResult<Option<Reservation>> {
        match self.writes.reservations.get(&id) {
            Some(pending) => Ok(Some(pending.clone())),
            None => Ok(read_state(&self.state)?.reservations.get(&id).cloned()),
        }
    }

    fn transfer(&self, id: Uuid) -> AppResult<Option<StockTransfer>> {
        match self.writes.transfers.get(&id) {
            Some(pending) => Ok(Some(pending.clone())),
            None => Ok(read_state(&self.state)?.transfers.get(&id).cloned()),
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_position(&mut self, key: &PositionKey) -> AppResult<Option<StockPosition>> {
        self.position(key)
    }

    async fn lock_or_create_position(&mut self, key: &PositionKey) -> AppResult<StockPosition> {
        Ok(self
            .position(key)?
            .unwrap_or_else(|| StockPosition::empty(key.clone(), Utc::now())))
    }

    async fn save_position(&mut self, position: &StockPosition) -> AppResult<()> {
        self.writes
            .positions
            .insert(position.key.clone(), Some(position.clone()));
        Ok(())
    }

    async fn delete_position(&mut self, key: &PositionKey) -> AppResult<()> {
        self.writes.positions.insert(key.clone(), None);
        Ok(())
    }

    async fn list_positions(&mut self, filter: &PositionFilter) -> AppResult<Vec<StockPosition>> {
        let mut merged: BTreeMap<PositionKey, StockPosition> = read_state(&self.state)?
            .positions
            .iter()
            .filter(|(key, _)| filter.matches(key))
            .map(|(key, position)| (key.clone(), position.clone()))
            .collect();
        for (key, pending) in &self.writes.positions {
            if !filter.matches(key) {
                continue;
            }
            match pending {
                Some(position) => merged.insert(key.clone(), position.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_values().collect())
    }

    async fn append_entry(&mut self, mut entry: StockLedgerEntry) -> AppResult<StockLedgerEntry> {
        let committed = read_state(&self.state)?.next_sequence;
        entry.sequence = committed + self.writes.entries.len() as i64 + 1;
        self.writes.entries.push(entry.clone());
        Ok(entry)
    }

    async fn list_entries(&mut self, filter: &EntryFilter) -> AppResult<Vec<StockLedgerEntry>> {
        let state = read_state(&self.state)?;
        Ok(state
            .entries
            .iter()
            .chain(self.writes.entries.iter())
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> AppResult<()> {
        self.writes
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn lock_reservation(&mut self, id: Uuid) -> AppResult<Option<Reservation>> {
        self.reservation(id)
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> AppResult<()> {
        if self.reservation(reservation.id)?.is_none() {
            return Err(AppError::not_found("Reservation"));
        }
        self.writes
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn insert_transfer(&mut self, transfer: &StockTransfer) -> AppResult<()> {
        self.writes.transfers.insert(transfer.id, transfer.clone());
        Ok(())
    }

    async fn lock_transfer(&mut self, id: Uuid) -> AppResult<Option<StockTransfer>> {
        self.transfer(id)
    }

    async fn update_transfer(&mut self, transfer: &StockTransfer) -> AppResult<()> {
        if self.transfer(transfer.id)?.is_none() {
            return Err(AppError::not_found("Stock transfer"));
        }
        self.writes.transfers.insert(transfer.id, transfer.clone());
        Ok(())
    }

    async fn claim_posting(&mut self, document: LedgerReference, _actor_id: Uuid) -> AppResult<bool> {
        if read_state(&self.state)?.postings.contains(&document) {
            return Ok(false);
        }
        Ok(self.writes.postings.insert(document))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTx {
            _permit,
            state,
            writes,
        } = *self;
        let mut state = state.write().map_err(|_| poisoned())?;

        for (key, pending) in writes.positions {
            match pending {
                Some(position) => state.positions.insert(key, position),
                None => state.positions.remove(&key),
            };
        }
        if let Some(last) = writes.entries.last() {
            state.next_sequence = last.sequence;
        }
        state.entries.extend(writes.entries);
        state.reservations.extend(writes.reservations);
        state.transfers.extend(writes.transfers);
        state.postings.extend(writes.postings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn key() -> PositionKey {
        PositionKey::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
    }

    fn entry(key: &PositionKey) -> StockLedgerEntry {
        StockLedgerEntry {
            id: Uuid::new_v4(),
            sequence: 0,
            key: key.clone(),
            zone_id: None,
            movement_type: shared::MovementType::In,
            direction: None,
            quantity: Decimal::ONE,
            unit_cost: None,
            balance_after: Decimal::ONE,
            reference: LedgerReference::manual(),
            actor_id: Uuid::nil(),
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        let key = key();

        {
            let mut tx = store.begin().await.unwrap();
            let mut position = StockPosition::empty(key.clone(), Utc::now());
            position.quantity = Decimal::from(5);
            tx.save_position(&position).await.unwrap();
            tx.append_entry(entry(&key)).await.unwrap();
        }

        assert!(store.find_position(&key).await.unwrap().is_none());
        assert!(store
            .entries(&EntryFilter::default(), None)
            .await
            .unwrap()
            .is_empty());
        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_position(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_persists_writes() {
        let store = MemoryStore::new();
        let key = key();

        let mut tx = store.begin().await.unwrap();
        tx.save_position(&StockPosition::empty(key.clone(), Utc::now()))
            .await
            .unwrap();
        assert!(tx
            .claim_posting(LedgerReference::sale(Uuid::new_v4()), Uuid::nil())
            .await
            .unwrap());
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_position(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_transaction_reads_its_own_writes() {
        let store = MemoryStore::new();
        let key = key();
        let mut committed = store.begin().await.unwrap();
        committed.append_entry(entry(&key)).await.unwrap();
        committed
            .save_position(&StockPosition::empty(key.clone(), Utc::now()))
            .await
            .unwrap();
        committed.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let second = tx.append_entry(entry(&key)).await.unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(
            tx.list_entries(&EntryFilter::for_position(&key))
                .await
                .unwrap()
                .len(),
            2
        );

        tx.delete_position(&key).await.unwrap();
        assert!(tx.lock_position(&key).await.unwrap().is_none());
        assert!(tx
            .list_positions(&PositionFilter::default())
            .await
            .unwrap()
            .is_empty());

        // Committed state is untouched until commit
        assert!(store.find_position(&key).await.unwrap().is_some());
        tx.commit().await.unwrap();
        assert!(store.find_position(&key).await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.append_entry(entry(&key)).await.unwrap().sequence, 3);
    }

    #[tokio::test]
    async fn test_reads_do_not_wait_for_open_transaction() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(20));
        let key = key();

        let mut held = store.begin().await.unwrap();
        held.save_position(&StockPosition::empty(key.clone(), Utc::now()))
            .await
            .unwrap();

        assert!(store.find_position(&key).await.unwrap().is_none());
        assert!(store
            .positions(&PositionFilter::default())
            .await
            .unwrap()
            .is_empty());
        assert!(store.begin().await.err().unwrap().is_retryable());
    }

    #[tokio::test]
    async fn test_entries_page() {
        let store = MemoryStore::new();
        let key = key();
        let mut tx = store.begin().await.unwrap();
        for _ in 0..5 {
            tx.append_entry(entry(&key)).await.unwrap();
        }
        tx.commit().await.unwrap();

        let page = Pagination {
            page: 2,
            per_page: 2,
        };
        let entries = store
            .entries(&EntryFilter::for_position(&key), Some(&page))
            .await
            .unwrap();
        let sequences: Vec<i64> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_begin_times_out_while_locked() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(20));
        let _held = store.begin().await.unwrap();

        let err = store.begin().await.err().unwrap();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_claim_posting_is_single_use() {
        let store = MemoryStore::new();
        let document = LedgerReference::purchase_receipt(Uuid::new_v4());

        let mut tx = store.begin().await.unwrap();
        assert!(tx.claim_posting(document, Uuid::nil()).await.unwrap());
        assert!(!tx.claim_posting(document, Uuid::nil()).await.unwrap());
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(!tx.claim_posting(document, Uuid::nil()).await.unwrap());
    }
}
