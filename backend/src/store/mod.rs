//! Storage abstraction for the ledger
//!
//! Every posting runs inside one [`StoreTx`]. Rows read with a `lock_*` method
//! stay locked until the transaction commits or is dropped; dropping a
//! transaction without committing discards all of its writes.
//!
//! Read models go through the non-locking reads on [`LedgerStore`], which see
//! committed state only and never wait on an open posting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use shared::{
    EntryFilter, LedgerReference, Pagination, PositionFilter, PositionKey, Reservation,
    ReservationStatus, StockLedgerEntry, StockPosition, StockTransfer, TransferStatus,
};

use crate::error::AppResult;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Source of ledger transactions
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a new unit of work
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>>;

    /// Connectivity check used by the health endpoint
    async fn ping(&self) -> bool;

    async fn find_position(&self, key: &PositionKey) -> AppResult<Option<StockPosition>>;

    async fn positions(&self, filter: &PositionFilter) -> AppResult<Vec<StockPosition>>;

    /// Entries in append order, one page of them when `page` is set
    async fn entries(
        &self,
        filter: &EntryFilter,
        page: Option<&Pagination>,
    ) -> AppResult<Vec<StockLedgerEntry>>;

    async fn find_reservation(&self, id: Uuid) -> AppResult<Option<Reservation>>;

    /// Reservations oldest first
    async fn reservations(&self, filter: &ReservationFilter) -> AppResult<Vec<Reservation>>;

    async fn find_transfer(&self, id: Uuid) -> AppResult<Option<StockTransfer>>;

    /// Transfers newest first
    async fn transfers(&self, status: Option<TransferStatus>) -> AppResult<Vec<StockTransfer>>;
}

/// Filter for reservation listings
#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    pub status: Option<ReservationStatus>,
    pub created_before: Option<DateTime<Utc>>,
    pub reference: Option<LedgerReference>,
}

impl ReservationFilter {
    pub fn matches(&self, reservation: &Reservation) -> bool {
        self.status.map_or(true, |s| reservation.status == s)
            && self
                .created_before
                .map_or(true, |before| reservation.created_at <= before)
            && self
                .reference
                .map_or(true, |r| reservation.reference == Some(r))
    }
}

/// One atomic unit of work against the ledger tables
#[async_trait]
pub trait StoreTx: Send {
    /// Read a position and hold its row lock until commit
    async fn lock_position(&mut self, key: &PositionKey) -> AppResult<Option<StockPosition>>;

    /// Lock a position, creating an empty one first when none exists, so the
    /// lock always covers a real row
    async fn lock_or_create_position(&mut self, key: &PositionKey) -> AppResult<StockPosition>;

    /// Insert or update a position
    async fn save_position(&mut self, position: &StockPosition) -> AppResult<()>;

    async fn delete_position(&mut self, key: &PositionKey) -> AppResult<()>;

    async fn list_positions(&mut self, filter: &PositionFilter) -> AppResult<Vec<StockPosition>>;

    /// Append an entry; the store assigns its sequence number
    async fn append_entry(&mut self, entry: StockLedgerEntry) -> AppResult<StockLedgerEntry>;

    /// Entries in append order
    async fn list_entries(&mut self, filter: &EntryFilter) -> AppResult<Vec<StockLedgerEntry>>;

    async fn insert_reservation(&mut self, reservation: &Reservation) -> AppResult<()>;

    async fn lock_reservation(&mut self, id: Uuid) -> AppResult<Option<Reservation>>;

    async fn update_reservation(&mut self, reservation: &Reservation) -> AppResult<()>;

    async fn insert_transfer(&mut self, transfer: &StockTransfer) -> AppResult<()>;

    /// Read a transfer with its items and hold its row lock until commit
    async fn lock_transfer(&mut self, id: Uuid) -> AppResult<Option<StockTransfer>>;

    /// Persist a transfer header and replace its items
    async fn update_transfer(&mut self, transfer: &StockTransfer) -> AppResult<()>;

    /// Mark a document as posted. Returns `false` when it already was.
    async fn claim_posting(&mut self, document: LedgerReference, actor_id: Uuid) -> AppResult<bool>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}
