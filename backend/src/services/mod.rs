//! Ledger services
//!
//! Every service is a thin handle over the shared [`LedgerStore`]; one call is
//! one transaction.
//!
//! [`LedgerStore`]: crate::store::LedgerStore

pub mod consumption;
pub mod events;
pub mod ledger;
pub mod receiving;
pub mod reservation;
pub mod retry;
pub mod transfer;

pub use consumption::ConsumptionWorkflow;
pub use events::{EventDispatcher, EventOutcome};
pub use ledger::{AdjustmentInput, LedgerEntryDraft, StockLevelsInput, StockLedger};
pub use receiving::ReceivingWorkflow;
pub use reservation::{ConsumedReservation, ReservationManager, ReserveInput};
pub use retry::{retry_busy, RetryPolicy};
pub use transfer::{CreateTransferInput, TransferItemInput, TransferWorkflow};
