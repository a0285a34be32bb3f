//! Domain models for the stock ledger

mod document;
mod reservation;
mod stock;
mod transfer;

pub use document::*;
pub use reservation::*;
pub use stock::*;
pub use transfer::*;
