//! HTTP handlers for the stock ledger API

pub mod events;
pub mod health;
pub mod receipts;
pub mod reservations;
pub mod sales;
pub mod stock;
pub mod transfers;

pub use events::*;
pub use health::*;
pub use receipts::*;
pub use reservations::*;
pub use sales::*;
pub use stock::*;
pub use transfers::*;

use rust_decimal::Decimal;
use shared::{validate_non_negative, validate_positive_quantity};
use validator::ValidationError;

/// Request quantities are magnitudes that fit the stored scale
pub(crate) fn positive_quantity(value: &Decimal) -> Result<(), ValidationError> {
    validate_positive_quantity(*value).map_err(|_| ValidationError::new("positive_quantity"))
}

pub(crate) fn non_negative_quantity(value: &Decimal) -> Result<(), ValidationError> {
    validate_non_negative(*value).map_err(|_| ValidationError::new("non_negative_quantity"))
}
