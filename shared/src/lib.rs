//! Shared types and models for the stock ledger
//!
//! This crate holds the pure ledger rules: position math, ledger replay,
//! the transfer state machine and input validation. It performs no I/O so
//! that every rule can be exercised without a database.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
