//! Ledger accounting module (append-only, per-account operation streams).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod account;
pub mod balance;
pub mod operation;

pub use account::{AccountLedger, TransferLegs};
pub use balance::{compute_balance, signed_amount};
pub use operation::{NewOperation, OperationKind, OperationRecord};
