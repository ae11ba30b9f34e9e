//! Append-only ledger store boundary.
//!
//! This module defines an infrastructure-facing abstraction for storing and
//! loading per-account operation streams, plus its in-memory and Postgres
//! backends.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use r#trait::{LedgerStore, PendingOperation, StoreError, stream_version};
