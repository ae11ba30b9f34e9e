//! Infrastructure layer: ledger storage backends, account directory, engine.

pub mod accounts;
pub mod bootstrap;
pub mod config;
pub mod ledger_engine;
pub mod ledger_store;
pub mod locks;

mod integration_tests;

pub use config::LedgerConfig;
pub use ledger_engine::{AccountStatement, LedgerEngine, LedgerError, LedgerResult};
