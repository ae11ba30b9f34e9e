//! Wiring of the Postgres-backed engine from `LedgerConfig`.

use sqlx::PgPool;
use thiserror::Error;

use crate::accounts::{DirectoryError, PostgresAccountDirectory};
use crate::config::LedgerConfig;
use crate::ledger_engine::LedgerEngine;
use crate::ledger_store::{PostgresLedgerStore, StoreError};

pub type PostgresLedgerEngine = LedgerEngine<PostgresLedgerStore, PostgresAccountDirectory>;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,

    #[error("failed to connect to postgres: {0}")]
    Connect(#[from] sqlx::Error),

    #[error("failed to prepare users table: {0}")]
    Directory(#[from] DirectoryError),

    #[error("failed to prepare statements table: {0}")]
    Store(#[from] StoreError),
}

/// Connect to `config.database_url`, create missing tables, build the engine.
///
/// `users` is created before `statements`, which references it.
pub async fn connect_postgres(config: LedgerConfig) -> Result<PostgresLedgerEngine, BootstrapError> {
    let database_url = config
        .database_url
        .as_deref()
        .ok_or(BootstrapError::MissingDatabaseUrl)?;

    let pool = PgPool::connect(database_url).await?;

    let directory = PostgresAccountDirectory::new(pool.clone());
    directory.ensure_schema().await?;
    let store = PostgresLedgerStore::new(pool);
    store.ensure_schema().await?;

    log_ready(&config);
    Ok(LedgerEngine::new(store, directory, config))
}

fn log_ready(config: &LedgerConfig) {
    tracing::info!(
        max_append_attempts = config.max_append_attempts,
        lock_timeout = ?config.lock_timeout,
        "postgres ledger ready"
    );
}
