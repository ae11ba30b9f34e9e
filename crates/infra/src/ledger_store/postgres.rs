//! Postgres-backed ledger store implementation.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation on `(account_id, sequence_number)`) | `23505` | `Concurrency` | Another writer appended to the stream first |
//! | Database (other unique violation) | `23505` | `ConstraintViolation` | Duplicate operation id |
//! | Database (foreign key violation) | `23503` | `ConstraintViolation` | Account does not exist in `users` |
//! | Database (check constraint violation) | `23514` | `ConstraintViolation` | Invalid amount / kind / sequence |
//! | Database (serialization failure / deadlock) | `40001` / `40P01` | `Concurrency` | Transaction aborted, nothing written |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | Commit without a database answer | N/A | `Indeterminate` | Connection lost during `COMMIT` |
//! | Other | N/A | `Backend` | Network errors, pool closed, etc. |

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use finapi_core::{AccountId, Amount, OperationId, TransferId};
use finapi_ledger::{OperationKind, OperationRecord};

use super::r#trait::{LedgerStore, PendingOperation, StoreError, check_expectations};

/// Name of the unique constraint that serializes appends per account.
const SEQUENCE_CONSTRAINT: &str = "statements_account_sequence_key";

/// DDL for the operations table. Requires a `users(id uuid)` table.
pub const STATEMENTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS statements (
    id              UUID        PRIMARY KEY,
    account_id      UUID        NOT NULL REFERENCES users(id),
    sequence_number BIGINT      NOT NULL CHECK (sequence_number > 0),
    kind            TEXT        NOT NULL
        CHECK (kind IN ('deposit', 'withdraw', 'transfer_out', 'transfer_in')),
    amount          BIGINT      NOT NULL CHECK (amount > 0),
    description     TEXT        NOT NULL,
    counterparty_id UUID        NULL,
    transfer_id     UUID        NULL,
    created_at      TIMESTAMPTZ NOT NULL,
    CONSTRAINT statements_account_sequence_key UNIQUE (account_id, sequence_number)
)
"#;

/// Postgres-backed append-only ledger store.
///
/// `append_all()` runs in one transaction:
/// 1. read each touched stream's version (`MAX(sequence_number)`)
/// 2. validate every `expected_version`
/// 3. insert all rows
/// 4. commit
///
/// If another transaction commits between steps 1 and 3, the unique constraint
/// on `(account_id, sequence_number)` fails the insert and the whole batch
/// rolls back, surfacing as `StoreError::Concurrency`.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `statements` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(STATEMENTS_SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        pending: PendingOperation,
        sequence_number: u64,
    ) -> Result<OperationRecord, StoreError> {
        let op = pending.operation;
        let seq = i64::try_from(sequence_number)
            .map_err(|_| StoreError::InvalidAppend("sequence_number out of range".to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO statements (
                id,
                account_id,
                sequence_number,
                kind,
                amount,
                description,
                counterparty_id,
                transfer_id,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(op.id.as_uuid())
        .bind(op.account_id.as_uuid())
        .bind(seq)
        .bind(op.kind.as_str())
        .bind(op.amount.minor_units())
        .bind(&op.description)
        .bind(op.counterparty.map(uuid::Uuid::from))
        .bind(op.transfer_id.map(uuid::Uuid::from))
        .bind(op.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_statement", e))?;

        Ok(op.into_record(sequence_number))
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(
        skip(self, batch),
        fields(batch_len = batch.len(), committed = tracing::field::Empty),
        err
    )]
    async fn append_all(
        &self,
        batch: Vec<PendingOperation>,
    ) -> Result<Vec<OperationRecord>, StoreError> {
        if batch.is_empty() {
            return Ok(vec![]);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut versions: HashMap<AccountId, u64> = HashMap::new();
        for pending in &batch {
            let account_id = pending.account_id();
            if !versions.contains_key(&account_id) {
                let current = current_version(&mut tx, account_id).await?;
                versions.insert(account_id, current);
            }
        }

        if let Err(err) = check_expectations(&batch, |id| versions.get(&id).copied().unwrap_or(0)) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(err);
        }

        // Dropping `tx` on an insert error rolls the batch back.
        let mut committed = Vec::with_capacity(batch.len());
        for pending in batch {
            let next = versions.entry(pending.account_id()).or_insert(0);
            *next += 1;
            let sequence_number = *next;
            committed.push(Self::insert(&mut tx, pending, sequence_number).await?);
        }

        tx.commit().await.map_err(map_commit_error)?;

        Span::current().record("committed", committed.len());
        Ok(committed)
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn list_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<OperationRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id,
                account_id,
                sequence_number,
                kind,
                amount,
                description,
                counterparty_id,
                transfer_id,
                created_at
            FROM statements
            WHERE account_id = $1
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(account_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_account", e))?;

        rows.iter().map(record_from_row).collect()
    }

    #[instrument(skip(self), fields(account_id = %account_id, operation_id = %operation_id), err)]
    async fn get(
        &self,
        account_id: AccountId,
        operation_id: OperationId,
    ) -> Result<OperationRecord, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                id,
                account_id,
                sequence_number,
                kind,
                amount,
                description,
                counterparty_id,
                transfer_id,
                created_at
            FROM statements
            WHERE account_id = $1 AND id = $2
            "#,
        )
        .bind(account_id.as_uuid())
        .bind(operation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_statement", e))?;

        match row {
            Some(row) => record_from_row(&row),
            None => Err(StoreError::NotFound {
                account_id,
                operation_id,
            }),
        }
    }
}

/// Current version of one account stream inside the transaction (0 if empty).
async fn current_version(
    tx: &mut Transaction<'_, Postgres>,
    account_id: AccountId,
) -> Result<u64, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(MAX(sequence_number), 0) AS current_version
        FROM statements
        WHERE account_id = $1
        "#,
    )
    .bind(account_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("current_version", e))?;

    let version: i64 = row
        .try_get("current_version")
        .map_err(|e| StoreError::Backend(format!("failed to read current_version: {e}")))?;
    Ok(version.max(0) as u64)
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<OperationRecord, StoreError> {
    fn column<'r, T>(row: &'r sqlx::postgres::PgRow, name: &str) -> Result<T, StoreError>
    where
        T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
    {
        row.try_get(name)
            .map_err(|e| StoreError::Backend(format!("failed to read column {name}: {e}")))
    }

    let sequence_number: i64 = column(row, "sequence_number")?;
    let kind: String = column(row, "kind")?;
    let amount: i64 = column(row, "amount")?;
    let counterparty: Option<uuid::Uuid> = column(row, "counterparty_id")?;
    let transfer_id: Option<uuid::Uuid> = column(row, "transfer_id")?;
    let created_at: DateTime<Utc> = column(row, "created_at")?;

    Ok(OperationRecord {
        id: OperationId::from_uuid(column(row, "id")?),
        account_id: AccountId::from_uuid(column(row, "account_id")?),
        sequence_number: u64::try_from(sequence_number)
            .map_err(|_| StoreError::Backend(format!("negative sequence_number {sequence_number}")))?,
        kind: kind
            .parse::<OperationKind>()
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        amount: Amount::new(amount).map_err(|e| StoreError::Backend(e.to_string()))?,
        description: column(row, "description")?,
        counterparty: counterparty.map(AccountId::from_uuid),
        transfer_id: transfer_id.map(TransferId::from_uuid),
        created_at,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") if db_err.constraint() == Some(SEQUENCE_CONSTRAINT) => {
                    StoreError::Concurrency(msg)
                }
                Some("23505") | Some("23503") | Some("23514") => {
                    StoreError::ConstraintViolation(msg)
                }
                Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            StoreError::Backend(format!("unexpected row not found in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// A commit that got a definite answer from the database is mapped like any
/// other statement; anything else leaves the outcome unknown.
fn map_commit_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(_) => map_sqlx_error("commit_transaction", err),
        other => StoreError::Indeterminate(format!("commit_transaction: {other}")),
    }
}
