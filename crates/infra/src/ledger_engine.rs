//! Ledger engine (application-level orchestration).
//!
//! The engine is the only component that creates operation records. Every
//! write follows the same pipeline:
//!
//! ```text
//! request
//!   ↓
//! 1. Resolve account(s) through the directory
//!   ↓
//! 2. Lock the account stream(s) (bounded wait)
//!   ↓
//! 3. Load full history, rehydrate `AccountLedger`, derive balance
//!   ↓
//! 4. Decide the new operation(s) (pure rules: funds, overflow)
//!   ↓
//! 5. Append atomically with `ExpectedVersion::Exact(version read in 3)`
//!   ↓
//! 6. On optimistic conflict, go back to 3 (bounded attempts)
//! ```
//!
//! The lock serializes writers inside this process; the version check
//! catches writers in other processes that share the store. A conflict means
//! the store wrote nothing, so re-running steps 3–5 cannot double-apply.
//!
//! ## Cancellation
//!
//! Dropping an engine future never leaves half a transfer behind: the batch
//! is a single store call. When the store cannot tell whether its commit
//! landed (`StoreError::Indeterminate`), the engine looks the records up by id
//! and only reports success if they are there.

use std::future::Future;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use finapi_core::{AccountId, Amount, DomainError, ExpectedVersion, OperationId};
use finapi_ledger::{AccountLedger, OperationKind, OperationRecord};

use crate::accounts::{AccountDirectory, AccountProfile, DirectoryError};
use crate::config::LedgerConfig;
use crate::ledger_store::{LedgerStore, PendingOperation, StoreError};
use crate::locks::{AccountGuard, AccountLocks};

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors surfaced by the engine to the request-handling layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("recipient account {0} not found")]
    RecipientNotFound(AccountId),

    #[error("insufficient funds on account {account_id}: available {available}, requested {requested}")]
    InsufficientFunds {
        account_id: AccountId,
        available: i64,
        requested: i64,
    },

    #[error("operation {operation_id} not found for account {account_id}")]
    OperationNotFound {
        account_id: AccountId,
        operation_id: OperationId,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    /// Stored history breaks a ledger invariant (foreign or unordered records).
    #[error("ledger invariant violated: {0}")]
    Invariant(String),

    /// The account lock could not be taken in time.
    #[error("account {0} is busy")]
    Busy(AccountId),

    /// Optimistic retries were exhausted.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error(transparent)]
    Directory(DirectoryError),

    #[error(transparent)]
    Store(StoreError),
}

impl LedgerError {
    /// Map a decision-rule failure on `account_id`.
    pub fn from_domain(account_id: AccountId, err: DomainError) -> Self {
        match err {
            DomainError::InsufficientFunds {
                available,
                requested,
            } => LedgerError::InsufficientFunds {
                account_id,
                available,
                requested,
            },
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                LedgerError::Validation(msg)
            }
            DomainError::InvariantViolation(msg) => LedgerError::Invariant(msg),
        }
    }

    /// Errors caused by the request itself; retrying unchanged will not help.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LedgerError::AccountNotFound(_)
                | LedgerError::RecipientNotFound(_)
                | LedgerError::InsufficientFunds { .. }
                | LedgerError::OperationNotFound { .. }
                | LedgerError::Validation(_)
        )
    }

    /// Errors where the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Busy(_) | LedgerError::Conflict(_) => true,
            LedgerError::Directory(DirectoryError::Unavailable(_)) => true,
            LedgerError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        LedgerError::Store(value)
    }
}

/// Balance and full history of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountStatement {
    pub account_id: AccountId,
    pub balance: i64,
    /// Oldest first.
    pub operations: Vec<OperationRecord>,
}

/// Validated creation of deposits, withdrawals and transfers.
///
/// - `S`: ledger store (in-memory, Postgres, ...)
/// - `D`: account directory provided by user management
#[derive(Debug)]
pub struct LedgerEngine<S, D> {
    store: S,
    directory: D,
    locks: AccountLocks,
    config: LedgerConfig,
}

impl<S, D> LedgerEngine<S, D> {
    pub fn new(store: S, directory: D, config: LedgerConfig) -> Self {
        Self {
            store,
            directory,
            locks: AccountLocks::new(),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, D> LedgerEngine<S, D>
where
    S: LedgerStore,
    D: AccountDirectory,
{
    /// Credit `amount` to an account.
    #[instrument(skip(self, description), fields(account_id = %account_id, amount = %amount), err)]
    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: Amount,
        description: impl Into<String>,
    ) -> LedgerResult<OperationRecord> {
        let description = description.into();
        self.resolve(account_id).await?;
        let _guard = self.lock(&[account_id]).await?;

        let description = description.as_str();
        let committed = self
            .commit_with_retry(|| async move {
                let ledger = self.load_ledger(account_id).await?;
                let op = ledger
                    .decide_deposit(amount, description, Utc::now())
                    .map_err(|e| LedgerError::from_domain(account_id, e))?;
                Ok(vec![PendingOperation::new(
                    op,
                    ExpectedVersion::Exact(ledger.version()),
                )])
            })
            .await?;

        let record = single(committed)?;
        tracing::info!(operation_id = %record.id, "deposit recorded");
        Ok(record)
    }

    /// Debit `amount` from an account if its balance covers it.
    #[instrument(skip(self, description), fields(account_id = %account_id, amount = %amount), err)]
    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount: Amount,
        description: impl Into<String>,
    ) -> LedgerResult<OperationRecord> {
        let description = description.into();
        self.resolve(account_id).await?;
        let _guard = self.lock(&[account_id]).await?;

        let description = description.as_str();
        let committed = self
            .commit_with_retry(|| async move {
                let ledger = self.load_ledger(account_id).await?;
                let op = ledger
                    .decide_withdrawal(amount, description, Utc::now())
                    .map_err(|e| reject(account_id, e))?;
                Ok(vec![PendingOperation::new(
                    op,
                    ExpectedVersion::Exact(ledger.version()),
                )])
            })
            .await?;

        let record = single(committed)?;
        tracing::info!(operation_id = %record.id, "withdrawal recorded");
        Ok(record)
    }

    /// Move `amount` from `source` to `recipient`.
    ///
    /// Both legs are appended in one atomic batch: the `TransferIn` on the
    /// recipient (description annotated with the sender's name) and the
    /// `TransferOut` on the source. Returns the source-side record.
    #[instrument(
        skip(self, description),
        fields(source = %source, recipient = %recipient, amount = %amount),
        err
    )]
    pub async fn transfer(
        &self,
        source: AccountId,
        recipient: AccountId,
        amount: Amount,
        description: impl Into<String>,
    ) -> LedgerResult<OperationRecord> {
        let description = description.into();
        let sender = self.resolve(source).await?;
        if source == recipient {
            return Err(LedgerError::Validation(
                "cannot transfer to the same account".to_string(),
            ));
        }
        match self.directory.resolve_account(recipient).await {
            Ok(_) => {}
            Err(DirectoryError::NotFound(_)) => {
                return Err(LedgerError::RecipientNotFound(recipient));
            }
            Err(err) => return Err(LedgerError::Directory(err)),
        }

        let _guard = self.lock(&[source, recipient]).await?;

        let sender_name = sender.display_name.as_str();
        let description = description.as_str();
        let committed = self
            .commit_with_retry(|| async move {
                let sender_ledger = self.load_ledger(source).await?;
                let recipient_ledger = self.load_ledger(recipient).await?;
                let legs = sender_ledger
                    .decide_transfer(
                        &recipient_ledger,
                        sender_name,
                        amount,
                        description,
                        Utc::now(),
                    )
                    .map_err(|e| reject(source, e))?;
                Ok(vec![
                    PendingOperation::new(
                        legs.incoming,
                        ExpectedVersion::Exact(recipient_ledger.version()),
                    ),
                    PendingOperation::new(
                        legs.outgoing,
                        ExpectedVersion::Exact(sender_ledger.version()),
                    ),
                ])
            })
            .await?;

        let outgoing = committed
            .into_iter()
            .find(|r| r.kind == OperationKind::TransferOut && r.account_id == source)
            .ok_or_else(|| {
                LedgerError::Store(StoreError::InvalidAppend(
                    "transfer batch committed without its outgoing leg".to_string(),
                ))
            })?;

        tracing::info!(
            operation_id = %outgoing.id,
            transfer_id = ?outgoing.transfer_id,
            "transfer recorded"
        );
        Ok(outgoing)
    }

    /// Current balance and chronological history of an account.
    #[instrument(skip(self), fields(account_id = %account_id), err)]
    pub async fn get_balance(&self, account_id: AccountId) -> LedgerResult<AccountStatement> {
        self.resolve(account_id).await?;

        let operations = self.store.list_by_account(account_id).await?;
        let ledger = AccountLedger::from_history(account_id, &operations)
            .map_err(|e| LedgerError::from_domain(account_id, e))?;

        Ok(AccountStatement {
            account_id,
            balance: ledger.balance(),
            operations,
        })
    }

    /// One record of an account. Records of other accounts are not visible.
    #[instrument(skip(self), fields(account_id = %account_id, operation_id = %operation_id), err)]
    pub async fn get_operation(
        &self,
        account_id: AccountId,
        operation_id: OperationId,
    ) -> LedgerResult<OperationRecord> {
        self.resolve(account_id).await?;

        match self.store.get(account_id, operation_id).await {
            Ok(record) => Ok(record),
            Err(StoreError::NotFound { .. }) => Err(LedgerError::OperationNotFound {
                account_id,
                operation_id,
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn resolve(&self, account_id: AccountId) -> LedgerResult<AccountProfile> {
        self.directory
            .resolve_account(account_id)
            .await
            .map_err(|err| match err {
                DirectoryError::NotFound(id) => LedgerError::AccountNotFound(id),
                other => LedgerError::Directory(other),
            })
    }

    async fn lock(&self, accounts: &[AccountId]) -> LedgerResult<AccountGuard> {
        self.locks
            .acquire(accounts, self.config.lock_timeout)
            .await
            .map_err(|account_id| {
                tracing::warn!(account_id = %account_id, timeout = ?self.config.lock_timeout, "account lock timed out");
                LedgerError::Busy(account_id)
            })
    }

    async fn load_ledger(&self, account_id: AccountId) -> LedgerResult<AccountLedger> {
        let history = self.store.list_by_account(account_id).await?;
        AccountLedger::from_history(account_id, &history)
            .map_err(|e| LedgerError::from_domain(account_id, e))
    }

    /// Run plan-then-append until it commits, fails for a non-conflict
    /// reason, or runs out of attempts.
    async fn commit_with_retry<F, Fut>(&self, mut plan: F) -> LedgerResult<Vec<OperationRecord>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LedgerResult<Vec<PendingOperation>>>,
    {
        let attempts = self.config.max_append_attempts.max(1);
        let mut last_conflict = String::new();

        for attempt in 1..=attempts {
            let batch = plan().await?;
            match self.append_confirmed(batch).await {
                Ok(committed) => return Ok(committed),
                Err(StoreError::Concurrency(msg)) => {
                    tracing::warn!(attempt, max_attempts = attempts, reason = %msg, "append conflict; retrying");
                    last_conflict = msg;
                }
                Err(err) => {
                    tracing::error!(error = %err, "append failed");
                    return Err(err.into());
                }
            }
        }

        Err(LedgerError::Conflict(format!(
            "gave up after {attempts} attempts: {last_conflict}"
        )))
    }

    /// Append a batch; resolve an unknown commit outcome by reading back.
    async fn append_confirmed(
        &self,
        batch: Vec<PendingOperation>,
    ) -> Result<Vec<OperationRecord>, StoreError> {
        let keys: Vec<(AccountId, OperationId)> = batch
            .iter()
            .map(|p| (p.account_id(), p.operation_id()))
            .collect();

        match self.store.append_all(batch).await {
            Err(StoreError::Indeterminate(msg)) => {
                tracing::warn!(reason = %msg, "commit outcome unknown; reading back");
                let mut committed = Vec::with_capacity(keys.len());
                for (account_id, operation_id) in keys {
                    match self.store.get(account_id, operation_id).await {
                        Ok(record) => committed.push(record),
                        Err(_) => return Err(StoreError::Indeterminate(msg)),
                    }
                }
                Ok(committed)
            }
            other => other,
        }
    }
}

/// Like `LedgerError::from_domain`, logging funds rejections.
fn reject(account_id: AccountId, err: DomainError) -> LedgerError {
    let err = LedgerError::from_domain(account_id, err);
    if let LedgerError::InsufficientFunds {
        available,
        requested,
        ..
    } = &err
    {
        tracing::info!(available, requested, "debit rejected: insufficient funds");
    }
    err
}

fn single(committed: Vec<OperationRecord>) -> LedgerResult<OperationRecord> {
    let n = committed.len();
    let mut records = committed.into_iter();
    match (records.next(), n) {
        (Some(record), 1) => Ok(record),
        _ => Err(LedgerError::Store(StoreError::InvalidAppend(format!(
            "expected one committed record, store returned {n}"
        )))),
    }
}
