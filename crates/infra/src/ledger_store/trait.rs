use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use finapi_core::{AccountId, ExpectedVersion, OperationId};
use finapi_ledger::{NewOperation, OperationRecord};

/// An operation ready to be appended to its account stream (not yet
/// assigned a sequence number).
///
/// `expected_version` is the version of the account stream the operation was
/// decided against. The store rejects the append if the stream moved since.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    pub operation: NewOperation,
    pub expected_version: ExpectedVersion,
}

impl PendingOperation {
    pub fn new(operation: NewOperation, expected_version: ExpectedVersion) -> Self {
        Self {
            operation,
            expected_version,
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.operation.account_id
    }

    pub fn operation_id(&self) -> OperationId {
        self.operation.id
    }
}

/// Ledger store operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to
/// domain errors (validation, funds).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A stream moved past the expected version; nothing was written.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("operation {operation_id} not found for account {account_id}")]
    NotFound {
        account_id: AccountId,
        operation_id: OperationId,
    },

    /// The backend refused the row (unknown account, duplicate id, check constraint).
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The commit was attempted but its outcome is unknown.
    #[error("commit outcome unknown: {0}")]
    Indeterminate(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Whether the same request may succeed if retried later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Concurrency(_) | StoreError::Indeterminate(_) | StoreError::Backend(_)
        )
    }
}

/// Append-only, account-keyed operation store.
///
/// ## Append Semantics
///
/// `append_all()`:
/// - checks every entry's `expected_version` against its stream *before* the batch
/// - assigns sequence numbers (current version + 1, +2, ... per account)
/// - persists the whole batch atomically (all or nothing)
///
/// The store does not check that accounts exist; that is the engine's job
/// (a relational backend may still refuse unknown accounts through a foreign key).
///
/// ## Load Semantics
///
/// `list_by_account()` returns the stream oldest first, or an empty vector for
/// an account with no records. `get()` only finds a record under its own account.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a batch of operations atomically.
    async fn append_all(
        &self,
        batch: Vec<PendingOperation>,
    ) -> Result<Vec<OperationRecord>, StoreError>;

    /// Append a single operation.
    async fn append(&self, pending: PendingOperation) -> Result<OperationRecord, StoreError> {
        let mut committed = self.append_all(vec![pending]).await?;
        committed
            .pop()
            .ok_or_else(|| StoreError::InvalidAppend("store committed no record".to_string()))
    }

    /// Load the full stream of an account in creation order.
    async fn list_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<OperationRecord>, StoreError>;

    /// Load one record of an account.
    async fn get(
        &self,
        account_id: AccountId,
        operation_id: OperationId,
    ) -> Result<OperationRecord, StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn append_all(
        &self,
        batch: Vec<PendingOperation>,
    ) -> Result<Vec<OperationRecord>, StoreError> {
        (**self).append_all(batch).await
    }

    async fn list_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<OperationRecord>, StoreError> {
        (**self).list_by_account(account_id).await
    }

    async fn get(
        &self,
        account_id: AccountId,
        operation_id: OperationId,
    ) -> Result<OperationRecord, StoreError> {
        (**self).get(account_id, operation_id).await
    }
}

/// Stream version of a loaded history (0 for an empty stream).
pub fn stream_version(stream: &[OperationRecord]) -> u64 {
    stream.last().map(|r| r.sequence_number).unwrap_or(0)
}

/// Check a batch against the stream versions it was decided on.
///
/// `current` resolves an account's version before the batch. Shared by the
/// backends so both reject the same batches.
pub(crate) fn check_expectations(
    batch: &[PendingOperation],
    mut current: impl FnMut(AccountId) -> u64,
) -> Result<(), StoreError> {
    for (idx, pending) in batch.iter().enumerate() {
        let actual = current(pending.account_id());
        if !pending.expected_version.matches(actual) {
            return Err(StoreError::Concurrency(format!(
                "account {} expected {:?}, found {actual} (index {idx})",
                pending.account_id(),
                pending.expected_version
            )));
        }
    }

    for (idx, pending) in batch.iter().enumerate() {
        if batch[..idx]
            .iter()
            .any(|earlier| earlier.operation_id() == pending.operation_id())
        {
            return Err(StoreError::InvalidAppend(format!(
                "batch contains operation {} twice",
                pending.operation_id()
            )));
        }
    }

    Ok(())
}
