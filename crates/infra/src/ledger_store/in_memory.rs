use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use finapi_core::{AccountId, OperationId};
use finapi_ledger::OperationRecord;

use super::r#trait::{
    LedgerStore, PendingOperation, StoreError, check_expectations, stream_version,
};

#[derive(Debug, Default)]
struct StoreState {
    streams: HashMap<AccountId, Vec<OperationRecord>>,
    index: HashMap<OperationId, (AccountId, usize)>,
}

/// In-memory append-only ledger store.
///
/// Intended for tests/dev and embedding. A batch is validated and applied
/// under one write guard, so readers never observe half of a transfer.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    inner: RwLock<StoreState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all accounts.
    pub fn operation_count(&self) -> Result<usize, StoreError> {
        let state = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(state.index.len())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn append_all(
        &self,
        batch: Vec<PendingOperation>,
    ) -> Result<Vec<OperationRecord>, StoreError> {
        if batch.is_empty() {
            return Ok(vec![]);
        }

        let mut state = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;

        check_expectations(&batch, |account_id| {
            state
                .streams
                .get(&account_id)
                .map(|s| stream_version(s))
                .unwrap_or(0)
        })?;

        if let Some(dup) = batch
            .iter()
            .find(|p| state.index.contains_key(&p.operation_id()))
        {
            return Err(StoreError::ConstraintViolation(format!(
                "operation {} already exists",
                dup.operation_id()
            )));
        }

        // Nothing below can fail: the batch is applied completely.
        let mut committed = Vec::with_capacity(batch.len());
        for pending in batch {
            let account_id = pending.account_id();
            let stream = state.streams.entry(account_id).or_default();
            let record = pending.operation.into_record(stream_version(stream) + 1);
            stream.push(record.clone());
            let position = stream.len() - 1;
            state.index.insert(record.id, (account_id, position));
            committed.push(record);
        }

        Ok(committed)
    }

    async fn list_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<OperationRecord>, StoreError> {
        let state = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(state.streams.get(&account_id).cloned().unwrap_or_default())
    }

    async fn get(
        &self,
        account_id: AccountId,
        operation_id: OperationId,
    ) -> Result<OperationRecord, StoreError> {
        let state = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;

        state
            .index
            .get(&operation_id)
            .filter(|(owner, _)| *owner == account_id)
            .and_then(|(owner, position)| state.streams.get(owner)?.get(*position))
            .cloned()
            .ok_or(StoreError::NotFound {
                account_id,
                operation_id,
            })
    }
}
