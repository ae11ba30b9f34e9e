use chrono::{DateTime, Utc};

use finapi_core::{AccountId, Amount, DomainError, DomainResult, OperationId, TransferId};

use crate::balance::compute_balance;
use crate::operation::{NewOperation, OperationKind, OperationRecord};

/// Rehydrated view of one account stream: identity, stream version and the
/// balance derived from the full history.
///
/// This is the decision point for every new operation. It holds no records
/// itself; callers rebuild it from the store for each request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountLedger {
    account_id: AccountId,
    version: u64,
    balance: i64,
}

/// The two records produced by one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLegs {
    /// Credit on the recipient's stream.
    pub incoming: NewOperation,
    /// Debit on the sender's stream.
    pub outgoing: NewOperation,
}

impl AccountLedger {
    /// Empty stream (no operations yet).
    pub fn empty(account_id: AccountId) -> Self {
        Self {
            account_id,
            version: 0,
            balance: 0,
        }
    }

    /// Rebuild state from an account's history (oldest first).
    ///
    /// Rejects histories that mix accounts or whose sequence numbers are not
    /// strictly increasing.
    pub fn from_history(account_id: AccountId, history: &[OperationRecord]) -> DomainResult<Self> {
        let mut last = 0u64;
        for (idx, record) in history.iter().enumerate() {
            if record.account_id != account_id {
                return Err(DomainError::invariant(format!(
                    "history for {account_id} contains a record of {} at index {idx}",
                    record.account_id
                )));
            }
            if record.sequence_number <= last {
                return Err(DomainError::invariant(format!(
                    "non-monotonic sequence_number in history (last={last}, found={})",
                    record.sequence_number
                )));
            }
            last = record.sequence_number;
        }

        Ok(Self {
            account_id,
            version: last,
            balance: compute_balance(history),
        })
    }

    /// Evolve state with a newly committed record of this account.
    pub fn apply(&mut self, record: &OperationRecord) {
        let amount = record.amount.minor_units();
        self.balance = if record.kind.is_credit() {
            self.balance.saturating_add(amount)
        } else {
            self.balance.saturating_sub(amount)
        };
        self.version = record.sequence_number;
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    /// Sequence number of the last applied record (0 when empty).
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn decide_deposit(
        &self,
        amount: Amount,
        description: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<NewOperation> {
        self.ensure_can_credit(amount)?;
        Ok(self.operation(OperationKind::Deposit, amount, description.into(), occurred_at))
    }

    pub fn decide_withdrawal(
        &self,
        amount: Amount,
        description: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<NewOperation> {
        self.ensure_can_debit(amount)?;
        Ok(self.operation(OperationKind::Withdrawal, amount, description.into(), occurred_at))
    }

    /// Decide both legs of a transfer from this account to `recipient`.
    ///
    /// The incoming leg's description is annotated with the sender's
    /// display name; the outgoing leg keeps the caller's description.
    pub fn decide_transfer(
        &self,
        recipient: &AccountLedger,
        sender_name: &str,
        amount: Amount,
        description: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<TransferLegs> {
        if recipient.account_id == self.account_id {
            return Err(DomainError::validation(
                "cannot transfer to the same account",
            ));
        }
        self.ensure_can_debit(amount)?;
        recipient.ensure_can_credit(amount)?;

        let description = description.into();
        let transfer_id = TransferId::new();

        let mut incoming = recipient.operation(
            OperationKind::TransferIn,
            amount,
            incoming_description(&description, sender_name),
            occurred_at,
        );
        incoming.counterparty = Some(self.account_id);
        incoming.transfer_id = Some(transfer_id);

        let mut outgoing = self.operation(OperationKind::TransferOut, amount, description, occurred_at);
        outgoing.counterparty = Some(recipient.account_id);
        outgoing.transfer_id = Some(transfer_id);

        Ok(TransferLegs { incoming, outgoing })
    }

    fn ensure_can_debit(&self, amount: Amount) -> DomainResult<()> {
        if self.balance < amount.minor_units() {
            return Err(DomainError::insufficient_funds(
                self.balance,
                amount.minor_units(),
            ));
        }
        Ok(())
    }

    fn ensure_can_credit(&self, amount: Amount) -> DomainResult<()> {
        if self.balance.checked_add(amount.minor_units()).is_none() {
            return Err(DomainError::validation("balance would overflow"));
        }
        Ok(())
    }

    fn operation(
        &self,
        kind: OperationKind,
        amount: Amount,
        description: String,
        occurred_at: DateTime<Utc>,
    ) -> NewOperation {
        NewOperation {
            id: OperationId::new(),
            account_id: self.account_id,
            kind,
            amount,
            description,
            counterparty: None,
            transfer_id: None,
            created_at: occurred_at,
        }
    }
}

fn incoming_description(description: &str, sender_name: &str) -> String {
    format!("{description}, \nDeposit from: {sender_name}")
}
