use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use finapi_core::{AccountId, Amount, DomainError, OperationId, TransferId};

/// Kind of ledger entry. The sign of an amount is implied by the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    #[serde(rename = "deposit")]
    Deposit,
    #[serde(rename = "withdraw")]
    Withdrawal,
    /// Debit leg of a transfer (on the sender's stream).
    #[serde(rename = "transfer_out")]
    TransferOut,
    /// Credit leg of a transfer (on the recipient's stream).
    #[serde(rename = "transfer_in")]
    TransferIn,
}

impl OperationKind {
    /// `true` for kinds that increase the balance.
    pub fn is_credit(self) -> bool {
        matches!(self, OperationKind::Deposit | OperationKind::TransferIn)
    }

    /// Stable storage name (matches the serde representation).
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Deposit => "deposit",
            OperationKind::Withdrawal => "withdraw",
            OperationKind::TransferOut => "transfer_out",
            OperationKind::TransferIn => "transfer_in",
        }
    }
}

impl core::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OperationKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(OperationKind::Deposit),
            "withdraw" => Ok(OperationKind::Withdrawal),
            "transfer_out" => Ok(OperationKind::TransferOut),
            "transfer_in" => Ok(OperationKind::TransferIn),
            other => Err(DomainError::validation(format!(
                "unknown operation kind '{other}'"
            ))),
        }
    }
}

/// An operation decided by the account rules, not yet assigned a position
/// in its account stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOperation {
    pub id: OperationId,
    pub account_id: AccountId,
    pub kind: OperationKind,
    pub amount: Amount,
    pub description: String,
    /// The other account of a transfer leg.
    pub counterparty: Option<AccountId>,
    pub transfer_id: Option<TransferId>,
    pub created_at: DateTime<Utc>,
}

impl NewOperation {
    /// Seal the operation at its stream position.
    pub fn into_record(self, sequence_number: u64) -> OperationRecord {
        OperationRecord {
            id: self.id,
            account_id: self.account_id,
            sequence_number,
            kind: self.kind,
            amount: self.amount,
            description: self.description,
            counterparty: self.counterparty,
            transfer_id: self.transfer_id,
            created_at: self.created_at,
        }
    }
}

/// One immutable ledger entry as persisted.
///
/// Records are never updated or deleted; an account's history is the
/// ordered sequence of its records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: OperationId,
    pub account_id: AccountId,

    /// Position in the account stream (1-based, gap-free).
    pub sequence_number: u64,

    pub kind: OperationKind,
    pub amount: Amount,
    pub description: String,
    pub counterparty: Option<AccountId>,
    pub transfer_id: Option<TransferId>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip_through_from_str() {
        for kind in [
            OperationKind::Deposit,
            OperationKind::Withdrawal,
            OperationKind::TransferOut,
            OperationKind::TransferIn,
        ] {
            assert_eq!(kind.as_str().parse::<OperationKind>(), Ok(kind));
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::Value::String(kind.as_str().to_string())
            );
        }
        assert!("refund".parse::<OperationKind>().is_err());
    }

    #[test]
    fn only_deposits_and_incoming_transfers_are_credits() {
        assert!(OperationKind::Deposit.is_credit());
        assert!(OperationKind::TransferIn.is_credit());
        assert!(!OperationKind::Withdrawal.is_credit());
        assert!(!OperationKind::TransferOut.is_credit());
    }

    #[test]
    fn into_record_keeps_every_field() {
        let new = NewOperation {
            id: OperationId::new(),
            account_id: AccountId::new(),
            kind: OperationKind::Deposit,
            amount: Amount::new(250).unwrap(),
            description: "salary".to_string(),
            counterparty: None,
            transfer_id: None,
            created_at: Utc::now(),
        };

        let record = new.clone().into_record(7);
        assert_eq!(record.id, new.id);
        assert_eq!(record.account_id, new.account_id);
        assert_eq!(record.sequence_number, 7);
        assert_eq!(record.amount, new.amount);
        assert_eq!(record.description, "salary");
        assert_eq!(record.created_at, new.created_at);
    }
}
