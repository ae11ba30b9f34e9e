//! Balance calculator.
//!
//! Balances are never stored: they are folded from an account's full record
//! history every time they are needed.

use crate::operation::OperationRecord;

/// Signed contribution of one record to its account balance.
pub fn signed_amount(record: &OperationRecord) -> i128 {
    let amount = record.amount.minor_units() as i128;
    if record.kind.is_credit() { amount } else { -amount }
}

/// Current balance of an account given its records.
///
/// Credits minus debits. An empty history has balance 0. Histories written
/// through the engine always fit in `i64`; anything else saturates.
pub fn compute_balance(records: &[OperationRecord]) -> i64 {
    let total: i128 = records.iter().map(signed_amount).sum();
    i64::try_from(total).unwrap_or(if total > 0 { i64::MAX } else { i64::MIN })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{NewOperation, OperationKind};
    use chrono::Utc;
    use finapi_core::{AccountId, Amount, OperationId};
    use proptest::prelude::*;

    fn record(account_id: AccountId, seq: u64, kind: OperationKind, amount: i64) -> OperationRecord {
        NewOperation {
            id: OperationId::new(),
            account_id,
            kind,
            amount: Amount::new(amount).unwrap(),
            description: String::new(),
            counterparty: None,
            transfer_id: None,
            created_at: Utc::now(),
        }
        .into_record(seq)
    }

    #[test]
    fn empty_history_has_zero_balance() {
        assert_eq!(compute_balance(&[]), 0);
    }

    #[test]
    fn credits_add_and_debits_subtract() {
        let account = AccountId::new();
        let records = vec![
            record(account, 1, OperationKind::Deposit, 100),
            record(account, 2, OperationKind::TransferIn, 40),
            record(account, 3, OperationKind::Withdrawal, 30),
            record(account, 4, OperationKind::TransferOut, 25),
        ];
        assert_eq!(compute_balance(&records), 85);
    }

    #[test]
    fn out_of_band_overflow_saturates() {
        let account = AccountId::new();
        let records = vec![
            record(account, 1, OperationKind::Deposit, i64::MAX),
            record(account, 2, OperationKind::Deposit, i64::MAX),
        ];
        assert_eq!(compute_balance(&records), i64::MAX);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: when no withdrawal exceeds the running balance, the final
        /// balance is exactly sum(deposits) - sum(withdrawals).
        #[test]
        fn balance_equals_deposits_minus_withdrawals(
            steps in prop::collection::vec((any::<bool>(), 1i64..1_000_000i64), 0..40)
        ) {
            let account = AccountId::new();
            let mut records = Vec::new();
            let mut running: i64 = 0;
            let mut deposits: i64 = 0;
            let mut withdrawals: i64 = 0;

            for (is_deposit, amount) in steps {
                let seq = records.len() as u64 + 1;
                if is_deposit {
                    records.push(record(account, seq, OperationKind::Deposit, amount));
                    running += amount;
                    deposits += amount;
                } else if amount <= running {
                    records.push(record(account, seq, OperationKind::Withdrawal, amount));
                    running -= amount;
                    withdrawals += amount;
                }
            }

            prop_assert_eq!(compute_balance(&records), deposits - withdrawals);
            prop_assert!(compute_balance(&records) >= 0);
        }
    }
}
