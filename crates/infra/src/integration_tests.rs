//! Integration tests for the full ledger pipeline.
//!
//! Tests: Engine → AccountLocks → LedgerStore → AccountLedger rehydration
//!
//! Verifies:
//! - Balances always equal the sum over the recorded history
//! - Concurrent debits never overdraw an account
//! - Transfers conserve money, also next to deposits and withdrawals, and
//!   never deadlock
//! - Records are only visible under their own account

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use finapi_core::{AccountId, Amount};
    use finapi_ledger::{OperationKind, OperationRecord, compute_balance};

    use crate::accounts::InMemoryAccountDirectory;
    use crate::config::LedgerConfig;
    use crate::ledger_engine::{LedgerEngine, LedgerError};
    use crate::ledger_store::{InMemoryLedgerStore, LedgerStore};

    type Engine = LedgerEngine<Arc<InMemoryLedgerStore>, Arc<InMemoryAccountDirectory>>;

    fn amount(n: i64) -> Amount {
        Amount::new(n).unwrap()
    }

    fn setup() -> (Arc<Engine>, Arc<InMemoryAccountDirectory>) {
        finapi_observability::init_with_filter("warn");
        let directory = Arc::new(InMemoryAccountDirectory::new());
        let engine = LedgerEngine::new(
            Arc::new(InMemoryLedgerStore::new()),
            directory.clone(),
            LedgerConfig::default(),
        );
        (Arc::new(engine), directory)
    }

    async fn assert_balance_matches_history(engine: &Engine, account: AccountId) -> i64 {
        let statement = engine.get_balance(account).await.unwrap();
        assert_eq!(statement.balance, compute_balance(&statement.operations));
        let history = engine.store().list_by_account(account).await.unwrap();
        assert_eq!(history, statement.operations);
        statement.balance
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failed_withdrawal_changes_nothing() {
        let (engine, directory) = setup();
        let account = directory.register("Alice").unwrap().id;

        engine.deposit(account, amount(100), "salary").await.unwrap();
        engine.withdraw(account, amount(50), "rent").await.unwrap();
        let before = engine.get_balance(account).await.unwrap();

        let err = engine.withdraw(account, amount(60), "tv").await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { available: 50, requested: 60, .. }));

        let after = engine.get_balance(account).await.unwrap();
        assert_eq!(after, before);
        assert_eq!(assert_balance_matches_history(&engine, account).await, 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn transfer_records_are_linked_across_accounts() {
        let (engine, directory) = setup();
        let a = directory.register("Alice").unwrap().id;
        let b = directory.register("Bob").unwrap().id;
        engine.deposit(a, amount(50), "opening").await.unwrap();

        let out = engine.transfer(a, b, amount(30), "dinner").await.unwrap();

        let incoming = engine
            .get_balance(b)
            .await
            .unwrap()
            .operations
            .into_iter()
            .find(|r| r.transfer_id == out.transfer_id)
            .unwrap();
        assert_eq!(incoming.kind, OperationKind::TransferIn);
        assert_eq!(incoming.counterparty, Some(a));
        assert_eq!(incoming.description, "dinner, \nDeposit from: Alice");

        // Each leg is only reachable under its own account.
        assert_eq!(engine.get_operation(a, out.id).await.unwrap(), out);
        assert_eq!(engine.get_operation(b, incoming.id).await.unwrap(), incoming);
        assert!(matches!(
            engine.get_operation(b, out.id).await.unwrap_err(),
            LedgerError::OperationNotFound { .. }
        ));
        assert!(matches!(
            engine.get_operation(a, incoming.id).await.unwrap_err(),
            LedgerError::OperationNotFound { .. }
        ));

        assert_eq!(assert_balance_matches_history(&engine, a).await, 20);
        assert_eq!(assert_balance_matches_history(&engine, b).await, 30);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_withdrawals_never_overdraw() {
        const N: i64 = 16;
        let (engine, directory) = setup();
        let account = directory.register("Alice").unwrap().id;
        engine.deposit(account, amount(N - 1), "opening").await.unwrap();

        let handles: Vec<_> = (0..N)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine.withdraw(account, amount(1), format!("w{i}")).await
                })
            })
            .collect();

        let mut ok = 0;
        let mut insufficient = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(LedgerError::InsufficientFunds { .. }) => insufficient += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(ok, N - 1);
        assert_eq!(insufficient, 1);
        assert_eq!(assert_balance_matches_history(&engine, account).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_transfers_conserve_money() {
        let (engine, directory) = setup();
        let accounts: Vec<AccountId> = ["A", "B", "C", "D"]
            .iter()
            .map(|name| directory.register(*name).unwrap().id)
            .collect();
        for account in &accounts {
            engine.deposit(*account, amount(1_000), "opening").await.unwrap();
        }
        let total_before = 4 * 1_000;

        let mut handles = Vec::new();
        for i in 0..64usize {
            let engine = engine.clone();
            let from = accounts[i % 4];
            let to = accounts[(i + 1 + i / 4) % 4];
            if from == to {
                continue;
            }
            handles.push(tokio::spawn(async move {
                engine
                    .transfer(from, to, amount((i as i64 % 50) + 1), "split")
                    .await
            }));
        }

        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) | Err(LedgerError::InsufficientFunds { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        let mut total_after = 0;
        for account in &accounts {
            let balance = assert_balance_matches_history(&engine, *account).await;
            assert!(balance >= 0);
            total_after += balance;
        }
        assert_eq!(total_after, total_before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn transfers_conserve_money_alongside_deposits_and_withdrawals() {
        let (engine, directory) = setup();
        let a = directory.register("Alice").unwrap().id;
        let b = directory.register("Bob").unwrap().id;
        engine.deposit(a, amount(100), "opening").await.unwrap();
        engine.deposit(b, amount(100), "opening").await.unwrap();

        // Each task returns the money it moved in or out of the A+B pair.
        let mut handles = Vec::new();
        for i in 0..80i64 {
            let engine = engine.clone();
            let (own, other) = if i % 2 == 0 { (a, b) } else { (b, a) };
            handles.push(tokio::spawn(async move {
                let n = (i % 9) + 1;
                let result = match i % 4 {
                    0 | 1 => engine.transfer(own, other, amount(n), "split").await.map(|_| 0),
                    2 => engine.deposit(own, amount(n), "top-up").await.map(|_| n),
                    _ => engine.withdraw(own, amount(n), "cash").await.map(|_| -n),
                };
                match result {
                    Ok(delta) => delta,
                    Err(LedgerError::InsufficientFunds { .. }) => 0,
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }));
        }

        let mut external = 0;
        for handle in handles {
            external += handle.await.unwrap();
        }

        let a_balance = assert_balance_matches_history(&engine, a).await;
        let b_balance = assert_balance_matches_history(&engine, b).await;
        assert!(a_balance >= 0);
        assert!(b_balance >= 0);
        assert_eq!(a_balance + b_balance, 200 + external);

        let legs_a = engine.get_balance(a).await.unwrap().operations;
        let legs_b = engine.get_balance(b).await.unwrap().operations;
        let count = |ops: &Vec<OperationRecord>, kind: OperationKind| {
            ops.iter().filter(|r| r.kind == kind).count()
        };
        assert_eq!(
            count(&legs_a, OperationKind::TransferOut),
            count(&legs_b, OperationKind::TransferIn)
        );
        assert_eq!(
            count(&legs_b, OperationKind::TransferOut),
            count(&legs_a, OperationKind::TransferIn)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn opposite_transfers_do_not_deadlock() {
        let (engine, directory) = setup();
        let a = directory.register("Alice").unwrap().id;
        let b = directory.register("Bob").unwrap().id;
        engine.deposit(a, amount(500), "opening").await.unwrap();
        engine.deposit(b, amount(500), "opening").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..50 {
            let engine = engine.clone();
            let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
            handles.push(tokio::spawn(async move {
                engine.transfer(from, to, amount(5), "ping-pong").await
            }));
        }

        let joined = tokio::time::timeout(std::time::Duration::from_secs(10), async {
            for handle in handles {
                handle.await.unwrap().unwrap();
            }
        })
        .await;
        assert!(joined.is_ok(), "transfers did not finish in time");

        let a_balance = assert_balance_matches_history(&engine, a).await;
        let b_balance = assert_balance_matches_history(&engine, b).await;
        assert_eq!(a_balance + b_balance, 1_000);
        assert_eq!(a_balance, 500);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unknown_accounts_are_reported_by_role() {
        let (engine, directory) = setup();
        let a = directory.register("Alice").unwrap().id;
        let ghost = AccountId::new();
        engine.deposit(a, amount(10), "opening").await.unwrap();

        assert_eq!(
            engine.withdraw(ghost, amount(1), "x").await.unwrap_err(),
            LedgerError::AccountNotFound(ghost)
        );
        assert_eq!(
            engine.transfer(ghost, a, amount(1), "x").await.unwrap_err(),
            LedgerError::AccountNotFound(ghost)
        );
        assert_eq!(
            engine.transfer(a, ghost, amount(1), "x").await.unwrap_err(),
            LedgerError::RecipientNotFound(ghost)
        );
        assert_eq!(engine.store().operation_count().unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn removed_account_keeps_its_history_but_rejects_requests() {
        let (engine, directory) = setup();
        let a = directory.register("Alice").unwrap().id;
        engine.deposit(a, amount(10), "opening").await.unwrap();

        directory.remove(a).unwrap();

        assert_eq!(
            engine.get_balance(a).await.unwrap_err(),
            LedgerError::AccountNotFound(a)
        );
        assert_eq!(engine.store().list_by_account(a).await.unwrap().len(), 1);
    }
}
