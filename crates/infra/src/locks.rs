//! Per-account serializing locks.
//!
//! Every mutation of an account stream runs while holding that account's
//! lock, which closes the read-validate-append window inside one process.
//! Multi-account operations lock in ascending id order so two transfers in
//! opposite directions cannot deadlock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use finapi_core::AccountId;

/// Idle slots are dropped once the table grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

type Slot = Arc<AsyncMutex<()>>;

#[derive(Debug, Default)]
pub struct AccountLocks {
    slots: Mutex<HashMap<AccountId, Slot>>,
}

/// Held locks; released on drop.
#[derive(Debug)]
pub struct AccountGuard {
    accounts: Vec<AccountId>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl AccountGuard {
    /// Locked accounts in acquisition order.
    pub fn accounts(&self) -> &[AccountId] {
        &self.accounts
    }
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every account in `accounts`, waiting at most `timeout` per lock.
    ///
    /// On timeout, returns the account that could not be locked; locks taken
    /// so far are released.
    pub async fn acquire(
        &self,
        accounts: &[AccountId],
        timeout: Duration,
    ) -> Result<AccountGuard, AccountId> {
        let mut ordered = accounts.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for account_id in &ordered {
            let slot = self.slot(*account_id);
            match tokio::time::timeout(timeout, slot.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => return Err(*account_id),
            }
        }

        Ok(AccountGuard {
            accounts: ordered,
            _guards: guards,
        })
    }

    /// Number of accounts with a lock slot (held or idle).
    pub fn tracked(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn slot(&self, account_id: AccountId) -> Slot {
        // The map only holds `Arc`s, so a poisoned guard is still consistent.
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.len() > PRUNE_THRESHOLD {
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        slots.entry(account_id).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquisition_is_sorted_and_deduplicated() {
        let locks = AccountLocks::new();
        let a = AccountId::new();
        let b = AccountId::new();

        let guard = locks.acquire(&[b, a, b], Duration::from_secs(1)).await.unwrap();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(guard.accounts(), expected.as_slice());
    }

    #[tokio::test]
    async fn second_holder_times_out() {
        let locks = AccountLocks::new();
        let a = AccountId::new();

        let _held = locks.acquire(&[a], Duration::from_secs(1)).await.unwrap();
        let err = locks
            .acquire(&[a], Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, a);
    }

    #[tokio::test]
    async fn lock_is_released_on_drop() {
        let locks = AccountLocks::new();
        let a = AccountId::new();

        drop(locks.acquire(&[a], Duration::from_secs(1)).await.unwrap());
        assert!(locks.acquire(&[a], Duration::from_millis(20)).await.is_ok());
        assert_eq!(locks.tracked(), 1);
    }
}
