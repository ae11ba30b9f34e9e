use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use finapi_core::AccountId;

use super::{AccountDirectory, AccountProfile, DirectoryError};

/// In-memory account directory.
///
/// Intended for tests/dev and for embedding the ledger next to a user
/// service that pushes its accounts here.
#[derive(Debug, Default)]
pub struct InMemoryAccountDirectory {
    accounts: RwLock<HashMap<AccountId, AccountProfile>>,
}

impl InMemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new account under a fresh id.
    pub fn register(&self, display_name: impl Into<String>) -> Result<AccountProfile, DirectoryError> {
        let profile = AccountProfile {
            id: AccountId::new(),
            display_name: display_name.into(),
        };
        self.insert(profile.clone())?;
        Ok(profile)
    }

    /// Insert or replace a profile.
    pub fn insert(&self, profile: AccountProfile) -> Result<(), DirectoryError> {
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        accounts.insert(profile.id, profile);
        Ok(())
    }

    /// Forget an account. Its ledger history is left untouched.
    pub fn remove(&self, id: AccountId) -> Result<Option<AccountProfile>, DirectoryError> {
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        Ok(accounts.remove(&id))
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn resolve_account(&self, id: AccountId) -> Result<AccountProfile, DirectoryError> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        accounts.get(&id).cloned().ok_or(DirectoryError::NotFound(id))
    }
}

fn poisoned<T>(_: T) -> DirectoryError {
    DirectoryError::Unavailable("lock poisoned".to_string())
}
