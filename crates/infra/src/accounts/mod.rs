//! Account resolution boundary (owned by user management).
//!
//! The ledger only needs to know that an account exists and what to call it
//! in transfer descriptions.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use finapi_core::AccountId;

pub use in_memory::InMemoryAccountDirectory;
pub use postgres::PostgresAccountDirectory;

/// What the ledger knows about an account holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProfile {
    pub id: AccountId,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("account {0} not found")]
    NotFound(AccountId),

    #[error("account directory unavailable: {0}")]
    Unavailable(String),
}

/// Resolves account ids to profiles.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn resolve_account(&self, id: AccountId) -> Result<AccountProfile, DirectoryError>;
}

#[async_trait]
impl<D> AccountDirectory for Arc<D>
where
    D: AccountDirectory + ?Sized,
{
    async fn resolve_account(&self, id: AccountId) -> Result<AccountProfile, DirectoryError> {
        (**self).resolve_account(id).await
    }
}
