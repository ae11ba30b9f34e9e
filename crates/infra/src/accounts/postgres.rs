//! Postgres-backed account directory.
//!
//! Reads the `users` table owned by user management. Only `id` and `name`
//! are consumed.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use finapi_core::AccountId;

use super::{AccountDirectory, AccountProfile, DirectoryError};

/// Minimal `users` table for local setups where user management has not
/// created it yet.
pub const USERS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id   UUID PRIMARY KEY,
    name TEXT NOT NULL
)
"#;

#[derive(Debug, Clone)]
pub struct PostgresAccountDirectory {
    pool: PgPool,
}

impl PostgresAccountDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), DirectoryError> {
        sqlx::query(USERS_SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| DirectoryError::Unavailable(format!("ensure_schema: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl AccountDirectory for PostgresAccountDirectory {
    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn resolve_account(&self, id: AccountId) -> Result<AccountProfile, DirectoryError> {
        let row = sqlx::query("SELECT id, name FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DirectoryError::Unavailable(format!("resolve_account: {e}")))?;

        let Some(row) = row else {
            return Err(DirectoryError::NotFound(id));
        };

        let display_name: String = row
            .try_get("name")
            .map_err(|e| DirectoryError::Unavailable(format!("failed to read name: {e}")))?;

        Ok(AccountProfile { id, display_name })
    }
}
