//! Configuration loading and representation.
//!
//! Values come from the process environment. Unparseable values fall back to
//! the defaults with a warning rather than failing startup.

use std::time::Duration;

pub const ENV_MAX_APPEND_ATTEMPTS: &str = "LEDGER_MAX_APPEND_ATTEMPTS";
pub const ENV_LOCK_TIMEOUT_MS: &str = "LEDGER_LOCK_TIMEOUT_MS";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

const DEFAULT_MAX_APPEND_ATTEMPTS: u32 = 3;
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Ledger engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// How many times a read-validate-append cycle runs before an optimistic
    /// conflict is reported to the caller. Always at least 1.
    pub max_append_attempts: u32,
    /// Upper bound on waiting for an account lock.
    pub lock_timeout: Duration,
    /// Postgres connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_append_attempts: DEFAULT_MAX_APPEND_ATTEMPTS,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            database_url: None,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (environment, test maps).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let max_append_attempts = match lookup(ENV_MAX_APPEND_ATTEMPTS) {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    tracing::warn!(
                        value = %raw,
                        "{ENV_MAX_APPEND_ATTEMPTS} must be a positive integer; using default"
                    );
                    defaults.max_append_attempts
                }
            },
            None => defaults.max_append_attempts,
        };

        let lock_timeout = match lookup(ENV_LOCK_TIMEOUT_MS) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) => Duration::from_millis(ms),
                Err(_) => {
                    tracing::warn!(
                        value = %raw,
                        "{ENV_LOCK_TIMEOUT_MS} must be milliseconds; using default"
                    );
                    defaults.lock_timeout
                }
            },
            None => defaults.lock_timeout,
        };

        let database_url = lookup(ENV_DATABASE_URL).filter(|url| !url.trim().is_empty());

        Self {
            max_append_attempts,
            lock_timeout,
            database_url,
        }
    }
}
