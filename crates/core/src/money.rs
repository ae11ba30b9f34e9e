//! Monetary amounts.
//!
//! The ledger is single-currency. Amounts are integers in the smallest unit
//! (e.g. cents) and are always strictly positive; the direction of a movement
//! is carried by the operation kind, never by the sign.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Strictly positive quantity of minor currency units.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    /// Validate and wrap a raw minor-unit value.
    pub fn new(minor_units: i64) -> DomainResult<Self> {
        if minor_units <= 0 {
            return Err(DomainError::validation("amount must be positive"));
        }
        Ok(Self(minor_units))
    }

    pub fn minor_units(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl core::fmt::Display for Amount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}
