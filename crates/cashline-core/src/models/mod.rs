use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod read;
pub mod write;

pub type AccountId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    #[serde(rename = "c")]
    Credit,
    #[serde(rename = "d")]
    Debit,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Credit => "c",
            EntryKind::Debit => "d",
        }
    }
}

impl Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "c" => Ok(EntryKind::Credit),
            "d" => Ok(EntryKind::Debit),
            _ => Err(ValidationError::InvalidType),
        }
    }
}

/// Account row as held by the store. `balance` never drops below `-limit`
/// once a transaction has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub limit: i64,
    pub balance: i64,
}

impl Account {
    pub fn new(id: AccountId, limit: i64, balance: i64) -> Self {
        Self { id, limit, balance }
    }

    /// Lowest balance this account may reach.
    pub fn floor(&self) -> i64 {
        -self.limit
    }

    /// Balance after moving `amount` in direction `kind`, or `None` on overflow.
    pub fn balance_after(&self, kind: EntryKind, amount: i64) -> Option<i64> {
        match kind {
            EntryKind::Credit => self.balance.checked_add(amount),
            EntryKind::Debit => self.balance.checked_sub(amount),
        }
    }

    pub fn within_limit(&self, balance: i64) -> bool {
        balance >= self.floor()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing id")]
    MissingId,
    #[error("invalid id")]
    InvalidId,
    #[error("invalid type")]
    InvalidType,
    #[error("invalid description")]
    InvalidDescription,
    #[error("invalid amount")]
    InvalidAmount,
    #[error("invalid payload")]
    InvalidPayload,
    #[error("invalid account seed: {0}")]
    InvalidSeed(String),
}

pub fn parse_account_id(raw: &str) -> Result<AccountId, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::MissingId);
    }
    raw.parse::<AccountId>().map_err(|_| ValidationError::InvalidId)
}
