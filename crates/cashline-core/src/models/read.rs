use serde::Serialize;
use time::OffsetDateTime;

use super::{AccountId, EntryKind};

/// Maximum number of ledger entries returned with a statement.
pub const STATEMENT_ENTRY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    #[serde(skip)]
    pub account_id: AccountId,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub description: String,
    pub amount: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl LedgerEntry {
    /// Effect of this entry on the account balance.
    pub fn signed_amount(&self) -> i64 {
        match self.kind {
            EntryKind::Credit => self.amount,
            EntryKind::Debit => -self.amount,
        }
    }
}

/// Result of a committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceSnapshot {
    pub balance: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    pub balance: i64,
    pub limit: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub queried_at: OffsetDateTime,
    pub recent_entries: Vec<LedgerEntry>,
}
