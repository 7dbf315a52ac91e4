use std::time::Duration;

use crate::models::{read::LedgerEntry, Account, AccountId, EntryKind};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),
    #[error("write attempted in a read-only transaction")]
    ReadOnly,
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadWrite,
    ReadOnly,
}

/// Connection pool sizing shared by the SQL backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_size: u32,
    pub connection_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 16,
            connection_timeout: Duration::from_secs(30),
        }
    }
}

/// Handle to a durable account store. Each call to `begin` acquires its own
/// connection, held until the returned transaction is finished or dropped.
pub trait AccountStore: Send + Sync {
    fn begin(&self, mode: TransactionMode) -> Result<Box<dyn StoreTransaction + '_>, StoreError>;

    /// Creates the account if no account with the same id exists.
    fn seed_account(&self, account: &Account) -> Result<(), StoreError>;
}

/// One open store transaction.
///
/// Dropping a transaction without calling `commit` rolls it back and releases
/// every row lock it holds.
pub trait StoreTransaction {
    /// Takes the exclusive row lock on the account, blocking until any other
    /// holder commits or aborts.
    fn lock_account_for_update(&mut self, account_id: AccountId) -> Result<Account, StoreError>;

    fn read_account(&mut self, account_id: AccountId) -> Result<Account, StoreError>;

    /// Most recent first.
    fn read_recent_entries(&mut self, account_id: AccountId, limit: usize) -> Result<Vec<LedgerEntry>, StoreError>;

    fn append_entry(&mut self, account_id: AccountId, kind: EntryKind, description: &str, amount: i64) -> Result<(), StoreError>;

    fn apply_balance(&mut self, account_id: AccountId, balance: i64) -> Result<(), StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
