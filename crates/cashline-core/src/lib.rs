//! Core types and traits for cashline storage backends.
//!
//! This crate provides the `AccountStore` trait and the account/ledger models,
//! enabling pluggable storage implementations in separate crates.

pub mod models;
pub mod storage;

// Re-export key types at crate root for convenience
pub use models::{parse_account_id, Account, AccountId, EntryKind, ValidationError};
pub use models::read::{BalanceSnapshot, LedgerEntry, Statement, STATEMENT_ENTRY_LIMIT};
pub use models::write::{PostTransactionCommand, TransactionRequest, MAX_DESCRIPTION_CHARS};
pub use storage::{AccountStore, PoolOptions, StoreError, StoreTransaction, TransactionMode};
