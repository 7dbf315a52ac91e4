use std::sync::Arc;

use cashline_core::{AccountId, AccountStore, Statement, TransactionMode, STATEMENT_ENTRY_LIMIT};
use time::OffsetDateTime;

use crate::error::LedgerError;

/// Reads balance, limit and the latest ledger entries of an account without
/// taking the row lock.
pub struct StatementReader {
    store: Arc<dyn AccountStore>,
}

impl StatementReader {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn get_statement(&self, account_id: AccountId) -> Result<Statement, LedgerError> {
        let mut tx = self.store.begin(TransactionMode::ReadOnly)?;
        let account = tx.read_account(account_id)?;
        let mut recent_entries = tx.read_recent_entries(account_id, STATEMENT_ENTRY_LIMIT)?;
        tx.commit()?;

        recent_entries.truncate(STATEMENT_ENTRY_LIMIT);
        Ok(Statement {
            balance: account.balance,
            limit: account.limit,
            queried_at: OffsetDateTime::now_utc(),
            recent_entries,
        })
    }
}
