use std::sync::Arc;

use cashline_core::{
    AccountStore, BalanceSnapshot, PostTransactionCommand, StoreTransaction, TransactionMode, TransactionRequest,
    ValidationError,
};

use crate::error::LedgerError;

/// Applies debits and credits against an account under its overdraft limit.
///
/// The account row lock taken through the store is the only serialization
/// point: two requests for the same account never interleave between reading
/// the balance and writing the new one.
pub struct TransactionProcessor {
    store: Arc<dyn AccountStore>,
}

impl TransactionProcessor {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    pub fn process(&self, account_id: &str, request: &TransactionRequest) -> Result<BalanceSnapshot, LedgerError> {
        let command = PostTransactionCommand::validate(account_id, request)?;
        self.apply(&command)
    }

    #[tracing::instrument(
        level = "debug",
        skip(self, command),
        fields(account_id = command.account_id, kind = %command.kind, amount = command.amount)
    )]
    pub fn apply(&self, command: &PostTransactionCommand) -> Result<BalanceSnapshot, LedgerError> {
        let mut tx = self.store.begin(TransactionMode::ReadWrite)?;
        let account = tx.lock_account_for_update(command.account_id)?;

        let balance = match account.balance_after(command.kind, command.amount) {
            Some(balance) => balance,
            None => {
                abort(tx);
                return Err(ValidationError::InvalidAmount.into());
            }
        };

        if !account.within_limit(balance) {
            abort(tx);
            tracing::info!(balance = account.balance, limit = account.limit, "Transaction rejected, limit exceeded");
            return Err(LedgerError::LimitExceeded);
        }

        tx.append_entry(command.account_id, command.kind, &command.description, command.amount)?;
        tx.apply_balance(command.account_id, balance)?;
        tx.commit()?;

        tracing::debug!(balance, "Transaction committed");
        Ok(BalanceSnapshot {
            balance,
            limit: account.limit,
        })
    }
}

fn abort(tx: Box<dyn StoreTransaction + '_>) {
    if let Err(e) = tx.rollback() {
        tracing::warn!(error = %e, "Rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use cashline_core::{Account, AccountId, EntryKind, LedgerEntry, StoreError};

    use super::*;

    /// Store double that records every call and can fail a chosen one.
    struct RecordingStore {
        account: Account,
        fail_on: Option<&'static str>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl RecordingStore {
        fn new(account: Account, fail_on: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                account,
                fail_on,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn record(&self, call: &'static str) -> Result<(), StoreError> {
            self.calls.lock().unwrap().push(call);
            if self.fail_on == Some(call) {
                return Err(StoreError::Other(format!("{} failed", call)));
            }
            Ok(())
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct RecordingTransaction<'a> {
        store: &'a RecordingStore,
    }

    impl AccountStore for RecordingStore {
        fn begin(&self, _mode: TransactionMode) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
            self.record("begin")?;
            Ok(Box::new(RecordingTransaction { store: self }))
        }

        fn seed_account(&self, _account: &Account) -> Result<(), StoreError> {
            Ok(())
        }
    }

    impl StoreTransaction for RecordingTransaction<'_> {
        fn lock_account_for_update(&mut self, account_id: AccountId) -> Result<Account, StoreError> {
            self.store.record("lock")?;
            if account_id != self.store.account.id {
                return Err(StoreError::AccountNotFound(account_id));
            }
            Ok(self.store.account)
        }

        fn read_account(&mut self, _account_id: AccountId) -> Result<Account, StoreError> {
            self.store.record("read")?;
            Ok(self.store.account)
        }

        fn read_recent_entries(&mut self, _account_id: AccountId, _limit: usize) -> Result<Vec<LedgerEntry>, StoreError> {
            self.store.record("entries")?;
            Ok(Vec::new())
        }

        fn append_entry(&mut self, _: AccountId, _: EntryKind, _: &str, _: i64) -> Result<(), StoreError> {
            self.store.record("append")
        }

        fn apply_balance(&mut self, _: AccountId, _: i64) -> Result<(), StoreError> {
            self.store.record("apply")
        }

        fn commit(self: Box<Self>) -> Result<(), StoreError> {
            self.store.record("commit")
        }

        fn rollback(self: Box<Self>) -> Result<(), StoreError> {
            self.store.record("rollback")
        }
    }

    fn debit(amount: i64) -> TransactionRequest {
        TransactionRequest::new("d", "test", amount)
    }

    #[test]
    fn happy_path_writes_entry_then_balance_then_commits() {
        let store = RecordingStore::new(Account::new(1, 1000, 0), None);
        let processor = TransactionProcessor::new(store.clone());
        let snapshot = processor.process("1", &debit(500)).unwrap();
        assert_eq!(snapshot, BalanceSnapshot { balance: -500, limit: 1000 });
        assert_eq!(store.calls(), vec!["begin", "lock", "append", "apply", "commit"]);
    }

    #[test]
    fn invalid_request_never_touches_store() {
        let store = RecordingStore::new(Account::new(1, 1000, 0), None);
        let processor = TransactionProcessor::new(store.clone());
        let result = processor.process("1", &TransactionRequest::new("d", "", 5));
        assert!(matches!(result, Err(LedgerError::Validation(ValidationError::InvalidDescription))));
        assert!(store.calls().is_empty());
    }

    #[test]
    fn limit_exceeded_rolls_back_without_writes() {
        let store = RecordingStore::new(Account::new(1, 1000, -500), None);
        let processor = TransactionProcessor::new(store.clone());
        let result = processor.process("1", &debit(600));
        assert!(matches!(result, Err(LedgerError::LimitExceeded)));
        assert_eq!(store.calls(), vec!["begin", "lock", "rollback"]);
    }

    #[test]
    fn failed_begin_issues_no_further_operations() {
        let store = RecordingStore::new(Account::new(1, 1000, 0), Some("begin"));
        let processor = TransactionProcessor::new(store.clone());
        assert!(matches!(processor.process("1", &debit(1)), Err(LedgerError::Store(_))));
        assert_eq!(store.calls(), vec!["begin"]);
    }

    #[test]
    fn failed_append_stops_before_balance_update() {
        let store = RecordingStore::new(Account::new(1, 1000, 0), Some("append"));
        let processor = TransactionProcessor::new(store.clone());
        assert!(matches!(processor.process("1", &debit(1)), Err(LedgerError::Store(_))));
        assert_eq!(store.calls(), vec!["begin", "lock", "append"]);
    }

    #[test]
    fn commit_failure_is_a_store_error() {
        let store = RecordingStore::new(Account::new(1, 1000, 0), Some("commit"));
        let processor = TransactionProcessor::new(store.clone());
        assert!(matches!(processor.process("1", &debit(1)), Err(LedgerError::Store(_))));
    }

    #[test]
    fn unknown_account_maps_to_not_found() {
        let store = RecordingStore::new(Account::new(1, 1000, 0), None);
        let processor = TransactionProcessor::new(store.clone());
        assert!(matches!(processor.process("2", &debit(1)), Err(LedgerError::NotFound(2))));
    }

    #[test]
    fn credit_overflow_is_rejected_as_invalid_amount() {
        let store = RecordingStore::new(Account::new(1, 0, i64::MAX), None);
        let processor = TransactionProcessor::new(store.clone());
        let result = processor.process("1", &TransactionRequest::new("c", "big", 1));
        assert!(matches!(result, Err(LedgerError::Validation(ValidationError::InvalidAmount))));
        assert_eq!(store.calls(), vec!["begin", "lock", "rollback"]);
    }
}
