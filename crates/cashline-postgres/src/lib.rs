//! PostgreSQL storage backend for cashline.

use std::sync::atomic::{AtomicU64, Ordering};

use postgres::{error::SqlState, NoTls};
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use time::OffsetDateTime;

use cashline_core::{
    Account, AccountId, AccountStore, EntryKind, LedgerEntry, PoolOptions, StoreError, StoreTransaction,
    TransactionMode,
};

type Manager = PostgresConnectionManager<NoTls>;

pub struct PostgresStore {
    pool: Pool<Manager>,
    tx_counter: AtomicU64,
}

impl PostgresStore {
    pub fn new(connection_string: &str) -> Result<Self, StoreError> {
        Self::with_options(connection_string, PoolOptions::default())
    }

    pub fn with_options(connection_string: &str, options: PoolOptions) -> Result<Self, StoreError> {
        let config = connection_string
            .parse::<postgres::Config>()
            .map_err(|e| StoreError::Connection(format!("invalid connection string: {}", e)))?;

        let pool = Pool::builder()
            .max_size(options.max_size)
            .connection_timeout(options.connection_timeout)
            .build(PostgresConnectionManager::new(config, NoTls))
            .map_err(|e| StoreError::Connection(format!("PostgreSQL connection failed: {}", e)))?;

        let storage = Self {
            pool,
            tx_counter: AtomicU64::new(1),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let mut client = self.pool.get().map_err(pool_err)?;
        client
            .batch_execute(
                "
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                credit_limit BIGINT NOT NULL CHECK (credit_limit >= 0),
                balance BIGINT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ledger_entries (
                id BIGSERIAL PRIMARY KEY,
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                kind TEXT NOT NULL CHECK (kind IN ('c', 'd')),
                description VARCHAR(10) NOT NULL,
                amount BIGINT NOT NULL CHECK (amount > 0),
                created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
            );

            CREATE INDEX IF NOT EXISTS idx_pg_ledger_account_recent
                ON ledger_entries(account_id, created_at DESC, id DESC);
            ",
            )
            .map_err(store_err)?;
        Ok(())
    }
}

fn store_err(e: postgres::Error) -> StoreError {
    StoreError::Other(e.to_string())
}

fn pool_err(e: r2d2::Error) -> StoreError {
    StoreError::Connection(e.to_string())
}

impl AccountStore for PostgresStore {
    fn begin(&self, mode: TransactionMode) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        let mut client = self.pool.get().map_err(pool_err)?;
        let begin = match mode {
            TransactionMode::ReadWrite => "BEGIN",
            // one snapshot for every read in the transaction
            TransactionMode::ReadOnly => "BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY",
        };
        client.batch_execute(begin).map_err(store_err)?;
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(tx_id, ?mode, "PostgreSQL transaction started");
        Ok(Box::new(PostgresTransaction {
            client,
            tx_id,
            mode,
            finished: false,
        }))
    }

    fn seed_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut client = self.pool.get().map_err(pool_err)?;
        client
            .execute(
                "INSERT INTO accounts (id, credit_limit, balance) VALUES ($1, $2, $3)
                 ON CONFLICT (id) DO NOTHING",
                &[&account.id, &account.limit, &account.balance],
            )
            .map_err(store_err)?;
        Ok(())
    }
}

pub struct PostgresTransaction {
    client: PooledConnection<Manager>,
    tx_id: u64,
    mode: TransactionMode,
    finished: bool,
}

impl PostgresTransaction {
    fn ensure_writable(&self) -> Result<(), StoreError> {
        match self.mode {
            TransactionMode::ReadWrite => Ok(()),
            TransactionMode::ReadOnly => Err(StoreError::ReadOnly),
        }
    }

    /// Ends the transaction. A failed statement leaves it unfinished so that
    /// drop still issues a rollback.
    fn finish(&mut self, statement: &str) -> Result<(), StoreError> {
        self.client.batch_execute(statement).map_err(store_err)?;
        self.finished = true;
        Ok(())
    }

    fn select_account(&mut self, query: &str, account_id: AccountId) -> Result<Account, StoreError> {
        let row = self
            .client
            .query_opt(query, &[&account_id])
            .map_err(store_err)?
            .ok_or(StoreError::AccountNotFound(account_id))?;
        Ok(Account::new(row.get(0), row.get(1), row.get(2)))
    }
}

impl StoreTransaction for PostgresTransaction {
    fn lock_account_for_update(&mut self, account_id: AccountId) -> Result<Account, StoreError> {
        self.ensure_writable()?;
        self.select_account(
            "SELECT id, credit_limit, balance FROM accounts WHERE id = $1 FOR UPDATE",
            account_id,
        )
    }

    fn read_account(&mut self, account_id: AccountId) -> Result<Account, StoreError> {
        self.select_account("SELECT id, credit_limit, balance FROM accounts WHERE id = $1", account_id)
    }

    fn read_recent_entries(&mut self, account_id: AccountId, limit: usize) -> Result<Vec<LedgerEntry>, StoreError> {
        let limit = limit as i64;
        let rows = self
            .client
            .query(
                "SELECT kind, description, amount, created_at FROM ledger_entries
                 WHERE account_id = $1
                 ORDER BY created_at DESC, id DESC
                 LIMIT $2",
                &[&account_id, &limit],
            )
            .map_err(store_err)?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.get(0);
            let kind = kind
                .parse::<EntryKind>()
                .map_err(|_| StoreError::Corrupt(format!("ledger entry kind '{}'", kind)))?;
            let created_at: OffsetDateTime = row.get(3);
            result.push(LedgerEntry {
                account_id,
                kind,
                description: row.get(1),
                amount: row.get(2),
                created_at,
            });
        }
        Ok(result)
    }

    fn append_entry(&mut self, account_id: AccountId, kind: EntryKind, description: &str, amount: i64) -> Result<(), StoreError> {
        self.ensure_writable()?;
        self.client
            .execute(
                "INSERT INTO ledger_entries (account_id, kind, description, amount) VALUES ($1, $2, $3, $4)",
                &[&account_id, &kind.as_str(), &description, &amount],
            )
            .map_err(|e| {
                if e.code() == Some(&SqlState::FOREIGN_KEY_VIOLATION) {
                    StoreError::AccountNotFound(account_id)
                } else {
                    store_err(e)
                }
            })?;
        Ok(())
    }

    fn apply_balance(&mut self, account_id: AccountId, balance: i64) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let updated = self
            .client
            .execute("UPDATE accounts SET balance = $1 WHERE id = $2", &[&balance, &account_id])
            .map_err(store_err)?;
        if updated == 0 {
            return Err(StoreError::AccountNotFound(account_id));
        }
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.finish("COMMIT")?;
        tracing::debug!(tx_id = self.tx_id, "PostgreSQL transaction committed");
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.finish("ROLLBACK")?;
        tracing::debug!(tx_id = self.tx_id, "PostgreSQL transaction rolled back");
        Ok(())
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.client.batch_execute("ROLLBACK") {
            Ok(()) => tracing::debug!(tx_id = self.tx_id, "PostgreSQL transaction dropped, rolled back"),
            Err(e) => tracing::warn!(tx_id = self.tx_id, error = %e, "PostgreSQL rollback on drop failed"),
        }
    }
}
