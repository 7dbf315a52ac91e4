//! SQLite storage backend for cashline.
//!
//! SQLite has no row-level locks. Read-write transactions open with
//! `BEGIN IMMEDIATE`, which takes the database write lock up front; a second
//! writer blocks in the busy handler until the first commits or rolls back.
//! Readers in WAL mode are never blocked by the writer.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use time::OffsetDateTime;

use cashline_core::{
    Account, AccountId, AccountStore, EntryKind, LedgerEntry, PoolOptions, StoreError, StoreTransaction,
    TransactionMode,
};

/// How long a writer waits for the database write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    tx_counter: AtomicU64,
}

impl SqliteStore {
    pub fn new(path: &str) -> Result<Self, StoreError> {
        Self::with_options(path, PoolOptions::default())
    }

    pub fn with_options(path: &str, options: PoolOptions) -> Result<Self, StoreError> {
        // every pooled connection to ":memory:" would open a separate database
        let (manager, max_size) = if path == ":memory:" {
            (SqliteConnectionManager::memory(), 1)
        } else {
            (SqliteConnectionManager::file(path), options.max_size)
        };
        let manager = manager.with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        });

        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(options.connection_timeout)
            .build(manager)
            .map_err(pool_err)?;

        let storage = Self {
            pool,
            tx_counter: AtomicU64::new(1),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.pool.get().map_err(pool_err)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                credit_limit INTEGER NOT NULL CHECK (credit_limit >= 0),
                balance INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ledger_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('c', 'd')),
                description TEXT NOT NULL,
                amount INTEGER NOT NULL CHECK (amount > 0),
                created_at TEXT NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            );

            CREATE INDEX IF NOT EXISTS idx_ledger_account_recent
                ON ledger_entries(account_id, id DESC);
            ",
        )
        .map_err(store_err)?;
        Ok(())
    }
}

fn store_err(e: rusqlite::Error) -> StoreError {
    StoreError::Other(e.to_string())
}

fn pool_err(e: r2d2::Error) -> StoreError {
    StoreError::Connection(e.to_string())
}

fn is_foreign_key_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY)
}

impl AccountStore for SqliteStore {
    fn begin(&self, mode: TransactionMode) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        let conn = self.pool.get().map_err(pool_err)?;
        let begin = match mode {
            TransactionMode::ReadWrite => "BEGIN IMMEDIATE",
            TransactionMode::ReadOnly => "BEGIN DEFERRED",
        };
        conn.execute_batch(begin).map_err(store_err)?;
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(tx_id, ?mode, "SQLite transaction started");
        Ok(Box::new(SqliteTransaction {
            conn,
            tx_id,
            mode,
            finished: false,
        }))
    }

    fn seed_account(&self, account: &Account) -> Result<(), StoreError> {
        let conn = self.pool.get().map_err(pool_err)?;
        conn.execute(
            "INSERT OR IGNORE INTO accounts (id, credit_limit, balance) VALUES (?1, ?2, ?3)",
            params![account.id, account.limit, account.balance],
        )
        .map_err(store_err)?;
        Ok(())
    }
}

pub struct SqliteTransaction {
    conn: PooledConnection<SqliteConnectionManager>,
    tx_id: u64,
    mode: TransactionMode,
    finished: bool,
}

impl SqliteTransaction {
    fn ensure_writable(&self) -> Result<(), StoreError> {
        match self.mode {
            TransactionMode::ReadWrite => Ok(()),
            TransactionMode::ReadOnly => Err(StoreError::ReadOnly),
        }
    }

    /// Ends the transaction. A failed statement leaves it unfinished so that
    /// drop still issues a rollback.
    fn finish(&mut self, statement: &str) -> Result<(), StoreError> {
        self.conn.execute_batch(statement).map_err(store_err)?;
        self.finished = true;
        Ok(())
    }

    fn select_account(&self, account_id: AccountId) -> Result<Account, StoreError> {
        self.conn
            .query_row(
                "SELECT id, credit_limit, balance FROM accounts WHERE id = ?1",
                params![account_id],
                |r| Ok(Account::new(r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()
            .map_err(store_err)?
            .ok_or(StoreError::AccountNotFound(account_id))
    }
}

impl StoreTransaction for SqliteTransaction {
    fn lock_account_for_update(&mut self, account_id: AccountId) -> Result<Account, StoreError> {
        // the write lock was taken by BEGIN IMMEDIATE
        self.ensure_writable()?;
        self.select_account(account_id)
    }

    fn read_account(&mut self, account_id: AccountId) -> Result<Account, StoreError> {
        self.select_account(account_id)
    }

    fn read_recent_entries(&mut self, account_id: AccountId, limit: usize) -> Result<Vec<LedgerEntry>, StoreError> {
        // ids are handed out under the write lock, so they follow created_at
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT kind, description, amount, created_at FROM ledger_entries
                 WHERE account_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![account_id, limit as i64], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, OffsetDateTime>(3)?,
                ))
            })
            .map_err(store_err)?;

        let mut result = Vec::new();
        for row in rows {
            let (kind, description, amount, created_at) = row.map_err(store_err)?;
            let kind = kind
                .parse::<EntryKind>()
                .map_err(|_| StoreError::Corrupt(format!("ledger entry kind '{}'", kind)))?;
            result.push(LedgerEntry {
                account_id,
                kind,
                description,
                amount,
                created_at,
            });
        }
        Ok(result)
    }

    fn append_entry(&mut self, account_id: AccountId, kind: EntryKind, description: &str, amount: i64) -> Result<(), StoreError> {
        self.ensure_writable()?;
        self.conn
            .execute(
                "INSERT INTO ledger_entries (account_id, kind, description, amount, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![account_id, kind.as_str(), description, amount, OffsetDateTime::now_utc()],
            )
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
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
            .conn
            .execute("UPDATE accounts SET balance = ?1 WHERE id = ?2", params![balance, account_id])
            .map_err(store_err)?;
        if updated == 0 {
            return Err(StoreError::AccountNotFound(account_id));
        }
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.finish("COMMIT")?;
        tracing::debug!(tx_id = self.tx_id, "SQLite transaction committed");
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.finish("ROLLBACK")?;
        tracing::debug!(tx_id = self.tx_id, "SQLite transaction rolled back");
        Ok(())
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.conn.execute_batch("ROLLBACK") {
            Ok(()) => tracing::debug!(tx_id = self.tx_id, "SQLite transaction dropped, rolled back"),
            Err(e) => tracing::warn!(tx_id = self.tx_id, error = %e, "SQLite rollback on drop failed"),
        }
    }
}
