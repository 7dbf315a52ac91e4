use std::{path::Path, sync::Arc};

use cashline_core::{Account, ValidationError};

use crate::{
    config::{AccountSeed, StoreBackendKind, StoreConfig},
    error::LedgerError,
};

// Re-export core storage types so callers only need this module
pub use cashline_core::storage::{AccountStore, PoolOptions, StoreError, StoreTransaction, TransactionMode};
pub use cashline_memory::InMemoryStore;
pub use cashline_postgres::PostgresStore;
pub use cashline_sqlite::SqliteStore;

pub const DEFAULT_SQLITE_PATH: &str = "cashline.db";

/// Opens the configured backend. SQL backends create their schema on open.
///
/// Blocking: call from a plain thread or `spawn_blocking`, never from an
/// async task directly.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn AccountStore>, StoreError> {
    let store: Arc<dyn AccountStore> = match config.backend {
        StoreBackendKind::Memory => Arc::new(InMemoryStore::new()),
        StoreBackendKind::Sqlite => {
            let path = config.url.as_deref().unwrap_or(DEFAULT_SQLITE_PATH);
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Arc::new(SqliteStore::with_options(path, config.pool_options())?)
        }
        StoreBackendKind::Postgres => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| StoreError::Connection("store.url is required for the postgres backend".to_string()))?;
            Arc::new(PostgresStore::with_options(url, config.pool_options())?)
        }
    };
    tracing::info!(backend = ?config.backend, "Store opened");
    Ok(store)
}

/// Creates every seed account that does not exist yet.
pub fn seed_accounts(store: &dyn AccountStore, seeds: &[AccountSeed]) -> Result<usize, LedgerError> {
    for seed in seeds {
        if seed.limit < 0 {
            return Err(ValidationError::InvalidSeed(format!("account {} has a negative limit", seed.id)).into());
        }
        let account = Account::new(seed.id, seed.limit, seed.balance);
        if !account.within_limit(account.balance) {
            return Err(ValidationError::InvalidSeed(format!("account {} starts below its limit", seed.id)).into());
        }
        store.seed_account(&account)?;
        tracing::debug!(account_id = seed.id, limit = seed.limit, "Seed account ensured");
    }
    Ok(seeds.len())
}
