//! In-memory storage backend for cashline.
//!
//! Every account carries its own row lock. A read-write transaction takes the
//! lock on first touch and keeps it until commit or drop; staged writes only
//! become visible to other transactions on commit. Unlocked reads see the
//! account as it was on the transaction's first read of it.

use std::{
    collections::{btree_map::Entry, BTreeMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex, RwLock};
use time::OffsetDateTime;

use cashline_core::{
    Account, AccountId, AccountStore, EntryKind, LedgerEntry, StoreError, StoreTransaction, TransactionMode,
};

struct AccountRecord {
    limit: i64,
    balance: i64,
    entries: Vec<LedgerEntry>,
}

struct AccountSlot {
    row_lock: Arc<Mutex<()>>,
    record: RwLock<AccountRecord>,
}

impl AccountSlot {
    fn new(account: &Account) -> Self {
        Self {
            row_lock: Arc::new(Mutex::new(())),
            record: RwLock::new(AccountRecord {
                limit: account.limit,
                balance: account.balance,
                entries: Vec::new(),
            }),
        }
    }
}

pub struct InMemoryStore {
    accounts: RwLock<BTreeMap<AccountId, Arc<AccountSlot>>>,
    tx_counter: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(BTreeMap::new()),
            tx_counter: AtomicU64::new(1),
        }
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let store = Self::new();
        {
            let mut map = store.accounts.write();
            for account in accounts {
                map.insert(account.id, Arc::new(AccountSlot::new(&account)));
            }
        }
        store
    }

    fn slot(&self, account_id: AccountId) -> Result<Arc<AccountSlot>, StoreError> {
        self.accounts
            .read()
            .get(&account_id)
            .cloned()
            .ok_or(StoreError::AccountNotFound(account_id))
    }
}

impl AccountStore for InMemoryStore {
    fn begin(&self, mode: TransactionMode) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(tx_id, ?mode, "Transaction started");
        Ok(Box::new(InMemoryTransaction {
            store: self,
            tx_id,
            mode,
            held: BTreeMap::new(),
            snapshots: BTreeMap::new(),
            finished: false,
        }))
    }

    fn seed_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write();
        if let Entry::Vacant(e) = accounts.entry(account.id) {
            e.insert(Arc::new(AccountSlot::new(account)));
            tracing::debug!(account_id = account.id, "Account seeded");
        }
        Ok(())
    }
}

/// Row lock plus the writes staged against that row.
struct HeldAccount {
    slot: Arc<AccountSlot>,
    _guard: ArcMutexGuard<RawMutex, ()>,
    balance: Option<i64>,
    entries: Vec<LedgerEntry>,
}

impl HeldAccount {
    fn view(&self, account_id: AccountId) -> Account {
        let record = self.slot.record.read();
        Account::new(account_id, record.limit, self.balance.unwrap_or(record.balance))
    }
}

/// Committed state of an account as first seen by an unlocked read. Entries
/// are append-only, so the first `entry_count` of them never change.
struct ReadSnapshot {
    slot: Arc<AccountSlot>,
    limit: i64,
    balance: i64,
    entry_count: usize,
}

pub struct InMemoryTransaction<'a> {
    store: &'a InMemoryStore,
    tx_id: u64,
    mode: TransactionMode,
    held: BTreeMap<AccountId, HeldAccount>,
    snapshots: BTreeMap<AccountId, ReadSnapshot>,
    finished: bool,
}

impl InMemoryTransaction<'_> {
    fn ensure_writable(&self) -> Result<(), StoreError> {
        match self.mode {
            TransactionMode::ReadWrite => Ok(()),
            TransactionMode::ReadOnly => Err(StoreError::ReadOnly),
        }
    }

    fn snapshot(&mut self, account_id: AccountId) -> Result<&ReadSnapshot, StoreError> {
        let snapshot = match self.snapshots.entry(account_id) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let slot = self.store.slot(account_id)?;
                let (limit, balance, entry_count) = {
                    let record = slot.record.read();
                    (record.limit, record.balance, record.entries.len())
                };
                e.insert(ReadSnapshot {
                    slot,
                    limit,
                    balance,
                    entry_count,
                })
            }
        };
        Ok(snapshot)
    }

    fn hold(&mut self, account_id: AccountId) -> Result<&mut HeldAccount, StoreError> {
        self.ensure_writable()?;
        let held = match self.held.entry(account_id) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let slot = self.store.slot(account_id)?;
                let guard = slot.row_lock.lock_arc();
                tracing::trace!(tx_id = self.tx_id, account_id, "Row lock acquired");
                e.insert(HeldAccount {
                    slot,
                    _guard: guard,
                    balance: None,
                    entries: Vec::new(),
                })
            }
        };
        Ok(held)
    }
}

impl StoreTransaction for InMemoryTransaction<'_> {
    fn lock_account_for_update(&mut self, account_id: AccountId) -> Result<Account, StoreError> {
        let held = self.hold(account_id)?;
        Ok(held.view(account_id))
    }

    fn read_account(&mut self, account_id: AccountId) -> Result<Account, StoreError> {
        if let Some(held) = self.held.get(&account_id) {
            return Ok(held.view(account_id));
        }
        let snapshot = self.snapshot(account_id)?;
        Ok(Account::new(account_id, snapshot.limit, snapshot.balance))
    }

    fn read_recent_entries(&mut self, account_id: AccountId, limit: usize) -> Result<Vec<LedgerEntry>, StoreError> {
        if let Some(held) = self.held.get(&account_id) {
            let record = held.slot.record.read();
            return Ok(held
                .entries
                .iter()
                .rev()
                .chain(record.entries.iter().rev())
                .take(limit)
                .cloned()
                .collect());
        }
        let snapshot = match self.snapshot(account_id) {
            Ok(snapshot) => snapshot,
            Err(StoreError::AccountNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let record = snapshot.slot.record.read();
        Ok(record.entries[..snapshot.entry_count]
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    fn append_entry(&mut self, account_id: AccountId, kind: EntryKind, description: &str, amount: i64) -> Result<(), StoreError> {
        let held = self.hold(account_id)?;
        held.entries.push(LedgerEntry {
            account_id,
            kind,
            description: description.to_string(),
            amount,
            created_at: OffsetDateTime::now_utc(),
        });
        Ok(())
    }

    fn apply_balance(&mut self, account_id: AccountId, balance: i64) -> Result<(), StoreError> {
        let held = self.hold(account_id)?;
        held.balance = Some(balance);
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        for held in self.held.values_mut() {
            if held.balance.is_none() && held.entries.is_empty() {
                continue;
            }
            let mut record = held.slot.record.write();
            if let Some(balance) = held.balance {
                record.balance = balance;
            }
            record.entries.append(&mut held.entries);
        }
        self.finished = true;
        tracing::debug!(tx_id = self.tx_id, "Transaction committed");
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.finished = true;
        tracing::debug!(tx_id = self.tx_id, "Transaction rolled back");
        Ok(())
    }
}

impl Drop for InMemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(tx_id = self.tx_id, "Transaction dropped, rolling back");
        }
    }
}
