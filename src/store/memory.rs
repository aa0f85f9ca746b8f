//! In-Memory Store
//!
//! Rows live in process memory. A transaction buffers its writes and applies
//! them on commit, so other transactions only ever see committed rows
//! (read-committed). Row locks are real: a locking read or a balance update
//! takes an exclusive per-account lock that is held until the transaction
//! closes, so lock-ordering mistakes deadlock here exactly as they would in
//! PostgreSQL.
//!
//! Fault switches and call counters let tests drive the failure paths of the
//! unit of work.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;

use super::{Queries, Store, StoreError, TxHandle};
use crate::models::{Account, AccountId, Entry, NewAccount, Transfer};

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
}

#[derive(Default)]
struct Faults {
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
    /// Number of upcoming commits that fail with a serialization conflict
    serialization_failures: AtomicUsize,
}

#[derive(Default)]
struct Counters {
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

struct Shared {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
    next_account_id: AtomicI64,
    next_entry_id: AtomicI64,
    next_transfer_id: AtomicI64,
    faults: Faults,
    counters: Counters,
}

impl Shared {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, id: AccountId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }
}

/// In-process store with row locks and read-committed visibility
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                next_account_id: AtomicI64::new(1),
                next_entry_id: AtomicI64::new(1),
                next_transfer_id: AtomicI64::new(1),
                faults: Faults::default(),
                counters: Counters::default(),
            }),
        }
    }

    /// Insert a committed account directly (fixture setup)
    pub fn seed_account(&self, params: NewAccount) -> Account {
        let account = Account {
            id: self.shared.next_account_id.fetch_add(1, Ordering::SeqCst),
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: Utc::now(),
        };
        self.shared
            .tables()
            .accounts
            .insert(account.id, account.clone());
        account
    }

    /// Committed state of an account
    pub fn account(&self, id: AccountId) -> Option<Account> {
        self.shared.tables().accounts.get(&id).cloned()
    }

    /// Sum of all committed balances
    pub fn total_balance(&self) -> i64 {
        self.shared
            .tables()
            .accounts
            .values()
            .map(|a| a.balance)
            .sum()
    }

    pub fn entry_count(&self) -> usize {
        self.shared.tables().entries.len()
    }

    pub fn transfer_count(&self) -> usize {
        self.shared.tables().transfers.len()
    }

    pub fn set_fail_begin(&self, fail: bool) {
        self.shared.faults.fail_begin.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_commit(&self, fail: bool) {
        self.shared.faults.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_rollback(&self, fail: bool) {
        self.shared.faults.fail_rollback.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` commits fail with a serialization conflict
    pub fn fail_next_commits_with_conflict(&self, count: usize) {
        self.shared
            .faults
            .serialization_failures
            .store(count, Ordering::SeqCst);
    }

    pub fn begin_count(&self) -> usize {
        self.shared.counters.begins.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.shared.counters.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> usize {
        self.shared.counters.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        if self.shared.faults.fail_begin.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("begin rejected".to_string()));
        }
        self.shared.counters.begins.fetch_add(1, Ordering::SeqCst);

        Ok(MemoryTx {
            shared: self.shared.clone(),
            held: BTreeMap::new(),
            balance_deltas: BTreeMap::new(),
            new_accounts: BTreeMap::new(),
            new_entries: Vec::new(),
            new_transfers: Vec::new(),
        })
    }
}

/// One open in-memory transaction
///
/// Dropping it without commit discards the buffered writes and releases
/// every row lock it holds.
pub struct MemoryTx {
    shared: Arc<Shared>,
    held: BTreeMap<AccountId, OwnedMutexGuard<()>>,
    balance_deltas: BTreeMap<AccountId, i64>,
    new_accounts: BTreeMap<AccountId, Account>,
    new_entries: Vec<Entry>,
    new_transfers: Vec<Transfer>,
}

impl MemoryTx {
    async fn lock_row(&mut self, id: AccountId) {
        if self.held.contains_key(&id) {
            return;
        }
        let lock = self.shared.row_lock(id);
        let guard = lock.lock_owned().await;
        self.held.insert(id, guard);
    }

    /// Committed row overlaid with this transaction's own writes
    fn visible_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let base = match self.new_accounts.get(&id) {
            Some(account) => Some(account.clone()),
            None => self.shared.tables().accounts.get(&id).cloned(),
        };
        let Some(mut account) = base else {
            return Ok(None);
        };
        let delta = self.balance_deltas.get(&id).copied().unwrap_or(0);
        account.balance = apply_delta(id, account.balance, delta)?;
        Ok(Some(account))
    }

    fn require_account(&self, id: AccountId) -> Result<(), StoreError> {
        if self.visible_account(id)?.is_some() {
            Ok(())
        } else {
            Err(StoreError::ConstraintViolation(format!(
                "account {} does not exist",
                id
            )))
        }
    }
}

/// `balance + delta`, rejected like a Postgres BIGINT out of range
fn apply_delta(id: AccountId, balance: i64, delta: i64) -> Result<i64, StoreError> {
    balance.checked_add(delta).ok_or_else(|| {
        StoreError::ConstraintViolation(format!("balance of account {} out of range", id))
    })
}

#[async_trait]
impl Queries for MemoryTx {
    async fn get_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.visible_account(id)
    }

    async fn get_account_for_update(
        &mut self,
        id: AccountId,
    ) -> Result<Option<Account>, StoreError> {
        if self.visible_account(id)?.is_none() {
            return Ok(None);
        }
        self.lock_row(id).await;
        self.visible_account(id)
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, StoreError> {
        let not_found = StoreError::RowNotFound {
            table: "accounts",
            id,
        };
        if self.visible_account(id)?.is_none() {
            return Err(not_found);
        }
        self.lock_row(id).await;
        let current = self.visible_account(id)?.ok_or(not_found)?;
        let balance = apply_delta(id, current.balance, delta)?;

        let pending = self.balance_deltas.get(&id).copied().unwrap_or(0);
        let pending = apply_delta(id, pending, delta)?;
        self.balance_deltas.insert(id, pending);
        Ok(Account { balance, ..current })
    }

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: i64,
    ) -> Result<Entry, StoreError> {
        self.require_account(account_id)?;
        let entry = Entry {
            id: self.shared.next_entry_id.fetch_add(1, Ordering::SeqCst),
            account_id,
            amount,
            created_at: Utc::now(),
        };
        self.new_entries.push(entry.clone());
        Ok(entry)
    }

    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> Result<Transfer, StoreError> {
        self.require_account(from_account_id)?;
        self.require_account(to_account_id)?;
        let transfer = Transfer {
            id: self.shared.next_transfer_id.fetch_add(1, Ordering::SeqCst),
            from_account_id,
            to_account_id,
            amount,
            created_at: Utc::now(),
        };
        self.new_transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_account(&mut self, params: &NewAccount) -> Result<Account, StoreError> {
        let account = Account {
            id: self.shared.next_account_id.fetch_add(1, Ordering::SeqCst),
            owner: params.owner.clone(),
            balance: params.balance,
            currency: params.currency.clone(),
            created_at: Utc::now(),
        };
        self.new_accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Option<Transfer>, StoreError> {
        if let Some(transfer) = self.new_transfers.iter().find(|t| t.id == id) {
            return Ok(Some(transfer.clone()));
        }
        Ok(self
            .shared
            .tables()
            .transfers
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn list_entries(&mut self, account_id: AccountId) -> Result<Vec<Entry>, StoreError> {
        let mut entries: Vec<Entry> = self
            .shared
            .tables()
            .entries
            .iter()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect();
        entries.extend(
            self.new_entries
                .iter()
                .filter(|e| e.account_id == account_id)
                .cloned(),
        );
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }
}

#[async_trait]
impl TxHandle for MemoryTx {
    async fn commit(self) -> Result<(), StoreError> {
        let faults = &self.shared.faults;
        if faults.fail_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commit rejected".to_string()));
        }
        if faults
            .serialization_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::SerializationFailure(
                "could not serialize access due to concurrent update".to_string(),
            ));
        }

        {
            let mut tables = self.shared.tables();
            let mut balances = Vec::with_capacity(self.balance_deltas.len());
            for (id, delta) in &self.balance_deltas {
                let base = self
                    .new_accounts
                    .get(id)
                    .or_else(|| tables.accounts.get(id))
                    .ok_or(StoreError::RowNotFound {
                        table: "accounts",
                        id: *id,
                    })?;
                balances.push((*id, apply_delta(*id, base.balance, *delta)?));
            }

            tables.accounts.extend(self.new_accounts.clone());
            for (id, balance) in balances {
                if let Some(account) = tables.accounts.get_mut(&id) {
                    account.balance = balance;
                }
            }
            tables.entries.extend(self.new_entries.iter().cloned());
            tables.transfers.extend(self.new_transfers.iter().cloned());
        }

        self.shared.counters.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.shared.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.shared.faults.fail_rollback.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("rollback rejected".to_string()));
        }
        Ok(())
    }
}
