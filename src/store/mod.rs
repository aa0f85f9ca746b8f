//! Store Capability
//!
//! The row-level primitives the ledger core invokes, bound to one open
//! transaction. The core never talks to a pool or connection directly; it
//! asks a [`Store`] for a transaction and passes that handle explicitly into
//! domain code.
//!
//! # Backends
//!
//! - [`PgStore`] - PostgreSQL via sqlx
//! - [`MemoryStore`] - in-process rows with exclusive row locks and
//!   read-committed visibility, used by tests and embedders

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::StoreError;
pub use memory::{MemoryStore, MemoryTx};
pub use postgres::{PgStore, PgTx};

use async_trait::async_trait;

use crate::context::TxContext;
use crate::models::{Account, AccountId, Entry, NewAccount, Transfer};

/// Row-level reads and writes scoped to one transaction
///
/// Every call participates in the transaction the handle was opened for.
#[async_trait]
pub trait Queries: Send {
    /// Plain read (no lock)
    async fn get_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Row-locking read
    ///
    /// Takes an exclusive lock on the account row that is held until the
    /// transaction commits or rolls back. Blocks while another transaction
    /// holds it.
    async fn get_account_for_update(
        &mut self,
        id: AccountId,
    ) -> Result<Option<Account>, StoreError>;

    /// `balance = balance + delta`, returning the row after the update
    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, StoreError>;

    async fn create_entry(&mut self, account_id: AccountId, amount: i64)
    -> Result<Entry, StoreError>;

    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> Result<Transfer, StoreError>;

    async fn create_account(&mut self, params: &NewAccount) -> Result<Account, StoreError>;

    async fn get_transfer(&mut self, id: i64) -> Result<Option<Transfer>, StoreError>;

    /// Entries of one account, oldest first
    async fn list_entries(&mut self, account_id: AccountId) -> Result<Vec<Entry>, StoreError>;
}

/// An open transaction
///
/// Closing consumes the handle, so a transaction is closed at most once.
/// Dropping an open handle rolls it back.
#[async_trait]
pub trait TxHandle: Queries + Sized {
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Source of transactions
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: TxHandle + 'static;

    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Open a new transaction
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Open a new transaction whose statements respect `ctx`'s deadline
    ///
    /// Backends that keep running a statement after the caller stops
    /// polling it must bound their own waits here, so that unwinding an
    /// abandoned statement cannot outlast the deadline by more than one
    /// statement's budget.
    async fn begin_with(&self, _ctx: &TxContext) -> Result<Self::Tx, StoreError> {
        self.begin().await
    }
}
