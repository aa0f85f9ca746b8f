//! ledger_core - transactional core of a double-entry ledger
//!
//! Executes money transfers between accounts as single atomic units of work
//! against a relational store and returns a consistent snapshot of every row
//! touched.
//!
//! # Modules
//!
//! - [`store`] - Row-level query capability, PostgreSQL and in-memory backends
//! - [`executor`] - Unit of work: begin, run closure, commit / roll back
//! - [`transfer`] - Transfer algorithm, lock ordering, stages, retry backoff
//! - [`ledger`] - Caller-facing service
//! - [`context`] - Cancellation and deadlines
//! - [`models`] - Account, Entry, Transfer, TransferResult
//! - [`error`] - Error taxonomy
//! - [`config`] / [`logging`] / [`db`] - Deployment plumbing
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ledger_core::{Ledger, TxContext};
//! use ledger_core::models::NewAccount;
//! use ledger_core::store::MemoryStore;
//!
//! # async fn demo() -> Result<(), ledger_core::LedgerError> {
//! let store = Arc::new(MemoryStore::new());
//! let a = store.seed_account(NewAccount::new("alice", "USD", 100));
//! let b = store.seed_account(NewAccount::new("bob", "USD", 50));
//!
//! let ledger = Ledger::new(store);
//! let result = ledger.transfer(&TxContext::background(), a.id, b.id, 30).await?;
//! assert_eq!(result.from_account.balance, 70);
//! assert_eq!(result.to_account.balance, 80);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod store;
pub mod transfer;

pub use context::TxContext;
pub use error::{LedgerError, ValidationError};
pub use executor::{UnitOfWork, WorkFuture};
pub use ledger::Ledger;
pub use models::{Account, AccountId, Entry, NewAccount, Transfer, TransferResult};
pub use store::{MemoryStore, PgStore, Queries, Store, StoreError, TxHandle};
pub use transfer::TransferStage;
