//! Unit-of-Work Executor
//!
//! Opens one transaction, hands the transaction-bound query handle to a
//! caller-supplied function, then commits or rolls back on that function's
//! outcome.
//!
//! # Lifecycle
//!
//! ```text
//! ctx live? ──no──▶ Cancelled / DeadlineExceeded   (nothing opened)
//!     │
//!   begin ──err──▶ TransactionOpen                 (work never runs)
//!     │
//!   work(&mut tx) ──err / ctx done──▶ rollback ──err──▶ Rollback { cause, rollback }
//!     │                                  │
//!     ok                                 └──ok──▶ cause
//!     │
//!   commit ──err──▶ Commit
//!     │
//!    Ok(T)
//! ```
//!
//! The transaction is closed exactly once on every path. The work function
//! only borrows the handle, so it cannot outlive the call.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::context::TxContext;
use crate::error::LedgerError;
use crate::store::{Store, TxHandle};

/// Future returned by a unit of work, borrowing the transaction for `'c`
pub type WorkFuture<'c, T> = BoxFuture<'c, Result<T, LedgerError>>;

/// Runs closures inside store transactions
pub struct UnitOfWork<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Clone for UnitOfWork<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: Store> UnitOfWork<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run `work` inside a fresh transaction
    ///
    /// `work` is invoked exactly once, and only if the transaction opened.
    pub async fn run<T, F>(&self, ctx: &TxContext, work: F) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut S::Tx) -> WorkFuture<'c, T> + Send,
    {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let begun = tokio::select! {
            biased;
            err = ctx.done() => Err(err),
            tx = self.store.begin_with(ctx) => tx.map_err(LedgerError::TransactionOpen),
        };
        let mut tx = match begun {
            Ok(tx) => tx,
            Err(e) => {
                warn!(store = self.store.name(), error = %e, "Transaction not opened");
                return Err(e);
            }
        };

        let outcome = {
            let work = work(&mut tx);
            tokio::select! {
                biased;
                err = ctx.done() => Err(err),
                result = work => result,
            }
        };

        let value = match outcome {
            Ok(value) => value,
            Err(cause) => return Err(self.unwind(tx, cause).await),
        };

        // Cancelled between the last statement and commit: still unwind
        if let Some(err) = ctx.err() {
            return Err(self.unwind(tx, err).await);
        }

        match tx.commit().await {
            Ok(()) => {
                debug!(store = self.store.name(), "Transaction committed");
                Ok(value)
            }
            Err(e) => {
                warn!(store = self.store.name(), error = %e, "Commit failed");
                Err(LedgerError::Commit(e))
            }
        }
    }

    /// Roll back after `cause`, keeping both errors if the rollback fails
    async fn unwind(&self, tx: S::Tx, cause: LedgerError) -> LedgerError {
        match tx.rollback().await {
            Ok(()) => {
                debug!(
                    store = self.store.name(),
                    cause = %cause,
                    "Transaction rolled back"
                );
                cause
            }
            Err(rollback) => {
                warn!(
                    store = self.store.name(),
                    cause = %cause,
                    error = %rollback,
                    "Rollback failed"
                );
                LedgerError::Rollback {
                    cause: Box::new(cause),
                    rollback,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewAccount;
    use crate::store::{MemoryStore, Queries, StoreError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn setup() -> (Arc<MemoryStore>, UnitOfWork<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let uow = UnitOfWork::new(store.clone());
        (store, uow)
    }

    #[tokio::test]
    async fn test_commit_on_success() {
        let (store, uow) = setup();
        let account = store.seed_account(NewAccount::new("alice", "USD", 100));

        let balance = uow
            .run(&TxContext::background(), |tx| {
                Box::pin(async move {
                    let account = tx.add_account_balance(account.id, 25).await?;
                    Ok::<_, LedgerError>(account.balance)
                })
            })
            .await
            .unwrap();

        assert_eq!(balance, 125);
        assert_eq!(store.account(account.id).unwrap().balance, 125);
        assert_eq!(store.commit_count(), 1);
        assert_eq!(store.rollback_count(), 0);
    }

    #[tokio::test]
    async fn test_rollback_on_work_error() {
        let (store, uow) = setup();
        let account = store.seed_account(NewAccount::new("alice", "USD", 100));

        let result: Result<(), _> = uow
            .run(&TxContext::background(), |tx| {
                Box::pin(async move {
                    tx.add_account_balance(account.id, -100).await?;
                    Err(LedgerError::AccountNotFound(99))
                })
            })
            .await;

        assert!(matches!(result, Err(LedgerError::AccountNotFound(99))));
        assert_eq!(store.account(account.id).unwrap().balance, 100);
        assert_eq!(store.commit_count(), 0);
        assert_eq!(store.rollback_count(), 1);
    }

    #[tokio::test]
    async fn test_rollback_failure_wraps_original() {
        let (store, uow) = setup();
        store.set_fail_rollback(true);

        let result: Result<(), _> = uow
            .run(&TxContext::background(), |_tx| {
                Box::pin(async move { Err(LedgerError::TransferNotFound(7)) })
            })
            .await;

        match result {
            Err(LedgerError::Rollback { cause, rollback }) => {
                assert!(matches!(*cause, LedgerError::TransferNotFound(7)));
                assert!(matches!(rollback, StoreError::Unavailable(_)));
            }
            other => panic!("expected composite rollback error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_failure_skips_work() {
        let (store, uow) = setup();
        store.set_fail_begin(true);
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = uow
            .run(&TxContext::background(), |_tx| {
                calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move { Ok(()) })
            })
            .await;

        assert!(matches!(result, Err(LedgerError::TransactionOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_opens_nothing() {
        let (store, uow) = setup();
        let ctx = TxContext::background();
        ctx.cancel();

        let result: Result<(), _> = uow
            .run(&ctx, |_tx| Box::pin(async move { Ok(()) }))
            .await;

        assert!(matches!(result, Err(LedgerError::Cancelled)));
        assert_eq!(store.begin_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_failure_reported() {
        let (store, uow) = setup();
        let account = store.seed_account(NewAccount::new("alice", "USD", 100));
        store.set_fail_commit(true);

        let result = uow
            .run(&TxContext::background(), |tx| {
                Box::pin(async move {
                    tx.add_account_balance(account.id, 1).await?;
                    Ok::<_, LedgerError>(())
                })
            })
            .await;

        assert!(matches!(result, Err(LedgerError::Commit(_))));
        assert_eq!(store.account(account.id).unwrap().balance, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_mid_work_rolls_back() {
        let (store, uow) = setup();
        let account = store.seed_account(NewAccount::new("alice", "USD", 100));
        let ctx = TxContext::background().with_timeout(Duration::from_millis(50));

        let result: Result<(), _> = uow
            .run(&ctx, |tx| {
                Box::pin(async move {
                    tx.add_account_balance(account.id, -100).await?;
                    std::future::pending::<()>().await;
                    Ok::<_, LedgerError>(())
                })
            })
            .await;

        assert!(matches!(result, Err(LedgerError::DeadlineExceeded)));
        assert_eq!(store.rollback_count(), 1);
        assert_eq!(store.account(account.id).unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_row_lock() {
        let (store, uow) = setup();
        let account = store.seed_account(NewAccount::new("alice", "USD", 100));

        // Hold the row lock from an independent transaction
        let mut holder = store.begin().await.unwrap();
        holder.get_account_for_update(account.id).await.unwrap();

        let ctx = TxContext::background();
        let canceller = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                ctx.cancel();
            })
        };

        let result = uow
            .run(&ctx, |tx| {
                Box::pin(async move {
                    tx.get_account_for_update(account.id).await?;
                    Ok::<_, LedgerError>(())
                })
            })
            .await;
        canceller.await.unwrap();

        assert!(matches!(result, Err(LedgerError::Cancelled)));
        assert_eq!(store.rollback_count(), 1);
        holder.rollback().await.unwrap();
    }
}
