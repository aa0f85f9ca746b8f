//! Ledger Service
//!
//! Caller-facing operations. Each call runs in its own unit of work; the
//! service itself holds no mutable state, so clones can be shared freely
//! across tasks.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::context::TxContext;
use crate::error::{LedgerError, ValidationError};
use crate::executor::UnitOfWork;
use crate::models::{Account, AccountId, Entry, NewAccount, Transfer, TransferResult};
use crate::store::{Queries, Store};
use crate::transfer::{TransferStage, transfer_tx, validate_transfer};

pub struct Ledger<S: Store> {
    uow: UnitOfWork<S>,
    retry: RetryConfig,
}

impl<S: Store> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            uow: self.uow.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<S: Store> Ledger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_retry(store, RetryConfig::default())
    }

    pub fn with_retry(store: Arc<S>, retry: RetryConfig) -> Self {
        Self {
            uow: UnitOfWork::new(store),
            retry,
        }
    }

    pub fn unit_of_work(&self) -> &UnitOfWork<S> {
        &self.uow
    }

    /// Move `amount` from `from_account_id` to `to_account_id` atomically
    ///
    /// Fails with [`LedgerError::Validation`] before opening a transaction if
    /// the accounts are equal or `amount <= 0`. On any error no row changes.
    pub async fn transfer(
        &self,
        ctx: &TxContext,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> Result<TransferResult, LedgerError> {
        if let Err(e) = validate_transfer(from_account_id, to_account_id, amount) {
            warn!(
                from_account_id,
                to_account_id,
                amount,
                stage = %TransferStage::RejectedPreTransaction,
                error = %e,
                "Transfer rejected"
            );
            return Err(e.into());
        }
        // No transaction has been opened yet
        if let Some(e) = ctx.err() {
            warn!(
                from_account_id,
                to_account_id,
                amount,
                stage = %TransferStage::RejectedPreTransaction,
                code = e.code(),
                "Transfer abandoned"
            );
            return Err(e);
        }
        debug!(
            from_account_id,
            to_account_id,
            amount,
            stage = %TransferStage::Validated,
            "Transfer validated"
        );

        let result = self
            .uow
            .run(ctx, move |tx| {
                Box::pin(transfer_tx(tx, from_account_id, to_account_id, amount))
            })
            .await;

        match &result {
            Ok(r) => info!(
                transfer_id = r.transfer.id,
                from_account_id,
                to_account_id,
                amount,
                stage = %TransferStage::Committed,
                "Transfer committed"
            ),
            Err(e) => warn!(
                from_account_id,
                to_account_id,
                amount,
                stage = %TransferStage::for_failure(e),
                code = e.code(),
                error = %e,
                "Transfer failed"
            ),
        }
        result
    }

    /// [`transfer`](Self::transfer), retrying transient store conflicts
    ///
    /// Only errors with [`LedgerError::is_retryable`] are retried, up to the
    /// configured attempt limit. A committed transfer is never re-run.
    pub async fn transfer_with_retry(
        &self,
        ctx: &TxContext,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> Result<TransferResult, LedgerError> {
        let attempts = self.retry.attempts();
        let mut attempt = 1;
        loop {
            match self
                .transfer(ctx, from_account_id, to_account_id, amount)
                .await
            {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient store conflict, retrying transfer"
                    );
                    tokio::select! {
                        biased;
                        err = ctx.done() => return Err(err),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub async fn create_account(
        &self,
        ctx: &TxContext,
        params: NewAccount,
    ) -> Result<Account, LedgerError> {
        if params.balance < 0 {
            return Err(ValidationError::NegativeOpeningBalance(params.balance).into());
        }
        let account = self
            .uow
            .run(ctx, move |tx| {
                Box::pin(async move {
                    tx.create_account(&params)
                        .await
                        .map_err(LedgerError::Store)
                })
            })
            .await?;
        info!(
            account_id = account.id,
            currency = %account.currency,
            "Account created"
        );
        Ok(account)
    }

    pub async fn get_account(
        &self,
        ctx: &TxContext,
        id: AccountId,
    ) -> Result<Account, LedgerError> {
        self.uow
            .run(ctx, move |tx| {
                Box::pin(async move {
                    tx.get_account(id)
                        .await?
                        .ok_or(LedgerError::AccountNotFound(id))
                })
            })
            .await
    }

    pub async fn get_transfer(&self, ctx: &TxContext, id: i64) -> Result<Transfer, LedgerError> {
        self.uow
            .run(ctx, move |tx| {
                Box::pin(async move {
                    tx.get_transfer(id)
                        .await?
                        .ok_or(LedgerError::TransferNotFound(id))
                })
            })
            .await
    }

    /// Entries of an existing account, oldest first
    pub async fn list_entries(
        &self,
        ctx: &TxContext,
        account_id: AccountId,
    ) -> Result<Vec<Entry>, LedgerError> {
        self.uow
            .run(ctx, move |tx| {
                Box::pin(async move {
                    if tx.get_account(account_id).await?.is_none() {
                        return Err(LedgerError::AccountNotFound(account_id));
                    }
                    Ok(tx.list_entries(account_id).await?)
                })
            })
            .await
    }
}
