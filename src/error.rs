//! Ledger Error Types
//!
//! Every failure of a ledger operation surfaces as a [`LedgerError`]. None
//! are swallowed: a rollback that fails while unwinding another failure is
//! reported together with that failure.

use thiserror::Error;

use crate::models::AccountId;
use crate::store::StoreError;

/// Rejected preconditions, detected before any transaction is opened
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Source and destination account are the same")]
    SameAccount,

    #[error("Amount must be greater than zero (got {0})")]
    NonPositiveAmount(i64),

    #[error("Opening balance must not be negative (got {0})")]
    NegativeOpeningBalance(i64),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Insufficient funds in account {account_id}: balance {balance}, requested {amount}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: i64,
        amount: i64,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Transfer not found: {0}")]
    TransferNotFound(i64),

    #[error("Currency mismatch: {from} -> {to}")]
    CurrencyMismatch { from: String, to: String },

    #[error("Balance overflow on account {account_id}")]
    BalanceOverflow { account_id: AccountId },

    #[error("Failed to open transaction: {0}")]
    TransactionOpen(#[source] StoreError),

    #[error("Failed to commit transaction: {0}")]
    Commit(#[source] StoreError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Rollback failed while unwinding `cause`; both are kept
    #[error("{cause} (rollback also failed: {rollback})")]
    Rollback {
        cause: Box<LedgerError>,
        rollback: StoreError,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl LedgerError {
    /// Stable error code for callers that map errors onto their own surface
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation(ValidationError::SameAccount) => "SAME_ACCOUNT",
            LedgerError::Validation(ValidationError::NonPositiveAmount(_)) => "INVALID_AMOUNT",
            LedgerError::Validation(ValidationError::NegativeOpeningBalance(_)) => {
                "INVALID_OPENING_BALANCE"
            }
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::BalanceOverflow { .. } => "BALANCE_OVERFLOW",
            LedgerError::TransactionOpen(_) => "TRANSACTION_OPEN_FAILED",
            LedgerError::Commit(_) => "COMMIT_FAILED",
            LedgerError::Store(_) => "STORE_ERROR",
            LedgerError::Rollback { .. } => "ROLLBACK_FAILED",
            LedgerError::Cancelled => "CANCELLED",
            LedgerError::DeadlineExceeded => "DEADLINE_EXCEEDED",
        }
    }

    /// Whether running the whole operation again may succeed
    ///
    /// True only for store serialization conflicts and detected deadlocks,
    /// whether raised by a statement or at commit. A failed rollback is never
    /// retryable: the state of the aborted transaction is unknown to us.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Store(e) | LedgerError::Commit(e) => e.is_transient(),
            _ => false,
        }
    }

    /// The failure that triggered the operation's unwind
    ///
    /// For [`LedgerError::Rollback`] that is the wrapped cause; otherwise
    /// `self`.
    pub fn root_cause(&self) -> &LedgerError {
        match self {
            LedgerError::Rollback { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}
