//! Ledger row types
//!
//! Rows are owned by the store. Everything here is a detached snapshot of a
//! row as of the moment it was read or written inside a transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account identity as stored (`BIGSERIAL`)
pub type AccountId = i64;

/// Ledger account
///
/// `balance` is in minor units of `currency`. The store does not enforce
/// non-negativity; the transfer operation does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    pub balance: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only ledger line: one signed balance change on one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Entry {
    pub id: i64,
    pub account_id: AccountId,
    /// Positive for credit, negative for debit
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl Entry {
    #[inline]
    pub fn is_debit(&self) -> bool {
        self.amount < 0
    }

    #[inline]
    pub fn is_credit(&self) -> bool {
        self.amount > 0
    }
}

/// Immutable record of funds moved between two accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Transfer {
    pub id: i64,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Parameters for opening a new account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub owner: String,
    pub currency: String,
    pub balance: i64,
}

impl NewAccount {
    pub fn new(owner: impl Into<String>, currency: impl Into<String>, balance: i64) -> Self {
        Self {
            owner: owner.into(),
            currency: currency.into(),
            balance,
        }
    }
}

/// Snapshot of every row a committed transfer touched
///
/// Not persisted. Built inside the unit of work from the rows returned by
/// the writes, so it never mixes pre- and post-transaction values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}
