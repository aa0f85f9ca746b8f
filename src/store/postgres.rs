//! PostgreSQL Store
//!
//! Row primitives over a `sqlx::Transaction`. The row-locking read uses
//! `FOR NO KEY UPDATE`: inserts into `entries`/`transfers` take `FOR KEY SHARE`
//! on the referenced account through their foreign keys, and that lock mode
//! does not conflict with `FOR NO KEY UPDATE`.
//!
//! Dropping a sqlx future does not stop the statement on the server, and the
//! rollback that follows waits for it. Transactions opened under a deadline
//! therefore carry `lock_timeout` and `statement_timeout` set to the time
//! left, so a lock wait the caller gave up on ends server-side as well.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use super::{Queries, Store, StoreError, TxHandle};
use crate::context::TxContext;
use crate::db::Database;
use crate::models::{Account, AccountId, Entry, NewAccount, Transfer};

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";

/// Transaction source backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn from_database(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<PgTx, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(PgTx { tx })
    }

    async fn begin_with(&self, ctx: &TxContext) -> Result<PgTx, StoreError> {
        let mut tx = self.begin().await?;
        if let Some(remaining) = ctx.remaining() {
            tx.bound_waits(timeout_millis(remaining)).await?;
        }
        Ok(tx)
    }
}

/// Postgres reads `0` as "no timeout", so an expired budget becomes 1ms
fn timeout_millis(remaining: std::time::Duration) -> i64 {
    remaining.as_millis().clamp(1, i32::MAX as u128) as i64
}

/// One open PostgreSQL transaction
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    /// Transaction-local lock and statement timeouts, in milliseconds
    async fn bound_waits(&mut self, millis: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            SELECT set_config('lock_timeout', $1, true),
                   set_config('statement_timeout', $1, true)
            "#,
        )
        .bind(millis.to_string())
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Queries for PgTx {
    async fn get_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(account)
    }

    async fn get_account_for_update(
        &mut self,
        id: AccountId,
    ) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE id = $1 FOR NO KEY UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(account)
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, StoreError> {
        sqlx::query_as::<_, Account>(&format!(
            "UPDATE accounts SET balance = balance + $2 WHERE id = $1 RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(StoreError::RowNotFound {
            table: "accounts",
            id,
        })
    }

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: i64,
    ) -> Result<Entry, StoreError> {
        let entry = sqlx::query_as::<_, Entry>(
            r#"
            INSERT INTO entries (account_id, amount)
            VALUES ($1, $2)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(entry)
    }

    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> Result<Transfer, StoreError> {
        let transfer = sqlx::query_as::<_, Transfer>(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount)
            VALUES ($1, $2, $3)
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(from_account_id)
        .bind(to_account_id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(transfer)
    }

    async fn create_account(&mut self, params: &NewAccount) -> Result<Account, StoreError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3) RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(&params.owner)
        .bind(params.balance)
        .bind(&params.currency)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(account)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Option<Transfer>, StoreError> {
        let transfer = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(transfer)
    }

    async fn list_entries(&mut self, account_id: AccountId) -> Result<Vec<Entry>, StoreError> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT id, account_id, amount, created_at
            FROM entries
            WHERE account_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(entries)
    }
}

#[async_trait]
impl TxHandle for PgTx {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
