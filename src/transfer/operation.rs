//! Transfer algorithm
//!
//! Runs inside an open transaction. Both accounts are locked in ascending id
//! order whatever the direction of the transfer, and the balance updates are
//! issued in that same order, so two transfers over the same pair of
//! accounts always queue on the same row first and can never wait on each
//! other in a cycle.

use tracing::debug;

use super::state::TransferStage;
use crate::error::{LedgerError, ValidationError};
use crate::models::{AccountId, TransferResult};
use crate::store::Queries;

/// Preconditions checked before any transaction is opened
pub fn validate_transfer(
    from_account_id: AccountId,
    to_account_id: AccountId,
    amount: i64,
) -> Result<(), ValidationError> {
    if from_account_id == to_account_id {
        return Err(ValidationError::SameAccount);
    }
    if amount <= 0 {
        return Err(ValidationError::NonPositiveAmount(amount));
    }
    Ok(())
}

/// Global lock order for a pair of accounts: lower id first
#[inline]
pub fn lock_order(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Move `amount` from one account to another through `q`
///
/// Callers must have validated the arguments and must run this inside a
/// transaction they roll back on `Err`; nothing here undoes earlier writes.
pub async fn transfer_tx<Q>(
    q: &mut Q,
    from_account_id: AccountId,
    to_account_id: AccountId,
    amount: i64,
) -> Result<TransferResult, LedgerError>
where
    Q: Queries + ?Sized,
{
    let (first_id, second_id) = lock_order(from_account_id, to_account_id);
    let first = q
        .get_account_for_update(first_id)
        .await?
        .ok_or(LedgerError::AccountNotFound(first_id))?;
    let second = q
        .get_account_for_update(second_id)
        .await?
        .ok_or(LedgerError::AccountNotFound(second_id))?;

    let source_first = first_id == from_account_id;
    let (source, destination) = if source_first {
        (&first, &second)
    } else {
        (&second, &first)
    };

    if source.currency != destination.currency {
        return Err(LedgerError::CurrencyMismatch {
            from: source.currency.clone(),
            to: destination.currency.clone(),
        });
    }
    if source.balance < amount {
        return Err(LedgerError::InsufficientFunds {
            account_id: source.id,
            balance: source.balance,
            amount,
        });
    }
    if destination.balance.checked_add(amount).is_none() {
        return Err(LedgerError::BalanceOverflow {
            account_id: destination.id,
        });
    }

    let transfer = q
        .create_transfer(from_account_id, to_account_id, amount)
        .await?;
    debug!(
        transfer_id = transfer.id,
        stage = %TransferStage::TransferCreated,
        "Transfer recorded"
    );

    let from_entry = q.create_entry(from_account_id, -amount).await?;
    let to_entry = q.create_entry(to_account_id, amount).await?;
    debug!(
        transfer_id = transfer.id,
        stage = %TransferStage::EntriesCreated,
        from_entry_id = from_entry.id,
        to_entry_id = to_entry.id,
        "Entries recorded"
    );

    let (first_delta, second_delta) = if source_first {
        (-amount, amount)
    } else {
        (amount, -amount)
    };
    let first_after = q.add_account_balance(first_id, first_delta).await?;
    let second_after = q.add_account_balance(second_id, second_delta).await?;
    debug!(
        transfer_id = transfer.id,
        stage = %TransferStage::BalancesAdjusted,
        "Balances adjusted"
    );

    let (from_account, to_account) = if source_first {
        (first_after, second_after)
    } else {
        (second_after, first_after)
    };

    Ok(TransferResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewAccount;
    use crate::store::{MemoryStore, Store, TxHandle};

    #[test]
    fn test_validation() {
        assert_eq!(validate_transfer(1, 1, 10), Err(ValidationError::SameAccount));
        assert_eq!(
            validate_transfer(1, 2, 0),
            Err(ValidationError::NonPositiveAmount(0))
        );
        assert_eq!(
            validate_transfer(1, 2, -3),
            Err(ValidationError::NonPositiveAmount(-3))
        );
        assert_eq!(validate_transfer(2, 1, 1), Ok(()));
    }

    #[test]
    fn test_lock_order_ignores_direction() {
        assert_eq!(lock_order(1, 2), (1, 2));
        assert_eq!(lock_order(2, 1), (1, 2));
        assert_eq!(lock_order(-5, 3), (-5, 3));
    }

    #[tokio::test]
    async fn test_reverse_direction_maps_result_sides() {
        let store = MemoryStore::new();
        let low = store.seed_account(NewAccount::new("low", "EUR", 10));
        let high = store.seed_account(NewAccount::new("high", "EUR", 100));

        let mut tx = store.begin().await.unwrap();
        let result = transfer_tx(&mut tx, high.id, low.id, 40).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(result.from_account.id, high.id);
        assert_eq!(result.from_account.balance, 60);
        assert_eq!(result.to_account.id, low.id);
        assert_eq!(result.to_account.balance, 50);
        assert_eq!(result.from_entry.account_id, high.id);
        assert_eq!(result.from_entry.amount, -40);
        assert_eq!(result.to_entry.account_id, low.id);
        assert_eq!(result.to_entry.amount, 40);
        assert_eq!(result.transfer.from_account_id, high.id);
    }

    #[tokio::test]
    async fn test_works_through_trait_object() {
        let store = MemoryStore::new();
        let a = store.seed_account(NewAccount::new("a", "USD", 5));
        let b = store.seed_account(NewAccount::new("b", "USD", 0));

        let mut tx = store.begin().await.unwrap();
        let q: &mut dyn Queries = &mut tx;
        let result = transfer_tx(q, a.id, b.id, 5).await.unwrap();
        assert_eq!(result.from_account.balance, 0);
        tx.rollback().await.unwrap();
        assert_eq!(store.account(a.id).unwrap().balance, 5);
    }
}
