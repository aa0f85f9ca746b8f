//! Transfer Stage Definitions
//!
//! ```text
//! Validated → TransferCreated → EntriesCreated → BalancesAdjusted → Committed
//!     ↓                  (any failure in transaction)
//! RejectedPreTransaction                 ↓
//!                                    RolledBack
//! ```

use std::fmt;

use crate::error::LedgerError;

/// Progress of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStage {
    /// Preconditions hold, no transaction yet
    Validated,

    TransferCreated,

    EntriesCreated,

    BalancesAdjusted,

    /// Terminal: all rows durable
    Committed,

    /// Terminal: transaction aborted, no row changed
    RolledBack,

    /// Terminal: rejected before anything could be written
    RejectedPreTransaction,
}

impl TransferStage {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStage::Committed
                | TransferStage::RolledBack
                | TransferStage::RejectedPreTransaction
        )
    }

    /// Terminal stage a failed transfer ended in
    ///
    /// Validation and funds checks run before the first write, so they end
    /// as rejections. So does a transaction that never opened. Cancellation
    /// and deadlines count as `RolledBack`: a context already done before
    /// the transfer starts is rejected by the caller without reaching here,
    /// and one that ends while `begin` is in flight may leave a half-open
    /// transaction that the backend rolls back.
    pub fn for_failure(err: &LedgerError) -> Self {
        match err.root_cause() {
            LedgerError::Validation(_)
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::TransactionOpen(_) => TransferStage::RejectedPreTransaction,
            _ => TransferStage::RolledBack,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStage::Validated => "VALIDATED",
            TransferStage::TransferCreated => "TRANSFER_CREATED",
            TransferStage::EntriesCreated => "ENTRIES_CREATED",
            TransferStage::BalancesAdjusted => "BALANCES_ADJUSTED",
            TransferStage::Committed => "COMMITTED",
            TransferStage::RolledBack => "ROLLED_BACK",
            TransferStage::RejectedPreTransaction => "REJECTED_PRE_TRANSACTION",
        }
    }
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
