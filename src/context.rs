//! Operation context: cancellation plus an optional deadline
//!
//! Every ledger operation takes a [`TxContext`]. Cancelling it (or passing
//! its deadline) aborts the operation; an open transaction is rolled back
//! before the error is returned.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::LedgerError;

#[derive(Debug, Clone, Default)]
pub struct TxContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl TxContext {
    /// Context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Child context whose deadline is at most `timeout` from now
    ///
    /// Cancelling the parent cancels the child, not the other way round.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child context with the earlier of the parent's and the given deadline
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Child context sharing the parent's deadline
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// `Some` once the context is done, naming why
    pub fn err(&self) -> Option<LedgerError> {
        if self.token.is_cancelled() {
            Some(LedgerError::Cancelled)
        } else if self.deadline.is_some_and(|d| d <= Instant::now()) {
            Some(LedgerError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves when the context is cancelled or its deadline passes
    pub async fn done(&self) -> LedgerError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => LedgerError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => LedgerError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                LedgerError::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_live() {
        let ctx = TxContext::background();
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());
    }

    #[tokio::test]
    async fn test_parent_cancel_reaches_child() {
        let parent = TxContext::background();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.done().await, LedgerError::Cancelled));
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent() {
        let parent = TxContext::background();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let ctx = TxContext::background().with_timeout(Duration::from_millis(10));
        assert!(ctx.err().is_none());
        assert!(matches!(ctx.done().await, LedgerError::DeadlineExceeded));
        assert!(matches!(ctx.err(), Some(LedgerError::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_counts_down_to_zero() {
        assert!(TxContext::background().remaining().is_none());

        let ctx = TxContext::background().with_timeout(Duration::from_millis(100));
        assert_eq!(ctx.remaining(), Some(Duration::from_millis(100)));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_child_keeps_earlier_deadline() {
        let parent = TxContext::background().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }
}
