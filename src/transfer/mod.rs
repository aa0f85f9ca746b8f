//! Account Transfers
//!
//! A transfer moves `amount` minor units from one account to another as one
//! unit of work: one Transfer row, one debit and one credit Entry, and two
//! balance adjustments, all committed together or not at all.
//!
//! # Deadlock Avoidance
//!
//! Row locks are always taken lower account id first, independent of the
//! transfer's direction (see [`lock_order`]). Concurrent `A → B` and `B → A`
//! transfers therefore queue on the same row instead of each holding one
//! lock and waiting for the other.

pub mod operation;
pub mod retry;
pub mod state;


pub use operation::{lock_order, transfer_tx, validate_transfer};
pub use state::TransferStage;
