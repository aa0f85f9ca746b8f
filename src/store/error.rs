//! Store Error Types

use thiserror::Error;

/// SQLSTATE for `serialization_failure`
pub const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE for `deadlock_detected`
pub const SQLSTATE_DEADLOCK_DETECTED: &str = "40P01";

/// Failure reported by a store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Row not found: {table} id={id}")]
    RowNotFound { table: &'static str, id: i64 },
}

impl StoreError {
    /// Whether the same unit of work may succeed if simply run again
    ///
    /// Only store-level serialization conflicts and detected deadlocks
    /// qualify. Connection or constraint failures do not.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Database(db)) => matches!(
                db.code().as_deref(),
                Some(SQLSTATE_SERIALIZATION_FAILURE) | Some(SQLSTATE_DEADLOCK_DETECTED)
            ),
            StoreError::SerializationFailure(_) => true,
            _ => false,
        }
    }
}
