use common::ProductId;
use thiserror::Error;

/// Errors that can occur when interacting with the ledger store.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The referenced product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// Waiting for a row lock exceeded the configured bound.
    #[error("Timed out waiting for row lock")]
    LockTimeout,

    /// A schema invariant was violated at the storage boundary.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A write was attempted on a product row the transaction has not locked.
    #[error("Product row {0} is not locked by this transaction")]
    RowNotLocked(ProductId),

    /// The store could not be reached or refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded into a model type.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl LedgerError {
    /// Returns true if the failure is transient and the whole operation may be
    /// retried from the start.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::LockTimeout | LedgerError::Unavailable(_) | LedgerError::Database(_)
        )
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
