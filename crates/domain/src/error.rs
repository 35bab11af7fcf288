//! Stock mutation error types.

use common::ProductId;
use ledger::LedgerError;
use thiserror::Error;

/// Errors returned by the stock mutation engine.
#[derive(Debug, Error)]
pub enum StockError {
    /// Applying the change would take the quantity below zero.
    #[error(
        "Insufficient stock for product {product_id}: available {available}, requested {requested}"
    )]
    InsufficientStock {
        product_id: ProductId,
        available: i64,
        requested: i64,
    },

    /// The product does not exist.
    #[error("Product not found: {0}")]
    NotFound(ProductId),

    /// The request itself is malformed (zero delta, overflow, bad product fields).
    #[error("Invalid stock change: {0}")]
    InvalidChange(String),

    /// The transaction could not be completed. Nothing was committed.
    #[error("Storage error: {0}")]
    Storage(#[source] LedgerError),
}

impl StockError {
    /// Returns true if the caller may safely retry the whole call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StockError::Storage(_))
    }

    /// Label used for the `outcome` metric dimension.
    pub fn outcome(&self) -> &'static str {
        match self {
            StockError::InsufficientStock { .. } => "insufficient_stock",
            StockError::NotFound(_) => "not_found",
            StockError::InvalidChange(_) => "invalid",
            StockError::Storage(_) => "storage_error",
        }
    }
}

impl From<LedgerError> for StockError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::ProductNotFound(product_id) => StockError::NotFound(product_id),
            other => StockError::Storage(other),
        }
    }
}

/// Result type for stock operations.
pub type Result<T> = std::result::Result<T, StockError>;
