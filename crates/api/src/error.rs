//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::StockError;
use ledger::LedgerError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// The request carries no usable actor identity.
    Unauthorized(String),
    /// Stock mutation error.
    Stock(StockError),
    /// Ledger read error.
    Ledger(LedgerError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Stock(err) => stock_error_to_response(err),
            ApiError::Ledger(err) => ledger_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn stock_error_to_response(err: StockError) -> (StatusCode, String) {
    match &err {
        StockError::InsufficientStock { .. } => (StatusCode::CONFLICT, err.to_string()),
        StockError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        StockError::InvalidChange(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        StockError::Storage(source) => {
            tracing::warn!(error = %source, "stock change failed in storage");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
    }
}

fn ledger_error_to_response(err: LedgerError) -> (StatusCode, String) {
    match &err {
        LedgerError::ProductNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        LedgerError::ConstraintViolation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        _ if err.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => {
            tracing::error!(error = %err, "ledger read failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<StockError> for ApiError {
    fn from(err: StockError) -> Self {
        ApiError::Stock(err)
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_stock_errors_map_to_statuses() {
        let id = ProductId::new();
        assert_eq!(
            status_of(
                StockError::InsufficientStock {
                    product_id: id,
                    available: 1,
                    requested: 2,
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(StockError::NotFound(id).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(StockError::InvalidChange("zero".to_string()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(StockError::Storage(LedgerError::LockTimeout).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_ledger_errors_map_to_statuses() {
        assert_eq!(
            status_of(LedgerError::Unavailable("down".to_string()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(LedgerError::Decode("bad row".to_string()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
