//! Route handlers.

pub mod health;
pub mod metrics;
pub mod movements;
pub mod notifications;
pub mod products;
pub mod ws;

use std::str::FromStr;

use crate::error::ApiError;

/// Parses a UUID path segment into one of the identifier newtypes.
pub(crate) fn parse_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = uuid::Error>,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
