//! Movement log endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use common::{MovementId, ProductId};
use ledger::{LedgerStore, MovementQuery, MovementReason, StockMovement};
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::error::ApiError;
use crate::{AppState, AppStore};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Default, Deserialize)]
pub struct MovementParams {
    pub reason: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl MovementParams {
    fn into_query(self, product_id: ProductId) -> Result<MovementQuery, ApiError> {
        let mut query = MovementQuery::for_product(product_id)
            .limit(self.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE))
            .offset(self.offset.unwrap_or(0));
        if let Some(reason) = self.reason {
            let reason: MovementReason = reason
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("Invalid reason: {reason}")))?;
            query = query.reason(reason);
        }
        if let Some(from) = self.from {
            query = query.from_timestamp(from);
        }
        if let Some(to) = self.to {
            query = query.to_timestamp(to);
        }
        Ok(query)
    }
}

#[derive(Serialize)]
pub struct MovementResponse {
    pub id: String,
    pub product_id: String,
    pub delta: i64,
    pub reason: MovementReason,
    pub actor_id: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<StockMovement> for MovementResponse {
    fn from(movement: StockMovement) -> Self {
        Self {
            id: movement.id.to_string(),
            product_id: movement.product_id.to_string(),
            delta: movement.delta,
            reason: movement.reason,
            actor_id: movement.actor_id.to_string(),
            notes: movement.notes,
            created_at: movement.created_at,
        }
    }
}

/// GET /products/:id/movements: a product's movement log, newest first.
#[tracing::instrument(skip(state, params))]
pub async fn list_for_product<S: AppStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Query(params): Query<MovementParams>,
) -> Result<Json<Vec<MovementResponse>>, ApiError> {
    let product_id: ProductId = parse_id(&id)?;
    let query = params.into_query(product_id)?;

    if state.store().get_product(product_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Product {id} not found")));
    }

    let movements = state.store().list_movements(query).await?;
    Ok(Json(
        movements.into_iter().map(MovementResponse::from).collect(),
    ))
}

/// GET /movements/:id: load one movement.
#[tracing::instrument(skip(state))]
pub async fn get<S: AppStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<MovementResponse>, ApiError> {
    let movement_id: MovementId = parse_id(&id)?;
    let movement = state
        .store()
        .get_movement(movement_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Movement {id} not found")))?;

    Ok(Json(movement.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paging() {
        let query = MovementParams::default()
            .into_query(ProductId::new())
            .unwrap();
        assert_eq!(query.limit, Some(DEFAULT_PAGE_SIZE));
        assert_eq!(query.offset, Some(0));
    }

    #[test]
    fn test_page_size_is_capped() {
        let params = MovementParams {
            limit: Some(10_000),
            ..Default::default()
        };
        let query = params.into_query(ProductId::new()).unwrap();
        assert_eq!(query.limit, Some(MAX_PAGE_SIZE));
    }

    #[test]
    fn test_unknown_reason_is_rejected() {
        let params = MovementParams {
            reason: Some("theft".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            params.into_query(ProductId::new()),
            Err(ApiError::BadRequest(_))
        ));
    }
}
