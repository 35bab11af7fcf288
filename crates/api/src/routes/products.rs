//! Product and stock change endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::ProductId;
use domain::{ReplayCheck, Severity, StockChange};
use ledger::{LedgerStore, MovementReason, NewProduct, Product};
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::error::ApiError;
use crate::extract::RequestActor;
use crate::{AppState, AppStore};

// -- Request types --

#[derive(Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub sku: String,
    #[serde(default)]
    pub price_cents: i64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub minimum_threshold: i64,
    /// Opening stock, recorded as a purchase movement.
    #[serde(default)]
    pub stock: i64,
}

#[derive(Deserialize)]
pub struct StockChangeRequest {
    pub change: i64,
    pub reason: String,
    pub notes: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub sku: String,
    pub quantity: i64,
    pub minimum_threshold: i64,
    pub price_cents: i64,
    pub category: String,
    pub low_stock: bool,
    pub severity: Option<Severity>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        let low_stock = product.is_low_stock();
        Self {
            id: product.id.to_string(),
            severity: low_stock.then(|| Severity::for_quantity(product.quantity)),
            low_stock,
            name: product.name,
            sku: product.sku,
            quantity: product.quantity,
            minimum_threshold: product.minimum_threshold,
            price_cents: product.price_cents,
            category: product.category,
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct StockChangeResponse {
    pub new_quantity: i64,
    pub movement_id: String,
}

// -- Handlers --

/// POST /products: create a product with optional opening stock.
#[tracing::instrument(skip(state, req), fields(sku = %req.sku))]
pub async fn create<S: AppStore>(
    State(state): State<Arc<AppState<S>>>,
    RequestActor(actor): RequestActor,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), ApiError> {
    let mut product = NewProduct::new(req.name, req.sku)
        .minimum_threshold(req.minimum_threshold)
        .price_cents(req.price_cents);
    if let Some(category) = req.category.filter(|c| !c.trim().is_empty()) {
        product = product.category(category);
    }
    product
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let product = state
        .engine
        .create_product(product, req.stock, actor)
        .await?;

    Ok((StatusCode::CREATED, Json(product.into())))
}

/// GET /products/:id: load one product.
#[tracing::instrument(skip(state))]
pub async fn get<S: AppStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product_id: ProductId = parse_id(&id)?;
    let product = state
        .store()
        .get_product(product_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Product {id} not found")))?;

    Ok(Json(product.into()))
}

/// GET /products/low-stock: products at or below their threshold.
#[tracing::instrument(skip(state))]
pub async fn low_stock<S: AppStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<ProductResponse>>, ApiError> {
    let products = state.store().low_stock_products().await?;
    Ok(Json(products.into_iter().map(ProductResponse::from).collect()))
}

/// POST /products/:id/stock: apply a signed quantity change.
#[tracing::instrument(skip(state, req), fields(change = req.change, reason = %req.reason))]
pub async fn change_stock<S: AppStore>(
    State(state): State<Arc<AppState<S>>>,
    RequestActor(actor): RequestActor,
    Path(id): Path<String>,
    Json(req): Json<StockChangeRequest>,
) -> Result<Json<StockChangeResponse>, ApiError> {
    let product_id: ProductId = parse_id(&id)?;
    let reason: MovementReason = req
        .reason
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid reason: {}", req.reason)))?;

    let mut change = StockChange::new(product_id, req.change, reason, actor);
    if let Some(notes) = req.notes.filter(|n| !n.trim().is_empty()) {
        change = change.notes(notes);
    }

    let outcome = state.engine.apply_stock_change(change).await?;

    Ok(Json(StockChangeResponse {
        new_quantity: outcome.new_quantity,
        movement_id: outcome.movement_id.to_string(),
    }))
}

/// GET /products/:id/audit: compare the stored quantity with the movement log.
#[tracing::instrument(skip(state))]
pub async fn audit<S: AppStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ReplayCheck>, ApiError> {
    let product_id: ProductId = parse_id(&id)?;
    Ok(Json(state.engine.verify_replay(product_id).await?))
}
