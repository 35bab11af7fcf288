//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::{AppState, AppStore};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connected_clients: usize,
}

/// GET /health: returns system health status.
///
/// Reports `degraded` once the hub has stopped, since live updates are no
/// longer delivered.
pub async fn check<S: AppStore>(State(state): State<Arc<AppState<S>>>) -> Json<HealthResponse> {
    let status = if state.hub.is_closed() { "degraded" } else { "ok" };
    Json(HealthResponse {
        status,
        connected_clients: state.hub.stats().connected,
    })
}
