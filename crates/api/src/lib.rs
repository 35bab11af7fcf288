//! HTTP and websocket server for the inventory ledger.
//!
//! Provides REST endpoints for products, stock changes and the movement log,
//! a websocket endpoint streaming live stock events, structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{AlertDeriver, StockMutationEngine};
use hub::{Hub, HubHandle, NotificationDispatcher, SessionConfig};
use ledger::{LedgerStore, NotificationStore};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// A ledger backend the server can run on.
pub trait AppStore: LedgerStore + NotificationStore + Clone + 'static {}

impl<T: LedgerStore + NotificationStore + Clone + 'static> AppStore for T {}

/// Shared application state accessible from all handlers.
pub struct AppState<S: AppStore> {
    pub engine: StockMutationEngine<S>,
    pub hub: HubHandle,
    pub session_config: SessionConfig,
}

impl<S: AppStore> AppState<S> {
    pub fn store(&self) -> &S {
        self.engine.store()
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: AppStore>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/products", post(routes::products::create::<S>))
        .route("/products/low-stock", get(routes::products::low_stock::<S>))
        .route("/products/{id}", get(routes::products::get::<S>))
        .route("/products/{id}/stock", post(routes::products::change_stock::<S>))
        .route("/products/{id}/audit", get(routes::products::audit::<S>))
        .route(
            "/products/{id}/movements",
            get(routes::movements::list_for_product::<S>),
        )
        .route("/movements/{id}", get(routes::movements::get::<S>))
        .route("/notifications", get(routes::notifications::unread::<S>))
        .route(
            "/notifications/{id}/read",
            post(routes::notifications::mark_read::<S>),
        )
        .route("/ws", get(routes::ws::connect::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state: spawns the hub and the notification
/// dispatcher and wires both into the mutation engine.
///
/// Returns the hub's task so the caller can wait for it after shutdown.
pub fn create_default_state<S: AppStore>(
    store: S,
    config: &Config,
) -> (Arc<AppState<S>>, JoinHandle<()>) {
    let (hub, hub_task) = Hub::spawn(config.hub_config());

    let (deriver, alerts) = AlertDeriver::new();
    let _dispatcher = NotificationDispatcher::new(store.clone(), hub.clone()).spawn(alerts);

    let engine = StockMutationEngine::with_config(store, config.engine_config())
        .with_sink(Arc::new(hub.clone()))
        .with_sink(Arc::new(deriver));

    let state = Arc::new(AppState {
        engine,
        hub,
        session_config: config.session_config(),
    });

    (state, hub_task)
}
