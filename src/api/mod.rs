//! API module
//!
//! Operator-only HTTP surface over the outbox. Not a business API.

pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::{http::HeaderName, middleware as axum_middleware, routing::get, Router};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::store::OutboxStore;

pub use routes::create_router;

/// Shared state for admin handlers
#[derive(Clone)]
pub struct AppState {
    pub outbox: Arc<dyn OutboxStore>,
}

impl AppState {
    pub fn new<S: OutboxStore + 'static>(outbox: S) -> Self {
        Self {
            outbox: Arc::new(outbox),
        }
    }
}

/// Build the full admin application
pub fn build_router(state: AppState) -> Router {
    let request_id = HeaderName::from_static("x-request-id");

    // Layers run bottom-up: request id is set before logging sees it
    let api_routes = create_router().layer(axum_middleware::from_fn(middleware::logging_middleware));

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
