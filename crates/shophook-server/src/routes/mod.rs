//! HTTP route handlers.

pub mod health;
pub mod jobs;
pub mod orders;
pub mod webhooks;

use axum::{
    Router,
    middleware as axum_mw,
    routing::{get, post},
};

use crate::middleware::require_ops;
use crate::state::AppState;

/// Public routes: health, version and signature-verified webhooks.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/version", get(health::version))
        .route("/webhooks/shopify", post(webhooks::handle_topic_webhook))
        .route("/webhooks/shopify/orders", post(webhooks::handle_order_webhook))
        .route("/webhooks/shopify/refunds", post(webhooks::handle_refund_webhook))
        .route(
            "/webhooks/shopify/fulfillments",
            post(webhooks::handle_fulfillment_webhook),
        )
        .with_state(state)
}

/// Ops routes behind the bearer-token middleware.
pub fn ops_router(state: AppState) -> Router {
    let ops_config = state.ops_auth_config.clone();

    Router::new()
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/stats", get(jobs::job_stats))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}/retry", post(jobs::retry_job))
        .route("/orders/{id}", get(orders::get_order))
        .layer(axum_mw::from_fn_with_state(ops_config, require_ops))
        .with_state(state)
}

/// The full application, mounted under `/api`.
pub fn app(state: AppState) -> Router {
    Router::new().nest("/api", api_router(state.clone()).merge(ops_router(state)))
}
