//! HTTP routes

pub mod billing;
pub mod payments;
#[cfg(test)]
mod route_tests;
pub mod subscriptions;

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::{auth::require_auth, state::AppState};

pub fn create_router(state: AppState) -> Router {
    // Authenticated endpoints; the owner role is checked per handler
    let protected = Router::new()
        .route("/api/v1/payments/reference", post(payments::create_reference))
        .route(
            "/api/v1/subscriptions/unlock",
            post(subscriptions::confirm_unlock),
        )
        .route(
            "/api/v1/billing/subscription",
            get(billing::get_subscription),
        )
        .route("/api/v1/billing/capacity", get(billing::get_capacity))
        .route_layer(middleware::from_fn_with_state(
            state.auth_state(),
            require_auth,
        ));

    Router::new()
        .route("/health", get(health))
        // Gateway callback: authenticated by the event checksum, not a token
        .route("/api/v1/payments/webhook", post(payments::webhook))
        .merge(protected)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
