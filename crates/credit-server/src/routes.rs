//! Router

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::Config;
use crate::cors::create_cors_layer;
use crate::handlers::{
    create_checkout, health_check, list_transactions, root, stripe_webhook, verify_payment,
};
use crate::rate_limit::limit_checkout;
use crate::state::AppState;

pub fn create_router(state: AppState, config: &Config) -> Router {
    let checkout_limit =
        middleware::from_fn_with_state(state.checkout_rate_limit.clone(), limit_checkout);

    let api = Router::new()
        .route("/health", get(health_check))
        .route(
            "/create-checkout-session",
            post(create_checkout).route_layer(checkout_limit),
        )
        .route("/verify-payment", post(verify_payment))
        .route("/transactions", get(list_transactions))
        .route("/webhook", post(stripe_webhook));

    Router::new()
        .route("/", get(root))
        .nest("/api", api)
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(create_cors_layer(&config.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
