//! HTTP Handlers

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use credit_payments::{
    webhook::SIGNATURE_HEADER, CheckoutRequest, CheckoutStarted, Transaction, Verification,
    WebhookOutcome,
};

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub store: &'static str,
    pub provider: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn root() -> &'static str {
    "Backend is running!"
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Server running successfully",
        version: env!("CARGO_PKG_VERSION"),
        store: state.store_kind,
        provider: state.provider_name.clone(),
    })
}

/// Record a pending transaction and open a hosted checkout for it
pub async fn create_checkout(
    State(state): State<AppState>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<CheckoutStarted>, AppError> {
    let request = json_body(payload)?;
    let started = state.checkout.create(request).await.map_err(AppError::checkout)?;
    Ok(Json(started))
}

/// Client-driven reconciliation after returning from the hosted page
pub async fn verify_payment(
    State(state): State<AppState>,
    payload: Result<Json<VerifyPaymentRequest>, JsonRejection>,
) -> Result<Json<Verification>, AppError> {
    let session_id = json_body(payload)?
        .session_id
        .ok_or_else(|| AppError::Validation("sessionId is required".into()))?;

    let verification = state
        .reconciler
        .verify_payment(&session_id)
        .await
        .map_err(AppError::verification)?;

    Ok(Json(verification))
}

/// Most recent transactions, newest first
pub async fn list_transactions(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<Transaction>>, AppError> {
    let Query(params) =
        params.map_err(|rejection| AppError::Validation(rejection.body_text()))?;

    let transactions = match params.limit {
        Some(limit) => state.lister.recent_limited(limit).await,
        None => state.lister.recent().await,
    }
    .map_err(AppError::ListingFailed)?;

    Ok(Json(transactions))
}

/// Stripe webhook handler; takes the raw body so the signature covers exactly
/// what was sent
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state
        .reconciler
        .handle_webhook(&body, signature)
        .await
        .map_err(AppError::InvalidSignature)?;

    if let WebhookOutcome::StoreFailed { session_id } = &outcome {
        tracing::warn!(session_id = %session_id, "Acknowledging webhook despite store failure");
    }

    Ok(Json(WebhookAck { received: true }))
}
