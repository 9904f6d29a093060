//! HTTP error mapping
//!
//! Every failure is logged here with full detail; clients only get a generic
//! message and a stable code.

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use credit_payments::PaymentError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Checkout creation failed: {0}")]
    CheckoutCreationFailed(PaymentError),

    #[error("Payment verification failed: {0}")]
    VerificationFailed(PaymentError),

    #[error("Transaction listing failed: {0}")]
    ListingFailed(PaymentError),

    #[error("Webhook rejected: {0}")]
    InvalidSignature(PaymentError),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
}

impl AppError {
    pub fn checkout(err: PaymentError) -> Self {
        match err {
            PaymentError::Validation(msg) => Self::Validation(msg),
            other => Self::CheckoutCreationFailed(other),
        }
    }

    pub fn verification(err: PaymentError) -> Self {
        match err {
            PaymentError::Validation(msg) => Self::Validation(msg),
            other => Self::VerificationFailed(other),
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidSignature(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::CheckoutCreationFailed(_)
            | Self::VerificationFailed(_)
            | Self::ListingFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::CheckoutCreationFailed(_) => "CHECKOUT_ERROR",
            Self::VerificationFailed(_) => "VERIFICATION_ERROR",
            Self::ListingFailed(_) => "LISTING_ERROR",
            Self::InvalidSignature(_) => "INVALID_SIGNATURE",
            Self::RateLimited { .. } => "RATE_LIMITED",
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::CheckoutCreationFailed(_) => "Failed to create checkout session".into(),
            Self::VerificationFailed(_) => "Failed to verify payment".into(),
            Self::ListingFailed(_) => "Failed to fetch transactions".into(),
            Self::InvalidSignature(_) => "Webhook signature verification failed".into(),
            Self::RateLimited { .. } => {
                "Too many checkout requests, please try again later".into()
            }
        }
    }

    fn log(&self) {
        match self {
            Self::Validation(msg) => tracing::info!(message = %msg, "Rejected invalid request"),
            Self::InvalidSignature(e) => tracing::warn!(error = %e, "Webhook signature failed"),
            Self::RateLimited { retry_after } => {
                tracing::warn!(retry_after_secs = retry_after.as_secs(), "Checkout rate limited");
            }
            Self::CheckoutCreationFailed(e) | Self::VerificationFailed(e) | Self::ListingFailed(e) => {
                tracing::error!(error = %e, code = self.code(), "Request failed");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();

        let body = ErrorResponse {
            error: self.public_message(),
            code: self.code().into(),
        };
        let mut response = (self.status_code(), Json(body)).into_response();

        if let Self::RateLimited { retry_after } = self {
            // Round up so clients never retry early
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}
