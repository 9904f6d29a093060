//! Payment Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Missing or malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transaction store unavailable or query failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Payment provider API failure or malformed response
    #[error("Provider error: {0}")]
    Provider(String),

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    Signature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Session reference already bound to a different transaction
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PaymentError {
    /// Check if this error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider(_) | Self::Storage(_))
    }

    /// Get user-friendly message
    pub const fn user_message(&self) -> &str {
        match self {
            Self::Validation(_) => "The request is missing required fields.",
            Self::Provider(_) => "Payment processing failed. Please try again.",
            Self::Signature(_) | Self::WebhookParse(_) => "Webhook could not be verified.",
            Self::Config(_) => "Service configuration error.",
            _ => "An error occurred processing your request.",
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for PaymentError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
