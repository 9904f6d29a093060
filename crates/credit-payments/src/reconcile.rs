//! Payment Reconciliation
//!
//! Two independent paths drive a transaction out of `pending`:
//!
//! ```text
//! client ── verify(session_id) ──▶ provider lookup ──┐
//!                                                    ├──▶ store.settle(session_id, status)
//! Stripe ── webhook(body, sig) ──▶ HMAC check ───────┘
//! ```
//!
//! Both end in the same keyed overwrite, so any number of deliveries over
//! either path converge on one record with one terminal status.

use std::sync::Arc;

use serde::Serialize;

use crate::error::{PaymentError, Result};
use crate::provider::{PaymentProvider, SessionSnapshot};
use crate::transaction::{TransactionStatus, TransactionStore};
use crate::webhook::WebhookVerifier;

/// Result of a client-initiated verification
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub success: bool,
    pub session: Option<SessionSnapshot>,
}

/// What a verified webhook delivery did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Settlement applied; `matched` is false when no record had the reference
    Settled {
        session_id: String,
        status: TransactionStatus,
        matched: bool,
    },

    /// Store update failed after verification; still acknowledged
    StoreFailed { session_id: String },

    /// Event type we do not act on
    Ignored { event_type: String },
}

/// Applies provider payment state to transaction records
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn TransactionStore>,
    provider: Arc<dyn PaymentProvider>,
    verifier: WebhookVerifier,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        provider: Arc<dyn PaymentProvider>,
        verifier: WebhookVerifier,
    ) -> Self {
        Self {
            store,
            provider,
            verifier,
        }
    }

    /// Synchronous verification: ask the provider, complete the record if paid
    pub async fn verify_payment(&self, session_id: &str) -> Result<Verification> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(PaymentError::Validation("sessionId is required".into()));
        }

        let Some(session) = self.provider.retrieve_session(session_id).await? else {
            tracing::info!(session_id = %session_id, "Verification for unknown session");
            return Ok(Verification {
                success: false,
                session: None,
            });
        };

        if !session.is_paid() {
            tracing::debug!(
                session_id = %session_id,
                payment_status = ?session.payment_status,
                "Session not paid yet"
            );
            return Ok(Verification {
                success: false,
                session: Some(session),
            });
        }

        let matched = self
            .store
            .settle(session_id, TransactionStatus::Completed)
            .await?;

        if matched {
            tracing::info!(session_id = %session_id, "Payment verified, transaction completed");
        } else {
            tracing::warn!(session_id = %session_id, "Paid session has no matching transaction");
        }

        Ok(Verification {
            success: true,
            session: Some(session),
        })
    }

    /// Asynchronous webhook delivery.
    ///
    /// Errors only when the delivery cannot be authenticated or decoded.
    /// Store failures after that point are logged and reported through the
    /// outcome so the provider still gets its acknowledgment.
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome> {
        let signature =
            signature.ok_or_else(|| PaymentError::Signature("missing signature header".into()))?;

        let verified = self.verifier.verify(payload, signature)?;

        tracing::info!(
            event_id = %verified.id,
            event_type = verified.event.event_type(),
            "Processing Stripe webhook"
        );

        let Some((session_id, status)) = verified.event.settlement() else {
            tracing::debug!(event_type = verified.event.event_type(), "Unhandled webhook event");
            return Ok(WebhookOutcome::Ignored {
                event_type: verified.event.event_type().to_string(),
            });
        };

        match self.store.settle(session_id, status).await {
            Ok(matched) => {
                if matched {
                    tracing::info!(
                        session_id = %session_id,
                        status = %status,
                        "Transaction settled by webhook"
                    );
                } else {
                    tracing::warn!(session_id = %session_id, "Webhook for unknown session");
                }
                Ok(WebhookOutcome::Settled {
                    session_id: session_id.to_string(),
                    status,
                    matched,
                })
            }
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    error = %e,
                    "Failed to settle transaction from webhook"
                );
                Ok(WebhookOutcome::StoreFailed {
                    session_id: session_id.to_string(),
                })
            }
        }
    }
}
