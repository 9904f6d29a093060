//! Stripe Webhook Verification
//!
//! Authenticates webhook deliveries against the endpoint signing secret and
//! decodes the checkout events we reconcile on.
//!
//! Stripe signs `"{timestamp}.{raw_body}"` with HMAC-SHA256 and sends
//! `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>...]`. Verification has to
//! run against the exact bytes received, before any JSON parsing.

use std::collections::HashMap;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::{PaymentError, Result};
use crate::transaction::TransactionStatus;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Maximum accepted age of a signed delivery, in seconds
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Parsed webhook event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Buyer finished the hosted checkout
    CheckoutCompleted {
        session_id: String,
        transaction_id: Option<String>,
        payment_status: Option<String>,
    },

    /// Delayed payment method settled
    AsyncPaymentSucceeded { session_id: String },

    /// Delayed payment method failed
    AsyncPaymentFailed { session_id: String },

    /// Session expired without payment
    CheckoutExpired { session_id: String },

    /// Unhandled event type
    Other { event_type: String },
}

impl WebhookEvent {
    /// Session reference and terminal status this event settles, if any
    pub fn settlement(&self) -> Option<(&str, TransactionStatus)> {
        match self {
            Self::CheckoutCompleted { session_id, .. }
            | Self::AsyncPaymentSucceeded { session_id } => {
                Some((session_id, TransactionStatus::Completed))
            }
            Self::AsyncPaymentFailed { session_id } | Self::CheckoutExpired { session_id } => {
                Some((session_id, TransactionStatus::Failed))
            }
            Self::Other { .. } => None,
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::CheckoutCompleted { .. } => "checkout.session.completed",
            Self::AsyncPaymentSucceeded { .. } => "checkout.session.async_payment_succeeded",
            Self::AsyncPaymentFailed { .. } => "checkout.session.async_payment_failed",
            Self::CheckoutExpired { .. } => "checkout.session.expired",
            Self::Other { event_type } => event_type,
        }
    }
}

/// Authenticated webhook delivery
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedEvent {
    /// Provider event id
    pub id: String,
    pub event: WebhookEvent,
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct RawSession {
    id: String,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

/// Verifies and decodes webhook deliveries
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    #[must_use]
    pub const fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Verify the signature against the current time and decode the event
    pub fn verify(&self, payload: &[u8], signature: &str) -> Result<VerifiedEvent> {
        self.verify_at(payload, signature, Utc::now().timestamp())
    }

    pub fn verify_at(&self, payload: &[u8], signature: &str, now: i64) -> Result<VerifiedEvent> {
        verify_signature(payload, signature, &self.secret, now, self.tolerance_secs)?;
        parse_event(payload)
    }
}

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| PaymentError::Signature("unusable signing secret".into()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Check a `Stripe-Signature` header against `payload`.
///
/// Any `v1` entry may match; comparison is constant-time.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<()> {
    let mut timestamp = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    PaymentError::Signature("malformed timestamp".into())
                })?);
            }
            Some(("v1", value)) => {
                if let Ok(bytes) = hex::decode(value) {
                    candidates.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| PaymentError::Signature("missing timestamp".into()))?;
    if candidates.is_empty() {
        return Err(PaymentError::Signature("no v1 signature".into()));
    }

    let mac = mac_for(secret, timestamp, payload)?;
    if !candidates
        .iter()
        .any(|candidate| mac.clone().verify_slice(candidate).is_ok())
    {
        return Err(PaymentError::Signature("signature mismatch".into()));
    }

    if now - timestamp > tolerance_secs {
        return Err(PaymentError::Signature(format!(
            "timestamp {timestamp} outside tolerance"
        )));
    }

    Ok(())
}

/// Produce a `Stripe-Signature` header value for `payload`
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String> {
    let signature = hex::encode(mac_for(secret, timestamp, payload)?.finalize().into_bytes());
    Ok(format!("t={timestamp},v1={signature}"))
}

/// Decode a (verified) payload into our event type
pub fn parse_event(payload: &[u8]) -> Result<VerifiedEvent> {
    let raw: RawEvent =
        serde_json::from_slice(payload).map_err(|e| PaymentError::WebhookParse(e.to_string()))?;

    let session = || -> Result<RawSession> {
        serde_json::from_value(raw.data.object.clone()).map_err(|e| {
            PaymentError::WebhookParse(format!("Invalid checkout session data: {e}"))
        })
    };

    let event = match raw.event_type.as_str() {
        "checkout.session.completed" => {
            let session = session()?;
            WebhookEvent::CheckoutCompleted {
                session_id: session.id,
                transaction_id: session
                    .metadata
                    .and_then(|mut m| m.remove("transactionId")),
                payment_status: session.payment_status,
            }
        }
        "checkout.session.async_payment_succeeded" => WebhookEvent::AsyncPaymentSucceeded {
            session_id: session()?.id,
        },
        "checkout.session.async_payment_failed" => WebhookEvent::AsyncPaymentFailed {
            session_id: session()?.id,
        },
        "checkout.session.expired" => WebhookEvent::CheckoutExpired {
            session_id: session()?.id,
        },
        _ => WebhookEvent::Other {
            event_type: raw.event_type.clone(),
        },
    };

    Ok(VerifiedEvent { id: raw.id, event })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";
    const NOW: i64 = 1_729_400_000;

    fn completed_payload(session_id: &str) -> Vec<u8> {
        serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": session_id,
                "object": "checkout.session",
                "payment_status": "paid",
                "metadata": { "transactionId": "tx-1", "gameId": "fk", "gameName": "Fire Kirin" }
            }}
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_valid_signature() {
        let payload = completed_payload("cs_test_1");
        let header = sign_payload(&payload, SECRET, NOW).unwrap();

        let verified = WebhookVerifier::new(SECRET).verify_at(&payload, &header, NOW).unwrap();
        assert_eq!(verified.id, "evt_1");
        assert_eq!(
            verified.event,
            WebhookEvent::CheckoutCompleted {
                session_id: "cs_test_1".into(),
                transaction_id: Some("tx-1".into()),
                payment_status: Some("paid".into()),
            }
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = completed_payload("cs_test_1");
        let header = sign_payload(&payload, "wrong_secret", NOW).unwrap();

        let err = verify_signature(&payload, &header, SECRET, NOW, DEFAULT_TOLERANCE_SECS);
        assert!(matches!(err, Err(PaymentError::Signature(_))));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let payload = completed_payload("cs_test_1");
        let header = sign_payload(&payload, SECRET, NOW).unwrap();
        let tampered = completed_payload("cs_test_2");

        let err = verify_signature(&tampered, &header, SECRET, NOW, DEFAULT_TOLERANCE_SECS);
        assert!(matches!(err, Err(PaymentError::Signature(_))));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = completed_payload("cs_test_1");
        let header = sign_payload(&payload, SECRET, NOW - 600).unwrap();

        let err = verify_signature(&payload, &header, SECRET, NOW, DEFAULT_TOLERANCE_SECS);
        assert!(matches!(err, Err(PaymentError::Signature(_))));
    }

    #[test]
    fn test_any_v1_may_match() {
        let payload = completed_payload("cs_test_1");
        let good = sign_payload(&payload, SECRET, NOW).unwrap();
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={NOW},v1={},v1={good_sig},v0=legacy", "00".repeat(32));

        assert!(verify_signature(&payload, &header, SECRET, NOW, DEFAULT_TOLERANCE_SECS).is_ok());
    }

    #[test]
    fn test_malformed_headers_rejected() {
        let payload = completed_payload("cs_test_1");
        let timestamp_only = format!("t={NOW}");
        for header in ["", "garbage", "t=abc,v1=00", "v1=00ff", timestamp_only.as_str()] {
            assert!(
                verify_signature(&payload, header, SECRET, NOW, DEFAULT_TOLERANCE_SECS).is_err(),
                "header {header:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_other_events() {
        let expired = br#"{"id":"evt_2","type":"checkout.session.expired","data":{"object":{"id":"cs_x"}}}"#;
        let parsed = parse_event(expired).unwrap();
        assert_eq!(
            parsed.event.settlement(),
            Some(("cs_x", TransactionStatus::Failed))
        );

        let other = br#"{"id":"evt_3","type":"invoice.paid","data":{"object":{"id":"in_1"}}}"#;
        let parsed = parse_event(other).unwrap();
        assert_eq!(parsed.event.event_type(), "invoice.paid");
        assert_eq!(parsed.event.settlement(), None);
    }

    #[test]
    fn test_parse_rejects_bad_session() {
        let bad = br#"{"id":"evt_4","type":"checkout.session.completed","data":{"object":{"no_id":true}}}"#;
        assert!(matches!(parse_event(bad), Err(PaymentError::WebhookParse(_))));
        assert!(matches!(parse_event(b"not json"), Err(PaymentError::WebhookParse(_))));
    }
}
