//! Stripe Checkout Integration
//!
//! Implements the "Stripe Checkout (Hosted)" approach: one-off payment
//! sessions for a single game-credit line item.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use stripe::{
    CheckoutSession as StripeCheckoutSession, CheckoutSessionId, CheckoutSessionMode,
    CheckoutSessionPaymentStatus, CheckoutSessionStatus, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData, CreateCheckoutSessionPaymentMethodTypes,
    Currency, StripeError,
};

use crate::error::{PaymentError, Result};
use crate::provider::{
    PaymentProvider, PaymentStatus, ProviderSession, SessionRequest, SessionSnapshot,
    SessionStatus,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Stripe client wrapper
pub struct StripeProvider {
    client: Client,
    timeout: Duration,
}

impl StripeProvider {
    /// Create a new Stripe provider
    pub fn new(secret_key: &str) -> Self {
        Self {
            client: Client::new(secret_key),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bound every Stripe API call by `timeout`
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn call<T>(
        &self,
        op: &str,
        fut: impl Future<Output = std::result::Result<T, StripeError>>,
    ) -> Result<std::result::Result<T, StripeError>> {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            PaymentError::Provider(format!("{op} timed out after {:?}", self.timeout))
        })
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    async fn create_checkout_session(&self, request: &SessionRequest) -> Result<ProviderSession> {
        let client_reference_id = request.transaction_id.to_string();

        let mut params = CreateCheckoutSession::new();
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.mode = Some(CheckoutSessionMode::Payment);
        params.payment_method_types = Some(vec![CreateCheckoutSessionPaymentMethodTypes::Cashapp]);
        params.client_reference_id = Some(&client_reference_id);
        params.metadata = Some(request.metadata());

        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            quantity: Some(1),
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency: Currency::USD,
                unit_amount: Some(request.unit_amount),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: request.product_name(),
                    description: Some(request.product_description()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);

        let session = self
            .call("create checkout session", StripeCheckoutSession::create(&self.client, params))
            .await?
            .map_err(|e| PaymentError::Provider(e.to_string()))?;

        let url = session
            .url
            .ok_or_else(|| PaymentError::Provider("No checkout URL returned".into()))?;

        Ok(ProviderSession {
            id: session.id.to_string(),
            url,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<Option<SessionSnapshot>> {
        // Anything that is not a checkout session id cannot exist on Stripe's side
        let Ok(id) = session_id.parse::<CheckoutSessionId>() else {
            return Ok(None);
        };

        let retrieve = StripeCheckoutSession::retrieve(&self.client, &id, &[]);
        let session = match self.call("retrieve checkout session", retrieve).await? {
            Ok(session) => session,
            Err(StripeError::Stripe(err)) if err.http_status == 404 => return Ok(None),
            Err(e) => return Err(PaymentError::Provider(e.to_string())),
        };

        Ok(Some(snapshot(session)))
    }

    fn name(&self) -> &str {
        "stripe"
    }
}

fn snapshot(session: StripeCheckoutSession) -> SessionSnapshot {
    SessionSnapshot {
        id: session.id.to_string(),
        payment_status: match session.payment_status {
            CheckoutSessionPaymentStatus::Paid => PaymentStatus::Paid,
            CheckoutSessionPaymentStatus::Unpaid => PaymentStatus::Unpaid,
            CheckoutSessionPaymentStatus::NoPaymentRequired => PaymentStatus::NoPaymentRequired,
        },
        status: session.status.map(|s| match s {
            CheckoutSessionStatus::Open => SessionStatus::Open,
            CheckoutSessionStatus::Complete => SessionStatus::Complete,
            CheckoutSessionStatus::Expired => SessionStatus::Expired,
        }),
        amount_total: session.amount_total,
        currency: session.currency.map(|c| c.to_string()),
        metadata: session.metadata.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_malformed_session_id_is_unknown() {
        let provider = StripeProvider::new("sk_test_xxx");
        // Rejected before any network call
        assert_eq!(provider.retrieve_session("not-a-session").await.unwrap(), None);
    }

    #[test]
    fn test_provider_name() {
        let provider = StripeProvider::new("sk_test_xxx").with_timeout(Duration::from_secs(5));
        assert_eq!(provider.name(), "stripe");
        assert_eq!(provider.timeout, Duration::from_secs(5));
    }
}
