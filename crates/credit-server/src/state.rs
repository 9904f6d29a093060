//! Application State

use std::sync::Arc;

use credit_payments::{
    CheckoutInitiator, CheckoutUrls, PaymentProvider, Reconciler, TransactionLister,
    TransactionStore, WebhookVerifier,
};

use crate::config::Config;
use crate::rate_limit::CheckoutRateLimit;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub checkout: CheckoutInitiator,
    pub reconciler: Reconciler,
    pub lister: TransactionLister,
    pub checkout_rate_limit: CheckoutRateLimit,

    /// Backend names reported by the health check
    pub store_kind: &'static str,
    pub provider_name: String,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        store_kind: &'static str,
        provider: Arc<dyn PaymentProvider>,
        config: &Config,
    ) -> Self {
        Self {
            checkout: CheckoutInitiator::new(
                store.clone(),
                provider.clone(),
                CheckoutUrls::from_client_url(&config.client_url),
            ),
            reconciler: Reconciler::new(
                store.clone(),
                provider.clone(),
                WebhookVerifier::new(config.stripe_webhook_secret.clone()),
            ),
            lister: TransactionLister::new(store),
            checkout_rate_limit: CheckoutRateLimit::new(config.checkout_rate_limit),
            store_kind,
            provider_name: provider.name().to_string(),
        }
    }
}
