//! Checkout Initiation
//!
//! Records a pending transaction, opens a hosted checkout session for it and
//! binds the two together.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PaymentError, Result};
use crate::provider::{PaymentProvider, SessionRequest};
use crate::transaction::{NewTransaction, TransactionStore};

/// Convert a decimal currency amount into integer minor units (cents).
///
/// Rounds half away from zero in decimal arithmetic, so `19.995` becomes
/// `2000` rather than whatever its binary float approximation would give.
pub fn to_minor_units(amount: Decimal) -> Result<i64> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|cents| cents.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|cents| cents.to_i64())
        .ok_or_else(|| PaymentError::Validation(format!("amount {amount} is out of range")))
}

/// Redirect targets for the hosted checkout page
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutUrls {
    /// Derive both URLs from the storefront base URL
    pub fn from_client_url(client_url: &str) -> Self {
        let base = client_url.trim_end_matches('/');
        Self {
            success_url: format!("{base}/success?session_id={{CHECKOUT_SESSION_ID}}"),
            cancel_url: format!("{base}/cancel"),
        }
    }
}

/// Request to start a checkout, as received from the client
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub game_id: Option<String>,
    #[serde(default)]
    pub game_name: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    /// Caller identity; synthesized when absent
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Checkout request that passed validation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidCheckout {
    pub game_id: String,
    pub game_name: String,
    pub amount: Decimal,
    pub unit_amount: i64,
    pub user_id: String,
}

fn required(field: &str, value: Option<&String>) -> Result<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PaymentError::Validation(format!("{field} is required")))
}

impl CheckoutRequest {
    pub fn validate(&self) -> Result<ValidCheckout> {
        let game_id = required("gameId", self.game_id.as_ref())?;
        let game_name = required("gameName", self.game_name.as_ref())?;

        let amount = self
            .amount
            .ok_or_else(|| PaymentError::Validation("amount is required".into()))?;
        if amount <= Decimal::ZERO {
            return Err(PaymentError::Validation("amount must be positive".into()));
        }

        let unit_amount = to_minor_units(amount)?;
        if unit_amount < 1 {
            return Err(PaymentError::Validation(format!(
                "amount {amount} is below the smallest chargeable unit"
            )));
        }

        let user_id = self
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map_or_else(|| format!("user_{}", Utc::now().timestamp_millis()), str::to_string);

        Ok(ValidCheckout {
            game_id,
            game_name,
            amount,
            unit_amount,
            user_id,
        })
    }
}

/// Result of starting a checkout
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutStarted {
    #[serde(skip_serializing)]
    pub transaction_id: Uuid,
    pub session_id: String,
    pub checkout_url: String,
}

/// Creates transactions and their hosted checkout sessions
#[derive(Clone)]
pub struct CheckoutInitiator {
    store: Arc<dyn TransactionStore>,
    provider: Arc<dyn PaymentProvider>,
    urls: CheckoutUrls,
}

impl CheckoutInitiator {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        provider: Arc<dyn PaymentProvider>,
        urls: CheckoutUrls,
    ) -> Self {
        Self {
            store,
            provider,
            urls,
        }
    }

    /// Start a checkout.
    ///
    /// If the provider refuses the session the freshly written record is
    /// marked failed before the error is returned.
    pub async fn create(&self, request: CheckoutRequest) -> Result<CheckoutStarted> {
        let checkout = request.validate()?;

        let transaction = self
            .store
            .create(NewTransaction {
                game_id: checkout.game_id.clone(),
                game_name: checkout.game_name.clone(),
                amount: checkout.amount,
                user_id: checkout.user_id,
            })
            .await?;

        let session_request = SessionRequest {
            transaction_id: transaction.id,
            game_id: checkout.game_id,
            game_name: checkout.game_name,
            amount: checkout.amount,
            unit_amount: checkout.unit_amount,
            success_url: self.urls.success_url.clone(),
            cancel_url: self.urls.cancel_url.clone(),
        };

        let session = match self.provider.create_checkout_session(&session_request).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(
                    transaction_id = %transaction.id,
                    provider = self.provider.name(),
                    error = %e,
                    "Provider rejected checkout session"
                );
                if let Err(cleanup) = self.store.mark_failed(transaction.id).await {
                    tracing::error!(
                        transaction_id = %transaction.id,
                        error = %cleanup,
                        "Could not mark abandoned transaction failed"
                    );
                }
                return Err(e);
            }
        };

        self.store.attach_session(transaction.id, &session.id).await?;

        tracing::info!(
            transaction_id = %transaction.id,
            session_id = %session.id,
            unit_amount = checkout.unit_amount,
            "Checkout session created"
        );

        Ok(CheckoutStarted {
            transaction_id: transaction.id,
            session_id: session.id,
            checkout_url: session.url,
        })
    }
}
