//! Payment Provider Abstraction
//!
//! The checkout and reconciliation paths only need two calls from the
//! provider: open a hosted checkout session and look one up again.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;

/// Everything the provider needs to open a hosted checkout for one line item
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRequest {
    pub transaction_id: Uuid,
    pub game_id: String,
    pub game_name: String,
    /// Decimal amount, kept for the human-readable description
    pub amount: Decimal,
    /// Amount in minor units (cents)
    pub unit_amount: i64,
    pub success_url: String,
    pub cancel_url: String,
}

impl SessionRequest {
    pub fn product_name(&self) -> String {
        format!("{} - Game Credit", self.game_name)
    }

    pub fn product_description(&self) -> String {
        format!("Load ${} to your {} account", self.amount, self.game_name)
    }

    /// Opaque metadata echoed back by the provider
    pub fn metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            ("transactionId".to_string(), self.transaction_id.to_string()),
            ("gameId".to_string(), self.game_id.clone()),
            ("gameName".to_string(), self.game_name.clone()),
        ])
    }
}

/// A freshly created hosted checkout session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSession {
    /// Provider session reference
    pub id: String,
    /// Hosted page to redirect the buyer to
    pub url: String,
}

/// Whether the provider has collected the funds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

/// Lifecycle of the hosted session itself
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Complete,
    Expired,
}

/// Current provider-side view of a checkout session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub payment_status: PaymentStatus,
    pub status: Option<SessionStatus>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SessionSnapshot {
    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }
}

/// Hosted-checkout payment provider
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Open a hosted checkout session
    async fn create_checkout_session(&self, request: &SessionRequest) -> Result<ProviderSession>;

    /// Look up a session; `None` when the provider does not know the reference
    async fn retrieve_session(&self, session_id: &str) -> Result<Option<SessionSnapshot>>;

    /// Provider name
    fn name(&self) -> &str;
}
