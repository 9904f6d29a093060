//! # credit-payments
//!
//! Checkout sessions, transaction records and payment reconciliation for
//! game-credit purchases.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────────┐  create   ┌──────────────┐  redirect  ┌─────────────────┐
//! │  Storefront  │──────────▶│  Checkout    │───────────▶│  Stripe Hosted  │
//! │              │           │  Initiator   │            │  Checkout Page  │
//! └──────────────┘           └──────────────┘            └─────────────────┘
//!        │                          │ pending                    │
//!        │ verify(session_id)       ▼                            │ webhook
//!        │                   ┌──────────────┐                    │
//!        └──────────────────▶│  Reconciler  │◀───────────────────┘
//!                            └──────────────┘
//!                                   │ settle(session_id)
//!                                   ▼
//!                            ┌──────────────┐
//!                            │ Transaction  │
//!                            │ Store        │
//!                            └──────────────┘
//! ```
//!
//! A transaction is created `pending`, gets its Stripe session reference
//! attached, and is then settled to `completed` (or `failed`) by either the
//! client's verification call or Stripe's webhook, whichever arrives first.
//! Settling is a keyed overwrite, so the second arrival changes nothing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use credit_payments::{
//!     CheckoutInitiator, CheckoutRequest, CheckoutUrls, MemoryTransactionStore,
//!     Reconciler, StripeProvider, WebhookVerifier,
//! };
//!
//! let store = Arc::new(MemoryTransactionStore::new());
//! let stripe = Arc::new(StripeProvider::new("sk_test_xxx"));
//!
//! let checkout = CheckoutInitiator::new(
//!     store.clone(),
//!     stripe.clone(),
//!     CheckoutUrls::from_client_url("https://juwahouse.vercel.app"),
//! );
//! let started = checkout.create(request).await?;
//! // Redirect user to: started.checkout_url
//!
//! let reconciler = Reconciler::new(store, stripe, WebhookVerifier::new("whsec_xxx"));
//! let verification = reconciler.verify_payment(&started.session_id).await?;
//! ```

mod checkout;
mod error;
mod lister;
mod mock;
#[cfg(feature = "postgres")]
mod postgres;
mod provider;
mod reconcile;
mod stripe_client;
mod sweep;
mod transaction;
pub mod webhook;

pub use checkout::{
    to_minor_units, CheckoutInitiator, CheckoutRequest, CheckoutStarted, CheckoutUrls,
    ValidCheckout,
};
pub use error::{PaymentError, Result};
pub use lister::{TransactionLister, MAX_RECENT};
pub use mock::MockProvider;
#[cfg(feature = "postgres")]
pub use postgres::PgTransactionStore;
pub use provider::{
    PaymentProvider, PaymentStatus, ProviderSession, SessionRequest, SessionSnapshot,
    SessionStatus,
};
pub use reconcile::{Reconciler, Verification, WebhookOutcome};
pub use stripe_client::StripeProvider;
pub use sweep::OrphanSweeper;
pub use transaction::{
    MemoryTransactionStore, NewTransaction, Transaction, TransactionStatus, TransactionStore,
};
pub use webhook::{VerifiedEvent, WebhookEvent, WebhookVerifier};
