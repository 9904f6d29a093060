//! Mock Payment Provider
//!
//! In-process stand-in for Stripe, for tests and local development.
//! Sessions start unpaid; call [`MockProvider::mark_paid`] to simulate the
//! buyer finishing the hosted checkout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{PaymentError, Result};
use crate::provider::{
    PaymentProvider, PaymentStatus, ProviderSession, SessionRequest, SessionSnapshot,
    SessionStatus,
};

/// Mock provider with in-memory sessions
#[derive(Default)]
pub struct MockProvider {
    sessions: RwLock<HashMap<String, SessionSnapshot>>,
    requests: RwLock<Vec<SessionRequest>>,
    next_id: AtomicU64,
    fail_create: AtomicBool,
    fail_retrieve: AtomicBool,
    stall_create: AtomicBool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `create_checkout_session` calls fail
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `retrieve_session` calls fail
    pub fn fail_retrieve(&self, fail: bool) {
        self.fail_retrieve.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `create_checkout_session` calls never complete
    pub fn stall_create(&self, stall: bool) {
        self.stall_create.store(stall, Ordering::SeqCst);
    }

    /// Simulate the buyer paying; returns false for unknown sessions
    pub async fn mark_paid(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.get_mut(session_id).is_some_and(|session| {
            session.payment_status = PaymentStatus::Paid;
            session.status = Some(SessionStatus::Complete);
            true
        })
    }

    /// Every session request received so far
    pub async fn requests(&self) -> Vec<SessionRequest> {
        self.requests.read().await.clone()
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    async fn create_checkout_session(&self, request: &SessionRequest) -> Result<ProviderSession> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PaymentError::Provider("mock provider unavailable".into()));
        }
        if self.stall_create.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_mock_{n:06}");

        let snapshot = SessionSnapshot {
            id: id.clone(),
            payment_status: PaymentStatus::Unpaid,
            status: Some(SessionStatus::Open),
            amount_total: Some(request.unit_amount),
            currency: Some("usd".into()),
            metadata: request.metadata(),
        };

        self.sessions.write().await.insert(id.clone(), snapshot);
        self.requests.write().await.push(request.clone());

        Ok(ProviderSession {
            url: format!("https://checkout.mock.local/pay/{id}"),
            id,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<Option<SessionSnapshot>> {
        if self.fail_retrieve.load(Ordering::SeqCst) {
            return Err(PaymentError::Provider("mock provider unavailable".into()));
        }
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
