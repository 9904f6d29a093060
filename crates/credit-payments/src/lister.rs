//! Transaction Listing

use std::sync::Arc;

use crate::error::Result;
use crate::transaction::{Transaction, TransactionStore};

/// Hard cap on records returned by one listing
pub const MAX_RECENT: usize = 50;

/// Read-only view over recent transactions
#[derive(Clone)]
pub struct TransactionLister {
    store: Arc<dyn TransactionStore>,
}

impl TransactionLister {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store }
    }

    /// The latest [`MAX_RECENT`] transactions, newest first
    pub async fn recent(&self) -> Result<Vec<Transaction>> {
        self.recent_limited(MAX_RECENT).await
    }

    /// Like [`Self::recent`] with a smaller page; larger limits are clamped
    pub async fn recent_limited(&self, limit: usize) -> Result<Vec<Transaction>> {
        self.store.recent(limit.min(MAX_RECENT)).await
    }
}
