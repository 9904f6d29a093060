//! Orphaned Checkout Sweeper
//!
//! A checkout whose provider session never got attached stays `pending`
//! forever. The sweeper fails such records once they are old enough that
//! the checkout request is certainly over.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::{PaymentError, Result};
use crate::transaction::TransactionStore;

pub struct OrphanSweeper {
    store: Arc<dyn TransactionStore>,
    max_age: Duration,
}

impl OrphanSweeper {
    pub fn new(store: Arc<dyn TransactionStore>, max_age: Duration) -> Self {
        Self { store, max_age }
    }

    /// Fail orphans older than `max_age`; returns how many were failed
    pub async fn sweep_once(&self) -> Result<u64> {
        let age = chrono::Duration::from_std(self.max_age)
            .map_err(|e| PaymentError::Config(format!("orphan max age: {e}")))?;
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .ok_or_else(|| PaymentError::Config("orphan max age out of range".into()))?;

        let failed = self.store.fail_orphans(cutoff).await?;
        if failed > 0 {
            tracing::info!(failed, cutoff = %cutoff, "Failed orphaned pending transactions");
        }
        Ok(failed)
    }

    /// Sweep every `interval` until the task is dropped
    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                tracing::warn!(error = %e, "Orphan sweep failed");
            }
        }
    }
}
