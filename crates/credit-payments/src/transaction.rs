//! Transaction Records
//!
//! One record per checkout attempt, plus the storage trait both the
//! checkout and reconciliation paths write through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{PaymentError, Result};

/// Payment status of a transaction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition is allowed out of this status
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(PaymentError::Storage(format!("unknown status '{other}'"))),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded payment attempt
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub game_id: String,
    pub game_name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub user_id: String,
    pub status: TransactionStatus,
    /// Provider checkout session this record is reconciled against
    #[serde(rename = "stripeSessionId")]
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Build a fresh pending record with a store-assigned id
    pub fn from_new(new: NewTransaction) -> Self {
        Self {
            id: Uuid::new_v4(),
            game_id: new.game_id,
            game_name: new.game_name,
            amount: new.amount,
            user_id: new.user_id,
            status: TransactionStatus::Pending,
            session_id: None,
            created_at: Utc::now(),
        }
    }

    /// Settling to `target` is an overwrite: allowed from pending, or a no-op
    /// when already at `target`. Any other terminal status is left alone.
    pub fn can_settle(&self, target: TransactionStatus) -> bool {
        self.status == TransactionStatus::Pending || self.status == target
    }

    /// Pending with no provider session: the checkout never got off the ground
    pub fn is_orphan(&self, older_than: DateTime<Utc>) -> bool {
        self.status == TransactionStatus::Pending
            && self.session_id.is_none()
            && self.created_at < older_than
    }
}

/// Fields supplied when a checkout attempt is first recorded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTransaction {
    pub game_id: String,
    pub game_name: String,
    pub amount: Decimal,
    pub user_id: String,
}

/// Persistence for transaction records
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Persist a new pending record; the store assigns `id` and `created_at`
    async fn create(&self, new: NewTransaction) -> Result<Transaction>;

    /// Bind the provider session reference to a pending record
    async fn attach_session(&self, id: Uuid, session_id: &str) -> Result<()>;

    /// Move the record matching `session_id` to a terminal status.
    /// Returns whether a record matched.
    async fn settle(&self, session_id: &str, status: TransactionStatus) -> Result<bool>;

    /// Mark a pending record failed (checkout compensation)
    async fn mark_failed(&self, id: Uuid) -> Result<()>;

    /// Get record by id
    async fn get(&self, id: Uuid) -> Result<Option<Transaction>>;

    /// Get record by provider session reference
    async fn find_by_session(&self, session_id: &str) -> Result<Option<Transaction>>;

    /// Most recent records, newest first
    async fn recent(&self, limit: usize) -> Result<Vec<Transaction>>;

    /// Fail pending records that never received a session reference
    async fn fail_orphans(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

pub(crate) fn ensure_terminal(status: TransactionStatus) -> Result<()> {
    if status.is_terminal() {
        Ok(())
    } else {
        Err(PaymentError::Validation(
            "cannot settle a transaction back to pending".into(),
        ))
    }
}

#[derive(Default)]
struct MemoryState {
    transactions: HashMap<Uuid, Transaction>,
    by_session: HashMap<String, Uuid>,
}

/// In-memory transaction store (for development and tests)
#[derive(Default)]
pub struct MemoryTransactionStore {
    state: RwLock<MemoryState>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.transactions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn create(&self, new: NewTransaction) -> Result<Transaction> {
        let transaction = Transaction::from_new(new);
        let mut state = self.state.write().await;
        state.transactions.insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    async fn attach_session(&self, id: Uuid, session_id: &str) -> Result<()> {
        let mut state = self.state.write().await;

        if let Some(owner) = state.by_session.get(session_id) {
            if *owner != id {
                return Err(PaymentError::Conflict(format!(
                    "session {session_id} already belongs to transaction {owner}"
                )));
            }
        }

        let transaction = state
            .transactions
            .get_mut(&id)
            .ok_or_else(|| PaymentError::Storage(format!("transaction {id} not found")))?;

        if transaction.status != TransactionStatus::Pending {
            return Err(PaymentError::Conflict(format!(
                "transaction {id} is already {}",
                transaction.status
            )));
        }

        if let Some(existing) = transaction.session_id.as_deref() {
            if existing != session_id {
                return Err(PaymentError::Conflict(format!(
                    "transaction {id} already has session {existing}"
                )));
            }
        }
        transaction.session_id = Some(session_id.to_string());

        state.by_session.insert(session_id.to_string(), id);
        Ok(())
    }

    async fn settle(&self, session_id: &str, status: TransactionStatus) -> Result<bool> {
        ensure_terminal(status)?;
        let mut state = self.state.write().await;

        let Some(id) = state.by_session.get(session_id).copied() else {
            return Ok(false);
        };

        if let Some(transaction) = state.transactions.get_mut(&id) {
            if transaction.can_settle(status) {
                transaction.status = status;
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn mark_failed(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(transaction) = state.transactions.get_mut(&id) {
            if transaction.status == TransactionStatus::Pending {
                transaction.status = TransactionStatus::Failed;
            }
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(self.state.read().await.transactions.get(&id).cloned())
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .by_session
            .get(session_id)
            .and_then(|id| state.transactions.get(id))
            .cloned())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        let mut all: Vec<Transaction> = state.transactions.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }

    async fn fail_orphans(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut failed = 0;
        for transaction in state.transactions.values_mut() {
            if transaction.is_orphan(older_than) {
                transaction.status = TransactionStatus::Failed;
                failed += 1;
            }
        }
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_tx(game: &str) -> NewTransaction {
        NewTransaction {
            game_id: game.into(),
            game_name: format!("{game} Deluxe"),
            amount: dec!(19.99),
            user_id: "user_1".into(),
        }
    }

    #[tokio::test]
    async fn test_create_is_pending_without_session() {
        let store = MemoryTransactionStore::new();
        let tx = store.create(new_tx("fire-kirin")).await.unwrap();

        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.session_id.is_none());
        assert_eq!(store.get(tx.id).await.unwrap(), Some(tx));
    }

    #[tokio::test]
    async fn test_session_reference_is_unique() {
        let store = MemoryTransactionStore::new();
        let a = store.create(new_tx("a")).await.unwrap();
        let b = store.create(new_tx("b")).await.unwrap();

        store.attach_session(a.id, "cs_test_1").await.unwrap();
        // Re-attaching the same reference is fine
        store.attach_session(a.id, "cs_test_1").await.unwrap();

        let err = store.attach_session(b.id, "cs_test_1").await.unwrap_err();
        assert!(matches!(err, PaymentError::Conflict(_)));

        let err = store.attach_session(a.id, "cs_test_2").await.unwrap_err();
        assert!(matches!(err, PaymentError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_settle_is_idempotent() {
        let store = MemoryTransactionStore::new();
        let tx = store.create(new_tx("a")).await.unwrap();
        store.attach_session(tx.id, "cs_test_1").await.unwrap();

        assert!(store.settle("cs_test_1", TransactionStatus::Completed).await.unwrap());
        assert!(store.settle("cs_test_1", TransactionStatus::Completed).await.unwrap());

        let stored = store.find_by_session("cs_test_1").await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_completed_is_never_reversed() {
        let store = MemoryTransactionStore::new();
        let tx = store.create(new_tx("a")).await.unwrap();
        store.attach_session(tx.id, "cs_test_1").await.unwrap();

        store.settle("cs_test_1", TransactionStatus::Completed).await.unwrap();
        store.settle("cs_test_1", TransactionStatus::Failed).await.unwrap();
        store.mark_failed(tx.id).await.unwrap();

        let stored = store.get(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);

        let err = store.settle("cs_test_1", TransactionStatus::Pending).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
    }

    #[tokio::test]
    async fn test_settle_unknown_session() {
        let store = MemoryTransactionStore::new();
        store.create(new_tx("a")).await.unwrap();
        assert!(!store.settle("cs_missing", TransactionStatus::Completed).await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_is_newest_first_and_limited() {
        let store = MemoryTransactionStore::new();
        for i in 0..60 {
            store.create(new_tx(&format!("game-{i}"))).await.unwrap();
        }

        let recent = store.recent(50).await.unwrap();
        assert_eq!(recent.len(), 50);
        assert!(recent.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }

    #[tokio::test]
    async fn test_swept_record_rejects_late_session() {
        let store = MemoryTransactionStore::new();
        let tx = store.create(new_tx("fire-kirin")).await.unwrap();

        let swept = store.fail_orphans(Utc::now() + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(swept, 1);

        let err = store.attach_session(tx.id, "cs_paid").await.unwrap_err();
        assert!(matches!(err, PaymentError::Conflict(_)));

        // No record carries the session, so a later payment cannot be lost on it
        assert!(!store.settle("cs_paid", TransactionStatus::Completed).await.unwrap());
        assert_eq!(store.find_by_session("cs_paid").await.unwrap(), None);
        assert_eq!(
            store.get(tx.id).await.unwrap().unwrap().status,
            TransactionStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_fail_orphans_skips_attached() {
        let store = MemoryTransactionStore::new();
        let orphan = store.create(new_tx("orphan")).await.unwrap();
        let live = store.create(new_tx("live")).await.unwrap();
        store.attach_session(live.id, "cs_live").await.unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.fail_orphans(cutoff).await.unwrap(), 1);

        assert_eq!(
            store.get(orphan.id).await.unwrap().unwrap().status,
            TransactionStatus::Failed
        );
        assert_eq!(
            store.get(live.id).await.unwrap().unwrap().status,
            TransactionStatus::Pending
        );
    }

    #[test]
    fn test_serializes_like_api_record() {
        let tx = Transaction::from_new(new_tx("a"));
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["gameId"], "a");
        assert_eq!(json["amount"], serde_json::json!(19.99));
        assert!(json["stripeSessionId"].is_null());
    }
}
