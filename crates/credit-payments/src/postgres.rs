//! PostgreSQL transaction store

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{PaymentError, Result};
use crate::transaction::{
    ensure_terminal, NewTransaction, Transaction, TransactionStatus, TransactionStore,
};

const COLUMNS: &str =
    "id, game_id, game_name, amount, user_id, status, stripe_session_id, created_at";

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    game_id: String,
    game_name: String,
    amount: Decimal,
    user_id: String,
    status: String,
    stripe_session_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = PaymentError;

    fn try_from(row: TransactionRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            game_id: row.game_id,
            game_name: row.game_name,
            amount: row.amount,
            user_id: row.user_id,
            status: row.status.parse()?,
            session_id: row.stripe_session_id,
            created_at: row.created_at,
        })
    }
}

/// Transaction store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run embedded migrations
    pub async fn connect(database_url: &str, acquire_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        tracing::info!("Connected to PostgreSQL");

        sqlx::migrate!()
            .run(&pool)
            .await
            .map_err(|e| PaymentError::Storage(format!("migration failed: {e}")))?;

        tracing::info!("Migrations applied");

        Ok(Self::new(pool))
    }

    async fn session_exists(&self, session_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM transactions WHERE stripe_session_id = $1)",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn create(&self, new: NewTransaction) -> Result<Transaction> {
        let transaction = Transaction::from_new(new);

        let row: TransactionRow = sqlx::query_as(&format!(
            "INSERT INTO transactions (id, game_id, game_name, amount, user_id, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {COLUMNS}"
        ))
        .bind(transaction.id)
        .bind(&transaction.game_id)
        .bind(&transaction.game_name)
        .bind(transaction.amount)
        .bind(&transaction.user_id)
        .bind(transaction.status.as_str())
        .bind(transaction.created_at)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn attach_session(&self, id: Uuid, session_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE transactions SET stripe_session_id = $2 \
             WHERE id = $1 AND status = 'pending' \
             AND (stripe_session_id IS NULL OR stripe_session_id = $2)",
        )
        .bind(id)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => PaymentError::Conflict(
                format!("session {session_id} already belongs to another transaction"),
            ),
            other => other.into(),
        })?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.get(id).await? {
            Some(tx) if tx.status != TransactionStatus::Pending => Err(PaymentError::Conflict(
                format!("transaction {id} is already {}", tx.status),
            )),
            Some(_) => Err(PaymentError::Conflict(format!(
                "transaction {id} already has a different session"
            ))),
            None => Err(PaymentError::Storage(format!("transaction {id} not found"))),
        }
    }

    async fn settle(&self, session_id: &str, status: TransactionStatus) -> Result<bool> {
        ensure_terminal(status)?;

        let result = sqlx::query(
            "UPDATE transactions SET status = $2 \
             WHERE stripe_session_id = $1 AND status IN ('pending', $2)",
        )
        .bind(session_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(true)
        } else {
            self.session_exists(session_id).await
        }
    }

    async fn mark_failed(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE transactions SET status = 'failed' WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>> {
        let row: Option<TransactionRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM transactions WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Transaction::try_from).transpose()
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<Transaction>> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM transactions WHERE stripe_session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Transaction::try_from).transpose()
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Transaction>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM transactions ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn fail_orphans(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE transactions SET status = 'failed' \
             WHERE status = 'pending' AND stripe_session_id IS NULL AND created_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
