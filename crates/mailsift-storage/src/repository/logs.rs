//! Filter log repository

use crate::db::DatabasePool;
use crate::models::{CreateFilterLog, FilterLog};
use async_trait::async_trait;
use mailsift_common::types::TransactionId;
use mailsift_common::{Error, Result};
use uuid::Uuid;

/// Filter log repository trait
#[async_trait]
pub trait FilterLogRepository: Send + Sync {
    async fn create(&self, input: CreateFilterLog) -> Result<Uuid>;
    async fn list_by_transaction(&self, transaction_id: TransactionId) -> Result<Vec<FilterLog>>;
}

/// Database filter log repository
pub struct DbFilterLogRepository {
    pool: DatabasePool,
}

impl DbFilterLogRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FilterLogRepository for DbFilterLogRepository {
    async fn create(&self, input: CreateFilterLog) -> Result<Uuid> {
        let id = Uuid::now_v7();

        sqlx::query(
            r#"
            INSERT INTO filter_logs (
                id, transaction_id, client_ip, sender, nick, rcpt, size,
                mailer, subject, features, action, rule_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(id)
        .bind(input.transaction_id)
        .bind(&input.client_ip)
        .bind(&input.sender)
        .bind(&input.nick)
        .bind(&input.rcpt)
        .bind(input.size)
        .bind(&input.mailer)
        .bind(&input.subject)
        .bind(&input.features)
        .bind(input.action.map(|a| a.as_str()))
        .bind(input.rule_id)
        .bind(chrono::Utc::now())
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Persist(e.to_string()))?;

        Ok(id)
    }

    async fn list_by_transaction(&self, transaction_id: TransactionId) -> Result<Vec<FilterLog>> {
        sqlx::query_as::<_, FilterLog>(
            "SELECT * FROM filter_logs WHERE transaction_id = $1 ORDER BY created_at ASC",
        )
        .bind(transaction_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}
