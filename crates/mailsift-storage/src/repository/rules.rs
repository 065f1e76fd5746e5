//! Filter rule repository

use crate::db::DatabasePool;
use crate::models::{CreateFilterRule, FilterRule};
use async_trait::async_trait;
use mailsift_common::types::{RecordStatus, RuleId, Timestamp};
use mailsift_common::{Error, Result};
use uuid::Uuid;

/// Filter rule repository trait
#[async_trait]
pub trait FilterRuleRepository: Send + Sync {
    async fn create(&self, input: CreateFilterRule) -> Result<FilterRule>;
    async fn get(&self, id: RuleId) -> Result<Option<FilterRule>>;
    /// Active rules, highest priority first
    async fn list_active(&self) -> Result<Vec<FilterRule>>;
    /// Most recent modification of any rule, including deactivation and deletion
    async fn last_update(&self) -> Result<Option<Timestamp>>;
    async fn update(&self, id: RuleId, input: CreateFilterRule) -> Result<FilterRule>;
    async fn toggle(&self, id: RuleId) -> Result<RecordStatus>;
    async fn delete(&self, id: RuleId) -> Result<()>;
}

/// Database filter rule repository
pub struct DbFilterRuleRepository {
    pool: DatabasePool,
}

impl DbFilterRuleRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FilterRuleRepository for DbFilterRuleRepository {
    async fn create(&self, input: CreateFilterRule) -> Result<FilterRule> {
        let action = input
            .action
            .ok_or_else(|| Error::Config("Filter rule needs an action".to_string()))?;
        let id = Uuid::now_v7();
        let now = chrono::Utc::now();

        sqlx::query(
            r#"
            INSERT INTO filter_rules (
                id, priority, description, action,
                client_ip, sender, header_from, nick, rcpt, size, mailer, subject,
                text, html, text_hash, attach_name, attach_hash, attach_digest, url,
                assembly, status, created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4,
                $5, $6, $7, $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17, $18, $19,
                $20, 'inactive', $21, $21
            )
            "#,
        )
        .bind(id)
        .bind(input.priority)
        .bind(&input.description)
        .bind(action.as_str())
        .bind(&input.client_ip)
        .bind(&input.sender)
        .bind(&input.header_from)
        .bind(&input.nick)
        .bind(&input.rcpt)
        .bind(&input.size)
        .bind(&input.mailer)
        .bind(&input.subject)
        .bind(&input.text)
        .bind(&input.html)
        .bind(&input.text_hash)
        .bind(&input.attach_name)
        .bind(&input.attach_hash)
        .bind(&input.attach_digest)
        .bind(&input.url)
        .bind(&input.assembly)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::Database("Failed to create filter rule".to_string()))
    }

    async fn get(&self, id: RuleId) -> Result<Option<FilterRule>> {
        sqlx::query_as::<_, FilterRule>("SELECT * FROM filter_rules WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_active(&self) -> Result<Vec<FilterRule>> {
        sqlx::query_as::<_, FilterRule>(
            "SELECT * FROM filter_rules WHERE status = 'active' ORDER BY priority DESC, id ASC",
        )
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn last_update(&self) -> Result<Option<Timestamp>> {
        sqlx::query_scalar::<_, Option<Timestamp>>("SELECT MAX(updated_at) FROM filter_rules")
            .fetch_one(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn update(&self, id: RuleId, input: CreateFilterRule) -> Result<FilterRule> {
        let action = input
            .action
            .ok_or_else(|| Error::Config("Filter rule needs an action".to_string()))?;

        sqlx::query(
            r#"
            UPDATE filter_rules SET
                priority = $2, description = $3, action = $4,
                client_ip = $5, sender = $6, header_from = $7, nick = $8,
                rcpt = $9, size = $10, mailer = $11, subject = $12,
                text = $13, html = $14, text_hash = $15, attach_name = $16,
                attach_hash = $17, attach_digest = $18, url = $19,
                assembly = $20, updated_at = $21
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(input.priority)
        .bind(&input.description)
        .bind(action.as_str())
        .bind(&input.client_ip)
        .bind(&input.sender)
        .bind(&input.header_from)
        .bind(&input.nick)
        .bind(&input.rcpt)
        .bind(&input.size)
        .bind(&input.mailer)
        .bind(&input.subject)
        .bind(&input.text)
        .bind(&input.html)
        .bind(&input.text_hash)
        .bind(&input.attach_name)
        .bind(&input.attach_hash)
        .bind(&input.attach_digest)
        .bind(&input.url)
        .bind(&input.assembly)
        .bind(chrono::Utc::now())
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::Database("Filter rule not found".to_string()))
    }

    async fn toggle(&self, id: RuleId) -> Result<RecordStatus> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE filter_rules SET
                status = CASE status WHEN 'active' THEN 'inactive' ELSE 'active' END,
                updated_at = $2
            WHERE id = $1 AND status <> 'deleted'
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(chrono::Utc::now())
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        status
            .ok_or_else(|| Error::Database("Filter rule not found or deleted".to_string()))?
            .parse()
    }

    async fn delete(&self, id: RuleId) -> Result<()> {
        sqlx::query("UPDATE filter_rules SET status = 'deleted', updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(chrono::Utc::now())
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
