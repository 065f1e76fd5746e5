//! Filter field repository

use crate::db::DatabasePool;
use crate::models::{CreateFilterField, FilterField};
use async_trait::async_trait;
use mailsift_common::types::{FieldId, FilterStage, RecordStatus};
use mailsift_common::{Error, Result};
use uuid::Uuid;

/// Filter field repository trait
#[async_trait]
pub trait FilterFieldRepository: Send + Sync {
    async fn create(&self, input: CreateFilterField) -> Result<FilterField>;
    async fn get(&self, id: FieldId) -> Result<Option<FilterField>>;
    async fn list_active(&self) -> Result<Vec<FilterField>>;
    async fn list_active_by_stage(&self, stage: FilterStage) -> Result<Vec<FilterField>>;
    async fn update(&self, id: FieldId, input: CreateFilterField) -> Result<FilterField>;
    async fn toggle(&self, id: FieldId) -> Result<RecordStatus>;
    async fn delete(&self, id: FieldId) -> Result<()>;
}

/// Database filter field repository
pub struct DbFilterFieldRepository {
    pool: DatabasePool,
}

impl DbFilterFieldRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FilterFieldRepository for DbFilterFieldRepository {
    async fn create(&self, input: CreateFilterField) -> Result<FilterField> {
        let id = Uuid::now_v7();
        let now = chrono::Utc::now();

        sqlx::query(
            r#"
            INSERT INTO filter_fields (
                id, name, description, stage, can_metric, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 'inactive', $6, $6)
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.stage.as_str())
        .bind(input.can_metric)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::Database("Failed to create filter field".to_string()))
    }

    async fn get(&self, id: FieldId) -> Result<Option<FilterField>> {
        sqlx::query_as::<_, FilterField>("SELECT * FROM filter_fields WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_active(&self) -> Result<Vec<FilterField>> {
        sqlx::query_as::<_, FilterField>(
            "SELECT * FROM filter_fields WHERE status = 'active' ORDER BY name ASC",
        )
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_active_by_stage(&self, stage: FilterStage) -> Result<Vec<FilterField>> {
        sqlx::query_as::<_, FilterField>(
            "SELECT * FROM filter_fields WHERE status = 'active' AND stage = $1 ORDER BY name ASC",
        )
        .bind(stage.as_str())
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn update(&self, id: FieldId, input: CreateFilterField) -> Result<FilterField> {
        sqlx::query(
            r#"
            UPDATE filter_fields SET
                name = $2,
                description = $3,
                stage = $4,
                can_metric = $5,
                updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.stage.as_str())
        .bind(input.can_metric)
        .bind(chrono::Utc::now())
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::Database("Filter field not found".to_string()))
    }

    async fn toggle(&self, id: FieldId) -> Result<RecordStatus> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE filter_fields SET
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
            .ok_or_else(|| Error::Database("Filter field not found or deleted".to_string()))?
            .parse()
    }

    async fn delete(&self, id: FieldId) -> Result<()> {
        sqlx::query("UPDATE filter_fields SET status = 'deleted', updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(chrono::Utc::now())
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
