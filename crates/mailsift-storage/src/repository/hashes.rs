//! Fuzzy hash repository

use crate::db::DatabasePool;
use crate::models::{CreateFuzzyHash, FuzzyHash};
use async_trait::async_trait;
use mailsift_common::{Error, Result};
use uuid::Uuid;

/// Fuzzy hash repository trait
#[async_trait]
pub trait FuzzyHashRepository: Send + Sync {
    /// Store a hash, or return the record already stored under the same value
    async fn create_if_absent(&self, input: CreateFuzzyHash) -> Result<FuzzyHash>;
    async fn find_by_hash(&self, hash: &str) -> Result<Option<FuzzyHash>>;
}

/// Database fuzzy hash repository
pub struct DbFuzzyHashRepository {
    pool: DatabasePool,
}

impl DbFuzzyHashRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FuzzyHashRepository for DbFuzzyHashRepository {
    async fn create_if_absent(&self, input: CreateFuzzyHash) -> Result<FuzzyHash> {
        sqlx::query(
            r#"
            INSERT INTO fuzzy_hashes (id, hash, session_id, chunk_size, is_attachment, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (hash) DO NOTHING
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&input.hash)
        .bind(input.session_id)
        .bind(input.chunk_size)
        .bind(input.is_attachment)
        .bind(chrono::Utc::now())
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Persist(e.to_string()))?;

        self.find_by_hash(&input.hash)
            .await?
            .ok_or_else(|| Error::Persist(format!("Fuzzy hash {} vanished", input.hash)))
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<FuzzyHash>> {
        sqlx::query_as::<_, FuzzyHash>("SELECT * FROM fuzzy_hashes WHERE hash = $1")
            .bind(hash)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Persist(e.to_string()))
    }
}
