//! Redis-backed metric cache

use super::cache::MetricCache;
use async_trait::async_trait;
use mailsift_common::{Error, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

/// Metric cache shared by every mailsift instance through Redis
#[derive(Clone)]
pub struct RedisMetricCache {
    conn: ConnectionManager,
}

impl RedisMetricCache {
    /// Connect to the given Redis URL
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(cache_error)?;
        let conn = ConnectionManager::new(client).await.map_err(cache_error)?;
        info!("Connected to Redis metric cache");
        Ok(Self { conn })
    }
}

fn cache_error(err: redis::RedisError) -> Error {
    Error::Cache(err.to_string())
}

fn ttl_secs(ttl: Duration) -> i64 {
    ttl.as_secs().max(1) as i64
}

#[async_trait]
impl MetricCache for RedisMetricCache {
    async fn incr_expire(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, ttl_secs(ttl))
            .ignore()
            .query_async::<_, Vec<i64>>(&mut conn)
            .await
            .map_err(cache_error)
            .map(|v| v.first().copied().unwrap_or(0))
    }

    async fn sadd_expire(&self, key: &str, member: &str, ttl: Duration) -> Result<i64> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .sadd(key, member)
            .ignore()
            .expire(key, ttl_secs(ttl))
            .ignore()
            .scard(key)
            .query_async::<_, Vec<i64>>(&mut conn)
            .await
            .map_err(cache_error)
            .map(|v| v.first().copied().unwrap_or(0))
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(key).await.map_err(cache_error)
    }

    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl) as u64)
            .await
            .map_err(cache_error)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(cache_error)
    }
}
