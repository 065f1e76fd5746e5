//! Postgres pool for the filter catalog, rules, hashes and logs

use mailsift_common::config::DatabaseConfig;
use mailsift_common::{Error, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Shared Postgres pool
#[derive(Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

fn is_postgres_url(url: &str) -> bool {
    url.starts_with("postgres://") || url.starts_with("postgresql://")
}

impl DatabasePool {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        if !is_postgres_url(&config.url) {
            return Err(Error::Config(
                "database.url must be a postgres:// URL".to_string(),
            ));
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await
            .map_err(|e| Error::Database(format!("connect: {}", e)))?;
        info!(max_connections = config.max_connections, "Connected to Postgres");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the filter schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("migrate: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_postgres_urls() {
        assert!(is_postgres_url("postgres://mailsift@localhost/mailsift"));
        assert!(is_postgres_url("postgresql://localhost/mailsift"));
        assert!(!is_postgres_url("sqlite://mailsift.db"));
        assert!(!is_postgres_url("postgres"));
    }
}
