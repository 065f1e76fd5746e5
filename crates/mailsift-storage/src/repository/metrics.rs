//! Filter metric repository

use crate::db::DatabasePool;
use crate::models::{CreateFilterMetric, FilterField, FilterMetric, MetricDefinition};
use async_trait::async_trait;
use mailsift_common::types::{MetricId, RecordStatus};
use mailsift_common::{Error, Result};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

/// Filter metric repository trait
#[async_trait]
pub trait FilterMetricRepository: Send + Sync {
    async fn create(&self, input: CreateFilterMetric) -> Result<FilterMetric>;
    async fn get(&self, id: MetricId) -> Result<Option<FilterMetric>>;
    /// Active metrics whose bound fields are active and metric-capable
    async fn list_active_definitions(&self) -> Result<Vec<MetricDefinition>>;
    async fn update(&self, id: MetricId, input: CreateFilterMetric) -> Result<FilterMetric>;
    async fn toggle(&self, id: MetricId) -> Result<RecordStatus>;
    async fn delete(&self, id: MetricId) -> Result<()>;
}

/// Database filter metric repository
pub struct DbFilterMetricRepository {
    pool: DatabasePool,
}

impl DbFilterMetricRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Pair metrics with their fields, dropping metrics bound to unusable fields
pub fn assemble_definitions(
    metrics: Vec<FilterMetric>,
    fields: Vec<FilterField>,
) -> Vec<MetricDefinition> {
    let fields: HashMap<Uuid, FilterField> = fields
        .into_iter()
        .filter(|f| f.is_active() && f.can_metric)
        .map(|f| (f.id, f))
        .collect();

    metrics
        .into_iter()
        .filter(|m| m.is_active())
        .filter_map(|metric| {
            let primary = fields.get(&metric.primary_field_id).cloned();
            let secondary = match metric.secondary_field_id {
                Some(id) => match fields.get(&id) {
                    Some(field) => Some(Some(field.clone())),
                    None => None,
                },
                None => Some(None),
            };

            match (primary, secondary) {
                (Some(primary), Some(secondary)) => Some(MetricDefinition {
                    metric,
                    primary,
                    secondary,
                }),
                _ => {
                    warn!(metric = %metric.name, "Metric bound to an inactive field, skipping");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl FilterMetricRepository for DbFilterMetricRepository {
    async fn create(&self, input: CreateFilterMetric) -> Result<FilterMetric> {
        input.validate()?;

        let id = Uuid::now_v7();
        let now = chrono::Utc::now();

        sqlx::query(
            r#"
            INSERT INTO filter_metrics (
                id, name, description, primary_field_id, secondary_field_id,
                operation, category, unit, bucket_interval, status,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'inactive', $10, $10)
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.primary_field_id)
        .bind(input.secondary_field_id)
        .bind(input.operation.as_str())
        .bind(input.category.as_str())
        .bind(input.unit.as_str())
        .bind(input.interval)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::Database("Failed to create filter metric".to_string()))
    }

    async fn get(&self, id: MetricId) -> Result<Option<FilterMetric>> {
        sqlx::query_as::<_, FilterMetric>("SELECT * FROM filter_metrics WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_active_definitions(&self) -> Result<Vec<MetricDefinition>> {
        let metrics = sqlx::query_as::<_, FilterMetric>(
            "SELECT * FROM filter_metrics WHERE status = 'active' ORDER BY name ASC",
        )
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let fields = sqlx::query_as::<_, FilterField>(
            "SELECT * FROM filter_fields WHERE status = 'active' AND can_metric = true",
        )
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(assemble_definitions(metrics, fields))
    }

    async fn update(&self, id: MetricId, input: CreateFilterMetric) -> Result<FilterMetric> {
        input.validate()?;

        sqlx::query(
            r#"
            UPDATE filter_metrics SET
                name = $2,
                description = $3,
                primary_field_id = $4,
                secondary_field_id = $5,
                operation = $6,
                category = $7,
                unit = $8,
                bucket_interval = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.primary_field_id)
        .bind(input.secondary_field_id)
        .bind(input.operation.as_str())
        .bind(input.category.as_str())
        .bind(input.unit.as_str())
        .bind(input.interval)
        .bind(chrono::Utc::now())
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::Database("Filter metric not found".to_string()))
    }

    async fn toggle(&self, id: MetricId) -> Result<RecordStatus> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE filter_metrics SET
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
            .ok_or_else(|| Error::Database("Filter metric not found or deleted".to_string()))?
            .parse()
    }

    async fn delete(&self, id: MetricId) -> Result<()> {
        sqlx::query("UPDATE filter_metrics SET status = 'deleted', updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(chrono::Utc::now())
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn field(name: &str, status: &str, can_metric: bool) -> FilterField {
        FilterField {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            stage: "connect".to_string(),
            can_metric,
            status: status.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn metric(name: &str, primary: Uuid, secondary: Option<Uuid>) -> FilterMetric {
        FilterMetric {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            primary_field_id: primary,
            secondary_field_id: secondary,
            operation: "count".to_string(),
            category: "all".to_string(),
            unit: "minute".to_string(),
            interval: 10,
            status: "active".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_assemble_skips_inactive_fields() {
        let ip = field("ClientIP", "active", true);
        let helo = field("Helo", "inactive", true);
        let host = field("Hostname", "active", false);

        let defs = assemble_definitions(
            vec![
                metric("ip_10m", ip.id, None),
                metric("ip_helo", ip.id, Some(helo.id)),
                metric("host_10m", host.id, None),
            ],
            vec![ip, helo, host],
        );

        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].metric.name, "ip_10m");
        assert!(defs[0].secondary.is_none());
    }
}
