//! Field and metric definitions, cached in the shared metric cache

use crate::metrics::MetricCache;
use mailsift_common::types::{FieldId, FilterStage, MetricId, RecordStatus};
use mailsift_common::Result;
use mailsift_storage::{
    CreateFilterField, CreateFilterMetric, FilterField, FilterFieldRepository, FilterMetric,
    FilterMetricRepository, MetricDefinition,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

fn field_key(stage: FilterStage) -> String {
    format!("filter_field_{}", stage)
}

fn metric_key(stage: FilterStage) -> String {
    format!("filter_metric_{}", stage)
}

/// Active definitions per stage
///
/// Every process reads through the same cache keys, so a mutation made
/// through one catalog is seen by all of them once the keys are dropped.
pub struct FilterCatalog {
    cache: Arc<dyn MetricCache>,
    fields: Arc<dyn FilterFieldRepository>,
    metrics: Arc<dyn FilterMetricRepository>,
    ttl: Duration,
}

impl FilterCatalog {
    pub fn new(
        cache: Arc<dyn MetricCache>,
        fields: Arc<dyn FilterFieldRepository>,
        metrics: Arc<dyn FilterMetricRepository>,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            fields,
            metrics,
            ttl,
        }
    }

    /// Active fields available at `stage`; empty when the store is unreachable
    pub async fn fields_for(&self, stage: FilterStage) -> Vec<FilterField> {
        let key = field_key(stage);
        if let Some(fields) = self.cached(&key).await {
            return fields;
        }

        match self.fields.list_active_by_stage(stage).await {
            Ok(fields) => {
                self.store(&key, &fields).await;
                fields
            }
            Err(e) => {
                warn!(stage = %stage, error = %e, "Failed to load filter fields");
                Vec::new()
            }
        }
    }

    /// Active metrics whose fields are all available at `stage`
    pub async fn metrics_for(&self, stage: FilterStage) -> Vec<MetricDefinition> {
        let key = metric_key(stage);
        if let Some(metrics) = self.cached(&key).await {
            return metrics;
        }

        match self.metrics.list_active_definitions().await {
            Ok(definitions) => {
                let metrics: Vec<MetricDefinition> = definitions
                    .into_iter()
                    .filter(|d| match d.stage() {
                        Ok(s) => s == stage,
                        Err(e) => {
                            warn!(metric = %d.metric.name, error = %e, "Metric with an invalid stage");
                            false
                        }
                    })
                    .collect();
                self.store(&key, &metrics).await;
                metrics
            }
            Err(e) => {
                warn!(stage = %stage, error = %e, "Failed to load filter metrics");
                Vec::new()
            }
        }
    }

    /// Drop every cached stage list
    pub async fn invalidate(&self) {
        for stage in FilterStage::ALL {
            for key in [field_key(stage), metric_key(stage)] {
                if let Err(e) = self.cache.delete(&key).await {
                    debug!(key = %key, error = %e, "Failed to drop cached definitions");
                }
            }
        }
    }

    pub async fn create_field(&self, input: CreateFilterField) -> Result<FilterField> {
        let field = self.fields.create(input).await?;
        info!(field = %field.name, stage = %field.stage, "Filter field created");
        self.invalidate().await;
        Ok(field)
    }

    pub async fn update_field(&self, id: FieldId, input: CreateFilterField) -> Result<FilterField> {
        let field = self.fields.update(id, input).await?;
        self.invalidate().await;
        Ok(field)
    }

    pub async fn toggle_field(&self, id: FieldId) -> Result<RecordStatus> {
        let status = self.fields.toggle(id).await?;
        info!(field_id = %id, status = %status, "Filter field toggled");
        self.invalidate().await;
        Ok(status)
    }

    pub async fn delete_field(&self, id: FieldId) -> Result<()> {
        self.fields.delete(id).await?;
        self.invalidate().await;
        Ok(())
    }

    pub async fn create_metric(&self, input: CreateFilterMetric) -> Result<FilterMetric> {
        input.validate()?;
        let metric = self.metrics.create(input).await?;
        info!(metric = %metric.name, "Filter metric created");
        self.invalidate().await;
        Ok(metric)
    }

    pub async fn update_metric(
        &self,
        id: MetricId,
        input: CreateFilterMetric,
    ) -> Result<FilterMetric> {
        input.validate()?;
        let metric = self.metrics.update(id, input).await?;
        self.invalidate().await;
        Ok(metric)
    }

    pub async fn toggle_metric(&self, id: MetricId) -> Result<RecordStatus> {
        let status = self.metrics.toggle(id).await?;
        info!(metric_id = %id, status = %status, "Filter metric toggled");
        self.invalidate().await;
        Ok(status)
    }

    pub async fn delete_metric(&self, id: MetricId) -> Result<()> {
        self.metrics.delete(id).await?;
        self.invalidate().await;
        Ok(())
    }

    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get_string(key).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!(key = %key, error = %e, "Discarding unreadable cached definitions");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                debug!(key = %key, error = %e, "Definition cache unavailable");
                None
            }
        }
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                debug!(key = %key, error = %e, "Failed to encode definitions");
                return;
            }
        };
        if let Err(e) = self.cache.set_string(key, &json, self.ttl).await {
            debug!(key = %key, error = %e, "Failed to cache definitions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MemoryMetricCache;
    use crate::testing::{field, metric, MemoryFieldRepository, MemoryMetricRepository};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;

    fn catalog(
        fields: Arc<MemoryFieldRepository>,
        metrics: Arc<MemoryMetricRepository>,
    ) -> (FilterCatalog, Arc<MemoryMetricCache>) {
        let cache = Arc::new(MemoryMetricCache::new());
        (
            FilterCatalog::new(cache.clone(), fields, metrics, Duration::from_secs(300)),
            cache,
        )
    }

    #[tokio::test]
    async fn test_fields_are_cached_per_stage() {
        let fields = Arc::new(MemoryFieldRepository::with(vec![
            field("ClientIP", FilterStage::Connect),
            field("Subject", FilterStage::Header),
        ]));
        let (catalog, cache) = catalog(fields.clone(), Arc::new(MemoryMetricRepository::default()));

        let connect = catalog.fields_for(FilterStage::Connect).await;
        assert_eq!(connect.len(), 1);
        assert_eq!(connect[0].name, "ClientIP");
        assert!(cache.get_string("filter_field_connect").await.unwrap().is_some());

        // Served from the cache while the store is down
        fields.fail.store(true, Ordering::SeqCst);
        assert_eq!(catalog.fields_for(FilterStage::Connect).await.len(), 1);
        assert!(catalog.fields_for(FilterStage::Helo).await.is_empty());
    }

    #[tokio::test]
    async fn test_mutation_invalidates_cache() {
        let fields = Arc::new(MemoryFieldRepository::default());
        let (catalog, cache) = catalog(fields, Arc::new(MemoryMetricRepository::default()));

        assert!(catalog.fields_for(FilterStage::Helo).await.is_empty());
        assert!(cache.get_string("filter_field_helo").await.unwrap().is_some());

        catalog
            .create_field(CreateFilterField {
                name: "Helo".to_string(),
                description: None,
                stage: FilterStage::Helo,
                can_metric: true,
            })
            .await
            .unwrap();
        assert!(cache.get_string("filter_field_helo").await.unwrap().is_none());
        assert_eq!(catalog.fields_for(FilterStage::Helo).await.len(), 1);
    }

    #[tokio::test]
    async fn test_metrics_grouped_by_governing_stage() {
        let ip = field("ClientIP", FilterStage::Connect);
        let rcpt = field("Rcpt", FilterStage::RcptTo);
        let metrics = Arc::new(MemoryMetricRepository::with(
            vec![
                metric("ip_count", &ip, None, "count"),
                metric("ip_rcpts", &ip, Some(&rcpt), "collect"),
            ],
            vec![ip, rcpt],
        ));
        let (catalog, _) = catalog(Arc::new(MemoryFieldRepository::default()), metrics);

        let connect = catalog.metrics_for(FilterStage::Connect).await;
        assert_eq!(connect.len(), 1);
        assert_eq!(connect[0].metric.name, "ip_count");

        let rcpt = catalog.metrics_for(FilterStage::RcptTo).await;
        assert_eq!(rcpt.len(), 1);
        assert_eq!(rcpt[0].metric.name, "ip_rcpts");
    }
}
