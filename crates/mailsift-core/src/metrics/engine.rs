//! Windowed metric evaluation

use super::bucket::{bucket_label, window};
use super::cache::MetricCache;
use chrono::{DateTime, Utc};
use mailsift_common::types::MetricOperation;
use mailsift_common::{Feature, Result};
use mailsift_storage::FilterMetric;
use std::sync::Arc;
use tracing::{trace, warn};

/// Cache key of a metric bucket
pub fn metric_key(name: &str, label: &str, primary: &str, secondary: Option<&str>) -> String {
    match secondary {
        Some(secondary) => format!("{}:{}:{}:{}", name, label, primary, secondary),
        None => format!("{}:{}:{}", name, label, primary),
    }
}

/// Turns metric observations into count features
pub struct MetricEngine {
    cache: Arc<dyn MetricCache>,
}

impl MetricEngine {
    pub fn new(cache: Arc<dyn MetricCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<dyn MetricCache> {
        &self.cache
    }

    /// Record one occurrence and return the metric feature
    ///
    /// `None` when the metric cannot apply to the given values.
    pub async fn observe(
        &self,
        metric: &FilterMetric,
        primary: &str,
        secondary: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Feature>> {
        let unit = metric.unit()?;
        let label = bucket_label(now, unit, metric.interval);
        let ttl = window(unit, metric.interval);

        let value = match metric.operation()? {
            MetricOperation::Count => {
                let key = metric_key(&metric.name, &label, primary, secondary);
                let count = self.cache.incr_expire(&key, ttl).await?;
                trace!(key = %key, count, "metric counted");
                count
            }
            MetricOperation::Collect => {
                let Some(member) = secondary else {
                    warn!(metric = %metric.name, "collect metric without a secondary field");
                    return Ok(None);
                };
                let key = metric_key(&metric.name, &label, primary, None);
                let size = self.cache.sadd_expire(&key, member, ttl).await?;
                trace!(key = %key, size, "metric collected");
                size
            }
        };

        Ok(Some(Feature::new(metric.name.clone(), value)))
    }
}
