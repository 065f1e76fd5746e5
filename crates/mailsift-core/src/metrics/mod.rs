//! Windowed metrics over extracted signals

pub mod bucket;
mod cache;
mod engine;
mod redis_cache;

pub use bucket::{bucket_label, window};
pub use cache::{MemoryMetricCache, MetricCache};
pub use engine::{metric_key, MetricEngine};
pub use redis_cache::RedisMetricCache;
