//! mailsift - milter content filter entry point

use anyhow::Result;
use mailsift_common::config::{Config, LoggingConfig};
use mailsift_core::features::{ExtractorSettings, FeatureExtractor, FilterCatalog, Resolvers};
use mailsift_core::resolver::{DnsResolver, RegionLookup};
use mailsift_core::{
    DnsSpfChecker, FilterContext, MemoryMetricCache, MetricCache, MetricEngine, MilterServer,
    NoRegionLookup, RedisMetricCache, RuleEngine, RuleReloader, SessionSettings,
    StaticRegionLookup, TrustDnsResolver,
};
use mailsift_storage::{
    DatabasePool, DbFilterFieldRepository, DbFilterLogRepository, DbFilterMetricRepository,
    DbFilterRuleRepository, DbFuzzyHashRepository,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting mailsift milter...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;
    info!("Database connection established");

    // Run migrations
    db_pool.migrate().await?;
    info!("Database migrations completed");

    // Shared metric cache
    let cache: Arc<dyn MetricCache> = match &config.redis.url {
        Some(url) => Arc::new(RedisMetricCache::connect(url).await?),
        None => {
            warn!("No Redis configured, metrics are kept in this process only");
            Arc::new(MemoryMetricCache::new())
        }
    };

    // Resolvers
    let dns: Arc<dyn DnsResolver> = Arc::new(TrustDnsResolver::new(&config.resolver)?);
    let regions: Arc<dyn RegionLookup> = if config.resolver.regions.is_empty() {
        Arc::new(NoRegionLookup)
    } else {
        Arc::new(StaticRegionLookup::new(&config.resolver.regions)?)
    };
    let resolvers = Resolvers {
        spf: Arc::new(DnsSpfChecker::new(dns.clone())),
        dns,
        regions,
    };

    // Feature extraction
    let catalog = Arc::new(FilterCatalog::new(
        cache.clone(),
        Arc::new(DbFilterFieldRepository::new(db_pool.clone())),
        Arc::new(DbFilterMetricRepository::new(db_pool.clone())),
        Duration::from_secs(config.filter.definition_cache_ttl_secs),
    ));
    let extractor = FeatureExtractor::new(
        catalog,
        MetricEngine::new(cache),
        resolvers,
        ExtractorSettings::from_config(&config),
    )?;

    // Rule engine with background reload
    let engine = Arc::new(RuleEngine::new());
    let mut reloader = RuleReloader::new(
        Arc::new(DbFilterRuleRepository::new(db_pool.clone())),
        engine.clone(),
        Duration::from_secs(config.rules.reload_interval_secs),
    )?;
    if let Err(e) = reloader.reload_once().await {
        warn!("Initial rule load failed, filtering without rules: {}", e);
    }
    let reload_handle = reloader.spawn();

    let ctx = Arc::new(FilterContext::new(
        extractor,
        engine,
        Arc::new(DbFuzzyHashRepository::new(db_pool.clone())),
        Arc::new(DbFilterLogRepository::new(db_pool.clone())),
        SessionSettings::from_config(&config),
    ));

    let server = MilterServer::new(&config.milter, ctx)?;
    info!("Starting milter server on {}", server.listen_addr());

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Milter server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    // Cleanup
    reload_handle.abort();
    info!("mailsift shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},mailsift=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
