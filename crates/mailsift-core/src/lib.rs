//! mailsift Core - milter content filter
//!
//! This crate turns live SMTP transactions, streamed by the MTA over the
//! milter protocol, into features, evaluates them against hot-reloaded
//! filter rules and answers with a disposition.

pub mod context;
pub mod disposition;
pub mod features;
pub mod hash;
pub mod metrics;
pub mod milter;
pub mod preprocess;
pub mod resolver;
pub mod rules;

#[cfg(test)]
mod testing;

pub use context::{FilterContext, SessionSettings};
pub use features::{ExtractorSettings, FeatureExtractor, FeatureStore, FilterCatalog, Resolvers};
pub use hash::{FuzzyHasher, Spamsum};
pub use metrics::{MemoryMetricCache, MetricCache, MetricEngine, RedisMetricCache};
pub use milter::{MilterServer, Response, Session};
pub use resolver::{DnsSpfChecker, NoRegionLookup, StaticRegionLookup, TrustDnsResolver};
pub use rules::{Decision, RuleEngine, RuleReloader};
