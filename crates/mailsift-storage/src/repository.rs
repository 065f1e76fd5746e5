//! Repository layer for data access

pub mod fields;
pub mod hashes;
pub mod logs;
pub mod metrics;
pub mod rules;

// Re-export concrete repository implementations
pub use fields::DbFilterFieldRepository;
pub use hashes::DbFuzzyHashRepository;
pub use logs::DbFilterLogRepository;
pub use metrics::{assemble_definitions, DbFilterMetricRepository};
pub use rules::DbFilterRuleRepository;

// Re-export repository traits
pub use fields::FilterFieldRepository;
pub use hashes::FuzzyHashRepository;
pub use logs::FilterLogRepository;
pub use metrics::FilterMetricRepository;
pub use rules::FilterRuleRepository;
