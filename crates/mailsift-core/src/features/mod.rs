//! Feature extraction
//!
//! Raw signals of each SMTP checkpoint are turned into typed features:
//! active filter fields pick signals by name, and windowed metrics count
//! occurrences across transactions.

mod catalog;
mod extractor;
pub mod mime;
pub mod signals;
mod store;

pub use catalog::FilterCatalog;
pub use extractor::{
    BodyAnalysis, ContentHash, ExtractorSettings, FeatureExtractor, Resolvers,
    MULTI_VALUE_SEPARATOR,
};
pub use signals::{names, Payload, Signals};
pub use store::FeatureStore;
