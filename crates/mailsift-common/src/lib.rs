//! mailsift Common - Shared types and configuration
//!
//! This crate provides the configuration, error type, and domain types
//! shared by the storage layer, the filter engine, and the server binary.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{CompileError, Error, Result};
pub use types::{Feature, FeatureValue};
