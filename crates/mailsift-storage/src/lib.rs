//! mailsift Storage - PostgreSQL persistence
//!
//! This crate stores the filter definitions (fields, metrics, rules)
//! and the per-message results (fuzzy hashes, filter logs).

pub mod db;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use models::*;
pub use repository::*;
