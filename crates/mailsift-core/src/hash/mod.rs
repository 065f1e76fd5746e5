//! Similarity hashing of message text and attachments

mod spamsum;

pub use spamsum::{spamsum, FuzzyHasher, Spamsum};
