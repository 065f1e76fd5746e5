//! Error types for mailsift

use thiserror::Error;

/// Rule compilation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("rule {0} has no usable condition")]
    EmptyCondition(String),

    #[error("invalid condition on {field}: {reason}")]
    InvalidCondition { field: String, reason: String },

    #[error("no active rule could be compiled")]
    NoActiveRules,
}

/// Main error type for mailsift
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Resolver error: {0}")]
    Resolver(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Persist error: {0}")]
    Persist(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for mailsift
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Protocol(_) => "PROTOCOL_ERROR",
            Error::Resolver(_) => "RESOLVER_ERROR",
            Error::Cache(_) => "CACHE_ERROR",
            Error::Compile(_) => "COMPILE_ERROR",
            Error::Persist(_) => "PERSIST_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error must end the milter connection
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Protocol("bad frame".into()).code(), "PROTOCOL_ERROR");
        assert_eq!(
            Error::from(CompileError::NoActiveRules).code(),
            "COMPILE_ERROR"
        );
    }

    #[test]
    fn test_fatal_errors() {
        assert!(Error::Protocol("length 0".into()).is_fatal());
        assert!(!Error::Resolver("timeout".into()).is_fatal());
        assert!(!Error::Cache("down".into()).is_fatal());
    }
}
