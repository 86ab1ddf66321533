//! Error types for the Turnstile service.

use std::fmt;

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Counter store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;

/// Errors raised while assembling configuration at startup.
///
/// All of these are fatal: the process refuses to serve traffic.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Neither the dimension-specific variable nor its fallback is set.
    #[error("{name} or {fallback} must be set")]
    Missing { name: String, fallback: String },

    /// The variable is set but is not an integer.
    #[error("{name} must be an integer, got {value:?}")]
    Invalid { name: String, value: String },

    /// The variable parsed but is zero.
    #[error("{name} must be greater than zero")]
    OutOfRange { name: String },

    /// The layered service configuration could not be loaded.
    #[error("Failed to load service configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// The store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Add,
    CountFrom,
    PruneBefore,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOperation::Add => "add",
            StoreOperation::CountFrom => "count_from",
            StoreOperation::PruneBefore => "prune_before",
        };
        f.write_str(name)
    }
}

/// Any failure talking to the ordered counter store.
#[derive(Error, Debug)]
#[error("{operation} on {key:?} failed: {source}")]
pub struct StoreError {
    pub operation: StoreOperation,
    pub key: String,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl StoreError {
    /// Wrap an underlying store failure.
    pub fn new<E>(operation: StoreOperation, key: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            operation,
            key: key.into(),
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_names_operation_and_key() {
        let err = StoreError::new(StoreOperation::PruneBefore, "IP_10.0.0.1", "connection reset");
        let message = err.to_string();
        assert!(message.contains("prune_before"));
        assert!(message.contains("IP_10.0.0.1"));
        assert!(message.contains("connection reset"));
    }

    #[test]
    fn test_config_error_missing_mentions_both_names() {
        let err = ConfigError::Missing {
            name: "MAX_REQUESTS_IP".to_string(),
            fallback: "MAX_REQUESTS".to_string(),
        };
        assert_eq!(err.to_string(), "MAX_REQUESTS_IP or MAX_REQUESTS must be set");
    }
}
