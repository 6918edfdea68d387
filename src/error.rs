//! Error types for the feature store
//!
//! Structured error definitions use thiserror; anyhow errors raised at the
//! binary boundary are folded into [`FeatureStoreError::Other`].

use std::time::Duration;
use thiserror::Error;

/// Failures reported by a warehouse gateway.
///
/// Every variant is fatal to an in-progress batch pass.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Connection could not be acquired or was lost
    #[error("Warehouse unavailable: {0}")]
    Unavailable(String),

    /// Query text or parameters were rejected by the warehouse
    #[error("Malformed warehouse query: {0}")]
    MalformedQuery(String),

    /// Query did not complete within the configured deadline
    #[error("Warehouse query timed out after {0:?}")]
    Timeout(Duration),

    /// Query abandoned because the pass was cancelled
    #[error("Warehouse query cancelled")]
    Cancelled,
}

/// Main error type for feature store operations
#[derive(Error, Debug)]
pub enum FeatureStoreError {
    /// Namespace was never created in the cache
    #[error("Feature namespace not in cache: {0}")]
    UnknownNamespace(String),

    /// Key has no record within an existing namespace
    #[error("Key {key} not in feature namespace {namespace}")]
    UnknownKey { namespace: String, key: String },

    /// Cache backend is disconnected or its pool is gone
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Warehouse gateway failure
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Another batch pass is still running on this engine
    #[error("Batch pass already in progress")]
    PassInProgress,

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for feature store operations
pub type Result<T> = std::result::Result<T, FeatureStoreError>;

impl From<anyhow::Error> for FeatureStoreError {
    fn from(err: anyhow::Error) -> Self {
        FeatureStoreError::Other(err.to_string())
    }
}

impl From<rusqlite::Error> for FeatureStoreError {
    fn from(err: rusqlite::Error) -> Self {
        FeatureStoreError::Database(err.to_string())
    }
}

impl FeatureStoreError {
    /// Whether this error must abort a batch pass rather than be recovered per entity.
    pub fn is_fatal_to_pass(&self) -> bool {
        matches!(
            self,
            FeatureStoreError::Gateway(_)
                | FeatureStoreError::CacheUnavailable(_)
                | FeatureStoreError::Database(_)
        )
    }
}
