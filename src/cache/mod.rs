//! Feature cache layer
//!
//! Provides the storage abstraction the derivation engine writes through and
//! the query service reads from, plus its in-memory and SQLite-backed
//! implementations.

pub mod memory;
pub mod sqlite;

use crate::error::Result;
use crate::types::{EntityKey, FeatureValue};
use async_trait::async_trait;
use std::collections::BTreeMap;

pub use memory::InMemoryFeatureCache;
pub use sqlite::SqliteFeatureCache;

/// Full contents of one namespace, ordered by key
pub type NamespaceRecords = BTreeMap<EntityKey, Option<FeatureValue>>;

/// Cache backend trait defining all required operations
///
/// A stored value of `None` marks a key that was derived but has no value.
/// `get_one` distinguishes that from a key that was never written
/// ([`FeatureStoreError::UnknownKey`](crate::error::FeatureStoreError::UnknownKey)).
#[async_trait]
pub trait FeatureCache: Send + Sync {
    /// Acquire backend resources; repeated calls are harmless
    async fn connect(&self) -> Result<()>;

    /// Release backend resources; repeated calls are harmless
    async fn disconnect(&self) -> Result<()>;

    /// Create a namespace and register it as supported (idempotent)
    async fn create_namespace(&self, name: &str) -> Result<()>;

    /// Write or overwrite one record in an existing namespace
    async fn insert(&self, namespace: &str, key: EntityKey, value: Option<FeatureValue>)
        -> Result<()>;

    /// Point lookup
    async fn get_one(&self, namespace: &str, key: EntityKey) -> Result<Option<FeatureValue>>;

    /// Every record in a namespace
    async fn get_all(&self, namespace: &str) -> Result<NamespaceRecords>;

    /// Drop a namespace with its records; returns whether it existed
    async fn delete(&self, namespace: &str) -> Result<bool>;

    /// Registered namespace names in creation order
    async fn supported_namespaces(&self) -> Result<Vec<String>>;
}

/// Which cache implementation to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Sqlite,
}
