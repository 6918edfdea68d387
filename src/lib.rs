//! Feature Store - Batch Feature Derivation over a Relational Warehouse
//!
//! Derives a fixed set of entity features from a warehouse of users, quotes,
//! policies and payment transactions, writes them through a pluggable
//! feature cache and serves them back for inference and training:
//! - Per-feature namespaces with explicit "no value" records
//! - In-memory and SQLite-backed cache implementations
//! - Re-runnable batch passes with optional periodic refresh
//! - HTTP lookup API over the cache
//!
//! # Architecture
//!
//! The system is organized into several layers:
//! - **Warehouse**: Parameterized read-only query gateway
//! - **Engine**: Per-entity derivations and the batch pass
//! - **Cache**: Namespaced key/value storage backends
//! - **Service / API**: Validated lookups and their HTTP routes
//!
//! # Example
//!
//! ```ignore
//! use feature_store_core::{FeatureStoreConfig, FeatureStoreContext};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = FeatureStoreConfig::from_file("feature-store.toml".as_ref())?;
//!     let context = FeatureStoreContext::from_config(&config, CancellationToken::new()).await?;
//!
//!     let report = context.engine.run_batch_pass().await?;
//!     println!("{} records written", report.records_written());
//!
//!     let value = context
//!         .queries
//!         .inference(Some("payment_transaction_type"), Some(1.into()))
//!         .await?;
//!     println!("{:?}", value);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod service;
pub mod types;
pub mod warehouse;

// Re-export commonly used types
pub use cache::{CacheBackendKind, FeatureCache, InMemoryFeatureCache, SqliteFeatureCache};
pub use config::FeatureStoreConfig;
pub use context::FeatureStoreContext;
pub use engine::{BatchReport, BatchScheduler, FeatureEngine, PassRun, PassStatus};
pub use error::{FeatureStoreError, GatewayError, Result};
pub use service::{FeatureQueryService, QueryError};
pub use types::{EntityKey, EntityKind, FeatureName, FeatureValue};
pub use warehouse::{Query, Row, SqlValue, SqliteWarehouse, WarehouseGateway};
