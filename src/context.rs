//! Explicitly constructed process context
//!
//! Holds the one engine, cache and query service a process uses. It is built
//! once at startup and handed to the API router and the scheduler.

use crate::cache::{CacheBackendKind, FeatureCache, InMemoryFeatureCache, SqliteFeatureCache};
use crate::config::{CacheConfig, FeatureStoreConfig};
use crate::engine::{BatchScheduler, FeatureEngine};
use crate::error::{FeatureStoreError, Result};
use crate::service::FeatureQueryService;
use crate::warehouse::{SqliteWarehouse, WarehouseGateway};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct FeatureStoreContext {
    pub engine: Arc<FeatureEngine>,
    pub cache: Arc<dyn FeatureCache>,
    pub queries: FeatureQueryService,
    /// Fires on shutdown; cancels warehouse queries and the scheduler
    pub cancel: CancellationToken,
}

impl FeatureStoreContext {
    /// Wire a context from already-constructed collaborators
    pub fn new(
        warehouse: Arc<dyn WarehouseGateway>,
        cache: Arc<dyn FeatureCache>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine: Arc::new(FeatureEngine::new(warehouse, cache.clone())),
            queries: FeatureQueryService::new(cache.clone()),
            cache,
            cancel,
        }
    }

    /// Open the configured warehouse and cache and connect the cache
    pub async fn from_config(config: &FeatureStoreConfig, cancel: CancellationToken) -> Result<Self> {
        let warehouse = SqliteWarehouse::with_options(
            &config.warehouse.path,
            config.warehouse.pool_size,
            config.warehouse.query_timeout,
        )?
        .with_cancellation(cancel.clone());

        let cache = build_cache(&config.cache)?;
        cache.connect().await?;

        Ok(Self::new(Arc::new(warehouse), cache, cancel))
    }

    /// Scheduler re-running passes on this context's engine
    pub fn scheduler(&self, config: &FeatureStoreConfig) -> BatchScheduler {
        BatchScheduler::new(self.engine.clone(), &config.batch, self.cancel.clone())
    }

    /// Cancel outstanding work and release the cache
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        self.cache.disconnect().await?;
        info!("Feature store context shut down");
        Ok(())
    }
}

/// Construct the cache backend named in the configuration
pub fn build_cache(config: &CacheConfig) -> Result<Arc<dyn FeatureCache>> {
    match config.backend {
        CacheBackendKind::Memory => Ok(Arc::new(InMemoryFeatureCache::new())),
        CacheBackendKind::Sqlite => {
            let path = config.path.as_ref().ok_or_else(|| {
                FeatureStoreError::Config("cache: path is required for the sqlite backend".into())
            })?;
            Ok(Arc::new(SqliteFeatureCache::new(path)))
        }
    }
}
