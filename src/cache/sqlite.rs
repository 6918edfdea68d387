//! SQLite-backed feature cache
//!
//! Disk-backed alternative to [`InMemoryFeatureCache`](super::InMemoryFeatureCache).
//! Records live in a single table keyed by (namespace, entity key) and every
//! insert is an independent upsert, so a pass never holds a lock across rows.
//! Access goes through a deadpool-sqlite pool that `connect` creates and
//! `disconnect` closes.

use super::{FeatureCache, NamespaceRecords};
use crate::error::{FeatureStoreError, Result};
use crate::types::{EntityKey, FeatureValue};
use async_trait::async_trait;
use deadpool_sqlite::{Config, Pool, PoolConfig, Runtime};
use rusqlite::OptionalExtension;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Default connection pool size
const DEFAULT_POOL_SIZE: usize = 8;

const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS feature_namespaces (
    position INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS feature_records (
    namespace TEXT NOT NULL,
    entity_key INTEGER NOT NULL,
    value TEXT,
    PRIMARY KEY (namespace, entity_key)
);
"#;

/// Feature cache persisted in a SQLite file
pub struct SqliteFeatureCache {
    path: PathBuf,
    pool_size: usize,
    pool: RwLock<Option<Pool>>,
}

impl SqliteFeatureCache {
    /// Create a cache bound to `db_path`; nothing is opened until [`FeatureCache::connect`]
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self::with_pool_size(db_path, DEFAULT_POOL_SIZE)
    }

    /// Create a cache with a custom pool size
    pub fn with_pool_size<P: AsRef<Path>>(db_path: P, pool_size: usize) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
            pool_size,
            pool: RwLock::new(None),
        }
    }

    /// Run `f` on a pooled connection
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T> + Send + 'static,
    {
        let pool = self
            .pool
            .read()
            .await
            .clone()
            .ok_or_else(|| FeatureStoreError::CacheUnavailable("not connected".to_string()))?;

        let conn = pool.get().await.map_err(|e| {
            FeatureStoreError::CacheUnavailable(format!(
                "Failed to get connection from pool: {}",
                e
            ))
        })?;

        conn.interact(f)
            .await
            .map_err(|e| FeatureStoreError::Database(format!("Pool interaction failed: {}", e)))?
    }

    fn namespace_exists(conn: &rusqlite::Connection, namespace: &str) -> Result<bool> {
        let found = conn
            .query_row(
                "SELECT 1 FROM feature_namespaces WHERE name = ?1",
                rusqlite::params![namespace],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn encode(value: &Option<FeatureValue>) -> Result<Option<String>> {
        value
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(FeatureStoreError::from)
    }

    fn decode(raw: Option<String>) -> Result<Option<FeatureValue>> {
        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(FeatureStoreError::from)
    }
}

#[async_trait]
impl FeatureCache for SqliteFeatureCache {
    async fn connect(&self) -> Result<()> {
        let mut slot = self.pool.write().await;
        if slot.is_some() {
            debug!("Feature cache at {} already connected", self.path.display());
            return Ok(());
        }

        info!(
            "Opening SQLite feature cache at: {} (pool_size: {})",
            self.path.display(),
            self.pool_size
        );

        let mut config = Config::new(self.path.clone());
        config.pool = Some(PoolConfig::new(self.pool_size));
        let pool = config.create_pool(Runtime::Tokio1).map_err(|e| {
            FeatureStoreError::CacheUnavailable(format!("Failed to create connection pool: {}", e))
        })?;

        let conn = pool.get().await.map_err(|e| {
            FeatureStoreError::CacheUnavailable(format!(
                "Failed to get connection from pool: {}",
                e
            ))
        })?;
        conn.interact(|conn| {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            conn.execute_batch(CACHE_SCHEMA)
        })
        .await
        .map_err(|e| FeatureStoreError::Database(format!("Pool interaction failed: {}", e)))??;

        *slot = Some(pool);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close();
            info!("Closed SQLite feature cache at {}", self.path.display());
        }
        Ok(())
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        let created = self
            .with_conn({
                let name = name.clone();
                move |conn| {
                    let changed = conn.execute(
                        "INSERT OR IGNORE INTO feature_namespaces (name) VALUES (?1)",
                        rusqlite::params![name],
                    )?;
                    Ok(changed > 0)
                }
            })
            .await?;

        if created {
            info!("Adding feature namespace {} to cache", name);
        } else {
            debug!("Feature namespace {} already in cache", name);
        }
        Ok(())
    }

    async fn insert(
        &self,
        namespace: &str,
        key: EntityKey,
        value: Option<FeatureValue>,
    ) -> Result<()> {
        let namespace = namespace.to_string();
        let encoded = Self::encode(&value)?;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            if !Self::namespace_exists(&tx, &namespace)? {
                return Err(FeatureStoreError::UnknownNamespace(namespace));
            }
            tx.execute(
                r#"
                INSERT INTO feature_records (namespace, entity_key, value)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(namespace, entity_key) DO UPDATE SET value = excluded.value
                "#,
                rusqlite::params![namespace, key.0, encoded],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_one(&self, namespace: &str, key: EntityKey) -> Result<Option<FeatureValue>> {
        let namespace = namespace.to_string();

        let raw = self
            .with_conn(move |conn| {
                if !Self::namespace_exists(conn, &namespace)? {
                    return Err(FeatureStoreError::UnknownNamespace(namespace));
                }
                let raw = conn
                    .query_row(
                        "SELECT value FROM feature_records WHERE namespace = ?1 AND entity_key = ?2",
                        rusqlite::params![namespace, key.0],
                        |row| row.get::<_, Option<String>>(0),
                    )
                    .optional()?;
                raw.ok_or(FeatureStoreError::UnknownKey {
                    namespace,
                    key: key.to_string(),
                })
            })
            .await?;

        Self::decode(raw)
    }

    async fn get_all(&self, namespace: &str) -> Result<NamespaceRecords> {
        let namespace = namespace.to_string();

        let rows = self
            .with_conn(move |conn| {
                if !Self::namespace_exists(conn, &namespace)? {
                    return Err(FeatureStoreError::UnknownNamespace(namespace));
                }
                let mut stmt = conn.prepare(
                    "SELECT entity_key, value FROM feature_records WHERE namespace = ?1",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![namespace], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(key, raw)| Ok((EntityKey(key), Self::decode(raw)?)))
            .collect()
    }

    async fn delete(&self, namespace: &str) -> Result<bool> {
        let namespace = namespace.to_string();

        let existed = self
            .with_conn({
                let namespace = namespace.clone();
                move |conn| {
                    let tx = conn.transaction()?;
                    tx.execute(
                        "DELETE FROM feature_records WHERE namespace = ?1",
                        rusqlite::params![namespace],
                    )?;
                    let removed = tx.execute(
                        "DELETE FROM feature_namespaces WHERE name = ?1",
                        rusqlite::params![namespace],
                    )?;
                    tx.commit()?;
                    Ok(removed > 0)
                }
            })
            .await?;

        if existed {
            info!("Deleted feature namespace {}", namespace);
        }
        Ok(existed)
    }

    async fn supported_namespaces(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT name FROM feature_namespaces ORDER BY position")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(names)
        })
        .await
    }
}
