//! SQLite warehouse gateway
//!
//! Runs parameterized read-only queries over a deadpool-sqlite pool. Every
//! query, pool acquisition included, is bounded by a timeout and abandoned as
//! soon as the gateway's cancellation token fires. Abandoned statements are
//! interrupted so their connection returns to the pool.

use super::{Query, Row, SqlValue, WarehouseGateway};
use crate::error::{FeatureStoreError, GatewayError, Result};
use async_trait::async_trait;
use deadpool_sqlite::{Config, Pool, PoolConfig, Runtime};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{ErrorCode, InterruptHandle};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default connection pool size
const DEFAULT_POOL_SIZE: usize = 4;

/// Default per-query deadline
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Warehouse gateway over a SQLite database file
pub struct SqliteWarehouse {
    pool: Pool,
    query_timeout: Duration,
    cancel: CancellationToken,
}

impl SqliteWarehouse {
    /// Open an existing warehouse file with default pool size and timeout
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::with_options(db_path, DEFAULT_POOL_SIZE, DEFAULT_QUERY_TIMEOUT)
    }

    /// Open an existing warehouse file
    ///
    /// # Arguments
    /// * `db_path` - Path to the warehouse database; it must already exist
    /// * `pool_size` - Maximum number of pooled connections
    /// * `query_timeout` - Deadline applied to every query
    pub fn with_options<P: AsRef<Path>>(
        db_path: P,
        pool_size: usize,
        query_timeout: Duration,
    ) -> Result<Self> {
        let db_path = db_path.as_ref();
        if !db_path.exists() {
            return Err(FeatureStoreError::Gateway(GatewayError::Unavailable(format!(
                "warehouse database {} does not exist",
                db_path.display()
            ))));
        }

        info!(
            "Opening warehouse at: {} (pool_size: {}, query_timeout: {:?})",
            db_path.display(),
            pool_size,
            query_timeout
        );

        let mut config = Config::new(db_path.to_path_buf());
        config.pool = Some(PoolConfig::new(pool_size));
        let pool = config.create_pool(Runtime::Tokio1).map_err(|e| {
            GatewayError::Unavailable(format!("Failed to create connection pool: {}", e))
        })?;

        Ok(Self {
            pool,
            query_timeout,
            cancel: CancellationToken::new(),
        })
    }

    /// Tie in-flight and future queries to an external cancellation signal
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Close the pool; later queries report the warehouse as unavailable
    pub fn close(&self) {
        self.pool.close();
    }
}

impl SqliteWarehouse {
    /// Acquire a connection and run `query` on it
    ///
    /// Publishes the connection's interrupt handle into `interrupt` before the
    /// statement starts so an abandoned query can be stopped.
    async fn run_on_pool(
        &self,
        query: &Query,
        interrupt: &OnceLock<InterruptHandle>,
    ) -> std::result::Result<Vec<Row>, GatewayError> {
        let conn = self.pool.get().await.map_err(|e| {
            GatewayError::Unavailable(format!("Failed to get connection from pool: {}", e))
        })?;

        let handle = conn
            .interact(|conn| conn.get_interrupt_handle())
            .await
            .map_err(interaction_failed)?;
        let _ = interrupt.set(handle);

        let owned = query.clone();
        conn.interact(move |conn| run_query(conn, &owned))
            .await
            .map_err(interaction_failed)?
    }
}

#[async_trait]
impl WarehouseGateway for SqliteWarehouse {
    async fn execute_query(&self, query: &Query) -> std::result::Result<Vec<Row>, GatewayError> {
        if self.cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        // The deadline covers pool acquisition as well as the statement
        let interrupt = OnceLock::new();
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GatewayError::Cancelled),
            res = tokio::time::timeout(self.query_timeout, self.run_on_pool(query, &interrupt)) => {
                res.unwrap_or(Err(GatewayError::Timeout(self.query_timeout)))
            }
        };

        match outcome {
            Ok(rows) => {
                debug!("Warehouse query returned {} rows: {}", rows.len(), query.sql.trim());
                Ok(rows)
            }
            Err(e @ (GatewayError::Cancelled | GatewayError::Timeout(_))) => {
                if let Some(handle) = interrupt.get() {
                    handle.interrupt();
                }
                warn!("Warehouse query abandoned ({}): {}", e, query.sql.trim());
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

fn interaction_failed(err: deadpool_sqlite::InteractError) -> GatewayError {
    GatewayError::Unavailable(format!("Pool interaction failed: {}", err))
}

fn run_query(
    conn: &mut rusqlite::Connection,
    query: &Query,
) -> std::result::Result<Vec<Row>, GatewayError> {
    conn.pragma_update(None, "query_only", true)
        .map_err(classify)?;

    let mut stmt = conn.prepare_cached(query.sql).map_err(classify)?;
    let columns = stmt.column_count();
    let params = rusqlite::params_from_iter(query.params.iter().map(to_sql));

    let mut rows = stmt.query(params).map_err(classify)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(classify)? {
        let mut values = Vec::with_capacity(columns);
        for idx in 0..columns {
            values.push(from_sql(row.get_ref(idx).map_err(classify)?));
        }
        out.push(Row(values));
    }
    Ok(out)
}

fn to_sql(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Real(v) => Value::Real(*v),
        SqlValue::Text(v) => Value::Text(v.clone()),
        SqlValue::Blob(v) => Value::Blob(v.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => SqlValue::Blob(v.to_vec()),
    }
}

/// Split SQLite failures into "warehouse is broken" and "query is wrong"
fn classify(err: rusqlite::Error) -> GatewayError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::SystemIoFailure
            | ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::PermissionDenied
            | ErrorCode::OutOfMemory
            | ErrorCode::OperationInterrupted => GatewayError::Unavailable(err.to_string()),
            _ => GatewayError::MalformedQuery(err.to_string()),
        },
        _ => GatewayError::MalformedQuery(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::schema::create_warehouse;
    use tempfile::TempDir;

    /// Counts to a few hundred million; runs for seconds unless interrupted
    const SLOW_QUERY: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 300000000) SELECT COUNT(*) FROM c";

    fn seeded(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("warehouse.db");
        create_warehouse(&path).unwrap();
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO "user" (id, name) VALUES (1, 'Ada'), (2, 'Grace');
            INSERT INTO quote (id, user_id, create_time, bind_time, bindable)
                VALUES (1, NULL, '2024-01-01 00:00:00.000000', NULL, NULL);
            "#,
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let err = SqliteWarehouse::open(dir.path().join("absent.db")).err().unwrap();
        assert!(matches!(
            err,
            FeatureStoreError::Gateway(GatewayError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_typed_rows_and_parameters() {
        let dir = TempDir::new().unwrap();
        let warehouse = SqliteWarehouse::open(seeded(&dir)).unwrap();

        let rows = warehouse
            .execute_query(&Query::new(r#"SELECT id, name FROM "user" WHERE id = ?1"#).bind(2i64))
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![Row(vec![SqlValue::Integer(2), SqlValue::Text("Grace".into())])]
        );

        let rows = warehouse
            .execute_query(&Query::new("SELECT user_id, bind_time FROM quote"))
            .await
            .unwrap();
        assert!(rows[0].get(0).is_null());
        assert!(rows[0].get(1).is_null());
    }

    #[tokio::test]
    async fn test_malformed_query_and_writes_are_rejected() {
        let dir = TempDir::new().unwrap();
        let warehouse = SqliteWarehouse::open(seeded(&dir)).unwrap();

        let err = warehouse
            .execute_query(&Query::new("SELECT id FROM no_such_table"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::MalformedQuery(_)));

        let err = warehouse
            .execute_query(&Query::new(r#"DELETE FROM "user""#))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::MalformedQuery(_)));
    }

    #[tokio::test]
    async fn test_cancelled_gateway_refuses_queries() {
        let dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let warehouse = SqliteWarehouse::open(seeded(&dir))
            .unwrap()
            .with_cancellation(token.clone());

        token.cancel();
        let err = warehouse
            .execute_query(&Query::new(r#"SELECT id FROM "user""#))
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::Cancelled);
    }

    #[tokio::test]
    async fn test_closed_pool_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let warehouse = SqliteWarehouse::open(seeded(&dir)).unwrap();
        warehouse.close();

        let err = warehouse
            .execute_query(&Query::new(r#"SELECT id FROM "user""#))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_timed_out_query_releases_its_connection() {
        let dir = TempDir::new().unwrap();
        let warehouse =
            SqliteWarehouse::with_options(seeded(&dir), 1, Duration::from_millis(200)).unwrap();

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            warehouse.execute_query(&Query::new(SLOW_QUERY)),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert_eq!(err, GatewayError::Timeout(Duration::from_millis(200)));

        // the only pooled connection is usable again
        let rows = tokio::time::timeout(
            Duration::from_secs(2),
            warehouse.execute_query(&Query::new(r#"SELECT id FROM "user""#)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_running_query() {
        let dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let warehouse = SqliteWarehouse::with_options(seeded(&dir), 1, Duration::from_secs(10))
            .unwrap()
            .with_cancellation(token.clone());

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            warehouse.execute_query(&Query::new(SLOW_QUERY)),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert_eq!(err, GatewayError::Cancelled);
    }
}
