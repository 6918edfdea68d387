//! Common test utilities and helpers
#![allow(dead_code)]

use feature_store_core::{
    warehouse::schema::create_warehouse, FeatureCache, FeatureStoreContext, InMemoryFeatureCache,
    SqliteWarehouse,
};
use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Warehouse file in a temporary directory, populated through plain rusqlite
pub struct TestWarehouse {
    pub dir: TempDir,
    pub path: PathBuf,
    conn: Connection,
}

impl TestWarehouse {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("warehouse.db");
        create_warehouse(&path).expect("Failed to create warehouse schema");
        let conn = Connection::open(&path).expect("Failed to open warehouse");
        Self { dir, path, conn }
    }

    pub fn user(&self, id: i64) -> &Self {
        self.conn
            .execute(
                r#"INSERT INTO "user" (id, name) VALUES (?1, ?2)"#,
                params![id, format!("user-{}", id)],
            )
            .unwrap();
        self
    }

    pub fn quote(&self, id: i64, user_id: i64, create_time: &str, bind_time: Option<&str>) -> &Self {
        self.conn
            .execute(
                "INSERT INTO quote (id, user_id, create_time, bind_time, bindable) VALUES (?1, ?2, ?3, ?4, 1)",
                params![id, user_id, create_time, bind_time],
            )
            .unwrap();
        self
    }

    pub fn policy(&self, id: i64, user_id: i64, quote_id: i64) -> &Self {
        self.conn
            .execute(
                "INSERT INTO policy (id, user_id, quote_id) VALUES (?1, ?2, ?3)",
                params![id, user_id, quote_id],
            )
            .unwrap();
        self
    }

    pub fn payment(&self, id: i64, policy_id: i64, time: &str, payment_type: &str, success: bool) -> &Self {
        self.conn
            .execute(
                "INSERT INTO payment_transaction (id, time, payment_type, policy_id, success) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, time, payment_type, policy_id, success],
            )
            .unwrap();
        self
    }

    pub fn gateway(&self) -> Arc<SqliteWarehouse> {
        Arc::new(SqliteWarehouse::open(&self.path).expect("Failed to open warehouse gateway"))
    }

    /// Context over this warehouse with a connected cache
    pub async fn context_with(&self, cache: Arc<dyn FeatureCache>) -> FeatureStoreContext {
        cache.connect().await.expect("Failed to connect cache");
        FeatureStoreContext::new(self.gateway(), cache, CancellationToken::new())
    }

    pub async fn context(&self) -> FeatureStoreContext {
        self.context_with(Arc::new(InMemoryFeatureCache::new())).await
    }
}

/// One user with two policies (ids 5 and 9), a quote bound after 330s and
/// one payment per policy, the older of which failed
pub fn seeded_warehouse() -> TestWarehouse {
    let wh = TestWarehouse::new();
    wh.user(1)
        .user(2)
        .quote(10, 1, "2024-01-01 00:00:00.000000", Some("2024-01-01 00:05:30.000000"))
        .quote(11, 1, "2024-01-03 12:00:00.000000", None)
        .policy(5, 1, 10)
        .policy(9, 1, 10)
        .payment(100, 5, "2024-01-02 09:00:00.000000", "CREDIT", false)
        .payment(101, 9, "2024-02-03 04:05:06.000000", "DEBIT", true);
    wh
}
