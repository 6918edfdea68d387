//! Entity reference schema of the warehouse
//!
//! The warehouse is owned elsewhere; this DDL mirrors the tables the
//! derivation queries read so empty warehouses can be created for local runs
//! and tests.

use crate::error::Result;
use std::path::Path;
use tracing::info;

/// DDL for User, Quote, Policy and PaymentTransaction
pub const WAREHOUSE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS "user" (
    id INTEGER PRIMARY KEY NOT NULL,
    name VARCHAR(80) NOT NULL
);

CREATE TABLE IF NOT EXISTS quote (
    id INTEGER PRIMARY KEY NOT NULL,
    user_id INTEGER,
    create_time DATETIME,
    bind_time DATETIME,
    bindable BOOLEAN,
    FOREIGN KEY (user_id) REFERENCES "user"(id)
);

CREATE TABLE IF NOT EXISTS policy (
    id INTEGER PRIMARY KEY NOT NULL,
    user_id INTEGER NOT NULL,
    quote_id INTEGER NOT NULL,
    FOREIGN KEY (user_id) REFERENCES "user"(id),
    FOREIGN KEY (quote_id) REFERENCES quote(id)
);

CREATE TABLE IF NOT EXISTS payment_transaction (
    id INTEGER PRIMARY KEY NOT NULL,
    time DATETIME NOT NULL,
    payment_type VARCHAR(7) CHECK(payment_type IN ('CREDIT', 'DEBIT', 'PREPAID')),
    policy_id INTEGER NOT NULL,
    success BOOLEAN,
    FOREIGN KEY (policy_id) REFERENCES policy(id)
);

CREATE INDEX IF NOT EXISTS idx_policy_user ON policy(user_id);
CREATE INDEX IF NOT EXISTS idx_payment_transaction_policy ON payment_transaction(policy_id);
"#;

/// Create the entity tables in `db_path` if they do not exist
pub fn create_warehouse<P: AsRef<Path>>(db_path: P) -> Result<()> {
    let db_path = db_path.as_ref();
    info!("Initializing warehouse schema at {}", db_path.display());

    let conn = rusqlite::Connection::open(db_path)?;
    conn.execute_batch(WAREHOUSE_SCHEMA)?;
    Ok(())
}
