//! Warehouse query gateway
//!
//! The derivation engine's only I/O boundary. Queries are static SQL text with
//! bound parameters; rows come back as ordered, typed columns.

pub mod schema;
pub mod sqlite;

use crate::error::GatewayError;
use async_trait::async_trait;

pub use sqlite::SqliteWarehouse;

/// A single typed column value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

/// One result row
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(pub Vec<SqlValue>);

impl Row {
    /// Column at `idx`, `Null` when out of range
    pub fn get(&self, idx: usize) -> &SqlValue {
        self.0.get(idx).unwrap_or(&SqlValue::Null)
    }

    pub fn get_i64(&self, idx: usize) -> Option<i64> {
        self.get(idx).as_i64()
    }

    pub fn get_text(&self, idx: usize) -> Option<&str> {
        self.get(idx).as_text()
    }
}

/// Parameterized read-only query
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub sql: &'static str,
    pub params: Vec<SqlValue>,
}

impl Query {
    pub fn new(sql: &'static str) -> Self {
        Self {
            sql,
            params: Vec::new(),
        }
    }

    /// Append a positional parameter
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// Read-only access to the relational warehouse
#[async_trait]
pub trait WarehouseGateway: Send + Sync {
    /// Execute a query and collect every row
    async fn execute_query(&self, query: &Query) -> Result<Vec<Row>, GatewayError>;
}
