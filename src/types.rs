//! Core data types for the feature store
//!
//! Defines entity keys, the fixed feature-name enumeration and the values a
//! feature namespace can hold. These types are shared by the cache backends,
//! the derivation engine and the query service.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Format the warehouse uses when storing datetimes as text
pub const WAREHOUSE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// ISO-8601 variant accepted alongside the warehouse format
pub const ISO_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Identifier of a warehouse row used to address a feature value
///
/// Wraps the integer primary key so entity keys are never confused with
/// counts or durations stored as feature values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(pub i64);

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EntityKey {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Warehouse entity types whose ids key feature namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Quote,
    PaymentTransaction,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Quote => "quote",
            EntityKind::PaymentTransaction => "payment_transaction",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of features the engine knows how to derive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureName {
    /// Time of the payment on the user's highest-id policy
    UserPaymentTransactionTime,

    /// Number of failed payments across the user's policies
    UserFailedTransactionsCount,

    /// Seconds between quote creation and binding
    QuoteCreationBindingTime,

    /// Categorical payment type of a transaction
    PaymentTransactionType,
}

impl FeatureName {
    /// Every known feature, in provisioning order
    pub const ALL: [FeatureName; 4] = [
        FeatureName::UserPaymentTransactionTime,
        FeatureName::UserFailedTransactionsCount,
        FeatureName::QuoteCreationBindingTime,
        FeatureName::PaymentTransactionType,
    ];

    /// Namespace name used in the cache and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureName::UserPaymentTransactionTime => "user_payment_transaction_time",
            FeatureName::UserFailedTransactionsCount => "user_failed_transactions_count",
            FeatureName::QuoteCreationBindingTime => "quote_creation_binding_time",
            FeatureName::PaymentTransactionType => "payment_transaction_type",
        }
    }

    /// Entity type whose ids key this feature's namespace
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            FeatureName::UserPaymentTransactionTime | FeatureName::UserFailedTransactionsCount => {
                EntityKind::User
            }
            FeatureName::QuoteCreationBindingTime => EntityKind::Quote,
            FeatureName::PaymentTransactionType => EntityKind::PaymentTransaction,
        }
    }
}

impl std::fmt::Display for FeatureName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| format!("unknown feature name: {}", s))
    }
}

/// A computed feature value
///
/// Absence is modelled outside this type: namespaces store
/// `Option<FeatureValue>` so a key can be known but unresolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum FeatureValue {
    /// Elapsed time in whole seconds
    DurationSecs(i64),

    /// Number of matching rows
    Count(i64),

    /// Categorical label copied from the warehouse
    Label(String),

    /// Point in time, as stored by the warehouse
    Timestamp(NaiveDateTime),
}

impl FeatureValue {
    /// Plain JSON rendering for API consumers (no type tag)
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FeatureValue::DurationSecs(secs) => serde_json::Value::from(*secs),
            FeatureValue::Count(count) => serde_json::Value::from(*count),
            FeatureValue::Label(label) => serde_json::Value::from(label.as_str()),
            FeatureValue::Timestamp(ts) => {
                serde_json::Value::from(ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
            }
        }
    }
}

/// Render an optional value the way the lookup API returns it
pub fn value_to_json(value: Option<&FeatureValue>) -> serde_json::Value {
    value.map_or(serde_json::Value::Null, FeatureValue::to_json)
}

/// Parse a warehouse datetime in either accepted text format
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, WAREHOUSE_TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, ISO_TIMESTAMP_FORMAT))
}
