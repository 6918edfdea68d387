//! Per-entity feature algorithms
//!
//! Each function derives one feature for one entity id. Missing related rows
//! and unparseable timestamps come back as [`Derived::Absent`]; only gateway
//! failures are returned as errors, and those abort the pass.

use crate::error::Result;
use crate::types::{parse_timestamp, EntityKey, FeatureValue};
use crate::warehouse::{Query, SqlValue, WarehouseGateway};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const USER_IDS: &str = r#"SELECT id FROM "user" ORDER BY id"#;
pub const QUOTE_IDS: &str = "SELECT id FROM quote ORDER BY id";
pub const PAYMENT_TRANSACTION_IDS: &str = "SELECT id FROM payment_transaction ORDER BY id";

const POLICY_IDS_FOR_USER: &str = "SELECT id FROM policy WHERE user_id = ?1";

const PAYMENT_TIME_FOR_POLICY: &str =
    "SELECT time FROM payment_transaction WHERE policy_id = ?1 ORDER BY id LIMIT 1";

const FAILED_TRANSACTIONS_FOR_USER: &str = r#"
    SELECT COUNT(*) FROM payment_transaction
    WHERE success = 0
      AND policy_id IN (SELECT id FROM policy WHERE user_id = ?1)
"#;

const QUOTE_TIMES: &str = "SELECT create_time, bind_time FROM quote WHERE id = ?1";

const PAYMENT_TYPE: &str = "SELECT payment_type FROM payment_transaction WHERE id = ?1";

/// Outcome of deriving one feature for one entity
#[derive(Debug, Clone, PartialEq)]
pub enum Derived {
    Value(FeatureValue),
    Absent(AbsenceReason),
}

impl Derived {
    pub fn into_value(self) -> Option<FeatureValue> {
        match self {
            Derived::Value(value) => Some(value),
            Derived::Absent(_) => None,
        }
    }
}

/// Why a feature has no value for an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsenceReason {
    /// User has no policies
    NoPolicies,
    /// Chosen policy has no payment transaction
    NoTransaction,
    /// Entity id no longer resolves to a row
    UnresolvedEntity,
    /// A required column is null
    MissingValue,
    /// A timestamp column could not be parsed
    UnparseableTimestamp,
    /// bind_time precedes create_time
    NegativeDuration,
}

/// Policy ids owned by a user, loaded once and shared by the user features
pub async fn policy_ids_for_user(
    warehouse: &dyn WarehouseGateway,
    user_id: EntityKey,
) -> Result<Vec<i64>> {
    let rows = warehouse
        .execute_query(&Query::new(POLICY_IDS_FOR_USER).bind(user_id.0))
        .await?;
    Ok(rows.iter().filter_map(|row| row.get_i64(0)).collect())
}

/// Time of the payment on the user's highest-id policy
///
/// The maximum policy id stands in for "most recently created policy".
pub async fn user_payment_transaction_time(
    warehouse: &dyn WarehouseGateway,
    user_id: EntityKey,
    policy_ids: &[i64],
) -> Result<Derived> {
    let Some(latest_policy) = policy_ids.iter().copied().max() else {
        return Ok(Derived::Absent(AbsenceReason::NoPolicies));
    };

    let rows = warehouse
        .execute_query(&Query::new(PAYMENT_TIME_FOR_POLICY).bind(latest_policy))
        .await?;
    let Some(row) = rows.first() else {
        return Ok(Derived::Absent(AbsenceReason::NoTransaction));
    };

    Ok(match row.get(0) {
        SqlValue::Null => Derived::Absent(AbsenceReason::MissingValue),
        SqlValue::Text(raw) => match parse_timestamp(raw) {
            Ok(ts) => Derived::Value(FeatureValue::Timestamp(ts)),
            Err(e) => {
                warn!(
                    "Failed to parse payment time {:?} for user id {}: {}",
                    raw, user_id, e
                );
                Derived::Absent(AbsenceReason::UnparseableTimestamp)
            }
        },
        other => {
            warn!("Unexpected payment time {:?} for user id {}", other, user_id);
            Derived::Absent(AbsenceReason::UnparseableTimestamp)
        }
    })
}

/// Failed payments across all of the user's policies
///
/// A user without policies yields no value rather than zero.
pub async fn user_failed_transactions_count(
    warehouse: &dyn WarehouseGateway,
    user_id: EntityKey,
    policy_ids: &[i64],
) -> Result<Derived> {
    if policy_ids.is_empty() {
        return Ok(Derived::Absent(AbsenceReason::NoPolicies));
    }

    let rows = warehouse
        .execute_query(&Query::new(FAILED_TRANSACTIONS_FOR_USER).bind(user_id.0))
        .await?;
    let count = rows.first().and_then(|row| row.get_i64(0)).unwrap_or(0);
    Ok(Derived::Value(FeatureValue::Count(count)))
}

/// Whole seconds from quote creation to binding
pub async fn quote_creation_binding_time(
    warehouse: &dyn WarehouseGateway,
    quote_id: EntityKey,
) -> Result<Derived> {
    let rows = warehouse
        .execute_query(&Query::new(QUOTE_TIMES).bind(quote_id.0))
        .await?;
    let Some(row) = rows.first() else {
        return Ok(Derived::Absent(AbsenceReason::UnresolvedEntity));
    };

    let (Some(create_raw), Some(bind_raw)) = (row.get_text(0), row.get_text(1)) else {
        return Ok(Derived::Absent(AbsenceReason::MissingValue));
    };

    let parsed = parse_timestamp(create_raw).and_then(|c| parse_timestamp(bind_raw).map(|b| (c, b)));
    let (create_time, bind_time) = match parsed {
        Ok(times) => times,
        Err(e) => {
            warn!(
                "Failed to calculate quote_creation_binding_time for quote id {} due to {}",
                quote_id, e
            );
            return Ok(Derived::Absent(AbsenceReason::UnparseableTimestamp));
        }
    };

    let secs = (bind_time - create_time).num_seconds();
    if secs < 0 {
        warn!(
            "Quote id {} bound {}s before it was created, skipping",
            quote_id, -secs
        );
        return Ok(Derived::Absent(AbsenceReason::NegativeDuration));
    }

    Ok(Derived::Value(FeatureValue::DurationSecs(secs)))
}

/// Payment type label of a transaction
pub async fn payment_transaction_type(
    warehouse: &dyn WarehouseGateway,
    transaction_id: EntityKey,
) -> Result<Derived> {
    let rows = warehouse
        .execute_query(&Query::new(PAYMENT_TYPE).bind(transaction_id.0))
        .await?;
    let Some(row) = rows.first() else {
        return Ok(Derived::Absent(AbsenceReason::UnresolvedEntity));
    };

    Ok(match row.get_text(0) {
        Some(label) => Derived::Value(FeatureValue::Label(label.to_string())),
        None => Derived::Absent(AbsenceReason::MissingValue),
    })
}
