//! Feature derivation engine
//!
//! Walks every entity id in the warehouse, derives each known feature and
//! writes the result through the feature cache. A pass is re-runnable:
//! namespace creation is idempotent and inserts overwrite per key.

pub mod derivations;
pub mod scheduler;

use crate::cache::FeatureCache;
use crate::error::{FeatureStoreError, Result};
use crate::types::{EntityKey, EntityKind, FeatureName};
use crate::warehouse::{Query, WarehouseGateway};
use chrono::{DateTime, Utc};
use derivations::{AbsenceReason, Derived};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use uuid::Uuid;

pub use scheduler::BatchScheduler;

/// Summary of one completed batch pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub pass_id: Uuid,
    pub started_at: DateTime<Utc>,

    #[serde(with = "serde_duration_millis")]
    pub duration: Duration,

    /// Entity ids visited per entity type
    pub entities: BTreeMap<EntityKind, usize>,

    /// Records written with a value
    pub values_written: usize,

    /// Records written as absent, by reason
    pub absent: BTreeMap<AbsenceReason, usize>,

    /// Inserts the cache refused (unknown namespace)
    pub rejected_inserts: usize,
}

impl BatchReport {
    fn new(pass_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            pass_id,
            started_at,
            duration: Duration::ZERO,
            entities: BTreeMap::new(),
            values_written: 0,
            absent: BTreeMap::new(),
            rejected_inserts: 0,
        }
    }

    /// Total records written, with or without a value
    pub fn records_written(&self) -> usize {
        self.values_written + self.absent.values().sum::<usize>()
    }
}

// Custom serde module for Duration (serialize/deserialize as milliseconds)
mod serde_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    Success,
    Failed,
    Timeout,
}

/// Record of the most recent pass attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassRun {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: PassStatus,
    pub report: Option<BatchReport>,
    pub error: Option<String>,
}

/// Clears the in-progress flag even when the pass future is dropped
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            return Err(FeatureStoreError::PassInProgress);
        }
        Ok(Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Derives the fixed feature set from the warehouse into the cache
pub struct FeatureEngine {
    warehouse: Arc<dyn WarehouseGateway>,
    cache: Arc<dyn FeatureCache>,
    features: Vec<FeatureName>,
    running: AtomicBool,
    last_run: RwLock<Option<PassRun>>,
}

impl FeatureEngine {
    pub fn new(warehouse: Arc<dyn WarehouseGateway>, cache: Arc<dyn FeatureCache>) -> Self {
        Self {
            warehouse,
            cache,
            features: FeatureName::ALL.to_vec(),
            running: AtomicBool::new(false),
            last_run: RwLock::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Most recent pass attempt, if any
    pub async fn last_run(&self) -> Option<PassRun> {
        self.last_run.read().await.clone()
    }

    pub(crate) async fn record_run(&self, run: PassRun) {
        *self.last_run.write().await = Some(run);
    }

    /// Run one full batch pass
    ///
    /// Gateway and cache-availability failures abort the pass and are
    /// returned; records already written stay in place. Refuses to start
    /// while another pass on this engine is running.
    pub async fn run_batch_pass(&self) -> Result<BatchReport> {
        let _guard = PassGuard::acquire(&self.running)?;

        let started_at = Utc::now();
        let clock = Instant::now();
        let mut report = BatchReport::new(Uuid::new_v4(), started_at);
        info!("Inserting feature batch to cache (pass {})", report.pass_id);

        let outcome = self.execute_pass(&mut report).await;
        report.duration = clock.elapsed();

        match outcome {
            Ok(()) => {
                info!(
                    "Batch pass {} completed in {:?}: {} values, {} absent, {} rejected",
                    report.pass_id,
                    report.duration,
                    report.values_written,
                    report.records_written() - report.values_written,
                    report.rejected_inserts
                );
                self.record_run(PassRun {
                    started_at,
                    completed_at: Utc::now(),
                    status: PassStatus::Success,
                    report: Some(report.clone()),
                    error: None,
                })
                .await;
                Ok(report)
            }
            Err(e) => {
                error!("Batch pass {} aborted: {}", report.pass_id, e);
                self.record_run(PassRun {
                    started_at,
                    completed_at: Utc::now(),
                    status: PassStatus::Failed,
                    report: None,
                    error: Some(e.to_string()),
                })
                .await;
                Err(e)
            }
        }
    }

    async fn execute_pass(&self, report: &mut BatchReport) -> Result<()> {
        for feature in &self.features {
            self.cache.create_namespace(feature.as_str()).await?;
        }

        self.derive_user_features(report).await?;
        self.derive_quote_features(report).await?;
        self.derive_payment_transaction_features(report).await?;
        Ok(())
    }

    async fn entity_ids(&self, kind: EntityKind, sql: &'static str) -> Result<Vec<EntityKey>> {
        let rows = self.warehouse.execute_query(&Query::new(sql)).await?;
        let ids: Vec<EntityKey> = rows
            .iter()
            .filter_map(|row| row.get_i64(0))
            .map(EntityKey)
            .collect();
        debug!("Found {} {} id records", ids.len(), kind);
        Ok(ids)
    }

    async fn derive_user_features(&self, report: &mut BatchReport) -> Result<()> {
        debug!("Inserting user id based features...");
        let user_ids = self.entity_ids(EntityKind::User, derivations::USER_IDS).await?;
        report.entities.insert(EntityKind::User, user_ids.len());

        let warehouse = self.warehouse.as_ref();
        for user_id in user_ids {
            let policy_ids = derivations::policy_ids_for_user(warehouse, user_id).await?;

            let derived =
                derivations::user_payment_transaction_time(warehouse, user_id, &policy_ids).await?;
            self.write(FeatureName::UserPaymentTransactionTime, user_id, derived, report)
                .await?;

            let derived =
                derivations::user_failed_transactions_count(warehouse, user_id, &policy_ids)
                    .await?;
            self.write(FeatureName::UserFailedTransactionsCount, user_id, derived, report)
                .await?;
        }
        Ok(())
    }

    async fn derive_quote_features(&self, report: &mut BatchReport) -> Result<()> {
        debug!("Inserting quote id based features...");
        let quote_ids = self.entity_ids(EntityKind::Quote, derivations::QUOTE_IDS).await?;
        report.entities.insert(EntityKind::Quote, quote_ids.len());

        for quote_id in quote_ids {
            let derived =
                derivations::quote_creation_binding_time(self.warehouse.as_ref(), quote_id).await?;
            self.write(FeatureName::QuoteCreationBindingTime, quote_id, derived, report)
                .await?;
        }
        Ok(())
    }

    async fn derive_payment_transaction_features(&self, report: &mut BatchReport) -> Result<()> {
        debug!("Inserting payment transaction id based features...");
        let transaction_ids = self
            .entity_ids(
                EntityKind::PaymentTransaction,
                derivations::PAYMENT_TRANSACTION_IDS,
            )
            .await?;
        report
            .entities
            .insert(EntityKind::PaymentTransaction, transaction_ids.len());

        for transaction_id in transaction_ids {
            let derived =
                derivations::payment_transaction_type(self.warehouse.as_ref(), transaction_id)
                    .await?;
            self.write(FeatureName::PaymentTransactionType, transaction_id, derived, report)
                .await?;
        }
        Ok(())
    }

    /// Write one derived outcome, absent values included
    async fn write(
        &self,
        feature: FeatureName,
        key: EntityKey,
        derived: Derived,
        report: &mut BatchReport,
    ) -> Result<()> {
        let reason = match &derived {
            Derived::Absent(reason) => Some(*reason),
            Derived::Value(_) => None,
        };

        match self.cache.insert(feature.as_str(), key, derived.into_value()).await {
            Ok(()) => {
                match reason {
                    Some(reason) => *report.absent.entry(reason).or_default() += 1,
                    None => report.values_written += 1,
                }
                Ok(())
            }
            Err(e) if e.is_fatal_to_pass() => Err(e),
            Err(e) => {
                error!("Failed to write {} for key {}: {}", feature, key, e);
                report.rejected_inserts += 1;
                Ok(())
            }
        }
    }
}
