// Batch Pass Scheduler
//
// Re-runs the derivation engine on a fixed interval, bounding each pass by a
// maximum duration, until the shared cancellation token fires.

use super::{FeatureEngine, PassRun, PassStatus};
use crate::config::BatchConfig;
use crate::error::FeatureStoreError;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Periodic trigger for batch passes
pub struct BatchScheduler {
    engine: Arc<FeatureEngine>,
    refresh_interval: Duration,
    max_duration: Duration,
    cancel: CancellationToken,
}

impl BatchScheduler {
    pub fn new(engine: Arc<FeatureEngine>, config: &BatchConfig, cancel: CancellationToken) -> Self {
        Self {
            engine,
            refresh_interval: config.refresh_interval,
            max_duration: config.max_duration,
            cancel,
        }
    }

    /// A zero refresh interval disables periodic passes
    pub fn is_enabled(&self) -> bool {
        !self.refresh_interval.is_zero()
    }

    /// Run passes until cancelled; the first one fires after one interval
    pub async fn run(&self) {
        if !self.is_enabled() {
            debug!("Periodic batch refresh disabled");
            return;
        }

        info!(
            "Starting batch scheduler (every {:?}, max {:?} per pass)",
            self.refresh_interval,
            self.max_duration
        );

        let mut ticker = interval_at(Instant::now() + self.refresh_interval, self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Stopping batch scheduler");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }
    }

    /// Run a single bounded pass; `None` when another pass was already running
    pub async fn run_once(&self) -> Option<PassStatus> {
        let started_at = Utc::now();

        match timeout(self.max_duration, self.engine.run_batch_pass()).await {
            Ok(Ok(report)) => {
                debug!("Scheduled pass {} finished", report.pass_id);
                Some(PassStatus::Success)
            }
            Ok(Err(FeatureStoreError::PassInProgress)) => {
                debug!("Batch pass still running, skipping this tick");
                None
            }
            Ok(Err(e)) => {
                error!("Scheduled batch pass failed: {}", e);
                Some(PassStatus::Failed)
            }
            Err(_) => {
                error!("Batch pass exceeded {:?}, abandoned", self.max_duration);
                self.engine
                    .record_run(PassRun {
                        started_at,
                        completed_at: Utc::now(),
                        status: PassStatus::Timeout,
                        report: None,
                        error: Some(format!("timed out after {:?}", self.max_duration)),
                    })
                    .await;
                Some(PassStatus::Timeout)
            }
        }
    }
}
