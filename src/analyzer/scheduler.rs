//! Periodic analysis driver.
//!
//! One background task per scheduler, running a full analysis pass on a
//! fixed interval. Restarting always cancels the previous task first, so
//! at most one analysis loop exists per scheduler.
//!
//! Each pass snapshots the streams under the read lock, rebuilds the
//! correlation matrix and every report on the compute pool, then takes the
//! write lock only to install the results. Ingestion never waits on the
//! numeric work.

use super::{build_report, CorrelationEngine, TelemetryAnalyzer};
use crate::compute::ComputePool;
use crate::types::AnalysisReport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval_ms: 5_000 }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("scheduler interval must be nonzero".into());
        }
        Ok(())
    }
}

pub struct AnalysisScheduler {
    analyzer: Arc<RwLock<TelemetryAnalyzer>>,
    pool: ComputePool,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl AnalysisScheduler {
    pub fn new(analyzer: Arc<RwLock<TelemetryAnalyzer>>, pool: ComputePool) -> Self {
        Self {
            analyzer,
            pool,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    /// Start (or restart) the periodic loop. A running loop is cancelled
    /// before the new one spawns.
    pub async fn start(&mut self, interval_ms: u64) {
        self.stop().await;

        let analyzer = self.analyzer.clone();
        let pool = self.pool.clone();
        let cancel = CancellationToken::new();
        self.cancel = cancel.clone();

        info!(interval_ms, "analysis scheduler started");
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the first
            // analysis happens one full interval after start
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("analysis scheduler cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        run_analysis_pass(&analyzer, &pool).await;
                    }
                }
            }
        }));
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the loop and wait for it to wind down. Idempotent.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
            info!("analysis scheduler stopped");
        }
    }
}

/// One full pass: snapshot, compute off-lock, install.
pub(crate) async fn run_analysis_pass(
    analyzer: &Arc<RwLock<TelemetryAnalyzer>>,
    pool: &ComputePool,
) {
    let (snapshots, config) = {
        let guard = analyzer.read().await;
        (guard.analysis_snapshot(), guard.config().clone())
    };
    if snapshots.is_empty() {
        return;
    }

    let result = pool
        .run(move || {
            let series: Vec<(String, Vec<f64>)> = snapshots
                .iter()
                .map(|s| (s.stream_id.clone(), s.values.clone()))
                .collect();
            let matrix = CorrelationEngine::new(config.correlation.clone()).build_matrix(&series);
            let reports: Vec<AnalysisReport> = snapshots
                .iter()
                .filter_map(|s| build_report(&config, s, &matrix))
                .collect();
            (matrix, reports)
        })
        .await;

    match result {
        Ok((matrix, reports)) => {
            let mut guard = analyzer.write().await;
            guard.install_matrix(matrix);
            let count = reports.len();
            guard.install_reports(reports);
            debug!(reports = count, "periodic analysis pass");
        }
        Err(err) => warn!(%err, "periodic analysis pass failed"),
    }
}
