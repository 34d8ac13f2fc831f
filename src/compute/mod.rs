//! Bounded pool for CPU-heavy analysis jobs.
//!
//! Heavy work (FFT, isolation forest, correlation matrices) goes through a
//! [`ComputePool`] so it never starves the async runtime. Concurrency is a
//! semaphore over `spawn_blocking`; every job carries a deadline.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    /// The job did not finish inside its deadline. The caller gets this
    /// error and must resubmit explicitly; there is no automatic retry.
    #[error("compute job timed out after {timeout_ms}ms")]
    JobTimeout { timeout_ms: u64 },
    #[error("compute job panicked: {0}")]
    JobPanicked(String),
    #[error("compute pool is shut down")]
    PoolClosed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// Jobs allowed to run concurrently
    pub workers: usize,
    /// Per-job deadline in milliseconds
    pub job_timeout_ms: u64,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            job_timeout_ms: 5_000,
        }
    }
}

impl ComputeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("compute pool needs at least one worker".into());
        }
        if self.job_timeout_ms == 0 {
            return Err("compute job timeout must be nonzero".into());
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ComputePool {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl ComputePool {
    pub fn new(config: &ComputeConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.workers)),
            timeout: Duration::from_millis(config.job_timeout_ms),
        }
    }

    /// Run a blocking job on the pool, waiting for a free slot first.
    ///
    /// On timeout the slot is released immediately so other jobs can
    /// proceed; the abandoned closure may still run to completion on its
    /// blocking thread since blocking work cannot be interrupted.
    pub async fn run<F, T>(&self, job: F) -> Result<T, ComputeError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ComputeError::PoolClosed)?;

        let handle = tokio::task::spawn_blocking(job);
        let timeout_ms = self.timeout.as_millis() as u64;
        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(value)) => {
                drop(permit);
                Ok(value)
            }
            Ok(Err(join_err)) => {
                drop(permit);
                Err(ComputeError::JobPanicked(join_err.to_string()))
            }
            Err(_) => {
                drop(permit);
                warn!(timeout_ms, "compute job exceeded deadline, abandoning");
                Err(ComputeError::JobTimeout { timeout_ms })
            }
        }
    }
}
