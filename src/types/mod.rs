//! Shared data contracts
//!
//! Plain serializable structures that cross component boundaries: samples on
//! the way in, reports/metrics/matrix entries on the way out. These carry no
//! behavior beyond constructors and cheap accessors; visualization and
//! export consumers deserialize them as-is.

mod events;
mod report;
mod sample;

pub use events::EngineEvent;
pub use report::{
    AnalysisReport, AnomalySummary, CorrelationEntry, CrossCorrelation, FrequencySummary,
    ReportStatistics, ReportSummary, SignificanceBand, TrendSummary,
};
pub use sample::{PrioritizedSample, ProcessedSample, Quality, Sample, SampleValue, StageTag};

use serde::{Deserialize, Serialize};

/// Circuit breaker state. See the backpressure module for the transition
/// rules; the state itself is part of the metrics contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation, samples flow through.
    Closed,
    /// Sustained overload; everything is dropped.
    Open,
    /// Probing for recovery after the open timeout.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Continuously replaced snapshot of backpressure behavior.
///
/// Not an append log: each call to `metrics()` on the controller builds a
/// fresh snapshot from the live counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackpressureMetrics {
    /// Name of the strategy currently in effect
    pub strategy: String,
    /// Samples currently buffered
    pub buffer_size: usize,
    /// Total samples dropped since creation or the last `clear_buffers()`
    pub dropped_messages: u64,
    /// Total samples forwarded downstream
    pub processed_messages: u64,
    /// Rolling average ingest latency in milliseconds
    pub avg_latency_ms: f64,
    /// Last observed memory pressure (0.0 - 100.0)
    pub memory_pressure: f64,
    /// Last observed CPU pressure (0.0 - 100.0)
    pub cpu_pressure: f64,
    /// Circuit breaker state at snapshot time
    pub circuit_state: CircuitState,
}
