//! Shedding strategies and adaptive strategy selection.
//!
//! A strategy answers one synchronous question: the buffer is full (or the
//! system is loaded) and a sample just arrived; what gives? Ingestion
//! never blocks on a full buffer.

use serde::{Deserialize, Serialize};

/// Directly selectable shedding strategies, plus `Adaptive` which picks one
/// of the others per batch from live system metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SheddingStrategy {
    /// Evict the oldest buffered sample on overflow
    DropOldest,
    /// Reject the incoming sample on overflow
    DropNewest,
    /// Buffer up to capacity, then reject
    Buffer,
    /// Fixed-size window: admit, evicting the oldest (alias of DropOldest
    /// semantics with windowed intent)
    BufferSliding,
    /// Keep every nth sample under load
    Sample,
    /// Keep only the most recent value per channel, coalescing the rest
    Conflate,
    /// Evict the lowest-priority buffered sample first
    DropPriority,
    /// Re-evaluated per batch from system load
    Adaptive,
}

impl SheddingStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DropOldest => "drop-oldest",
            Self::DropNewest => "drop-newest",
            Self::Buffer => "buffer",
            Self::BufferSliding => "buffer-sliding",
            Self::Sample => "sample",
            Self::Conflate => "conflate",
            Self::DropPriority => "drop-priority",
            Self::Adaptive => "adaptive",
        }
    }
}

/// Live system metrics driving adaptive selection. The provider is
/// pluggable so tests can script load profiles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemLoad {
    /// CPU utilization, 0.0 - 100.0
    pub cpu_pct: f64,
    /// Memory utilization, 0.0 - 100.0
    pub memory_pct: f64,
    /// Event-loop / scheduler delay in milliseconds
    pub scheduler_delay_ms: f64,
}

impl Default for SystemLoad {
    fn default() -> Self {
        Self {
            cpu_pct: 0.0,
            memory_pct: 0.0,
            scheduler_delay_ms: 0.0,
        }
    }
}

/// Thresholds for the adaptive selection table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveThresholds {
    pub memory_pct: f64,
    pub cpu_pct: f64,
    pub scheduler_delay_ms: f64,
}

impl Default for AdaptiveThresholds {
    fn default() -> Self {
        Self {
            memory_pct: 80.0,
            cpu_pct: 80.0,
            scheduler_delay_ms: 100.0,
        }
    }
}

/// The adaptive selection table, re-evaluated on every batch:
///
/// | condition                         | strategy        |
/// |-----------------------------------|-----------------|
/// | memory over threshold             | drop-priority   |
/// | cpu over threshold                | sample          |
/// | scheduler delay over threshold    | conflate        |
/// | any metric above 70% of threshold | buffer-sliding  |
/// | otherwise                         | buffer          |
pub fn select_strategy(load: &SystemLoad, thresholds: &AdaptiveThresholds) -> SheddingStrategy {
    if load.memory_pct > thresholds.memory_pct {
        SheddingStrategy::DropPriority
    } else if load.cpu_pct > thresholds.cpu_pct {
        SheddingStrategy::Sample
    } else if load.scheduler_delay_ms > thresholds.scheduler_delay_ms {
        SheddingStrategy::Conflate
    } else if load.memory_pct > 0.7 * thresholds.memory_pct
        || load.cpu_pct > 0.7 * thresholds.cpu_pct
        || load.scheduler_delay_ms > 0.7 * thresholds.scheduler_delay_ms
    {
        SheddingStrategy::BufferSliding
    } else {
        SheddingStrategy::Buffer
    }
}

/// Sampling interval under CPU pressure: grows proportionally with load
/// past the threshold (1x at the threshold, 2x at double, capped).
pub fn sample_interval_for_load(cpu_pct: f64, cpu_threshold: f64) -> u64 {
    if cpu_threshold <= 0.0 || cpu_pct <= cpu_threshold {
        return 1;
    }
    ((cpu_pct / cpu_threshold).ceil() as u64).clamp(2, 100)
}
