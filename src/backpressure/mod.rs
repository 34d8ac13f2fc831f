//! Load shedding for streams that outpace their consumers.
//!
//! A [`BackpressureController`] sits between a pipeline and whatever
//! consumes its output. Every sample passes a [`CircuitBreaker`] first;
//! admitted samples then go through the active [`SheddingStrategy`], which
//! decides what to keep when the bounded buffer is full. The adaptive
//! strategy re-reads [`SystemLoad`] each batch and switches between the
//! concrete strategies on the fly.

pub mod circuit;
pub mod controller;
pub mod strategy;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitDecision};
pub use controller::BackpressureController;
pub use strategy::{
    sample_interval_for_load, select_strategy, AdaptiveThresholds, SheddingStrategy, SystemLoad,
};

use serde::{Deserialize, Serialize};

/// Everything a controller needs, deserializable from the engine config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Shedding strategy; `adaptive` selects per batch from system load
    pub strategy: SheddingStrategy,
    /// Maximum buffered samples before the strategy has to shed
    pub capacity: usize,
    pub adaptive: AdaptiveThresholds,
    pub circuit: CircuitBreakerConfig,
    /// Samples pulled downstream per drain call
    pub drain_batch: usize,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            strategy: SheddingStrategy::Buffer,
            capacity: 10_000,
            adaptive: AdaptiveThresholds::default(),
            circuit: CircuitBreakerConfig::default(),
            drain_batch: 256,
        }
    }
}

impl BackpressureConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("backpressure capacity must be at least 1".into());
        }
        if self.drain_batch == 0 {
            return Err("drain batch must be at least 1".into());
        }
        if self.circuit.threshold == 0 {
            return Err("circuit threshold must be at least 1".into());
        }
        if self.circuit.half_open_attempts == 0 {
            return Err("half-open attempts must be at least 1".into());
        }
        Ok(())
    }
}
