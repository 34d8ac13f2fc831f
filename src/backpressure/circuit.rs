//! Circuit breaker: the flow-control guard in front of the shedding
//! strategies.
//!
//! Three states. Closed trips to open after `threshold` consecutive
//! high-latency observations. Open rejects everything until `timeout_ms`
//! has elapsed, then the next observation probes in half-open. Half-open
//! closes after `half_open_attempts` consecutive low-latency observations
//! and reverts to open on any high-latency one.
//!
//! State transitions are observable events, never errors.

use crate::types::CircuitState;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive high-latency observations before tripping
    pub threshold: u32,
    /// Latency above this is "high" (milliseconds)
    pub latency_threshold_ms: u64,
    /// Time spent open before probing
    pub timeout_ms: u64,
    /// Consecutive low-latency probes required to close again
    pub half_open_attempts: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            latency_threshold_ms: 1_000,
            timeout_ms: 30_000,
            half_open_attempts: 3,
        }
    }
}

/// What the breaker decided about one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    /// Forward the sample
    Accept,
    /// Drop the sample (breaker open)
    Reject,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_high: u32,
    consecutive_low: u32,
    /// When the breaker last opened (ms timestamp of the triggering call)
    opened_at_ms: Option<u64>,
    /// Transition recorded by the last observation, consumed by the caller
    last_transition: Option<(CircuitState, CircuitState)>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_high: 0,
            consecutive_low: 0,
            opened_at_ms: None,
            last_transition: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Transition produced by the most recent `observe` call, if any.
    /// Consumed on read so each transition is reported once.
    pub fn take_transition(&mut self) -> Option<(CircuitState, CircuitState)> {
        self.last_transition.take()
    }

    /// Feed one observation: the sample's ingest latency at time `now_ms`.
    pub fn observe(&mut self, latency_ms: u64, now_ms: u64) -> CircuitDecision {
        // Scheduled open -> half-open happens lazily on the next
        // observation after the timeout.
        if self.state == CircuitState::Open {
            let elapsed = self
                .opened_at_ms
                .map(|t| now_ms.saturating_sub(t))
                .unwrap_or(0);
            if elapsed >= self.config.timeout_ms {
                self.transition(CircuitState::HalfOpen);
                self.consecutive_low = 0;
            } else {
                return CircuitDecision::Reject;
            }
        }

        let high = latency_ms > self.config.latency_threshold_ms;
        match self.state {
            CircuitState::Closed => {
                if high {
                    self.consecutive_high += 1;
                    if self.consecutive_high >= self.config.threshold {
                        self.opened_at_ms = Some(now_ms);
                        self.transition(CircuitState::Open);
                        return CircuitDecision::Reject;
                    }
                } else {
                    self.consecutive_high = 0;
                }
                CircuitDecision::Accept
            }
            CircuitState::HalfOpen => {
                if high {
                    // Any high-latency probe reverts immediately
                    self.opened_at_ms = Some(now_ms);
                    self.transition(CircuitState::Open);
                    CircuitDecision::Reject
                } else {
                    self.consecutive_low += 1;
                    if self.consecutive_low >= self.config.half_open_attempts {
                        self.consecutive_high = 0;
                        self.transition(CircuitState::Closed);
                    }
                    CircuitDecision::Accept
                }
            }
            CircuitState::Open => CircuitDecision::Reject,
        }
    }

    /// Elapsed-time poll without a sample, so an idle stream still moves
    /// from open to half-open once the timeout passes.
    pub fn poll(&mut self, now_ms: u64) {
        if self.state == CircuitState::Open {
            let elapsed = self
                .opened_at_ms
                .map(|t| now_ms.saturating_sub(t))
                .unwrap_or(0);
            if elapsed >= self.config.timeout_ms {
                self.transition(CircuitState::HalfOpen);
                self.consecutive_low = 0;
            }
        }
    }

    fn transition(&mut self, to: CircuitState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.last_transition = Some((from, to));
        match to {
            CircuitState::Open => info!(%from, %to, "circuit breaker opened"),
            _ => debug!(%from, %to, "circuit breaker transition"),
        }
    }
}
