//! The backpressure controller: circuit breaker in front, one shedding
//! strategy behind, bounded buffer in the middle.
//!
//! Ingestion is synchronous and never blocks: when the buffer is full the
//! active strategy decides on the spot (drop, evict, or conflate).
//! Downstream pulls shaped output with [`drain`](BackpressureController::drain).

use super::circuit::{CircuitBreaker, CircuitDecision};
use super::strategy::{
    sample_interval_for_load, select_strategy, SheddingStrategy, SystemLoad,
};
use super::BackpressureConfig;
use crate::types::{BackpressureMetrics, EngineEvent, PrioritizedSample, Sample};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

type PriorityFn = Arc<dyn Fn(&Sample) -> f64 + Send + Sync>;

pub struct BackpressureController {
    config: BackpressureConfig,
    circuit: CircuitBreaker,
    /// Strategy currently in effect (differs from config.strategy only in
    /// adaptive mode)
    active: SheddingStrategy,
    buffer: VecDeque<PrioritizedSample>,
    priority_fn: Option<PriorityFn>,
    events: Option<broadcast::Sender<EngineEvent>>,
    dropped: u64,
    processed: u64,
    latency_sum_ms: f64,
    latency_count: u64,
    last_load: SystemLoad,
    /// Per-strategy sampling counter
    seen: u64,
    sample_interval: u64,
    closed: bool,
}

impl BackpressureController {
    pub fn new(config: BackpressureConfig) -> Self {
        let circuit = CircuitBreaker::new(config.circuit.clone());
        let active = config.strategy;
        Self {
            config,
            circuit,
            active,
            buffer: VecDeque::new(),
            priority_fn: None,
            events: None,
            dropped: 0,
            processed: 0,
            latency_sum_ms: 0.0,
            latency_count: 0,
            last_load: SystemLoad::default(),
            seen: 0,
            sample_interval: 1,
            closed: false,
        }
    }

    /// Pluggable priority function for `PrioritizedSample` and the
    /// drop-priority strategy. Default priority is 1.0.
    pub fn with_priority_fn(
        mut self,
        f: impl Fn(&Sample) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.priority_fn = Some(Arc::new(f));
        self
    }

    /// Attach the engine's event channel for circuit transitions and shed
    /// notifications.
    pub fn with_events(mut self, events: broadcast::Sender<EngineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn current_strategy(&self) -> SheddingStrategy {
        self.active
    }

    /// Ingest one batch under the given system load. The adaptive strategy
    /// is re-evaluated once per batch; each sample then passes the circuit
    /// breaker and the strategy's synchronous admission decision.
    pub fn offer_batch(&mut self, samples: Vec<Sample>, load: SystemLoad, now_ms: u64) {
        if self.closed {
            // Idempotent teardown: a closed controller counts everything
            // as dropped rather than resurrecting its queues.
            self.dropped += samples.len() as u64;
            return;
        }

        self.last_load = load;
        if self.config.strategy == SheddingStrategy::Adaptive {
            let chosen = select_strategy(&load, &self.config.adaptive);
            if chosen != self.active {
                debug!(from = self.active.name(), to = chosen.name(), "adaptive strategy switch");
            }
            self.active = chosen;
        }
        self.sample_interval = sample_interval_for_load(load.cpu_pct, self.config.adaptive.cpu_pct);

        let dropped_before = self.dropped;
        for sample in samples {
            self.offer(sample, now_ms);
        }
        let shed = self.dropped - dropped_before;
        if shed > 0 {
            self.emit(EngineEvent::SamplesShed { count: shed });
        }
    }

    /// Ingest one sample. Returns true if it was admitted to the buffer.
    pub fn offer(&mut self, sample: Sample, now_ms: u64) -> bool {
        if self.closed {
            self.dropped += 1;
            return false;
        }

        let latency = now_ms.saturating_sub(sample.timestamp_ms);
        self.latency_sum_ms += latency as f64;
        self.latency_count += 1;

        let decision = self.circuit.observe(latency, now_ms);
        if let Some((from, to)) = self.circuit.take_transition() {
            self.emit(EngineEvent::CircuitTransition { from, to });
        }
        if decision == CircuitDecision::Reject {
            self.dropped += 1;
            return false;
        }

        self.seen += 1;
        let priority = self
            .priority_fn
            .as_ref()
            .map(|f| f(&sample))
            .unwrap_or(1.0);
        let item = PrioritizedSample::new(sample, priority);
        let capacity = self.config.capacity;

        match self.active {
            SheddingStrategy::Buffer | SheddingStrategy::DropNewest => {
                if self.buffer.len() >= capacity {
                    self.dropped += 1;
                    false
                } else {
                    self.buffer.push_back(item);
                    true
                }
            }
            SheddingStrategy::DropOldest | SheddingStrategy::BufferSliding => {
                if self.buffer.len() >= capacity {
                    self.buffer.pop_front();
                    self.dropped += 1;
                }
                self.buffer.push_back(item);
                true
            }
            SheddingStrategy::Sample => {
                // Keep every nth, interval widening with CPU load
                if (self.seen - 1) % self.sample_interval != 0 {
                    self.dropped += 1;
                    return false;
                }
                if self.buffer.len() >= capacity {
                    self.buffer.pop_front();
                    self.dropped += 1;
                }
                self.buffer.push_back(item);
                true
            }
            SheddingStrategy::Conflate => {
                // Latest value per channel; the superseded one is shed
                if let Some(existing) = self
                    .buffer
                    .iter_mut()
                    .find(|p| p.sample.channel == item.sample.channel)
                {
                    *existing = item;
                    self.dropped += 1;
                    return true;
                }
                if self.buffer.len() >= capacity {
                    self.buffer.pop_front();
                    self.dropped += 1;
                }
                self.buffer.push_back(item);
                true
            }
            SheddingStrategy::DropPriority => {
                if self.buffer.len() < capacity {
                    self.buffer.push_back(item);
                    return true;
                }
                // Evict the lowest-priority buffered sample if the
                // incoming one outranks it
                let min_idx = self
                    .buffer
                    .iter()
                    .enumerate()
                    .min_by(|(_, a), (_, b)| {
                        a.priority
                            .partial_cmp(&b.priority)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|(i, _)| i);
                match min_idx {
                    Some(i) if self.buffer[i].priority < item.priority => {
                        self.buffer.remove(i);
                        self.dropped += 1;
                        self.buffer.push_back(item);
                        true
                    }
                    _ => {
                        self.dropped += 1;
                        false
                    }
                }
            }
            SheddingStrategy::Adaptive => {
                // Unreachable: adaptive resolves to a concrete strategy in
                // offer_batch; direct offers fall back to plain buffering.
                if self.buffer.len() >= capacity {
                    self.dropped += 1;
                    false
                } else {
                    self.buffer.push_back(item);
                    true
                }
            }
        }
    }

    /// Pull up to `max` shaped samples for downstream, in admission order.
    pub fn drain(&mut self, max: usize) -> Vec<PrioritizedSample> {
        let n = max.min(self.buffer.len());
        let out: Vec<PrioritizedSample> = self.buffer.drain(..n).collect();
        self.processed += out.len() as u64;
        out
    }

    /// Number of samples currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Advance the circuit breaker's clock without a sample.
    pub fn tick(&mut self, now_ms: u64) {
        self.circuit.poll(now_ms);
        if let Some((from, to)) = self.circuit.take_transition() {
            self.emit(EngineEvent::CircuitTransition { from, to });
        }
    }

    /// Reset all counters and empty all queues. Safe to call at any time.
    pub fn clear_buffers(&mut self) {
        self.buffer.clear();
        self.dropped = 0;
        self.processed = 0;
        self.latency_sum_ms = 0.0;
        self.latency_count = 0;
        self.seen = 0;
    }

    /// Idempotent teardown: clears buffers and counters and detaches the
    /// event channel. Subsequent offers are counted as dropped.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.clear_buffers();
        self.events = None;
    }

    /// Build a metrics snapshot from the live counters.
    pub fn metrics(&self) -> BackpressureMetrics {
        BackpressureMetrics {
            strategy: self.active.name().to_string(),
            buffer_size: self.buffer.len(),
            dropped_messages: self.dropped,
            processed_messages: self.processed,
            avg_latency_ms: if self.latency_count > 0 {
                self.latency_sum_ms / self.latency_count as f64
            } else {
                0.0
            },
            memory_pressure: self.last_load.memory_pct,
            cpu_pressure: self.last_load.cpu_pct,
            circuit_state: self.circuit.state(),
        }
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(events) = &self.events {
            // Nobody listening is fine
            let _ = events.send(event);
        }
    }
}
