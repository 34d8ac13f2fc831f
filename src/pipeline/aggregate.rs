//! Aggregation stage: tumbling, sliding, and session windows.
//!
//! Aggregated outputs are synthetic samples: the configured reduction over
//! the window's numeric values, stamped with the window-closing timestamp
//! and a `window` metadata entry.

use super::Stage;
use crate::types::{ProcessedSample, Sample, StageTag};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Reduction applied to a closed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFn {
    Mean,
    Sum,
    Min,
    Max,
    Count,
    Last,
}

impl AggregateFn {
    fn apply(&self, values: &[f64]) -> f64 {
        match self {
            Self::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Self::Sum => values.iter().sum(),
            Self::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            Self::Count => values.len() as f64,
            Self::Last => *values.last().unwrap_or(&f64::NAN),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::Last => "last",
        }
    }
}

/// Windowing discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WindowKind {
    /// Fixed non-overlapping windows; emits when a sample lands past the
    /// current window's end
    Tumbling { width_ms: u64 },
    /// Fixed-width trailing window re-evaluated on every sample, dropping
    /// points older than the window
    Sliding { width_ms: u64 },
    /// A session closes (and emits) when the gap since its last sample
    /// exceeds the timeout
    Session { gap_timeout_ms: u64 },
}

pub struct AggregateStage {
    kind: WindowKind,
    agg: AggregateFn,
    channel: Option<String>,
    window: VecDeque<(u64, f64)>,
    /// Tumbling: exclusive end of the window currently filling
    window_end_ms: Option<u64>,
}

impl AggregateStage {
    pub fn new(kind: WindowKind, agg: AggregateFn) -> Self {
        // A zero width would divide by zero in the tumbling window math;
        // clamp to the 1ms resolution floor
        let kind = match kind {
            WindowKind::Tumbling { width_ms } => WindowKind::Tumbling {
                width_ms: width_ms.max(1),
            },
            WindowKind::Sliding { width_ms } => WindowKind::Sliding {
                width_ms: width_ms.max(1),
            },
            WindowKind::Session { gap_timeout_ms } => WindowKind::Session {
                gap_timeout_ms: gap_timeout_ms.max(1),
            },
        };
        Self {
            kind,
            agg,
            channel: None,
            window: VecDeque::new(),
            window_end_ms: None,
        }
    }

    fn emit(&self, close_ms: u64) -> Option<ProcessedSample> {
        if self.window.is_empty() {
            return None;
        }
        let values: Vec<f64> = self.window.iter().map(|&(_, v)| v).collect();
        let channel = self.channel.clone().unwrap_or_default();
        let sample = Sample::new(close_ms, self.agg.apply(&values), channel)
            .with_metadata("window", self.agg.name())
            .with_metadata("window_len", values.len().to_string());
        Some(ProcessedSample::new(sample))
    }
}

impl Stage for AggregateStage {
    fn tag(&self) -> StageTag {
        StageTag::Aggregate
    }

    fn process(&mut self, sample: ProcessedSample, now_ms: u64) -> Vec<ProcessedSample> {
        let Some(value) = sample.sample.numeric() else {
            // Non-numeric samples bypass aggregation untouched
            return vec![sample];
        };
        self.channel.get_or_insert_with(|| sample.sample.channel.clone());

        match self.kind {
            WindowKind::Tumbling { width_ms } => {
                let mut out = Vec::new();
                let end = *self
                    .window_end_ms
                    .get_or_insert(now_ms - now_ms % width_ms + width_ms);
                if now_ms >= end {
                    if let Some(agg) = self.emit(end) {
                        out.push(agg);
                    }
                    self.window.clear();
                    self.window_end_ms = Some(now_ms - now_ms % width_ms + width_ms);
                }
                self.window.push_back((now_ms, value));
                out
            }
            WindowKind::Sliding { width_ms } => {
                self.window.push_back((now_ms, value));
                let cutoff = now_ms.saturating_sub(width_ms);
                while self.window.front().is_some_and(|&(t, _)| t < cutoff) {
                    self.window.pop_front();
                }
                self.emit(now_ms).into_iter().collect()
            }
            WindowKind::Session { gap_timeout_ms } => {
                let mut out = Vec::new();
                if let Some(&(last, _)) = self.window.back() {
                    if now_ms.saturating_sub(last) > gap_timeout_ms {
                        if let Some(agg) = self.emit(last) {
                            out.push(agg);
                        }
                        self.window.clear();
                    }
                }
                self.window.push_back((now_ms, value));
                out
            }
        }
    }

    fn flush(&mut self, now_ms: u64) -> Vec<ProcessedSample> {
        let out = self.emit(now_ms).into_iter().collect();
        self.window.clear();
        self.window_end_ms = None;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(ts: u64, v: f64) -> ProcessedSample {
        ProcessedSample::new(Sample::new(ts, v, "ch"))
    }

    #[test]
    fn tumbling_emits_non_overlapping_means() {
        let mut stage = AggregateStage::new(
            WindowKind::Tumbling { width_ms: 100 },
            AggregateFn::Mean,
        );
        assert!(stage.process(wrap(10, 1.0), 10).is_empty());
        assert!(stage.process(wrap(50, 3.0), 50).is_empty());
        // 110 crosses the boundary: [1, 3] emits as mean 2
        let out = stage.process(wrap(110, 10.0), 110);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sample.numeric(), Some(2.0));
        // Flush drains the open window
        let out = stage.flush(200);
        assert_eq!(out[0].sample.numeric(), Some(10.0));
    }

    #[test]
    fn sliding_drops_expired_points() {
        let mut stage =
            AggregateStage::new(WindowKind::Sliding { width_ms: 100 }, AggregateFn::Sum);
        assert_eq!(stage.process(wrap(0, 1.0), 0)[0].sample.numeric(), Some(1.0));
        assert_eq!(
            stage.process(wrap(50, 2.0), 50)[0].sample.numeric(),
            Some(3.0)
        );
        // t=200: the t=0 and t=50 points are older than 100ms
        assert_eq!(
            stage.process(wrap(200, 5.0), 200)[0].sample.numeric(),
            Some(5.0)
        );
    }

    #[test]
    fn session_closes_on_gap() {
        let mut stage = AggregateStage::new(
            WindowKind::Session { gap_timeout_ms: 100 },
            AggregateFn::Count,
        );
        assert!(stage.process(wrap(0, 1.0), 0).is_empty());
        assert!(stage.process(wrap(50, 1.0), 50).is_empty());
        assert!(stage.process(wrap(120, 1.0), 120).is_empty()); // gap 70, same session
        // Gap of 500ms closes the session of 3 samples
        let out = stage.process(wrap(620, 1.0), 620);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sample.numeric(), Some(3.0));
        assert_eq!(out[0].sample.timestamp_ms, 120); // closed at its last sample
    }

    #[test]
    fn zero_width_window_is_clamped() {
        let mut stage =
            AggregateStage::new(WindowKind::Tumbling { width_ms: 0 }, AggregateFn::Count);
        assert!(stage.process(wrap(0, 1.0), 0).is_empty());
        // Width clamped to 1ms: the next millisecond closes the window
        let out = stage.process(wrap(1, 2.0), 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sample.numeric(), Some(1.0));
    }

    #[test]
    fn min_max_last_reductions() {
        assert_eq!(AggregateFn::Min.apply(&[3.0, 1.0, 2.0]), 1.0);
        assert_eq!(AggregateFn::Max.apply(&[3.0, 1.0, 2.0]), 3.0);
        assert_eq!(AggregateFn::Last.apply(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(AggregateFn::Sum.apply(&[3.0, 1.0, 2.0]), 6.0);
    }
}
