//! Throttle stage: rate limiting by time window, count window, adaptive
//! feedback, or selector.

use super::Stage;
use crate::types::{ProcessedSample, Sample, StageTag};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Selector = Arc<dyn Fn(&Sample) -> bool + Send + Sync>;

/// Shared feedback signal for adaptive throttling: the current scheduler
/// delay in milliseconds, published by the backpressure controller.
pub type FeedbackSignal = Arc<AtomicU64>;

#[derive(Clone)]
pub enum ThrottleStrategy {
    /// At most one emission per fixed time window
    TimeWindow { window_ms: u64 },
    /// Emit every nth sample
    CountWindow { every: u64 },
    /// Time window widened proportionally to the feedback signal
    Adaptive {
        base_window_ms: u64,
        feedback: FeedbackSignal,
    },
    /// Throttle only samples matching the selector; others pass freely
    Selective {
        window_ms: u64,
        selector: Selector,
    },
}

pub struct ThrottleStage {
    strategy: ThrottleStrategy,
    last_emit_ms: Option<u64>,
    seen: u64,
}

impl ThrottleStage {
    pub fn new(strategy: ThrottleStrategy) -> Self {
        Self {
            strategy,
            last_emit_ms: None,
            seen: 0,
        }
    }

    fn window_open(&self, now_ms: u64, window_ms: u64) -> bool {
        match self.last_emit_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= window_ms,
        }
    }
}

impl Stage for ThrottleStage {
    fn tag(&self) -> StageTag {
        StageTag::Throttle
    }

    fn process(&mut self, sample: ProcessedSample, now_ms: u64) -> Vec<ProcessedSample> {
        self.seen += 1;
        let emit = match &self.strategy {
            ThrottleStrategy::TimeWindow { window_ms } => self.window_open(now_ms, *window_ms),
            ThrottleStrategy::CountWindow { every } => {
                let every = (*every).max(1);
                (self.seen - 1) % every == 0
            }
            ThrottleStrategy::Adaptive {
                base_window_ms,
                feedback,
            } => {
                // Widen the window by the observed scheduler delay, so a
                // struggling downstream automatically receives less.
                let delay = feedback.load(Ordering::Relaxed);
                self.window_open(now_ms, base_window_ms + delay)
            }
            ThrottleStrategy::Selective { window_ms, selector } => {
                if selector(&sample.sample) {
                    self.window_open(now_ms, *window_ms)
                } else {
                    true
                }
            }
        };

        if emit {
            // Selective throttling only advances the window for matching
            // samples; unconditional strategies advance on every emission.
            let counts = match &self.strategy {
                ThrottleStrategy::Selective { selector, .. } => selector(&sample.sample),
                _ => true,
            };
            if counts {
                self.last_emit_ms = Some(now_ms);
            }
            vec![sample]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(ts: u64, v: f64) -> ProcessedSample {
        ProcessedSample::new(Sample::new(ts, v, "ch"))
    }

    #[test]
    fn time_window_limits_rate() {
        let mut stage = ThrottleStage::new(ThrottleStrategy::TimeWindow { window_ms: 100 });
        assert_eq!(stage.process(wrap(0, 1.0), 0).len(), 1);
        assert!(stage.process(wrap(50, 2.0), 50).is_empty());
        assert_eq!(stage.process(wrap(100, 3.0), 100).len(), 1);
    }

    #[test]
    fn count_window_keeps_every_nth() {
        let mut stage = ThrottleStage::new(ThrottleStrategy::CountWindow { every: 3 });
        let kept: usize = (0..9)
            .map(|i| stage.process(wrap(i, i as f64), i).len())
            .sum();
        assert_eq!(kept, 3);
    }

    #[test]
    fn adaptive_widens_with_feedback() {
        let feedback = Arc::new(AtomicU64::new(0));
        let mut stage = ThrottleStage::new(ThrottleStrategy::Adaptive {
            base_window_ms: 100,
            feedback: feedback.clone(),
        });
        assert_eq!(stage.process(wrap(0, 1.0), 0).len(), 1);
        assert_eq!(stage.process(wrap(100, 2.0), 100).len(), 1);

        // Downstream congestion: delay 400ms, window becomes 500ms
        feedback.store(400, Ordering::Relaxed);
        assert!(stage.process(wrap(200, 3.0), 200).is_empty());
        assert!(stage.process(wrap(550, 4.0), 550).is_empty());
        assert_eq!(stage.process(wrap(600, 5.0), 600).len(), 1);
    }

    #[test]
    fn selective_passes_nonmatching_freely() {
        let mut stage = ThrottleStage::new(ThrottleStrategy::Selective {
            window_ms: 1000,
            selector: Arc::new(|s: &Sample| s.channel == "noisy"),
        });
        let noisy = |ts| ProcessedSample::new(Sample::new(ts, 1.0, "noisy"));
        let quiet = |ts| ProcessedSample::new(Sample::new(ts, 1.0, "quiet"));

        assert_eq!(stage.process(noisy(0), 0).len(), 1);
        assert!(stage.process(noisy(10), 10).is_empty());
        // Non-matching samples are untouched by the window
        assert_eq!(stage.process(quiet(20), 20).len(), 1);
        assert_eq!(stage.process(quiet(30), 30).len(), 1);
    }
}
