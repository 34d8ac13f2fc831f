//! Sampling stage: probabilistic thinning of high-rate streams.
//!
//! All randomness flows through a seeded `StdRng` so tests are
//! reproducible; production callers seed from entropy.

use super::Stage;
use crate::types::{ProcessedSample, Sample, StageTag};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Arc;

type PriorityFn = Arc<dyn Fn(&Sample) -> f64 + Send + Sync>;

#[derive(Clone)]
pub enum SamplingStrategy {
    /// Keep each sample with fixed probability
    Uniform { keep_probability: f64 },
    /// Keep probability scaled by a pluggable priority (clamped to [0, 1]);
    /// the computed priority is stamped on emitted samples
    PriorityWeighted { priority: PriorityFn },
    /// Uniform random sample of fixed size k from an unbounded stream;
    /// contents emitted on flush, each item with final probability k/n
    Reservoir { k: usize },
    /// Keep fraction selected from the observed input rate: low rate keeps
    /// everything, medium keeps `medium_fraction`, high keeps `high_fraction`
    AdaptiveRate {
        /// Samples/sec boundary between low and medium tiers
        medium_rate_hz: f64,
        /// Samples/sec boundary between medium and high tiers
        high_rate_hz: f64,
        medium_fraction: f64,
        high_fraction: f64,
    },
}

pub struct SamplingStage {
    strategy: SamplingStrategy,
    rng: StdRng,
    /// Reservoir state: (count seen, held samples)
    seen: u64,
    reservoir: Vec<ProcessedSample>,
    /// Recent arrival timestamps for rate estimation
    arrivals: VecDeque<u64>,
}

impl SamplingStage {
    pub fn new(strategy: SamplingStrategy, seed: u64) -> Self {
        Self {
            strategy,
            rng: StdRng::seed_from_u64(seed),
            seen: 0,
            reservoir: Vec::new(),
            arrivals: VecDeque::new(),
        }
    }

    /// Observed input rate in samples/sec over the trailing arrivals window.
    fn observed_rate_hz(&self) -> f64 {
        if self.arrivals.len() < 2 {
            return 0.0;
        }
        let first = *self.arrivals.front().unwrap_or(&0);
        let last = *self.arrivals.back().unwrap_or(&0);
        let span_ms = last.saturating_sub(first);
        if span_ms == 0 {
            return f64::INFINITY;
        }
        (self.arrivals.len() - 1) as f64 * 1000.0 / span_ms as f64
    }
}

impl Stage for SamplingStage {
    fn tag(&self) -> StageTag {
        StageTag::Sampling
    }

    fn process(&mut self, mut sample: ProcessedSample, now_ms: u64) -> Vec<ProcessedSample> {
        self.seen += 1;
        match &self.strategy {
            SamplingStrategy::Uniform { keep_probability } => {
                if self.rng.gen::<f64>() < *keep_probability {
                    vec![sample]
                } else {
                    Vec::new()
                }
            }
            SamplingStrategy::PriorityWeighted { priority } => {
                let p = priority(&sample.sample).clamp(0.0, 1.0);
                if self.rng.gen::<f64>() < p {
                    sample.priority = Some(p);
                    vec![sample]
                } else {
                    Vec::new()
                }
            }
            SamplingStrategy::Reservoir { k } => {
                let k = *k;
                if self.reservoir.len() < k {
                    self.reservoir.push(sample);
                } else {
                    // Algorithm R: replace with probability k/n
                    let j = self.rng.gen_range(0..self.seen);
                    if (j as usize) < k {
                        self.reservoir[j as usize] = sample;
                    }
                }
                Vec::new()
            }
            SamplingStrategy::AdaptiveRate {
                medium_rate_hz,
                high_rate_hz,
                medium_fraction,
                high_fraction,
            } => {
                self.arrivals.push_back(now_ms);
                if self.arrivals.len() > 100 {
                    self.arrivals.pop_front();
                }
                let rate = self.observed_rate_hz();
                let keep = if rate >= *high_rate_hz {
                    *high_fraction
                } else if rate >= *medium_rate_hz {
                    *medium_fraction
                } else {
                    1.0
                };
                if self.rng.gen::<f64>() < keep {
                    vec![sample]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn flush(&mut self, _now_ms: u64) -> Vec<ProcessedSample> {
        std::mem::take(&mut self.reservoir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(ts: u64, v: f64) -> ProcessedSample {
        ProcessedSample::new(Sample::new(ts, v, "ch"))
    }

    #[test]
    fn uniform_keeps_roughly_the_fraction() {
        let mut stage = SamplingStage::new(
            SamplingStrategy::Uniform {
                keep_probability: 0.25,
            },
            1,
        );
        let kept: usize = (0..10_000)
            .map(|i| stage.process(wrap(i, 1.0), i).len())
            .sum();
        // 3σ band around 2500 for a binomial(10000, 0.25)
        assert!((2370..=2630).contains(&kept), "kept {kept}");
    }

    #[test]
    fn priority_weighted_stamps_priority() {
        let mut stage = SamplingStage::new(
            SamplingStrategy::PriorityWeighted {
                priority: Arc::new(|_| 1.0),
            },
            1,
        );
        let out = stage.process(wrap(0, 1.0), 0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].priority, Some(1.0));

        // Zero priority never passes
        let mut stage = SamplingStage::new(
            SamplingStrategy::PriorityWeighted {
                priority: Arc::new(|_| 0.0),
            },
            1,
        );
        for i in 0..100 {
            assert!(stage.process(wrap(i, 1.0), i).is_empty());
        }
    }

    #[test]
    fn reservoir_holds_k_and_emits_on_flush() {
        let mut stage = SamplingStage::new(SamplingStrategy::Reservoir { k: 10 }, 99);
        for i in 0..1000 {
            assert!(stage.process(wrap(i, i as f64), i).is_empty());
        }
        let out = stage.flush(1000);
        assert_eq!(out.len(), 10);
        // Flushing again yields nothing
        assert!(stage.flush(1001).is_empty());
    }

    #[test]
    fn reservoir_inclusion_probability_converges_to_k_over_n() {
        // 200 runs, n = 50 items, k = 10: each item expected in ~20% of runs
        let n = 50u64;
        let k = 10usize;
        let runs = 200;
        let mut inclusion = vec![0u32; n as usize];
        for seed in 0..runs {
            let mut stage = SamplingStage::new(SamplingStrategy::Reservoir { k }, seed);
            for i in 0..n {
                stage.process(wrap(i, i as f64), i);
            }
            for s in stage.flush(n) {
                inclusion[s.sample.timestamp_ms as usize] += 1;
            }
        }
        let expected = runs as f64 * k as f64 / n as f64; // 40
        for (item, &count) in inclusion.iter().enumerate() {
            assert!(
                (count as f64 - expected).abs() < 25.0,
                "item {item} included {count} times, expected ~{expected}"
            );
        }
    }

    #[test]
    fn adaptive_rate_thins_fast_streams() {
        let strategy = SamplingStrategy::AdaptiveRate {
            medium_rate_hz: 100.0,
            high_rate_hz: 500.0,
            medium_fraction: 0.5,
            high_fraction: 0.1,
        };

        // 1000 Hz arrivals: high tier, ~10% kept
        let mut stage = SamplingStage::new(strategy.clone(), 3);
        let kept: usize = (0..5000)
            .map(|i| stage.process(wrap(i, 1.0), i).len())
            .sum();
        assert!(kept < 1000, "high-rate stream kept {kept} of 5000");

        // 10 Hz arrivals: low tier, everything kept
        let mut stage = SamplingStage::new(strategy, 3);
        let kept: usize = (0..100)
            .map(|i| stage.process(wrap(i * 100, 1.0), i * 100).len())
            .sum();
        assert!(kept >= 99, "low-rate stream kept {kept} of 100");
    }
}
