//! Filter stage: predicate filtering plus inline anomaly tagging.
//!
//! The anomaly check tags the sample's metadata and never removes it; only
//! the predicate can drop a sample.

use super::Stage;
use crate::analysis::anomaly::window_z_score;
use crate::types::{ProcessedSample, Sample, StageTag};
use std::collections::VecDeque;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&Sample) -> bool + Send + Sync>;

pub struct FilterStage {
    predicate: Option<Predicate>,
    /// Trailing window of extracted numeric values for inline z-score
    window: VecDeque<f64>,
    window_size: usize,
    z_threshold: Option<f64>,
}

impl FilterStage {
    pub fn new() -> Self {
        Self {
            predicate: None,
            window: VecDeque::new(),
            window_size: 50,
            z_threshold: None,
        }
    }

    pub fn with_predicate(mut self, predicate: impl Fn(&Sample) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Enable inline z-score anomaly tagging over a trailing window of the
    /// extracted numeric value.
    pub fn with_anomaly_tagging(mut self, window_size: usize, threshold: f64) -> Self {
        self.window_size = window_size.max(2);
        self.z_threshold = Some(threshold);
        self
    }
}

impl Default for FilterStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for FilterStage {
    fn tag(&self) -> StageTag {
        StageTag::Filter
    }

    fn process(&mut self, mut sample: ProcessedSample, _now_ms: u64) -> Vec<ProcessedSample> {
        if let Some(pred) = &self.predicate {
            if !pred(&sample.sample) {
                return Vec::new();
            }
        }

        if let (Some(threshold), Some(value)) = (self.z_threshold, sample.sample.numeric()) {
            if let Some(z) = window_z_score(self.window.make_contiguous(), value) {
                if z.abs() > threshold {
                    sample.sample = sample
                        .sample
                        .with_metadata("anomaly", "true")
                        .with_metadata("anomaly_z", format!("{z:.3}"));
                }
            }
            self.window.push_back(value);
            if self.window.len() > self.window_size {
                self.window.pop_front();
            }
        }

        vec![sample]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(ts: u64, v: f64) -> ProcessedSample {
        ProcessedSample::new(Sample::new(ts, v, "ch"))
    }

    #[test]
    fn predicate_drops_nonmatching() {
        let mut stage = FilterStage::new().with_predicate(|s| s.numeric().unwrap_or(0.0) > 5.0);
        assert!(stage.process(wrap(0, 3.0), 0).is_empty());
        assert_eq!(stage.process(wrap(1, 9.0), 1).len(), 1);
    }

    #[test]
    fn anomaly_tagging_marks_but_keeps_sample() {
        let mut stage = FilterStage::new().with_anomaly_tagging(10, 3.0);
        for i in 0..10 {
            let out = stage.process(wrap(i, 10.0 + (i % 2) as f64 * 0.1), i);
            assert_eq!(out.len(), 1);
        }
        let out = stage.process(wrap(10, 500.0), 10);
        assert_eq!(out.len(), 1, "anomalous sample must not be removed");
        let meta = out[0].sample.metadata.as_ref().unwrap();
        assert_eq!(meta.get("anomaly").map(String::as_str), Some("true"));
        assert!(meta.contains_key("anomaly_z"));
    }

    #[test]
    fn normal_values_not_tagged() {
        let mut stage = FilterStage::new().with_anomaly_tagging(10, 3.0);
        for i in 0..20 {
            let out = stage.process(wrap(i, 10.0), i);
            assert!(out[0].sample.metadata.is_none());
        }
    }
}
