//! Transform stage: synchronous mapping and normalization.
//!
//! Asynchronous enrichment lives at the chain level (see
//! [`StreamPipeline`](super::StreamPipeline)): samples are enriched one at a
//! time in arrival order, so enrichment can never reorder the stream, and a
//! failed enrichment passes the sample through unmodified.

use super::Stage;
use crate::types::{ProcessedSample, Sample, SampleValue, StageTag};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

type MapFn = Arc<dyn Fn(Sample) -> Sample + Send + Sync>;

/// Running normalization applied to the numeric payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum NormalizeMode {
    /// (v - min) / (max - min) over values seen so far
    MinMax,
    /// (v - mean) / std over values seen so far (Welford running moments)
    ZScore,
}

pub struct TransformStage {
    map: Option<MapFn>,
    normalize: Option<NormalizeMode>,
    // Running state for normalization
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl TransformStage {
    pub fn new() -> Self {
        Self {
            map: None,
            normalize: None,
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn with_map(mut self, map: impl Fn(Sample) -> Sample + Send + Sync + 'static) -> Self {
        self.map = Some(Arc::new(map));
        self
    }

    pub fn with_normalization(mut self, mode: NormalizeMode) -> Self {
        self.normalize = Some(mode);
        self
    }

    fn normalized(&mut self, v: f64) -> f64 {
        self.count += 1;
        let delta = v - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (v - self.mean);
        self.min = self.min.min(v);
        self.max = self.max.max(v);

        match self.normalize {
            Some(NormalizeMode::MinMax) => {
                let range = self.max - self.min;
                if range == 0.0 {
                    0.0
                } else {
                    (v - self.min) / range
                }
            }
            Some(NormalizeMode::ZScore) => {
                let std = (self.m2 / self.count as f64).sqrt();
                if std == 0.0 {
                    0.0
                } else {
                    (v - self.mean) / std
                }
            }
            None => v,
        }
    }
}

impl Default for TransformStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for TransformStage {
    fn tag(&self) -> StageTag {
        StageTag::Transform
    }

    fn process(&mut self, mut sample: ProcessedSample, _now_ms: u64) -> Vec<ProcessedSample> {
        if let Some(map) = &self.map {
            sample.sample = map(sample.sample);
        }

        if self.normalize.is_some() {
            if let Some(v) = sample.sample.numeric() {
                let normalized = self.normalized(v);
                sample.sample = Sample {
                    value: SampleValue::Number(normalized),
                    ..sample.sample
                }
                .with_metadata("raw_value", format!("{v}"));
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
    fn map_rewrites_payload() {
        let mut stage = TransformStage::new().with_map(|mut s| {
            if let Some(v) = s.numeric() {
                s.value = SampleValue::Number(v * 2.0);
            }
            s
        });
        let out = stage.process(wrap(0, 21.0), 0);
        assert_eq!(out[0].sample.numeric(), Some(42.0));
    }

    #[test]
    fn min_max_normalizes_into_unit_range() {
        let mut stage = TransformStage::new().with_normalization(NormalizeMode::MinMax);
        stage.process(wrap(0, 10.0), 0);
        stage.process(wrap(1, 30.0), 1);
        let out = stage.process(wrap(2, 20.0), 2);
        let v = out[0].sample.numeric().unwrap();
        assert!((v - 0.5).abs() < 1e-9);
        // Original value preserved in metadata
        assert_eq!(
            out[0].sample.metadata.as_ref().unwrap().get("raw_value"),
            Some(&"20".to_string())
        );
    }

    #[test]
    fn z_score_normalization_centers_stream() {
        let mut stage = TransformStage::new().with_normalization(NormalizeMode::ZScore);
        let mut last = 0.0;
        for i in 0..100 {
            let v = if i % 2 == 0 { 10.0 } else { 20.0 };
            let out = stage.process(wrap(i, v), i);
            last = out[0].sample.numeric().unwrap();
        }
        // 20.0 sits one std above the mean of an even 10/20 split
        assert!((last - 1.0).abs() < 0.05);
    }
}
