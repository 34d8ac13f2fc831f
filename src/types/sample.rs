//! Sample types: one timestamped observation per channel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Data quality flag attached by the ingest adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Good,
    Suspect,
    Bad,
}

/// The payload of a sample: a plain scalar or a structured record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Number(f64),
    Record(BTreeMap<String, f64>),
}

impl SampleValue {
    /// Scalar view of the value.
    ///
    /// Records prefer a field named `value`, then the first field in key
    /// order. Returns `None` for an empty record.
    pub fn numeric(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Record(fields) => fields
                .get("value")
                .copied()
                .or_else(|| fields.values().next().copied()),
        }
    }
}

impl From<f64> for SampleValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

/// One timestamped observation on a channel. Immutable once created;
/// components annotate copies, never the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Wall-clock milliseconds since the Unix epoch, monotone per channel
    pub timestamp_ms: u64,
    /// Scalar or structured payload
    pub value: SampleValue,
    /// Channel (stream) this observation belongs to
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<Quality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl Sample {
    pub fn new(timestamp_ms: u64, value: impl Into<SampleValue>, channel: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            value: value.into(),
            channel: channel.into(),
            quality: None,
            metadata: None,
        }
    }

    /// Scalar view of the payload, if one exists.
    pub fn numeric(&self) -> Option<f64> {
        self.value.numeric()
    }

    /// Copy of this sample with one metadata entry added.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// A sample wrapped with scheduling context while it is in flight inside
/// the backpressure controller. Forwarded or discarded, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrioritizedSample {
    pub sample: Sample,
    /// Computed by the pluggable priority function; default 1.0
    pub priority: f64,
    /// Retry count, incremented each time the sample is re-queued
    pub attempt: u32,
}

impl PrioritizedSample {
    pub fn new(sample: Sample, priority: f64) -> Self {
        Self {
            sample,
            priority,
            attempt: 0,
        }
    }
}

/// Identifies a pipeline stage in a processed sample's trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageTag {
    Filter,
    Throttle,
    Debounce,
    Sampling,
    Transform,
    Aggregate,
}

impl std::fmt::Display for StageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Filter => write!(f, "filter"),
            Self::Throttle => write!(f, "throttle"),
            Self::Debounce => write!(f, "debounce"),
            Self::Sampling => write!(f, "sampling"),
            Self::Transform => write!(f, "transform"),
            Self::Aggregate => write!(f, "aggregate"),
        }
    }
}

/// A sample that has passed through the pipeline, carrying the trail of
/// stages that touched it plus an optional priority set by the sampling
/// stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedSample {
    pub sample: Sample,
    /// Stages that touched this sample, in pipeline order
    pub stage_trail: Vec<StageTag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
}

impl ProcessedSample {
    pub fn new(sample: Sample) -> Self {
        Self {
            sample,
            stage_trail: Vec::new(),
            priority: None,
        }
    }

    /// Record a stage in the trail (idempotent per stage).
    pub fn touch(&mut self, tag: StageTag) {
        if self.stage_trail.last() != Some(&tag) {
            self.stage_trail.push(tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_prefers_value_field() {
        let mut fields = BTreeMap::new();
        fields.insert("aux".to_string(), 7.0);
        fields.insert("value".to_string(), 42.0);
        let v = SampleValue::Record(fields);
        assert_eq!(v.numeric(), Some(42.0));
    }

    #[test]
    fn numeric_falls_back_to_first_field() {
        let mut fields = BTreeMap::new();
        fields.insert("pressure".to_string(), 3.5);
        fields.insert("temp".to_string(), 21.0);
        let v = SampleValue::Record(fields);
        assert_eq!(v.numeric(), Some(3.5)); // "pressure" < "temp" in key order
    }

    #[test]
    fn sample_json_round_trip() {
        let s = Sample::new(1_700_000_000_000, 12.5, "rpm").with_metadata("src", "test");
        let json = serde_json::to_string(&s).unwrap();
        let back: Sample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn touch_deduplicates_consecutive_tags() {
        let mut p = ProcessedSample::new(Sample::new(0, 1.0, "c"));
        p.touch(StageTag::Filter);
        p.touch(StageTag::Filter);
        p.touch(StageTag::Throttle);
        assert_eq!(p.stage_trail, vec![StageTag::Filter, StageTag::Throttle]);
    }
}
