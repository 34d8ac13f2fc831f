//! Debounce stage: suppress bursts, emitting around quiet periods.
//!
//! Driven by sample timestamps: a "quiet period" is a gap of at least
//! `quiet_ms` between consecutive samples. Trailing emission happens when
//! the next sample arrives after the gap (or on flush), so no timer task is
//! needed and replay behaves like live data.

use super::Stage;
use crate::types::{ProcessedSample, StageTag};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebounceMode {
    /// Emit the last sample of a burst once the burst ends
    Trailing,
    /// Emit the first sample of a burst, suppress the rest
    Leading,
    /// Both: first sample immediately, last sample after the quiet period
    Both,
}

pub struct DebounceStage {
    mode: DebounceMode,
    quiet_ms: u64,
    last_seen_ms: Option<u64>,
    /// Pending trailing sample; Some only while a burst is in progress
    pending: Option<ProcessedSample>,
    /// Timestamp of the sample emitted at the head of the current burst
    leading_emitted_ms: Option<u64>,
}

impl DebounceStage {
    pub fn new(mode: DebounceMode, quiet_ms: u64) -> Self {
        Self {
            mode,
            quiet_ms,
            last_seen_ms: None,
            pending: None,
            leading_emitted_ms: None,
        }
    }

    fn gap_elapsed(&self, now_ms: u64) -> bool {
        match self.last_seen_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.quiet_ms,
        }
    }
}

impl Stage for DebounceStage {
    fn tag(&self) -> StageTag {
        StageTag::Debounce
    }

    fn process(&mut self, sample: ProcessedSample, now_ms: u64) -> Vec<ProcessedSample> {
        let new_burst = self.gap_elapsed(now_ms);
        self.last_seen_ms = Some(now_ms);

        let mut out = Vec::new();
        match self.mode {
            DebounceMode::Trailing => {
                if new_burst {
                    // Previous burst ended: release its final sample
                    if let Some(prev) = self.pending.take() {
                        out.push(prev);
                    }
                }
                self.pending = Some(sample);
            }
            DebounceMode::Leading => {
                if new_burst {
                    self.leading_emitted_ms = Some(now_ms);
                    out.push(sample);
                }
            }
            DebounceMode::Both => {
                if new_burst {
                    if let Some(prev) = self.pending.take() {
                        // Don't re-emit a one-sample burst twice
                        if Some(prev.sample.timestamp_ms) != self.leading_emitted_ms {
                            out.push(prev);
                        }
                    }
                    self.leading_emitted_ms = Some(now_ms);
                    out.push(sample);
                } else {
                    self.pending = Some(sample);
                }
            }
        }
        out
    }

    fn flush(&mut self, _now_ms: u64) -> Vec<ProcessedSample> {
        match self.pending.take() {
            Some(p) if self.mode != DebounceMode::Leading => vec![p],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sample;

    fn wrap(ts: u64) -> ProcessedSample {
        ProcessedSample::new(Sample::new(ts, ts as f64, "ch"))
    }

    #[test]
    fn trailing_emits_last_of_burst_after_gap() {
        let mut stage = DebounceStage::new(DebounceMode::Trailing, 100);
        // Burst: 0, 10, 20; nothing emitted yet
        assert!(stage.process(wrap(0), 0).is_empty());
        assert!(stage.process(wrap(10), 10).is_empty());
        assert!(stage.process(wrap(20), 20).is_empty());
        // Quiet period then new burst: burst's last sample (20) released
        let out = stage.process(wrap(200), 200);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sample.timestamp_ms, 20);
        // Flush releases the in-progress sample
        let out = stage.flush(300);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sample.timestamp_ms, 200);
    }

    #[test]
    fn leading_emits_first_of_burst_only() {
        let mut stage = DebounceStage::new(DebounceMode::Leading, 100);
        assert_eq!(stage.process(wrap(0), 0).len(), 1);
        assert!(stage.process(wrap(10), 10).is_empty());
        assert!(stage.process(wrap(20), 20).is_empty());
        assert_eq!(stage.process(wrap(200), 200).len(), 1);
        assert!(stage.flush(300).is_empty());
    }

    #[test]
    fn both_emits_head_and_tail() {
        let mut stage = DebounceStage::new(DebounceMode::Both, 100);
        let out = stage.process(wrap(0), 0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sample.timestamp_ms, 0);
        assert!(stage.process(wrap(10), 10).is_empty());
        assert!(stage.process(wrap(20), 20).is_empty());
        // New burst: trailing 20 plus leading 200
        let out = stage.process(wrap(200), 200);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].sample.timestamp_ms, 20);
        assert_eq!(out[1].sample.timestamp_ms, 200);
    }

    #[test]
    fn both_single_sample_burst_not_duplicated() {
        let mut stage = DebounceStage::new(DebounceMode::Both, 100);
        assert_eq!(stage.process(wrap(0), 0).len(), 1);
        // One-sample burst, then another burst: only the new head emits
        let out = stage.process(wrap(500), 500);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sample.timestamp_ms, 500);
    }
}
