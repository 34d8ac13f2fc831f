//! Stream pipeline
//!
//! Per-stream ordered chain of stage objects, each implementing the common
//! [`Stage`] capability: `process(sample) -> zero or more samples`. The
//! chain is an explicit list driven by the caller, not a reactive operator
//! runtime. Stage order is fixed (filter, throttle, debounce, sampling,
//! transform, aggregate); a stage absent from config is simply not in the
//! list.
//!
//! Time is taken from sample timestamps, not the wall clock, so replayed
//! history behaves identically to live data.

mod aggregate;
mod chain;
mod debounce;
mod filter;
mod sampling;
mod throttle;
mod transform;

pub use aggregate::{AggregateFn, AggregateStage, WindowKind};
pub use chain::{EnrichFn, StreamPipeline};
pub use debounce::{DebounceMode, DebounceStage};
pub use filter::FilterStage;
pub use sampling::{SamplingStage, SamplingStrategy};
pub use throttle::{FeedbackSignal, ThrottleStage, ThrottleStrategy};
pub use transform::{NormalizeMode, TransformStage};

use crate::types::{ProcessedSample, StageTag};
use thiserror::Error;

/// Errors raised while building a pipeline from config. Per-sample errors
/// never surface here; they are caught at the stage boundary and the
/// sample passes through unmodified.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid stage configuration: {0}")]
    InvalidConfiguration(String),
}

/// One processing stage in the chain.
///
/// A stage consumes a sample and returns zero or more samples: an empty
/// vector suppresses the sample (throttle, debounce, sampling), one element
/// forwards it, several elements release previously held samples.
pub trait Stage: Send {
    /// Tag recorded in each output's stage trail.
    fn tag(&self) -> StageTag;

    /// Process one sample. `now_ms` is the sample's own timestamp, handed
    /// down by the chain so stages share a single notion of time.
    fn process(&mut self, sample: ProcessedSample, now_ms: u64) -> Vec<ProcessedSample>;

    /// Release anything the stage is holding (open windows, pending
    /// debounce, reservoir contents). Called on stream teardown.
    fn flush(&mut self, now_ms: u64) -> Vec<ProcessedSample> {
        let _ = now_ms;
        Vec::new()
    }
}
