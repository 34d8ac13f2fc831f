//! Pulsegate: streaming telemetry shaping and analysis
//!
//! Ingests high-frequency telemetry samples, shapes the flow under load,
//! and turns the surviving data into periodic analysis reports.
//!
//! ## Architecture
//!
//! - **Pipeline**: per-stream ordered stage chain (filter, throttle,
//!   debounce, sampling, transform, aggregate)
//! - **Backpressure**: circuit breaker plus pluggable shedding strategies
//!   behind a bounded buffer
//! - **Analysis**: descriptive statistics, anomaly detection, trend,
//!   spectrum, and correlation primitives
//! - **Analyzer**: per-stream ring buffers, report generation, and the
//!   cross-stream correlation matrix
//! - **Engine**: the facade that wires a source through all of the above

pub mod analysis;
pub mod analyzer;
pub mod backpressure;
pub mod compute;
pub mod config;
pub mod engine;
pub mod pipeline;
pub mod source;
pub mod types;

// Re-export the facade
pub use engine::{Engine, EngineStats};

// Re-export commonly used types
pub use types::{
    AnalysisReport, BackpressureMetrics, CircuitState, CorrelationEntry, EngineEvent,
    PrioritizedSample, ProcessedSample, Quality, Sample, SampleValue, SignificanceBand, StageTag,
};

// Re-export component entry points
pub use analyzer::{AnalysisScheduler, AnalyzerConfig, TelemetryAnalyzer};
pub use backpressure::{BackpressureConfig, BackpressureController, SheddingStrategy, SystemLoad};
pub use compute::{ComputeError, ComputePool};
pub use config::{ConfigError, EngineConfig};
pub use source::{SampleSource, SourceError, StdinNdjsonSource, SyntheticSource};
