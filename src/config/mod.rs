//! Engine configuration: TOML file, environment override, defaults.
//!
//! Loading order:
//! 1. `$PULSEGATE_CONFIG` environment variable (path to a TOML file)
//! 2. `./pulsegate.toml` in the current working directory
//! 3. Built-in defaults
//!
//! Every section carries `#[serde(default)]`, so a partial file only
//! overrides what it names. A config that parses but fails validation is
//! rejected at startup; a silently misconfigured engine is worse than one
//! that refuses to start.
//!
//! The loaded config is passed into each component explicitly. There is no
//! global config singleton.

use crate::analyzer::{AnalyzerConfig, SchedulerConfig};
use crate::backpressure::BackpressureConfig;
use crate::compute::ComputeConfig;
use crate::pipeline::{AggregateFn, DebounceMode, NormalizeMode, WindowKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const CONFIG_ENV_VAR: &str = "PULSEGATE_CONFIG";
pub const CONFIG_FILE: &str = "pulsegate.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error ({0}): {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("config parse error ({0}): {1}")]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Declarative pipeline stage settings. Stages with a section present are
/// built in canonical order; absent sections are skipped entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub filter: Option<FilterConfig>,
    pub anomaly_tagging: Option<AnomalyTaggingConfig>,
    pub throttle: Option<ThrottleConfig>,
    pub debounce: Option<DebounceConfig>,
    pub sampling: Option<SamplingConfig>,
    pub transform: Option<TransformConfig>,
    pub aggregate: Option<AggregateStageConfig>,
    /// Seed for the sampling stage's RNG; fixed so replays are exact
    pub seed: u64,
}

/// Numeric range filter. Samples outside the band are dropped; samples
/// without a numeric view always pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Transform stage settings. Mapping functions are code-only; config
/// exposes the running normalization modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    pub normalize: NormalizeMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyTaggingConfig {
    pub window: usize,
    pub threshold: f64,
}

impl Default for AnomalyTaggingConfig {
    fn default() -> Self {
        Self {
            window: 30,
            threshold: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub window_ms: u64,
    /// Widen the window with backpressure feedback
    pub adaptive: bool,
    /// Emit every nth sample instead of time-windowing
    pub every: Option<u64>,
    /// Throttle only samples from this channel; others pass freely
    pub channel: Option<String>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window_ms: 100,
            adaptive: false,
            every: None,
            channel: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub quiet_ms: u64,
    pub mode: DebounceMode,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            quiet_ms: 250,
            mode: DebounceMode::Trailing,
        }
    }
}

/// Sampling stage strategy. Priority-weighted sampling reuses the engine's
/// priority function; without one every sample carries priority 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum SamplingConfig {
    /// Probability of keeping each sample, (0, 1]
    Uniform { keep_probability: f64 },
    /// Uniform random sample of size k, emitted on flush
    Reservoir { k: usize },
    PriorityWeighted,
    AdaptiveRate {
        medium_rate_hz: f64,
        high_rate_hz: f64,
        medium_fraction: f64,
        high_fraction: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateStageConfig {
    pub window: WindowKind,
    pub function: AggregateFn,
}

impl Default for AggregateStageConfig {
    fn default() -> Self {
        Self {
            window: WindowKind::Tumbling { width_ms: 1_000 },
            function: AggregateFn::Mean,
        }
    }
}

impl PipelineConfig {
    fn validate(&self) -> Result<(), String> {
        if let Some(f) = &self.filter {
            if let (Some(min), Some(max)) = (f.min, f.max) {
                if min > max {
                    return Err("filter min must not exceed max".into());
                }
            }
        }
        if let Some(t) = &self.anomaly_tagging {
            if t.window < 3 {
                return Err("anomaly tagging window must be at least 3".into());
            }
            if t.threshold <= 0.0 {
                return Err("anomaly tagging threshold must be positive".into());
            }
        }
        if let Some(t) = &self.throttle {
            if t.window_ms == 0 {
                return Err("throttle window must be nonzero".into());
            }
            if t.every == Some(0) {
                return Err("throttle count window must be nonzero".into());
            }
        }
        if let Some(d) = &self.debounce {
            if d.quiet_ms == 0 {
                return Err("debounce quiet period must be nonzero".into());
            }
        }
        match &self.sampling {
            Some(SamplingConfig::Uniform { keep_probability }) => {
                if !(*keep_probability > 0.0 && *keep_probability <= 1.0) {
                    return Err("sampling keep probability must be within (0, 1]".into());
                }
            }
            Some(SamplingConfig::Reservoir { k }) => {
                if *k == 0 {
                    return Err("reservoir size must be at least 1".into());
                }
            }
            Some(SamplingConfig::AdaptiveRate {
                medium_rate_hz,
                high_rate_hz,
                medium_fraction,
                high_fraction,
            }) => {
                if *medium_rate_hz <= 0.0 || *high_rate_hz <= *medium_rate_hz {
                    return Err("sampling rate tiers must be positive and increasing".into());
                }
                if !((0.0..=1.0).contains(medium_fraction)
                    && (0.0..=1.0).contains(high_fraction))
                {
                    return Err("sampling fractions must be within [0, 1]".into());
                }
            }
            Some(SamplingConfig::PriorityWeighted) | None => {}
        }
        if let Some(a) = &self.aggregate {
            let width = match a.window {
                WindowKind::Tumbling { width_ms } | WindowKind::Sliding { width_ms } => width_ms,
                WindowKind::Session { gap_timeout_ms } => gap_timeout_ms,
            };
            if width == 0 {
                return Err("aggregate window width must be nonzero".into());
            }
        }
        Ok(())
    }
}

/// Input source selection for the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// "synthetic" or "stdin"
    pub kind: SourceKind,
    /// Synthetic source: sinusoid frequency in Hz
    pub frequency_hz: f64,
    /// Synthetic source: amplitude
    pub amplitude: f64,
    /// Synthetic source: additive Gaussian noise sigma
    pub noise_sigma: f64,
    /// Synthetic source: emission interval in milliseconds
    pub interval_ms: u64,
    /// Synthetic source: channel name stamped on emitted samples
    pub channel: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Synthetic,
    Stdin,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Synthetic,
            frequency_hz: 0.5,
            amplitude: 10.0,
            noise_sigma: 0.5,
            interval_ms: 100,
            channel: "synthetic".to_string(),
        }
    }
}

impl SourceConfig {
    fn validate(&self) -> Result<(), String> {
        if self.kind == SourceKind::Synthetic {
            if self.interval_ms == 0 {
                return Err("synthetic source interval must be nonzero".into());
            }
            if self.frequency_hz <= 0.0 {
                return Err("synthetic source frequency must be positive".into());
            }
            if self.noise_sigma < 0.0 {
                return Err("synthetic noise sigma must not be negative".into());
            }
        }
        Ok(())
    }
}

/// Root configuration for one engine instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub source: SourceConfig,
    pub pipeline: PipelineConfig,
    pub backpressure: BackpressureConfig,
    pub analyzer: AnalyzerConfig,
    pub scheduler: SchedulerConfig,
    pub compute: ComputeConfig,
}

impl EngineConfig {
    /// Load using the standard search order. A file that exists but fails
    /// to parse or validate falls through to the next candidate.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "loaded config from {CONFIG_ENV_VAR}");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "config from {CONFIG_ENV_VAR} rejected, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{CONFIG_ENV_VAR} points to a non-existent file, falling back");
            }
        }

        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("loaded config from ./{CONFIG_FILE}");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "./{CONFIG_FILE} rejected, using defaults");
                }
            }
        }

        info!("no config file found, using built-in defaults");
        Self::default()
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Range checks across every section. All failures are collected so
    /// one startup attempt reports everything that is wrong.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        for result in [
            self.source.validate(),
            self.pipeline.validate(),
            self.backpressure.validate(),
            self.analyzer.validate(),
            self.scheduler.validate(),
            self.compute.validate(),
        ] {
            if let Err(e) = result {
                errors.push(e);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backpressure::SheddingStrategy;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[backpressure]
strategy = "drop-oldest"
capacity = 500

[scheduler]
interval_ms = 250
"#
        )
        .unwrap();
        let config = EngineConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.backpressure.strategy, SheddingStrategy::DropOldest);
        assert_eq!(config.backpressure.capacity, 500);
        assert_eq!(config.scheduler.interval_ms, 250);
        // Untouched sections keep their defaults
        assert_eq!(config.analyzer.capacity, 10_000);
        assert_eq!(config.compute.workers, 4);
    }

    #[test]
    fn invalid_values_are_rejected_with_every_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[backpressure]
capacity = 0

[scheduler]
interval_ms = 0
"#
        )
        .unwrap();
        let err = EngineConfig::load_from_file(file.path()).unwrap_err();
        match err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not [toml").unwrap();
        assert!(matches!(
            EngineConfig::load_from_file(file.path()),
            Err(ConfigError::Parse(..))
        ));
    }

    #[test]
    fn stage_sections_deserialize() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[pipeline]
seed = 42

[pipeline.debounce]
quiet_ms = 100
mode = "both"

[pipeline.aggregate]
function = "max"

[pipeline.aggregate.window]
kind = "sliding"
width_ms = 2000
"#
        )
        .unwrap();
        let config = EngineConfig::load_from_file(file.path()).unwrap();
        let debounce = config.pipeline.debounce.unwrap();
        assert_eq!(debounce.mode, DebounceMode::Both);
        let aggregate = config.pipeline.aggregate.unwrap();
        assert_eq!(aggregate.function, AggregateFn::Max);
        assert_eq!(aggregate.window, WindowKind::Sliding { width_ms: 2_000 });
    }

    #[test]
    fn filter_transform_and_strategy_sections_deserialize() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[pipeline.filter]
min = 0.0
max = 100.0

[pipeline.transform.normalize]
mode = "z-score"

[pipeline.throttle]
every = 5

[pipeline.sampling]
strategy = "reservoir"
k = 50
"#
        )
        .unwrap();
        let config = EngineConfig::load_from_file(file.path()).unwrap();
        let filter = config.pipeline.filter.unwrap();
        assert_eq!(filter.min, Some(0.0));
        assert_eq!(filter.max, Some(100.0));
        assert_eq!(
            config.pipeline.transform.unwrap().normalize,
            NormalizeMode::ZScore
        );
        assert_eq!(config.pipeline.throttle.unwrap().every, Some(5));
        assert!(matches!(
            config.pipeline.sampling,
            Some(SamplingConfig::Reservoir { k: 50 })
        ));
    }

    #[test]
    fn degenerate_sampling_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[pipeline.sampling]
strategy = "uniform"
keep_probability = 0.0
"#
        )
        .unwrap();
        assert!(matches!(
            EngineConfig::load_from_file(file.path()),
            Err(ConfigError::Validation(_))
        ));
    }
}
