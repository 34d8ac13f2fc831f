//! Numeric analysis library
//!
//! Pure, stateless functions over slices of `f64`. No hidden state; every
//! function is safe to call concurrently on independent inputs, which is
//! what lets the compute pool fan these out across blocking workers.

pub mod anomaly;
pub mod correlation;
pub mod frequency;
pub mod stats;
pub mod trend;

pub use anomaly::{detect_anomalies, AnomalyMethod, AnomalyResult};
pub use correlation::{
    cross_correlation, p_value_for_r, pearson, spearman, CrossCorrelationResult,
};
pub use frequency::{compute_spectrum, find_peaks, Spectrum};
pub use stats::{kurtosis, mean, median, mode, percentile, skewness, std_dev, variance};
pub use trend::{
    analyze_trend, exponential_moving_average, forecast, linear_regression,
    seasonal_decompose, simple_moving_average, LinearFit, SeasonalDecomposition, TrendDirection,
    TrendResult,
};

use thiserror::Error;

/// Errors in numeric analysis.
#[derive(Error, Debug, PartialEq)]
pub enum AnalysisError {
    #[error("insufficient data: need {needed}, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("invalid input length: {0}")]
    InvalidInputLength(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}
