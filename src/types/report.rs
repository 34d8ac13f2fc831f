//! Analysis report contracts: immutable snapshots regenerated wholesale on
//! every analysis pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Descriptive statistics block of a report summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportStatistics {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

/// Header of an analysis report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub data_points: usize,
    /// (first, last) sample timestamps in milliseconds
    pub time_range: (u64, u64),
    pub statistics: ReportStatistics,
}

/// Anomaly findings for one analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub count: usize,
    /// `count / data_points * 100`
    pub percentage: f64,
    /// Detection method that produced these findings
    pub method: String,
    pub indices: Vec<usize>,
    pub values: Vec<f64>,
}

/// Trend findings: regression direction plus short-horizon forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    /// "increasing" | "decreasing" | "stable"
    pub direction: String,
    /// R² of the least-squares fit, 0.0 - 1.0
    pub strength: f64,
    /// Naive linear extrapolation, one entry per forecast step
    pub predictions: Vec<f64>,
}

/// Frequency-domain findings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencySummary {
    /// Frequency (Hz) of the strongest spectral peak, if any
    pub dominant_frequency: Option<f64>,
    /// (frequency, magnitude) pairs sorted by magnitude descending
    pub peaks: Vec<(f64, f64)>,
}

/// Coefficient strength banding used across all correlation outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignificanceBand {
    /// |r| >= 0.7
    Strong,
    /// |r| >= 0.4
    Moderate,
    /// everything else
    Weak,
}

impl SignificanceBand {
    pub fn from_r(r: f64) -> Self {
        let a = r.abs();
        if a >= 0.7 {
            Self::Strong
        } else if a >= 0.4 {
            Self::Moderate
        } else {
            Self::Weak
        }
    }
}

/// Cross-correlation over a symmetric lag range on z-normalized series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossCorrelation {
    /// One coefficient per lag, parallel to `lags`
    pub coefficients: Vec<f64>,
    /// Lags from -max_lag to +max_lag inclusive
    pub lags: Vec<i64>,
    /// Maximum |coefficient| observed
    pub max_correlation: f64,
    /// Lag at which the maximum occurred
    pub max_lag: i64,
    /// (lag, coefficient) pairs above the significance threshold,
    /// sorted by |coefficient| descending, capped at 10
    pub significant_lags: Vec<(i64, f64)>,
}

/// One entry of the cross-stream correlation matrix.
///
/// Keyed by the unordered pair of stream ids; `stream_a` is always the
/// lexicographically smaller id so each pair appears exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub stream_a: String,
    pub stream_b: String,
    pub pearson: f64,
    pub spearman: f64,
    pub significance: SignificanceBand,
    pub cross: CrossCorrelation,
    pub last_updated: DateTime<Utc>,
}

impl CorrelationEntry {
    /// Canonical key for an unordered stream pair: smaller id first.
    pub fn canonical_key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }
}

/// Full analysis snapshot for one stream. Regenerated wholesale on each
/// pass; never partially updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub stream_id: String,
    pub summary: ReportSummary,
    pub anomalies: AnomalySummary,
    pub trends: TrendSummary,
    pub frequency: FrequencySummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlations: Option<Vec<CorrelationEntry>>,
    pub generated_at: DateTime<Utc>,
}
