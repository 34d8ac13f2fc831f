//! Cross-stream correlation.
//!
//! Pairs of streams are compared over the overlap of their most recent
//! values. The full matrix is rebuilt from scratch each pass (pairs are
//! independent, so the rebuild fans out over rayon) and published
//! atomically via arc-swap, so readers always see a complete matrix.

use crate::analysis::correlation::{cross_correlation, pearson, spearman};
use crate::types::{CorrelationEntry, CrossCorrelation, SignificanceBand};
use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Matrix keyed by the canonical (smaller id first) stream pair.
pub type CorrelationMatrix = HashMap<(String, String), CorrelationEntry>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Symmetric lag range for cross-correlation
    pub max_lag: usize,
    /// |coefficient| above this counts as a significant lag
    pub lag_significance: f64,
    /// Overlapping points required before a pair is correlated at all
    pub min_overlap: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            max_lag: 10,
            lag_significance: 0.3,
            min_overlap: 3,
        }
    }
}

pub struct CorrelationEngine {
    config: CorrelationConfig,
}

impl CorrelationEngine {
    pub fn new(config: CorrelationConfig) -> Self {
        Self { config }
    }

    /// Correlate two series. Returns `None` when the overlap is too short
    /// or the arithmetic degenerates; a missing entry, not an error.
    ///
    /// Symmetric in its arguments up to the canonical key ordering.
    pub fn correlate(
        &self,
        id_a: &str,
        series_a: &[f64],
        id_b: &str,
        series_b: &[f64],
    ) -> Option<CorrelationEntry> {
        let n = series_a.len().min(series_b.len());
        if n < self.config.min_overlap {
            return None;
        }
        // Overlap is the most recent n values of each series
        let a = &series_a[series_a.len() - n..];
        let b = &series_b[series_b.len() - n..];

        // Canonical orientation so (a,b) and (b,a) produce one entry
        let (stream_a, stream_b) = CorrelationEntry::canonical_key(id_a, id_b);
        let (x, y) = if stream_a == id_a { (a, b) } else { (b, a) };

        let r = pearson(x, y).ok()?;
        let rho = spearman(x, y).ok()?;
        let max_lag = self.config.max_lag.min(n - 1);
        let cross = cross_correlation(x, y, max_lag, self.config.lag_significance).ok()?;

        Some(CorrelationEntry {
            stream_a,
            stream_b,
            pearson: r,
            spearman: rho,
            significance: SignificanceBand::from_r(r),
            cross: CrossCorrelation {
                coefficients: cross.coefficients,
                lags: cross.lags,
                max_correlation: cross.max_correlation,
                max_lag: cross.max_lag,
                significant_lags: cross.significant_lags,
            },
            last_updated: Utc::now(),
        })
    }

    /// Build the full matrix over every unique unordered pair.
    pub fn build_matrix(&self, series: &[(String, Vec<f64>)]) -> CorrelationMatrix {
        let mut pairs = Vec::new();
        for i in 0..series.len() {
            for j in i + 1..series.len() {
                pairs.push((i, j));
            }
        }

        let entries: Vec<CorrelationEntry> = pairs
            .par_iter()
            .filter_map(|&(i, j)| {
                let (ref id_a, ref va) = series[i];
                let (ref id_b, ref vb) = series[j];
                self.correlate(id_a, va, id_b, vb)
            })
            .collect();

        debug!(
            streams = series.len(),
            pairs = pairs.len(),
            entries = entries.len(),
            "correlation matrix rebuilt"
        );
        entries
            .into_iter()
            .map(|e| ((e.stream_a.clone(), e.stream_b.clone()), e))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> CorrelationEngine {
        CorrelationEngine::new(CorrelationConfig::default())
    }

    #[test]
    fn perfectly_correlated_pair() {
        let a: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let b: Vec<f64> = a.iter().map(|v| 2.0 * v + 1.0).collect();
        let entry = engine().correlate("s1", &a, "s2", &b).unwrap();
        assert!((entry.pearson - 1.0).abs() < 1e-9);
        assert!((entry.spearman - 1.0).abs() < 1e-9);
        assert_eq!(entry.significance, SignificanceBand::Strong);
    }

    #[test]
    fn symmetric_in_argument_order() {
        let a: Vec<f64> = (0..15).map(|i| (i as f64).sin()).collect();
        let b: Vec<f64> = (0..15).map(|i| (i as f64 * 0.7).cos()).collect();
        let ab = engine().correlate("x", &a, "y", &b).unwrap();
        let ba = engine().correlate("y", &b, "x", &a).unwrap();
        assert_eq!(ab.stream_a, ba.stream_a);
        assert_eq!(ab.stream_b, ba.stream_b);
        assert!((ab.pearson - ba.pearson).abs() < 1e-12);
        assert_eq!(ab.cross.max_lag, ba.cross.max_lag);
    }

    #[test]
    fn too_short_overlap_is_none() {
        assert!(engine()
            .correlate("a", &[1.0, 2.0], "b", &[1.0, 2.0])
            .is_none());
    }

    #[test]
    fn mismatched_lengths_use_recent_overlap() {
        let long: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let short: Vec<f64> = (40..50).map(|i| i as f64).collect();
        // Overlap is the last 10 of the long series, identical to short
        let entry = engine().correlate("long", &long, "short", &short).unwrap();
        assert!((entry.pearson - 1.0).abs() < 1e-9);
    }

    #[test]
    fn matrix_has_one_entry_per_pair() {
        let series = vec![
            ("s1".to_string(), (0..20).map(|i| i as f64).collect()),
            ("s2".to_string(), (0..20).map(|i| i as f64 * 2.0).collect()),
            ("s3".to_string(), (0..20).map(|i| (i as f64).sin()).collect()),
        ];
        let matrix = engine().build_matrix(&series);
        assert_eq!(matrix.len(), 3);
        assert!(matrix.contains_key(&("s1".to_string(), "s2".to_string())));
        assert!(matrix.contains_key(&("s1".to_string(), "s3".to_string())));
        assert!(matrix.contains_key(&("s2".to_string(), "s3".to_string())));
    }
}
