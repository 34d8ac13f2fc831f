//! Anomaly detection
//!
//! Four pluggable methods. Z-score, IQR, and the sliding moving-average
//! window are deterministic; the isolation forest is a randomized
//! approximation and is always driven by an explicit seed so results are
//! reproducible.

use super::{stats, AnalysisError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Detection method selection, carried in config and stamped on reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum AnomalyMethod {
    /// Flag |value - mean| / std > threshold
    ZScore { threshold: f64 },
    /// Flag outside [Q1 - f*IQR, Q3 + f*IQR]
    Iqr { fence: f64 },
    /// Recompute mean/std over a trailing window, flag beyond threshold*std
    MovingAverage { window: usize, threshold: f64 },
    /// Randomized shallow-tree isolation forest approximation
    IsolationForest {
        trees: usize,
        subsample: usize,
        contamination: f64,
        seed: u64,
    },
}

impl Default for AnomalyMethod {
    fn default() -> Self {
        Self::ZScore { threshold: 3.0 }
    }
}

impl AnomalyMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ZScore { .. } => "z-score",
            Self::Iqr { .. } => "iqr",
            Self::MovingAverage { .. } => "moving-average",
            Self::IsolationForest { .. } => "isolation-forest",
        }
    }
}

/// Indices and values flagged by one detection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub method: String,
    pub indices: Vec<usize>,
    pub values: Vec<f64>,
}

impl AnomalyResult {
    fn from_indices(method: &AnomalyMethod, data: &[f64], indices: Vec<usize>) -> Self {
        let values = indices.iter().map(|&i| data[i]).collect();
        Self {
            method: method.name().to_string(),
            indices,
            values,
        }
    }
}

/// Run the configured detection method over `data`.
pub fn detect_anomalies(
    data: &[f64],
    method: &AnomalyMethod,
) -> Result<AnomalyResult, AnalysisError> {
    let indices = match method {
        AnomalyMethod::ZScore { threshold } => z_score_indices(data, *threshold)?,
        AnomalyMethod::Iqr { fence } => iqr_indices(data, *fence)?,
        AnomalyMethod::MovingAverage { window, threshold } => {
            moving_average_indices(data, *window, *threshold)?
        }
        AnomalyMethod::IsolationForest {
            trees,
            subsample,
            contamination,
            seed,
        } => isolation_forest_indices(data, *trees, *subsample, *contamination, *seed)?,
    };
    Ok(AnomalyResult::from_indices(method, data, indices))
}

/// Minimum standard deviation used in place of zero, so a point deviating
/// from an otherwise constant series scores as anomalous instead of
/// dividing by zero.
const MIN_STD_FLOOR: f64 = 1e-9;

/// Each point is scored against the mean/std of the *other* points
/// (leave-one-out), so a single gross outlier cannot inflate the very
/// deviation estimate that should flag it. Converges to the plain
/// |v - mean| / std formula as n grows.
fn z_score_indices(data: &[f64], threshold: f64) -> Result<Vec<usize>, AnalysisError> {
    let n = data.len();
    if n < 3 {
        return Err(AnalysisError::InsufficientData {
            needed: 3,
            available: n,
        });
    }
    let sum: f64 = data.iter().sum();
    let sum_sq: f64 = data.iter().map(|v| v * v).sum();
    let rest = (n - 1) as f64;

    Ok(data
        .iter()
        .enumerate()
        .filter(|(_, &v)| {
            let m = (sum - v) / rest;
            let var = ((sum_sq - v * v) / rest - m * m).max(0.0);
            let sd = var.sqrt().max(MIN_STD_FLOOR);
            ((v - m) / sd).abs() > threshold
        })
        .map(|(i, _)| i)
        .collect())
}

fn iqr_indices(data: &[f64], fence: f64) -> Result<Vec<usize>, AnalysisError> {
    if fence <= 0.0 {
        return Err(AnalysisError::InvalidConfiguration(format!(
            "IQR fence must be positive, got {fence}"
        )));
    }
    let q1 = stats::percentile(data, 25.0)?;
    let q3 = stats::percentile(data, 75.0)?;
    let iqr = q3 - q1;
    let lo = q1 - fence * iqr;
    let hi = q3 + fence * iqr;
    Ok(data
        .iter()
        .enumerate()
        .filter(|(_, &v)| v < lo || v > hi)
        .map(|(i, _)| i)
        .collect())
}

/// Trailing-window mean/std; the window never includes the point under test
/// until at least `window` points precede it (early points use whatever
/// history exists, minimum 2).
fn moving_average_indices(
    data: &[f64],
    window: usize,
    threshold: f64,
) -> Result<Vec<usize>, AnalysisError> {
    if window < 2 {
        return Err(AnalysisError::InvalidConfiguration(format!(
            "moving-average window must be >= 2, got {window}"
        )));
    }
    if data.len() < 2 {
        return Err(AnalysisError::InsufficientData {
            needed: 2,
            available: data.len(),
        });
    }

    let mut flagged = Vec::new();
    for i in 1..data.len() {
        let start = i.saturating_sub(window);
        let trailing = &data[start..i];
        if trailing.len() < 2 {
            continue;
        }
        let m = stats::mean(trailing)?;
        let sd = stats::std_dev(trailing)?;
        if sd > 0.0 && (data[i] - m).abs() > threshold * sd {
            flagged.push(i);
        }
    }
    Ok(flagged)
}

// ----------------------------------------------------------------------------
// Isolation forest approximation
// ----------------------------------------------------------------------------

/// Average path length of an unsuccessful BST search, the standard
/// normalizer c(n) for isolation forests.
fn average_path_length(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let nf = n as f64;
    let harmonic = (nf - 1.0).ln() + 0.577_215_664_901_532_9;
    2.0 * harmonic - 2.0 * (nf - 1.0) / nf
}

/// Depth of `value` in one random-split tree built over `subset`.
///
/// Trees are shallow: splitting stops at a depth ceiling of log2(subsample)
/// as in the original algorithm, with the remaining subset size feeding the
/// path-length estimate.
fn isolation_depth(value: f64, subset: &mut Vec<f64>, max_depth: usize, rng: &mut StdRng) -> f64 {
    let mut depth = 0usize;
    loop {
        if depth >= max_depth || subset.len() <= 1 {
            return depth as f64 + average_path_length(subset.len());
        }
        let lo = subset.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = subset.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if lo >= hi {
            return depth as f64 + average_path_length(subset.len());
        }
        let split = rng.gen_range(lo..hi);
        subset.retain(|&v| (v < split) == (value < split));
        depth += 1;
    }
}

fn isolation_forest_indices(
    data: &[f64],
    trees: usize,
    subsample: usize,
    contamination: f64,
    seed: u64,
) -> Result<Vec<usize>, AnalysisError> {
    if trees == 0 || subsample < 2 {
        return Err(AnalysisError::InvalidConfiguration(format!(
            "isolation forest needs trees >= 1 and subsample >= 2, got {trees}/{subsample}"
        )));
    }
    if !(0.0..1.0).contains(&contamination) || contamination == 0.0 {
        return Err(AnalysisError::InvalidConfiguration(format!(
            "contamination must be in (0, 1), got {contamination}"
        )));
    }
    if data.len() < 2 {
        return Err(AnalysisError::InsufficientData {
            needed: 2,
            available: data.len(),
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let sub = subsample.min(data.len());
    let max_depth = (sub as f64).log2().ceil() as usize;
    let c_n = average_path_length(sub);

    // Score each point by its average path length across trees, converted
    // to the standard anomaly score 2^(-E[h]/c(n)).
    let mut scores = vec![0.0f64; data.len()];
    for _ in 0..trees {
        let sample: Vec<f64> = (0..sub).map(|_| data[rng.gen_range(0..data.len())]).collect();
        for (i, &v) in data.iter().enumerate() {
            let mut subset = sample.clone();
            scores[i] += isolation_depth(v, &mut subset, max_depth, &mut rng);
        }
    }
    for s in scores.iter_mut() {
        let avg_depth = *s / trees as f64;
        *s = if c_n > 0.0 {
            2.0f64.powf(-avg_depth / c_n)
        } else {
            0.5
        };
    }

    // Threshold at the (1 - contamination) percentile of scores
    let cutoff = stats::percentile(&scores, (1.0 - contamination) * 100.0)?;
    Ok(scores
        .iter()
        .enumerate()
        .filter(|(_, &s)| s > cutoff)
        .map(|(i, _)| i)
        .collect())
}

/// Inline z-score check over a trailing window, used by the pipeline's
/// filter stage to tag (not remove) anomalous samples.
pub fn window_z_score(window: &[f64], value: f64) -> Option<f64> {
    if window.len() < 2 {
        return None;
    }
    let m = stats::mean(window).ok()?;
    let sd = stats::std_dev(window).ok()?;
    if sd == 0.0 {
        return None;
    }
    Some((value - m) / sd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn z_score_flags_spike() {
        let data = [10.0, 10.0, 10.0, 10.0, 100.0];
        let result =
            detect_anomalies(&data, &AnomalyMethod::ZScore { threshold: 3.0 }).unwrap();
        assert_eq!(result.indices, vec![4]);
        assert_eq!(result.values, vec![100.0]);
        assert_eq!(result.method, "z-score");
    }

    #[test]
    fn z_score_matches_plain_formula_for_large_n() {
        // With many points, leave-one-out and global estimates agree.
        let mut data: Vec<f64> = (0..1000).map(|i| ((i * 37) % 100) as f64).collect();
        data.push(1e6);
        let result = detect_anomalies(&data, &AnomalyMethod::ZScore { threshold: 3.0 }).unwrap();
        assert_eq!(result.indices, vec![1000]);
    }

    #[test]
    fn z_score_constant_data_flags_nothing() {
        let data = [5.0; 20];
        let result = detect_anomalies(&data, &AnomalyMethod::ZScore { threshold: 3.0 }).unwrap();
        assert!(result.indices.is_empty());
    }

    #[test]
    fn iqr_flags_outliers_both_tails() {
        let mut data: Vec<f64> = (1..=20).map(|v| v as f64).collect();
        data.push(1000.0);
        data.push(-1000.0);
        let result = detect_anomalies(&data, &AnomalyMethod::Iqr { fence: 1.5 }).unwrap();
        assert_eq!(result.indices, vec![20, 21]);
    }

    #[test]
    fn iqr_rejects_bad_fence() {
        assert!(matches!(
            detect_anomalies(&[1.0, 2.0], &AnomalyMethod::Iqr { fence: 0.0 }),
            Err(AnalysisError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn moving_average_flags_level_shift() {
        let mut data = vec![10.0, 10.1, 9.9, 10.0, 10.1, 9.9, 10.0, 10.1];
        data.push(50.0);
        let result = detect_anomalies(
            &data,
            &AnomalyMethod::MovingAverage {
                window: 5,
                threshold: 3.0,
            },
        )
        .unwrap();
        assert!(result.indices.contains(&8));
    }

    #[test]
    fn isolation_forest_is_seed_deterministic() {
        let mut data: Vec<f64> = (0..100).map(|i| (i % 10) as f64).collect();
        data.push(500.0);
        let method = AnomalyMethod::IsolationForest {
            trees: 50,
            subsample: 64,
            contamination: 0.05,
            seed: 42,
        };
        let a = detect_anomalies(&data, &method).unwrap();
        let b = detect_anomalies(&data, &method).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn isolation_forest_finds_gross_outlier() {
        let mut data: Vec<f64> = (0..200).map(|i| 10.0 + (i % 7) as f64 * 0.1).collect();
        data.push(10_000.0);
        let method = AnomalyMethod::IsolationForest {
            trees: 100,
            subsample: 128,
            contamination: 0.02,
            seed: 7,
        };
        let result = detect_anomalies(&data, &method).unwrap();
        assert!(
            result.indices.contains(&200),
            "outlier not flagged: {:?}",
            result.indices
        );
    }

    #[test]
    fn window_z_score_tags_deviation() {
        let window = [10.0, 10.0, 10.2, 9.8, 10.0];
        let z = window_z_score(&window, 20.0).unwrap();
        assert!(z > 3.0);
        assert!(window_z_score(&window[..1], 20.0).is_none());
    }
}
