//! Correlation: Pearson, Spearman, and lagged cross-correlation.
//!
//! The p-value is deliberately approximate: Student's-t CDF (statrs) below
//! 30 degrees of freedom, normal approximation at or above. Callers should
//! treat it as a ranking signal, not an exact tail probability.

use super::AnalysisError;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Default threshold above which a lag is recorded as significant.
pub const SIGNIFICANT_LAG_THRESHOLD: f64 = 0.3;

/// Maximum number of significant lags retained.
pub const MAX_SIGNIFICANT_LAGS: usize = 10;

/// Pearson correlation coefficient.
///
/// Fails with `InvalidConfiguration` on mismatched lengths (a structural
/// error, rejected before any math) and `InsufficientData` below 2 points.
pub fn pearson(x: &[f64], y: &[f64]) -> Result<f64, AnalysisError> {
    if x.len() != y.len() {
        return Err(AnalysisError::InvalidConfiguration(format!(
            "mismatched series lengths: {} vs {}",
            x.len(),
            y.len()
        )));
    }
    if x.len() < 2 {
        return Err(AnalysisError::InsufficientData {
            needed: 2,
            available: x.len(),
        });
    }

    let n = x.len() as f64;
    let sum_x: f64 = x.iter().sum();
    let sum_y: f64 = y.iter().sum();
    let sum_xy: f64 = x.iter().zip(y).map(|(a, b)| a * b).sum();
    let sum_x2: f64 = x.iter().map(|a| a * a).sum();
    let sum_y2: f64 = y.iter().map(|a| a * a).sum();

    let numerator = n * sum_xy - sum_x * sum_y;
    let denominator = ((n * sum_x2 - sum_x.powi(2)) * (n * sum_y2 - sum_y.powi(2))).sqrt();

    if denominator == 0.0 {
        Ok(0.0)
    } else {
        Ok(numerator / denominator)
    }
}

/// Average ranks with ties sharing their mean rank.
fn average_ranks(data: &[f64]) -> Vec<f64> {
    let mut indexed: Vec<(usize, f64)> = data.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut ranks = vec![0.0f64; data.len()];
    let mut i = 0;
    while i < indexed.len() {
        let mut j = i;
        while j + 1 < indexed.len() && indexed[j + 1].1 == indexed[i].1 {
            j += 1;
        }
        // 1-based ranks, ties get the mean of their span
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[indexed[k].0] = avg;
        }
        i = j + 1;
    }
    ranks
}

/// Spearman rank correlation: Pearson over average-ranked data.
pub fn spearman(x: &[f64], y: &[f64]) -> Result<f64, AnalysisError> {
    if x.len() != y.len() {
        return Err(AnalysisError::InvalidConfiguration(format!(
            "mismatched series lengths: {} vs {}",
            x.len(),
            y.len()
        )));
    }
    pearson(&average_ranks(x), &average_ranks(y))
}

/// Two-tailed p-value for correlation coefficient `r` over `n` samples.
///
/// df >= 30 uses the normal approximation of the t statistic; smaller df
/// uses the exact Student's-t CDF. Both paths are approximations of the
/// true sampling distribution under non-normal data.
pub fn p_value_for_r(r: f64, n: usize) -> f64 {
    if n < 3 {
        return 1.0;
    }
    if r.abs() >= 0.9999 {
        return 0.0;
    }

    let df = (n - 2) as f64;
    let t_stat = r * df.sqrt() / (1.0 - r * r).sqrt();

    if df >= 30.0 {
        match Normal::new(0.0, 1.0) {
            Ok(normal) => 2.0 * (1.0 - normal.cdf(t_stat.abs())),
            Err(_) => 1.0,
        }
    } else {
        match StudentsT::new(0.0, 1.0, df) {
            Ok(t_dist) => 2.0 * (1.0 - t_dist.cdf(t_stat.abs())),
            Err(_) => 1.0,
        }
    }
}

/// Output of a lagged cross-correlation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossCorrelationResult {
    /// One coefficient per lag, parallel to `lags`
    pub coefficients: Vec<f64>,
    /// -max_lag ..= +max_lag
    pub lags: Vec<i64>,
    /// Maximum |coefficient|
    pub max_correlation: f64,
    /// Lag where the maximum occurred
    pub max_lag: i64,
    /// (lag, coefficient) above the significance threshold, sorted by
    /// |coefficient| descending, capped at [`MAX_SIGNIFICANT_LAGS`]
    pub significant_lags: Vec<(i64, f64)>,
}

fn z_normalize(data: &[f64]) -> Vec<f64> {
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    let var = data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    if std == 0.0 {
        vec![0.0; data.len()]
    } else {
        data.iter().map(|v| (v - mean) / std).collect()
    }
}

/// Cross-correlation of z-normalized series over lags in
/// `[-max_lag, max_lag]`. Positive lag means `y` trails `x`.
pub fn cross_correlation(
    x: &[f64],
    y: &[f64],
    max_lag: usize,
    significance_threshold: f64,
) -> Result<CrossCorrelationResult, AnalysisError> {
    if x.len() != y.len() {
        return Err(AnalysisError::InvalidConfiguration(format!(
            "mismatched series lengths: {} vs {}",
            x.len(),
            y.len()
        )));
    }
    let n = x.len();
    if n < 3 {
        return Err(AnalysisError::InsufficientData {
            needed: 3,
            available: n,
        });
    }
    if max_lag >= n {
        return Err(AnalysisError::InvalidConfiguration(format!(
            "max lag {max_lag} must be below series length {n}"
        )));
    }

    let zx = z_normalize(x);
    let zy = z_normalize(y);

    let mut lags = Vec::with_capacity(2 * max_lag + 1);
    let mut coefficients = Vec::with_capacity(2 * max_lag + 1);
    for lag in -(max_lag as i64)..=(max_lag as i64) {
        let mut sum = 0.0;
        let mut count = 0usize;
        for i in 0..n {
            let j = i as i64 + lag;
            if j >= 0 && (j as usize) < n {
                sum += zx[i] * zy[j as usize];
                count += 1;
            }
        }
        lags.push(lag);
        coefficients.push(if count > 0 { sum / count as f64 } else { 0.0 });
    }

    let (best_idx, _) = coefficients
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.abs()
                .partial_cmp(&b.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or((0, &0.0));

    let mut significant: Vec<(i64, f64)> = lags
        .iter()
        .zip(coefficients.iter())
        .filter(|(_, &c)| c.abs() > significance_threshold)
        .map(|(&l, &c)| (l, c))
        .collect();
    significant.sort_by(|a, b| {
        b.1.abs()
            .partial_cmp(&a.1.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    significant.truncate(MAX_SIGNIFICANT_LAGS);

    Ok(CrossCorrelationResult {
        max_correlation: coefficients[best_idx].abs(),
        max_lag: lags[best_idx],
        coefficients,
        lags,
        significant_lags: significant,
    })
}
