//! Trend analysis: least-squares regression, moving averages, naive
//! forecasting, and seasonal decomposition.

use super::AnalysisError;
use serde::{Deserialize, Serialize};

/// Trend direction classified from the regression slope over a trailing
/// window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Increasing => write!(f, "increasing"),
            Self::Decreasing => write!(f, "decreasing"),
            Self::Stable => write!(f, "stable"),
        }
    }
}

/// Least-squares fit over index positions 0..n.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

/// Output of a full trend pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub direction: TrendDirection,
    pub fit: LinearFit,
    /// Naive linear extrapolation, one value per forecast step
    pub predictions: Vec<f64>,
}

/// Least-squares slope/intercept/R² with x = 0, 1, 2, ...
pub fn linear_regression(data: &[f64]) -> Result<LinearFit, AnalysisError> {
    let n = data.len();
    if n < 2 {
        return Err(AnalysisError::InsufficientData {
            needed: 2,
            available: n,
        });
    }
    let nf = n as f64;
    let sum_x = nf * (nf - 1.0) / 2.0;
    let sum_x2 = (nf - 1.0) * nf * (2.0 * nf - 1.0) / 6.0;
    let sum_y: f64 = data.iter().sum();
    let sum_xy: f64 = data.iter().enumerate().map(|(i, &y)| i as f64 * y).sum();

    let denom = nf * sum_x2 - sum_x * sum_x;
    if denom == 0.0 {
        return Err(AnalysisError::InvalidConfiguration(
            "degenerate regression input".to_string(),
        ));
    }
    let slope = (nf * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / nf;

    // R² = 1 - SS_res / SS_tot
    let mean_y = sum_y / nf;
    let ss_tot: f64 = data.iter().map(|&y| (y - mean_y).powi(2)).sum();
    let ss_res: f64 = data
        .iter()
        .enumerate()
        .map(|(i, &y)| (y - (slope * i as f64 + intercept)).powi(2))
        .sum();
    let r_squared = if ss_tot == 0.0 {
        1.0
    } else {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    };

    Ok(LinearFit {
        slope,
        intercept,
        r_squared,
    })
}

/// Classify direction from the slope over the trailing `window` points
/// (or all points when fewer), using `slope_threshold` (default 0.01).
pub fn analyze_trend(
    data: &[f64],
    window: usize,
    slope_threshold: f64,
    forecast_steps: usize,
) -> Result<TrendResult, AnalysisError> {
    if window < 2 {
        return Err(AnalysisError::InvalidConfiguration(format!(
            "trend window must be >= 2, got {window}"
        )));
    }
    let start = data.len().saturating_sub(window);
    let tail = &data[start..];
    let fit = linear_regression(tail)?;

    let direction = if fit.slope > slope_threshold {
        TrendDirection::Increasing
    } else if fit.slope < -slope_threshold {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    };

    Ok(TrendResult {
        direction,
        fit,
        predictions: forecast_from_fit(&fit, tail.len(), forecast_steps),
    })
}

/// N-step naive linear extrapolation from the latest fit.
pub fn forecast(data: &[f64], steps: usize) -> Result<Vec<f64>, AnalysisError> {
    let fit = linear_regression(data)?;
    Ok(forecast_from_fit(&fit, data.len(), steps))
}

fn forecast_from_fit(fit: &LinearFit, n: usize, steps: usize) -> Vec<f64> {
    (1..=steps)
        .map(|s| fit.slope * (n - 1 + s) as f64 + fit.intercept)
        .collect()
}

/// Simple moving average; output length is `data.len() - window + 1`.
pub fn simple_moving_average(data: &[f64], window: usize) -> Result<Vec<f64>, AnalysisError> {
    if window == 0 {
        return Err(AnalysisError::InvalidConfiguration(
            "SMA window must be >= 1".to_string(),
        ));
    }
    if data.len() < window {
        return Err(AnalysisError::InsufficientData {
            needed: window,
            available: data.len(),
        });
    }
    Ok(data
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect())
}

/// Exponential moving average with smoothing factor `alpha` in (0, 1].
pub fn exponential_moving_average(data: &[f64], alpha: f64) -> Result<Vec<f64>, AnalysisError> {
    if !(0.0..=1.0).contains(&alpha) || alpha == 0.0 {
        return Err(AnalysisError::InvalidConfiguration(format!(
            "EMA alpha must be in (0, 1], got {alpha}"
        )));
    }
    if data.is_empty() {
        return Err(AnalysisError::InsufficientData {
            needed: 1,
            available: 0,
        });
    }
    let mut out = Vec::with_capacity(data.len());
    let mut ema = data[0];
    out.push(ema);
    for &v in &data[1..] {
        ema = alpha * v + (1.0 - alpha) * ema;
        out.push(ema);
    }
    Ok(out)
}

/// Classical additive seasonal decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalDecomposition {
    /// Centered moving-average trend (NaN-free: edges hold the nearest
    /// computed value)
    pub trend: Vec<f64>,
    /// Period-indexed average of the detrended residuals
    pub seasonal: Vec<f64>,
    /// original - trend - seasonal
    pub residual: Vec<f64>,
    pub period: usize,
}

/// Decompose `data` into trend + seasonal + residual with the given period.
///
/// Trend is a centered moving average of width `period`; the seasonal
/// component is the per-phase mean of the detrended series, recentering to
/// zero mean; residual is what remains.
pub fn seasonal_decompose(
    data: &[f64],
    period: usize,
) -> Result<SeasonalDecomposition, AnalysisError> {
    if period < 2 {
        return Err(AnalysisError::InvalidConfiguration(format!(
            "seasonal period must be >= 2, got {period}"
        )));
    }
    if data.len() < 2 * period {
        return Err(AnalysisError::InsufficientData {
            needed: 2 * period,
            available: data.len(),
        });
    }

    // Centered moving average; edges extended with the nearest value so the
    // three components stay index-aligned with the input.
    let half = period / 2;
    let ma = simple_moving_average(data, period)?;
    let mut trend = Vec::with_capacity(data.len());
    for i in 0..data.len() {
        let idx = i.saturating_sub(half).min(ma.len() - 1);
        trend.push(ma[idx]);
    }

    // Per-phase average of detrended values
    let mut phase_sum = vec![0.0f64; period];
    let mut phase_count = vec![0usize; period];
    for (i, (&v, &t)) in data.iter().zip(trend.iter()).enumerate() {
        phase_sum[i % period] += v - t;
        phase_count[i % period] += 1;
    }
    let mut phase_avg: Vec<f64> = phase_sum
        .iter()
        .zip(phase_count.iter())
        .map(|(&s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
        .collect();
    let phase_mean = phase_avg.iter().sum::<f64>() / period as f64;
    for p in phase_avg.iter_mut() {
        *p -= phase_mean;
    }

    let seasonal: Vec<f64> = (0..data.len()).map(|i| phase_avg[i % period]).collect();
    let residual: Vec<f64> = data
        .iter()
        .zip(trend.iter())
        .zip(seasonal.iter())
        .map(|((&v, &t), &s)| v - t - s)
        .collect();

    Ok(SeasonalDecomposition {
        trend,
        seasonal,
        residual,
        period,
    })
}
