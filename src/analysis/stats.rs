//! Descriptive statistics
//!
//! Population variance/std throughout (the analyzer treats a stream's
//! retained window as the population of interest). Skewness and kurtosis
//! carry sample-size bias correction and require n >= 4.

use super::AnalysisError;

/// Arithmetic mean. Needs at least one point.
pub fn mean(data: &[f64]) -> Result<f64, AnalysisError> {
    if data.is_empty() {
        return Err(AnalysisError::InsufficientData {
            needed: 1,
            available: 0,
        });
    }
    Ok(data.iter().sum::<f64>() / data.len() as f64)
}

/// Median via sorted order statistics.
pub fn median(data: &[f64]) -> Result<f64, AnalysisError> {
    percentile(data, 50.0)
}

/// Percentile with linear interpolation between order statistics.
///
/// `p` is in [0, 100]; out-of-range values are an `InvalidConfiguration`.
pub fn percentile(data: &[f64], p: f64) -> Result<f64, AnalysisError> {
    if data.is_empty() {
        return Err(AnalysisError::InsufficientData {
            needed: 1,
            available: 0,
        });
    }
    if !(0.0..=100.0).contains(&p) {
        return Err(AnalysisError::InvalidConfiguration(format!(
            "percentile {p} outside [0, 100]"
        )));
    }

    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Ok(sorted[lo]);
    }
    let frac = rank - lo as f64;
    Ok(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// All values tied at the maximum frequency, sorted ascending.
///
/// Values are keyed by their exact bit pattern; this is a mode over
/// discrete observations, not a kernel density estimate.
pub fn mode(data: &[f64]) -> Result<Vec<f64>, AnalysisError> {
    if data.is_empty() {
        return Err(AnalysisError::InsufficientData {
            needed: 1,
            available: 0,
        });
    }

    let mut counts: std::collections::HashMap<u64, (f64, usize)> = std::collections::HashMap::new();
    for &v in data {
        let entry = counts.entry(v.to_bits()).or_insert((v, 0));
        entry.1 += 1;
    }

    let max_count = counts.values().map(|&(_, c)| c).max().unwrap_or(0);
    let mut modes: Vec<f64> = counts
        .values()
        .filter(|&&(_, c)| c == max_count)
        .map(|&(v, _)| v)
        .collect();
    modes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Ok(modes)
}

/// Population variance. Needs at least two points.
pub fn variance(data: &[f64]) -> Result<f64, AnalysisError> {
    if data.len() < 2 {
        return Err(AnalysisError::InsufficientData {
            needed: 2,
            available: data.len(),
        });
    }
    let m = mean(data)?;
    Ok(data.iter().map(|v| (v - m).powi(2)).sum::<f64>() / data.len() as f64)
}

/// Population standard deviation.
pub fn std_dev(data: &[f64]) -> Result<f64, AnalysisError> {
    variance(data).map(f64::sqrt)
}

/// Bias-corrected sample skewness. Needs n >= 4.
///
/// g1 adjusted: sqrt(n(n-1))/(n-2) × m3 / m2^1.5
pub fn skewness(data: &[f64]) -> Result<f64, AnalysisError> {
    let n = data.len();
    if n < 4 {
        return Err(AnalysisError::InsufficientData {
            needed: 4,
            available: n,
        });
    }
    let nf = n as f64;
    let m = mean(data)?;
    let m2 = data.iter().map(|v| (v - m).powi(2)).sum::<f64>() / nf;
    let m3 = data.iter().map(|v| (v - m).powi(3)).sum::<f64>() / nf;
    if m2 == 0.0 {
        return Ok(0.0);
    }
    let g1 = m3 / m2.powf(1.5);
    Ok((nf * (nf - 1.0)).sqrt() / (nf - 2.0) * g1)
}

/// Bias-corrected excess kurtosis. Needs n >= 4.
pub fn kurtosis(data: &[f64]) -> Result<f64, AnalysisError> {
    let n = data.len();
    if n < 4 {
        return Err(AnalysisError::InsufficientData {
            needed: 4,
            available: n,
        });
    }
    let nf = n as f64;
    let m = mean(data)?;
    let m2 = data.iter().map(|v| (v - m).powi(2)).sum::<f64>() / nf;
    let m4 = data.iter().map(|v| (v - m).powi(4)).sum::<f64>() / nf;
    if m2 == 0.0 {
        return Ok(0.0);
    }
    let g2 = m4 / (m2 * m2) - 3.0;
    // Standard bias correction for sample excess kurtosis
    Ok(((nf - 1.0) / ((nf - 2.0) * (nf - 3.0))) * ((nf + 1.0) * g2 + 6.0))
}
