//! Frequency analysis: FFT spectrum and peak extraction.
//!
//! Input is zero-padded to the next power of two before the transform, so
//! callers never hit the radix-2 length restriction through
//! [`compute_spectrum`]. [`spectrum_of_padded`] keeps the strict check for
//! callers that prepare buffers themselves.

use super::AnalysisError;
use num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

/// One-sided frequency spectrum of a real-valued signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    /// Frequency bins (Hz), DC through Nyquist
    pub frequencies: Vec<f64>,
    /// sqrt(re² + im²) per bin
    pub magnitudes: Vec<f64>,
    /// atan2(im, re) per bin
    pub phases: Vec<f64>,
    /// Sample rate the signal was captured at
    pub sample_rate: f64,
    /// FFT size after zero-padding
    pub fft_size: usize,
}

impl Spectrum {
    /// Frequency of the strongest non-DC bin, if any.
    pub fn dominant_frequency(&self) -> Option<f64> {
        self.magnitudes
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| self.frequencies[i])
    }
}

/// Compute the spectrum of `samples`, zero-padding to the next power of two.
pub fn compute_spectrum(samples: &[f64], sample_rate: f64) -> Result<Spectrum, AnalysisError> {
    if samples.is_empty() {
        return Err(AnalysisError::InsufficientData {
            needed: 1,
            available: 0,
        });
    }
    if sample_rate <= 0.0 {
        return Err(AnalysisError::InvalidConfiguration(format!(
            "sample rate must be positive, got {sample_rate}"
        )));
    }

    let fft_size = samples.len().next_power_of_two();
    let mut padded = vec![0.0f64; fft_size];
    padded[..samples.len()].copy_from_slice(samples);
    spectrum_of_padded(&padded, sample_rate)
}

/// Compute the spectrum of an already power-of-two-length buffer.
///
/// Fails with `InvalidInputLength` for other lengths; use
/// [`compute_spectrum`] to pad automatically.
pub fn spectrum_of_padded(samples: &[f64], sample_rate: f64) -> Result<Spectrum, AnalysisError> {
    let n = samples.len();
    if n == 0 || !n.is_power_of_two() {
        return Err(AnalysisError::InvalidInputLength(format!(
            "FFT length must be a power of two, got {n}"
        )));
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    let mut buffer: Vec<Complex<f64>> = samples.iter().map(|&x| Complex::new(x, 0.0)).collect();
    fft.process(&mut buffer);

    // One-sided spectrum: DC through Nyquist
    let n_positive = n / 2 + 1;
    let resolution = sample_rate / n as f64;
    let frequencies: Vec<f64> = (0..n_positive).map(|i| i as f64 * resolution).collect();
    let magnitudes: Vec<f64> = buffer[..n_positive].iter().map(|c| c.norm()).collect();
    let phases: Vec<f64> = buffer[..n_positive].iter().map(|c| c.im.atan2(c.re)).collect();

    Ok(Spectrum {
        frequencies,
        magnitudes,
        phases,
        sample_rate,
        fft_size: n,
    })
}

/// Find spectral peaks: local maxima whose magnitude exceeds
/// `threshold × global max`, returned as (frequency, magnitude) sorted by
/// magnitude descending.
pub fn find_peaks(spectrum: &Spectrum, threshold: f64) -> Vec<(f64, f64)> {
    let mags = &spectrum.magnitudes;
    if mags.len() < 3 {
        return Vec::new();
    }
    let global_max = mags.iter().cloned().fold(0.0f64, f64::max);
    if global_max == 0.0 {
        return Vec::new();
    }
    let floor = threshold * global_max;

    let mut peaks: Vec<(f64, f64)> = (1..mags.len() - 1)
        .filter(|&i| mags[i] > mags[i - 1] && mags[i] > mags[i + 1] && mags[i] >= floor)
        .map(|i| (spectrum.frequencies[i], mags[i]))
        .collect();
    peaks.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    peaks
}
