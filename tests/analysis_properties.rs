//! Cross-cutting analysis behavior exercised through the public API.

use pulsegate::analysis::anomaly::{detect_anomalies, AnomalyMethod};
use pulsegate::analysis::correlation::{cross_correlation, p_value_for_r, pearson, spearman};
use pulsegate::analysis::frequency::{compute_spectrum, find_peaks};
use pulsegate::analysis::stats;
use pulsegate::analysis::trend::{analyze_trend, linear_regression, TrendDirection};
use pulsegate::analysis::AnalysisError;

const TOL: f64 = 1e-9;

#[test]
fn descriptive_statistics_match_textbook_values() {
    let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
    assert!((stats::mean(&data).unwrap() - 5.0).abs() < TOL);
    assert!((stats::std_dev(&data).unwrap() - 2.0).abs() < TOL);
    assert!((stats::median(&data).unwrap() - 4.5).abs() < TOL);
    assert_eq!(stats::mode(&data).unwrap(), vec![4.0]);
}

#[test]
fn percentile_interpolates_between_ranks() {
    let data = [10.0, 20.0, 30.0, 40.0];
    assert!((stats::percentile(&data, 0.0).unwrap() - 10.0).abs() < TOL);
    assert!((stats::percentile(&data, 50.0).unwrap() - 25.0).abs() < TOL);
    assert!((stats::percentile(&data, 100.0).unwrap() - 40.0).abs() < TOL);
    // 25th percentile sits a quarter of the way into the second gap
    assert!((stats::percentile(&data, 25.0).unwrap() - 17.5).abs() < TOL);
}

#[test]
fn insufficient_data_errors_carry_counts() {
    match stats::variance(&[1.0]) {
        Err(AnalysisError::InsufficientData { needed, available }) => {
            assert_eq!(needed, 2);
            assert_eq!(available, 1);
        }
        other => panic!("expected insufficient data, got {other:?}"),
    }
    assert!(stats::skewness(&[1.0, 2.0, 3.0]).is_err());
    assert!(stats::kurtosis(&[1.0, 2.0, 3.0]).is_err());
}

#[test]
fn gross_outlier_is_flagged_by_every_method() {
    let mut data: Vec<f64> = (0..60).map(|i| 10.0 + ((i % 7) as f64) * 0.1).collect();
    data[30] = 500.0;

    for method in [
        AnomalyMethod::ZScore { threshold: 3.0 },
        AnomalyMethod::Iqr { fence: 1.5 },
        AnomalyMethod::MovingAverage {
            window: 10,
            threshold: 3.0,
        },
        AnomalyMethod::IsolationForest {
            trees: 50,
            subsample: 32,
            contamination: 0.05,
            seed: 11,
        },
    ] {
        let result = detect_anomalies(&data, &method).unwrap();
        assert!(
            result.indices.contains(&30),
            "{} missed the outlier",
            method.name()
        );
    }
}

#[test]
fn isolation_forest_is_deterministic_per_seed() {
    let data: Vec<f64> = (0..100).map(|i| ((i * 37) % 50) as f64).collect();
    let method = |seed| AnomalyMethod::IsolationForest {
        trees: 30,
        subsample: 25,
        contamination: 0.1,
        seed,
    };
    let a = detect_anomalies(&data, &method(5)).unwrap();
    let b = detect_anomalies(&data, &method(5)).unwrap();
    assert_eq!(a.indices, b.indices);
}

#[test]
fn trend_direction_thresholds() {
    let rising: Vec<f64> = (0..30).map(|i| i as f64 * 0.5).collect();
    let flat: Vec<f64> = (0..30).map(|i| 5.0 + ((i % 2) as f64) * 0.001).collect();
    let falling: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();

    let up = analyze_trend(&rising, 30, 0.01, 3).unwrap();
    assert_eq!(up.direction, TrendDirection::Increasing);
    // Perfect line: forecast continues it exactly
    assert!((up.predictions[0] - 15.0).abs() < TOL);
    assert!((up.fit.r_squared - 1.0).abs() < TOL);

    assert_eq!(
        analyze_trend(&flat, 30, 0.01, 3).unwrap().direction,
        TrendDirection::Stable
    );
    assert_eq!(
        analyze_trend(&falling, 30, 0.01, 3).unwrap().direction,
        TrendDirection::Decreasing
    );
}

#[test]
fn regression_on_noiseless_line_recovers_parameters() {
    let data: Vec<f64> = (0..50).map(|i| 3.0 * i as f64 + 7.0).collect();
    let fit = linear_regression(&data).unwrap();
    assert!((fit.slope - 3.0).abs() < TOL);
    assert!((fit.intercept - 7.0).abs() < TOL);
}

#[test]
fn spectrum_places_tone_in_the_right_bin() {
    // 8 Hz tone sampled at 256 Hz for one second
    let n = 256;
    let sample_rate = 256.0;
    let data: Vec<f64> = (0..n)
        .map(|i| (2.0 * std::f64::consts::PI * 8.0 * i as f64 / sample_rate).sin())
        .collect();
    let spectrum = compute_spectrum(&data, sample_rate).unwrap();
    let dominant = spectrum.dominant_frequency().unwrap();
    assert!((dominant - 8.0).abs() < sample_rate / n as f64 + TOL);

    let peaks = find_peaks(&spectrum, 0.5);
    assert!(!peaks.is_empty());
    assert!((peaks[0].0 - 8.0).abs() < sample_rate / n as f64 + TOL);
}

#[test]
fn non_power_of_two_input_is_zero_padded() {
    let data: Vec<f64> = (0..700)
        .map(|i| (2.0 * std::f64::consts::PI * 0.05 * i as f64).sin())
        .collect();
    let spectrum = compute_spectrum(&data, 100.0).unwrap();
    assert_eq!(spectrum.fft_size, 1024);
    assert_eq!(spectrum.frequencies.len(), 513);
}

#[test]
fn correlation_coefficients_and_p_values() {
    let x: Vec<f64> = (0..40).map(|i| i as f64).collect();
    let y: Vec<f64> = x.iter().map(|v| -2.0 * v + 3.0).collect();
    assert!((pearson(&x, &y).unwrap() + 1.0).abs() < TOL);
    assert!((spearman(&x, &y).unwrap() + 1.0).abs() < TOL);
    // Perfect correlation: vanishing p-value
    assert!(p_value_for_r(-1.0, 40) < 1e-12);
    // No correlation on a tiny sample: p near 1
    assert!(p_value_for_r(0.01, 5) > 0.9);
}

#[test]
fn cross_correlation_recovers_a_known_shift() {
    let base: Vec<f64> = (0..120).map(|i| (i as f64 * 0.3).sin()).collect();
    let shifted: Vec<f64> = (0..120).map(|i| ((i as f64 - 4.0) * 0.3).sin()).collect();
    let result = cross_correlation(&base, &shifted, 10, 0.3).unwrap();
    assert_eq!(result.max_lag, 4);
    assert!(result.max_correlation > 0.95);
    assert!(result.significant_lags.len() <= 10);
    // Strongest significant lag is the true shift
    assert_eq!(result.significant_lags[0].0, 4);
}

#[test]
fn constant_series_correlate_to_zero() {
    let flat = [5.0; 20];
    let line: Vec<f64> = (0..20).map(|i| i as f64).collect();
    assert_eq!(pearson(&flat, &line).unwrap(), 0.0);
}
