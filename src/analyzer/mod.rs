//! Stream registry and report generation.
//!
//! A [`TelemetryAnalyzer`] owns one ring buffer per registered stream and
//! turns buffered values into [`AnalysisReport`] snapshots: descriptive
//! statistics, anomaly detection, trend, spectrum, and the cross-stream
//! correlation matrix. Reports are rebuilt wholesale; nothing is patched
//! in place.

pub mod correlation_engine;
pub mod scheduler;

pub use correlation_engine::{CorrelationConfig, CorrelationEngine, CorrelationMatrix};
pub use scheduler::{AnalysisScheduler, SchedulerConfig};

use crate::analysis::anomaly::{detect_anomalies, AnomalyMethod};
use crate::analysis::frequency::{compute_spectrum, find_peaks};
use crate::analysis::stats;
use crate::analysis::trend::analyze_trend;
use crate::types::{
    AnalysisReport, AnomalySummary, CorrelationEntry, EngineEvent, FrequencySummary,
    ReportStatistics, ReportSummary, Sample, TrendSummary,
};
use arc_swap::ArcSwap;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Ring buffer capacity per stream
    pub capacity: usize,
    /// Values required before a report is produced
    pub min_points: usize,
    pub anomaly: AnomalyMethod,
    /// Trailing window for the trend fit
    pub trend_window: usize,
    /// Slope magnitude below which the trend reads as stable
    pub slope_threshold: f64,
    pub forecast_steps: usize,
    /// Spectral peaks below this fraction of the global maximum are dropped
    pub peak_threshold: f64,
    pub correlation: CorrelationConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            min_points: 8,
            anomaly: AnomalyMethod::default(),
            trend_window: 20,
            slope_threshold: 0.01,
            forecast_steps: 5,
            peak_threshold: 0.1,
            correlation: CorrelationConfig::default(),
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("analyzer capacity must be at least 1".into());
        }
        if self.min_points < 4 {
            return Err("analyzer min_points must be at least 4".into());
        }
        if self.trend_window < 2 {
            return Err("trend window must be at least 2".into());
        }
        if !(0.0..=1.0).contains(&self.peak_threshold) {
            return Err("peak threshold must be within [0, 1]".into());
        }
        if self.correlation.min_overlap < 3 {
            return Err("correlation min_overlap must be at least 3".into());
        }
        Ok(())
    }
}

/// One registered stream: a bounded ring of its most recent samples.
struct TelemetryStream {
    buffer: VecDeque<Sample>,
    capacity: usize,
}

impl TelemetryStream {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    fn push(&mut self, sample: Sample) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(sample);
    }

    /// Numeric view of the buffer; record samples contribute their scalar
    /// view, non-numeric ones are skipped.
    fn values(&self) -> Vec<f64> {
        self.buffer.iter().filter_map(|s| s.numeric()).collect()
    }

    fn time_range(&self) -> (u64, u64) {
        let first = self.buffer.front().map(|s| s.timestamp_ms).unwrap_or(0);
        let last = self.buffer.back().map(|s| s.timestamp_ms).unwrap_or(0);
        (first, last)
    }

    /// Sample rate in Hz, estimated from the mean timestamp interval.
    fn sample_rate(&self) -> f64 {
        let (first, last) = self.time_range();
        let spans = self.buffer.len().saturating_sub(1);
        if spans == 0 || last <= first {
            return 1.0;
        }
        let mean_interval_ms = (last - first) as f64 / spans as f64;
        1_000.0 / mean_interval_ms
    }
}

/// Per-stream data cloned out of the registry so a full analysis pass can
/// run off the analyzer lock.
#[derive(Debug, Clone)]
pub struct StreamSnapshot {
    pub stream_id: String,
    pub values: Vec<f64>,
    pub time_range: (u64, u64),
    pub sample_rate: f64,
}

pub struct TelemetryAnalyzer {
    config: AnalyzerConfig,
    streams: HashMap<String, TelemetryStream>,
    correlation: CorrelationEngine,
    /// Latest complete matrix, swapped atomically so readers never observe
    /// a half-built one
    matrix: ArcSwap<CorrelationMatrix>,
    reports: HashMap<String, AnalysisReport>,
    events: Option<broadcast::Sender<EngineEvent>>,
}

impl TelemetryAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        let correlation = CorrelationEngine::new(config.correlation.clone());
        Self {
            config,
            streams: HashMap::new(),
            correlation,
            matrix: ArcSwap::from_pointee(CorrelationMatrix::new()),
            reports: HashMap::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<EngineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn stream_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.streams.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Register a stream. Re-registering an existing id keeps its buffer.
    pub fn add_stream(&mut self, stream_id: &str) {
        let capacity = self.config.capacity;
        self.streams
            .entry(stream_id.to_string())
            .or_insert_with(|| {
                debug!(stream_id, "stream registered");
                TelemetryStream::new(capacity)
            });
    }

    /// Remove a stream, its cached report, and every matrix entry that
    /// mentions it. Returns false if the id was never registered.
    pub fn remove_stream(&mut self, stream_id: &str) -> bool {
        if self.streams.remove(stream_id).is_none() {
            return false;
        }
        self.reports.remove(stream_id);

        let current = self.matrix.load();
        let pruned: CorrelationMatrix = current
            .iter()
            .filter(|((a, b), _)| a != stream_id && b != stream_id)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.matrix.store(Arc::new(pruned));

        info!(stream_id, "stream removed");
        self.emit(EngineEvent::StreamRemoved {
            stream_id: stream_id.to_string(),
        });
        true
    }

    /// Append one sample to a registered stream. Samples for unknown
    /// streams are dropped and reported as such.
    pub fn append_sample(&mut self, stream_id: &str, sample: Sample) -> bool {
        match self.streams.get_mut(stream_id) {
            Some(stream) => {
                stream.push(sample);
                true
            }
            None => {
                debug!(stream_id, "sample for unregistered stream dropped");
                false
            }
        }
    }

    pub fn buffered(&self, stream_id: &str) -> usize {
        self.streams.get(stream_id).map_or(0, |s| s.buffer.len())
    }

    /// Latest cached report for a stream, if an analysis pass has run.
    pub fn latest_report(&self, stream_id: &str) -> Option<&AnalysisReport> {
        self.reports.get(stream_id)
    }

    /// Current correlation matrix snapshot.
    pub fn correlation_matrix(&self) -> Arc<CorrelationMatrix> {
        self.matrix.load_full()
    }

    /// Correlate two registered streams over their recent overlap.
    /// `None` for unknown streams or too little shared data.
    pub fn correlate_streams(&self, a: &str, b: &str) -> Option<CorrelationEntry> {
        let va = self.streams.get(a)?.values();
        let vb = self.streams.get(b)?.values();
        self.correlation.correlate(a, &va, b, &vb)
    }

    /// Rebuild the cross-stream matrix over every unique pair and publish
    /// it atomically.
    pub fn calculate_correlation_matrix(&self) {
        let matrix = self.correlation.build_matrix(&self.series_snapshot());
        self.install_matrix(matrix);
    }

    /// Clone out every stream's numeric values, so a matrix rebuild can run
    /// off the analyzer lock (on a compute pool) and be installed after.
    pub fn series_snapshot(&self) -> Vec<(String, Vec<f64>)> {
        self.streams
            .iter()
            .map(|(id, s)| (id.clone(), s.values()))
            .collect()
    }

    /// Publish an externally built matrix.
    pub fn install_matrix(&self, matrix: CorrelationMatrix) {
        self.matrix.store(Arc::new(matrix));
    }

    /// Clone out every registered stream for an off-lock analysis pass,
    /// sorted by stream id.
    pub fn analysis_snapshot(&self) -> Vec<StreamSnapshot> {
        let mut snapshots: Vec<StreamSnapshot> = self
            .streams
            .iter()
            .map(|(id, stream)| StreamSnapshot {
                stream_id: id.clone(),
                values: stream.values(),
                time_range: stream.time_range(),
                sample_rate: stream.sample_rate(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        snapshots
    }

    /// Cache externally built reports and emit a completion event for each.
    pub fn install_reports(&mut self, reports: Vec<AnalysisReport>) {
        for report in reports {
            let stream_id = report.stream_id.clone();
            self.reports.insert(stream_id.clone(), report);
            self.emit(EngineEvent::AnalysisComplete { stream_id });
        }
    }

    /// Produce a fresh report for one stream, or `None` when it has fewer
    /// than `min_points` numeric values. The report is cached and an
    /// `AnalysisComplete` event is emitted.
    pub fn analyze_stream(&mut self, stream_id: &str) -> Option<AnalysisReport> {
        let stream = self.streams.get(stream_id)?;
        let snapshot = StreamSnapshot {
            stream_id: stream_id.to_string(),
            values: stream.values(),
            time_range: stream.time_range(),
            sample_rate: stream.sample_rate(),
        };
        if snapshot.values.len() < self.config.min_points {
            debug!(
                stream_id,
                available = snapshot.values.len(),
                needed = self.config.min_points,
                "not enough data to analyze"
            );
            return None;
        }

        let matrix = self.matrix.load();
        let report = build_report(&self.config, &snapshot, &matrix)?;
        self.reports.insert(stream_id.to_string(), report.clone());
        self.emit(EngineEvent::AnalysisComplete {
            stream_id: stream_id.to_string(),
        });
        Some(report)
    }

    /// Rebuild the matrix, then every per-stream report.
    pub fn analyze_all_streams(&mut self) -> Vec<AnalysisReport> {
        self.calculate_correlation_matrix();
        let mut reports = Vec::new();
        for id in self.stream_ids() {
            if let Some(report) = self.analyze_stream(&id) {
                reports.push(report);
            }
        }
        reports
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Build one stream's report from a snapshot and a finished matrix. Pure
/// with respect to the analyzer, so it can run on a compute pool while
/// ingestion keeps the lock.
pub(crate) fn build_report(
    config: &AnalyzerConfig,
    snapshot: &StreamSnapshot,
    matrix: &CorrelationMatrix,
) -> Option<AnalysisReport> {
    let stream_id = snapshot.stream_id.as_str();
    let values = snapshot.values.as_slice();
    if values.len() < config.min_points {
        return None;
    }

    let mean = stats::mean(values).ok()?;
    let median = stats::median(values).ok()?;
    let std = stats::std_dev(values).ok()?;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let anomalies = match detect_anomalies(values, &config.anomaly) {
        Ok(result) => AnomalySummary {
            count: result.indices.len(),
            percentage: result.indices.len() as f64 / values.len() as f64 * 100.0,
            method: result.method,
            indices: result.indices,
            values: result.values,
        },
        Err(err) => {
            debug!(stream_id, %err, "anomaly detection skipped");
            AnomalySummary {
                count: 0,
                percentage: 0.0,
                method: config.anomaly.name().to_string(),
                indices: Vec::new(),
                values: Vec::new(),
            }
        }
    };

    let trend = analyze_trend(
        values,
        config.trend_window,
        config.slope_threshold,
        config.forecast_steps,
    )
    .ok()?;

    let frequency = match compute_spectrum(values, snapshot.sample_rate) {
        Ok(spectrum) => FrequencySummary {
            dominant_frequency: spectrum.dominant_frequency(),
            peaks: find_peaks(&spectrum, config.peak_threshold),
        },
        Err(err) => {
            debug!(stream_id, %err, "spectrum skipped");
            FrequencySummary {
                dominant_frequency: None,
                peaks: Vec::new(),
            }
        }
    };

    let correlations: Vec<CorrelationEntry> = matrix
        .values()
        .filter(|e| e.stream_a == stream_id || e.stream_b == stream_id)
        .cloned()
        .collect();

    Some(AnalysisReport {
        stream_id: stream_id.to_string(),
        summary: ReportSummary {
            data_points: values.len(),
            time_range: snapshot.time_range,
            statistics: ReportStatistics {
                mean,
                median,
                std,
                min,
                max,
            },
        },
        anomalies,
        trends: TrendSummary {
            direction: trend.direction.to_string(),
            strength: trend.fit.r_squared,
            predictions: trend.predictions,
        },
        frequency,
        correlations: if correlations.is_empty() {
            None
        } else {
            Some(correlations)
        },
        generated_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleValue;

    fn analyzer() -> TelemetryAnalyzer {
        TelemetryAnalyzer::new(AnalyzerConfig::default())
    }

    fn feed(analyzer: &mut TelemetryAnalyzer, id: &str, values: &[f64]) {
        analyzer.add_stream(id);
        for (i, &v) in values.iter().enumerate() {
            analyzer.append_sample(id, Sample::new(i as u64 * 100, v, id));
        }
    }

    #[test]
    fn unknown_stream_sample_is_dropped() {
        let mut a = analyzer();
        assert!(!a.append_sample("nope", Sample::new(0, 1.0, "nope")));
        assert!(a.analyze_stream("nope").is_none());
    }

    #[test]
    fn too_few_points_yields_no_report() {
        let mut a = analyzer();
        feed(&mut a, "s", &[1.0, 2.0, 3.0]);
        assert!(a.analyze_stream("s").is_none());
    }

    #[test]
    fn report_covers_every_section() {
        let mut a = analyzer();
        let values: Vec<f64> = (0..64)
            .map(|i| (i as f64 * 0.4).sin() * 5.0 + i as f64 * 0.1)
            .collect();
        feed(&mut a, "s", &values);
        let report = a.analyze_stream("s").unwrap();
        assert_eq!(report.summary.data_points, 64);
        assert_eq!(report.summary.time_range, (0, 6_300));
        assert!(report.summary.statistics.max > report.summary.statistics.min);
        assert_eq!(report.anomalies.method, "z-score");
        assert!(report.frequency.dominant_frequency.is_some());
        assert!(a.latest_report("s").is_some());
    }

    #[test]
    fn ring_buffer_keeps_most_recent() {
        let mut a = TelemetryAnalyzer::new(AnalyzerConfig {
            capacity: 10,
            ..AnalyzerConfig::default()
        });
        feed(&mut a, "s", &(0..25).map(|i| i as f64).collect::<Vec<_>>());
        assert_eq!(a.buffered("s"), 10);
        let report = a.analyze_stream("s").unwrap();
        assert_eq!(report.summary.statistics.min, 15.0);
        assert_eq!(report.summary.statistics.max, 24.0);
    }

    #[test]
    fn non_numeric_samples_are_skipped() {
        let mut a = analyzer();
        a.add_stream("s");
        for i in 0..12u64 {
            a.append_sample("s", Sample::new(i * 100, i as f64, "s"));
        }
        let mut record = std::collections::BTreeMap::new();
        record.insert("other".to_string(), f64::NAN);
        a.append_sample(
            "s",
            Sample {
                timestamp_ms: 1_300,
                value: SampleValue::Record(record),
                channel: "s".to_string(),
                quality: Some(crate::types::Quality::Suspect),
                metadata: None,
            },
        );
        // 12 numeric values plus the record's scalar view
        assert_eq!(a.analyze_stream("s").unwrap().summary.data_points, 13);
    }

    #[test]
    fn matrix_rebuild_and_prune_on_removal() {
        let mut a = analyzer();
        let base: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let scaled: Vec<f64> = base.iter().map(|v| v * 3.0).collect();
        feed(&mut a, "s1", &base);
        feed(&mut a, "s2", &scaled);
        a.calculate_correlation_matrix();
        assert_eq!(a.correlation_matrix().len(), 1);

        let report = a.analyze_stream("s1").unwrap();
        let entries = report.correlations.unwrap();
        assert_eq!(entries.len(), 1);
        assert!((entries[0].pearson - 1.0).abs() < 1e-9);

        assert!(a.remove_stream("s2"));
        assert!(a.correlation_matrix().is_empty());
        assert!(a.latest_report("s2").is_none());
        assert!(!a.remove_stream("s2"));
    }

    #[test]
    fn correlate_streams_is_symmetric() {
        let mut a = analyzer();
        feed(&mut a, "s1", &(0..20).map(|i| i as f64).collect::<Vec<_>>());
        feed(
            &mut a,
            "s2",
            &(0..20).map(|i| 20.0 - i as f64).collect::<Vec<_>>(),
        );
        let ab = a.correlate_streams("s1", "s2").unwrap();
        let ba = a.correlate_streams("s2", "s1").unwrap();
        assert_eq!(ab.stream_a, "s1");
        assert_eq!(ba.stream_a, "s1");
        assert!((ab.pearson + 1.0).abs() < 1e-9);
        assert!((ab.pearson - ba.pearson).abs() < 1e-12);
    }

    #[test]
    fn analyze_all_covers_registered_streams() {
        let mut a = analyzer();
        feed(&mut a, "s1", &(0..30).map(|i| i as f64).collect::<Vec<_>>());
        feed(
            &mut a,
            "s2",
            &(0..30).map(|i| (i as f64).cos()).collect::<Vec<_>>(),
        );
        a.add_stream("empty");
        let reports = a.analyze_all_streams();
        assert_eq!(reports.len(), 2);
        let ids: Vec<&str> = reports.iter().map(|r| r.stream_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
    }

    #[test]
    fn events_emitted_on_analysis_and_removal() {
        let (tx, mut rx) = broadcast::channel(16);
        let mut a = analyzer().with_events(tx);
        feed(&mut a, "s", &(0..20).map(|i| i as f64).collect::<Vec<_>>());
        a.analyze_stream("s");
        a.remove_stream("s");
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::AnalysisComplete { .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::StreamRemoved { .. }
        ));
    }
}
