//! Engine facade: source, per-channel pipelines, backpressure, analysis.
//!
//! Wires every component together behind one `run` loop. Samples flow
//! source -> pipeline -> backpressure controller -> analyzer; the scheduler
//! drives periodic analysis in the background, and a broadcast channel
//! surfaces lifecycle events to whoever subscribes.

use crate::analyzer::{AnalysisScheduler, CorrelationEngine, TelemetryAnalyzer};
use crate::backpressure::{BackpressureController, SystemLoad};
use crate::compute::{ComputeError, ComputePool};
use crate::config::{EngineConfig, PipelineConfig, SamplingConfig, SourceKind};
use crate::pipeline::{
    AggregateStage, DebounceStage, FeedbackSignal, FilterStage, SamplingStage, SamplingStrategy,
    StreamPipeline, ThrottleStage, ThrottleStrategy, TransformStage,
};
use crate::source::{SampleSource, StdinNdjsonSource, SyntheticSource};
use crate::types::{EngineEvent, Sample};
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type PriorityFn = Arc<dyn Fn(&Sample) -> f64 + Send + Sync>;
type LoadProvider = Box<dyn Fn() -> SystemLoad + Send>;

/// Final counters reported when a run ends.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Samples read from the source
    pub ingested: u64,
    /// Samples that survived the pipeline stages
    pub piped: u64,
    /// Samples handed to the analyzer after shaping
    pub shaped: u64,
    /// Samples the controller shed
    pub dropped: u64,
}

pub struct Engine {
    config: EngineConfig,
    analyzer: Arc<RwLock<TelemetryAnalyzer>>,
    compute: ComputePool,
    events: broadcast::Sender<EngineEvent>,
    feedback: FeedbackSignal,
    cancel: CancellationToken,
    priority_fn: Option<PriorityFn>,
    load_provider: LoadProvider,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, crate::config::ConfigError> {
        config.validate()?;
        let (events, _) = broadcast::channel(256);
        let analyzer = Arc::new(RwLock::new(
            TelemetryAnalyzer::new(config.analyzer.clone()).with_events(events.clone()),
        ));
        let compute = ComputePool::new(&config.compute);
        Ok(Self {
            config,
            analyzer,
            compute,
            events,
            feedback: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
            priority_fn: None,
            load_provider: Box::new(SystemLoad::default),
        })
    }

    /// Priority assigned to samples inside the controller. Defaults to a
    /// flat 1.0 when unset.
    pub fn with_priority_fn(
        mut self,
        f: impl Fn(&Sample) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.priority_fn = Some(Arc::new(f));
        self
    }

    /// Where the adaptive strategy reads CPU / memory / scheduler-delay
    /// figures from. Defaults to an idle load.
    pub fn with_load_provider(mut self, f: impl Fn() -> SystemLoad + Send + 'static) -> Self {
        self.load_provider = Box::new(f);
        self
    }

    /// Receiver for lifecycle events. Each subscriber gets every event
    /// emitted after it subscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Token that stops a running engine when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn analyzer(&self) -> Arc<RwLock<TelemetryAnalyzer>> {
        self.analyzer.clone()
    }

    /// Build the source named in config. Kept separate from `run` so tests
    /// and callers can inject their own source.
    pub fn default_source(&self) -> Result<Box<dyn SampleSource>, crate::source::SourceError> {
        let src = &self.config.source;
        Ok(match src.kind {
            SourceKind::Stdin => Box::new(StdinNdjsonSource::new()),
            SourceKind::Synthetic => Box::new(SyntheticSource::new(
                src.channel.clone(),
                src.frequency_hz,
                src.amplitude,
                src.noise_sigma,
                src.interval_ms,
                self.config.pipeline.seed,
            )?),
        })
    }

    /// Rebuild the full correlation matrix on the compute pool and install
    /// it. Returns the number of matrix entries.
    pub async fn refresh_correlations(&self) -> Result<usize, ComputeError> {
        let (series, engine) = {
            let analyzer = self.analyzer.read().await;
            (
                analyzer.series_snapshot(),
                CorrelationEngine::new(self.config.analyzer.correlation.clone()),
            )
        };
        let matrix = self.compute.run(move || engine.build_matrix(&series)).await?;
        let entries = matrix.len();
        self.analyzer.read().await.install_matrix(matrix);
        Ok(entries)
    }

    /// Run until the source is exhausted or the cancellation token fires.
    pub async fn run(&mut self, source: &mut dyn SampleSource) -> anyhow::Result<EngineStats> {
        let mut controller = BackpressureController::new(self.config.backpressure.clone())
            .with_events(self.events.clone());
        if let Some(f) = &self.priority_fn {
            let f = f.clone();
            controller = controller.with_priority_fn(move |s| f(s));
        }

        let mut scheduler = AnalysisScheduler::new(self.analyzer.clone(), self.compute.clone());
        scheduler.start(self.config.scheduler.interval_ms).await;

        let mut pipelines: HashMap<String, StreamPipeline> = HashMap::new();
        let mut stats = EngineStats::default();
        let mut last_ts = 0u64;

        // An idle source still needs the breaker clock advanced, or an open
        // circuit would only reach half-open on the next sample
        let tick_ms = (self.config.backpressure.circuit.timeout_ms / 4).clamp(10, 1_000);
        let mut breaker_tick = tokio::time::interval(Duration::from_millis(tick_ms));
        breaker_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(source = source.name(), "engine started");
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("shutdown signal received");
                    break;
                }
                _ = breaker_tick.tick() => {
                    controller.tick(now_ms());
                    continue;
                }
                result = source.next_sample() => match result {
                    Ok(next) => next,
                    Err(e) => {
                        warn!(error = %e, "source error, stopping");
                        break;
                    }
                },
            };
            let Some(sample) = next else {
                info!(ingested = stats.ingested, "source exhausted");
                break;
            };

            stats.ingested += 1;
            last_ts = last_ts.max(sample.timestamp_ms);
            let channel = sample.channel.clone();

            if !pipelines.contains_key(&channel) {
                pipelines.insert(
                    channel.clone(),
                    build_pipeline(
                        &channel,
                        &self.config.pipeline,
                        &self.feedback,
                        self.priority_fn.as_ref(),
                    ),
                );
                self.analyzer.write().await.add_stream(&channel);
            }
            let pipeline = pipelines
                .get_mut(&channel)
                .ok_or_else(|| anyhow::anyhow!("pipeline vanished for channel {channel}"))?;

            let processed = pipeline.process(sample).await;
            stats.piped += processed.len() as u64;

            let batch: Vec<Sample> = processed.into_iter().map(|p| p.sample).collect();
            controller.offer_batch(batch, (self.load_provider)(), now_ms());
            self.feedback
                .store(controller.metrics().avg_latency_ms as u64, Ordering::Relaxed);

            let shaped = controller.drain(self.config.backpressure.drain_batch);
            if !shaped.is_empty() {
                let mut analyzer = self.analyzer.write().await;
                for item in shaped {
                    let channel = item.sample.channel.clone();
                    analyzer.append_sample(&channel, item.sample);
                    stats.shaped += 1;
                }
            }
        }

        // Teardown: release held samples, shape them, run one last pass
        for pipeline in pipelines.values_mut() {
            let released: Vec<Sample> =
                pipeline.flush(last_ts).into_iter().map(|p| p.sample).collect();
            stats.piped += released.len() as u64;
            controller.offer_batch(released, (self.load_provider)(), now_ms());
        }
        loop {
            let shaped = controller.drain(self.config.backpressure.drain_batch);
            if shaped.is_empty() {
                break;
            }
            let mut analyzer = self.analyzer.write().await;
            for item in shaped {
                let channel = item.sample.channel.clone();
                analyzer.append_sample(&channel, item.sample);
                stats.shaped += 1;
            }
        }

        scheduler.stop().await;
        let reports = self.analyzer.write().await.analyze_all_streams();

        let metrics = controller.metrics();
        stats.dropped = metrics.dropped_messages;
        controller.shutdown();

        info!(
            ingested = stats.ingested,
            piped = stats.piped,
            shaped = stats.shaped,
            dropped = stats.dropped,
            reports = reports.len(),
            avg_latency_ms = format!("{:.1}", metrics.avg_latency_ms),
            circuit = %metrics.circuit_state,
            "engine stopped"
        );
        Ok(stats)
    }
}

/// Current wall clock in milliseconds since the Unix epoch.
fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Assemble a pipeline from the declarative stage config, in canonical
/// stage order.
fn build_pipeline(
    stream_id: &str,
    config: &PipelineConfig,
    feedback: &FeedbackSignal,
    priority_fn: Option<&PriorityFn>,
) -> StreamPipeline {
    let mut pipeline = StreamPipeline::new(stream_id);

    if config.filter.is_some() || config.anomaly_tagging.is_some() {
        let mut stage = FilterStage::new();
        if let Some(range) = &config.filter {
            let (min, max) = (range.min, range.max);
            stage = stage.with_predicate(move |s| match s.numeric() {
                Some(v) => min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m),
                None => true,
            });
        }
        if let Some(tagging) = &config.anomaly_tagging {
            stage = stage.with_anomaly_tagging(tagging.window, tagging.threshold);
        }
        pipeline = pipeline.add_stage(stage);
    }
    if let Some(throttle) = &config.throttle {
        let strategy = if let Some(every) = throttle.every {
            ThrottleStrategy::CountWindow { every }
        } else if let Some(channel) = &throttle.channel {
            let channel = channel.clone();
            ThrottleStrategy::Selective {
                window_ms: throttle.window_ms,
                selector: Arc::new(move |s: &Sample| s.channel == channel),
            }
        } else if throttle.adaptive {
            ThrottleStrategy::Adaptive {
                base_window_ms: throttle.window_ms,
                feedback: feedback.clone(),
            }
        } else {
            ThrottleStrategy::TimeWindow {
                window_ms: throttle.window_ms,
            }
        };
        pipeline = pipeline.add_stage(ThrottleStage::new(strategy));
    }
    if let Some(debounce) = &config.debounce {
        pipeline = pipeline.add_stage(DebounceStage::new(debounce.mode, debounce.quiet_ms));
    }
    if let Some(sampling) = &config.sampling {
        let strategy = match sampling {
            SamplingConfig::Uniform { keep_probability } => SamplingStrategy::Uniform {
                keep_probability: *keep_probability,
            },
            SamplingConfig::Reservoir { k } => SamplingStrategy::Reservoir { k: *k },
            SamplingConfig::PriorityWeighted => SamplingStrategy::PriorityWeighted {
                priority: priority_fn.cloned().unwrap_or_else(|| Arc::new(|_| 1.0)),
            },
            SamplingConfig::AdaptiveRate {
                medium_rate_hz,
                high_rate_hz,
                medium_fraction,
                high_fraction,
            } => SamplingStrategy::AdaptiveRate {
                medium_rate_hz: *medium_rate_hz,
                high_rate_hz: *high_rate_hz,
                medium_fraction: *medium_fraction,
                high_fraction: *high_fraction,
            },
        };
        pipeline = pipeline.add_stage(SamplingStage::new(strategy, config.seed));
    }
    if let Some(transform) = &config.transform {
        pipeline =
            pipeline.add_stage(TransformStage::new().with_normalization(transform.normalize));
    }
    if let Some(aggregate) = &config.aggregate {
        pipeline = pipeline.add_stage(AggregateStage::new(aggregate.window, aggregate.function));
    }
    pipeline
}
