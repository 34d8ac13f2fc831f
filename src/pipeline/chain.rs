//! The pipeline chain: an explicit ordered list of stages plus the async
//! enrichment seam.

use super::Stage;
use crate::types::{ProcessedSample, Sample, StageTag};
use futures::future::BoxFuture;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::warn;

/// Asynchronous enrichment hook. Returning `Err` (or panicking inside the
/// future) passes the sample through unmodified; enrichment failures must
/// never drop data.
pub type EnrichFn =
    Arc<dyn Fn(Sample) -> BoxFuture<'static, anyhow::Result<Sample>> + Send + Sync>;

/// Ordered stage chain for one stream.
///
/// Samples are driven through the stages one at a time in arrival order;
/// the optional enrichment hook is awaited inline after the stages, so the
/// output order always matches the input order.
pub struct StreamPipeline {
    stream_id: String,
    stages: Vec<Box<dyn Stage>>,
    enrich: Option<EnrichFn>,
}

impl StreamPipeline {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            stages: Vec::new(),
            enrich: None,
        }
    }

    /// Append a stage. Stages run in insertion order.
    pub fn add_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Attach an asynchronous enrichment hook, applied after the stages.
    pub fn with_enrichment(mut self, enrich: EnrichFn) -> Self {
        self.enrich = Some(enrich);
        self
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Drive one raw sample through the chain.
    pub async fn process(&mut self, sample: Sample) -> Vec<ProcessedSample> {
        let now_ms = sample.timestamp_ms;
        let mut batch = vec![ProcessedSample::new(sample)];

        for stage in self.stages.iter_mut() {
            batch = Self::run_stage(&self.stream_id, stage.as_mut(), batch, now_ms);
            if batch.is_empty() {
                return batch;
            }
        }

        if let Some(enrich) = &self.enrich {
            batch = Self::run_enrichment(&self.stream_id, enrich, batch).await;
        }
        batch
    }

    /// Release everything held in open windows, pending debounces, and
    /// reservoirs. Call on stream teardown; idempotent.
    pub fn flush(&mut self, now_ms: u64) -> Vec<ProcessedSample> {
        let mut out = Vec::new();
        for i in 0..self.stages.len() {
            let tag = self.stages[i].tag();
            let mut released = self.stages[i].flush(now_ms);
            for s in released.iter_mut() {
                s.touch(tag);
            }
            // A flushed sample still traverses the downstream stages
            for j in i + 1..self.stages.len() {
                let downstream_tag = self.stages[j].tag();
                let mut next = Vec::new();
                for sample in released {
                    for mut s in self.stages[j].process(sample, now_ms) {
                        s.touch(downstream_tag);
                        next.push(s);
                    }
                }
                released = next;
            }
            out.extend(released);
        }
        out
    }

    /// Run one stage over a batch, catching per-sample failures at the
    /// stage boundary: a failing sample passes through unmodified.
    fn run_stage(
        stream_id: &str,
        stage: &mut dyn Stage,
        batch: Vec<ProcessedSample>,
        now_ms: u64,
    ) -> Vec<ProcessedSample> {
        let tag = stage.tag();
        let mut out = Vec::new();
        for sample in batch {
            let fallback = sample.clone();
            match std::panic::catch_unwind(AssertUnwindSafe(|| stage.process(sample, now_ms))) {
                Ok(produced) => {
                    for mut s in produced {
                        s.touch(tag);
                        out.push(s);
                    }
                }
                Err(_) => {
                    warn!(
                        stream = stream_id,
                        stage = %tag,
                        "stage failed on sample, passing through unmodified"
                    );
                    out.push(fallback);
                }
            }
        }
        out
    }

    async fn run_enrichment(
        stream_id: &str,
        enrich: &EnrichFn,
        batch: Vec<ProcessedSample>,
    ) -> Vec<ProcessedSample> {
        let mut out = Vec::with_capacity(batch.len());
        for mut sample in batch {
            // One at a time, in order; enrichment must never reorder.
            match enrich(sample.sample.clone()).await {
                Ok(enriched) => {
                    sample.sample = enriched;
                    sample.touch(StageTag::Transform);
                }
                Err(e) => {
                    warn!(
                        stream = stream_id,
                        error = %e,
                        "enrichment failed, passing sample through unmodified"
                    );
                }
            }
            out.push(sample);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{
        AggregateFn, AggregateStage, DebounceMode, DebounceStage, FilterStage, ThrottleStage,
        ThrottleStrategy, WindowKind,
    };
    use futures::FutureExt;

    fn sample(ts: u64, v: f64) -> Sample {
        Sample::new(ts, v, "ch")
    }

    #[tokio::test]
    async fn stages_run_in_order_and_leave_a_trail() {
        let mut pipeline = StreamPipeline::new("s1")
            .add_stage(FilterStage::new().with_predicate(|s| s.numeric().unwrap_or(0.0) >= 0.0))
            .add_stage(ThrottleStage::new(ThrottleStrategy::CountWindow { every: 1 }));

        let out = pipeline.process(sample(0, 1.0)).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].stage_trail, vec![StageTag::Filter, StageTag::Throttle]);
    }

    #[tokio::test]
    async fn dropped_samples_do_not_reach_later_stages() {
        let mut pipeline = StreamPipeline::new("s1")
            .add_stage(FilterStage::new().with_predicate(|_| false))
            .add_stage(AggregateStage::new(
                WindowKind::Sliding { width_ms: 1000 },
                AggregateFn::Count,
            ));
        assert!(pipeline.process(sample(0, 1.0)).await.is_empty());
        // Aggregate saw nothing
        assert!(pipeline.flush(100).is_empty());
    }

    #[tokio::test]
    async fn enrichment_failure_passes_sample_through() {
        let enrich: EnrichFn = Arc::new(|s: Sample| {
            async move {
                if s.numeric() == Some(13.0) {
                    anyhow::bail!("unlucky");
                }
                Ok(s.with_metadata("enriched", "yes"))
            }
            .boxed()
        });
        let mut pipeline = StreamPipeline::new("s1").with_enrichment(enrich);

        let ok = pipeline.process(sample(0, 1.0)).await;
        assert!(ok[0].sample.metadata.is_some());

        let failed = pipeline.process(sample(1, 13.0)).await;
        assert_eq!(failed.len(), 1, "failed enrichment must not drop");
        assert!(failed[0].sample.metadata.is_none());
        assert_eq!(failed[0].sample.numeric(), Some(13.0));
    }

    #[tokio::test]
    async fn enrichment_preserves_arrival_order() {
        let enrich: EnrichFn = Arc::new(|s: Sample| {
            async move {
                // Later samples "respond" faster; order must still hold
                let delay = 10u64.saturating_sub(s.timestamp_ms);
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                Ok(s)
            }
            .boxed()
        });
        let mut pipeline = StreamPipeline::new("s1").with_enrichment(enrich);

        let mut seen = Vec::new();
        for ts in 0..5 {
            for s in pipeline.process(sample(ts, ts as f64)).await {
                seen.push(s.sample.timestamp_ms);
            }
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn panicking_stage_passes_sample_through() {
        struct Exploding;
        impl Stage for Exploding {
            fn tag(&self) -> StageTag {
                StageTag::Transform
            }
            fn process(&mut self, _s: ProcessedSample, _now: u64) -> Vec<ProcessedSample> {
                panic!("boom")
            }
        }
        let mut pipeline = StreamPipeline::new("s1").add_stage(Exploding);
        let out = pipeline.process(sample(0, 7.0)).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sample.numeric(), Some(7.0));
    }

    #[tokio::test]
    async fn flush_releases_held_samples_through_downstream() {
        let mut pipeline = StreamPipeline::new("s1")
            .add_stage(DebounceStage::new(DebounceMode::Trailing, 100))
            .add_stage(AggregateStage::new(
                WindowKind::Tumbling { width_ms: 10_000 },
                AggregateFn::Count,
            ));
        assert!(pipeline.process(sample(0, 1.0)).await.is_empty());
        let out = pipeline.flush(200);
        // Debounce released its pending sample, which the aggregate counted
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sample.numeric(), Some(1.0));
    }
}
