//! Sample sources feeding the engine.
//!
//! A [`SampleSource`] hands samples to the engine loop one at a time and
//! signals end-of-input with `Ok(None)`. Two implementations ship with the
//! binary: a synthetic sinusoid generator for demos and soak runs, and a
//! newline-delimited JSON reader for piping in recorded telemetry.

use crate::types::Sample;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid source configuration: {0}")]
    InvalidConfiguration(String),
}

/// Anything the engine can pull samples from.
#[async_trait]
pub trait SampleSource: Send {
    /// Next sample, or `None` once the source is exhausted.
    async fn next_sample(&mut self) -> Result<Option<Sample>, SourceError>;

    /// Human-readable name for logs.
    fn name(&self) -> &str;
}

/// Sinusoid plus Gaussian noise, emitted on a fixed interval.
pub struct SyntheticSource {
    channel: String,
    frequency_hz: f64,
    amplitude: f64,
    noise: Option<Normal<f64>>,
    interval: Duration,
    rng: StdRng,
    emitted: u64,
    /// Wall-clock epoch of the first sample; later samples are offset from
    /// it so stamped timestamps stay evenly spaced
    start_ms: u64,
    /// Cap on emitted samples; `None` runs forever
    limit: Option<u64>,
}

impl SyntheticSource {
    pub fn new(
        channel: impl Into<String>,
        frequency_hz: f64,
        amplitude: f64,
        noise_sigma: f64,
        interval_ms: u64,
        seed: u64,
    ) -> Result<Self, SourceError> {
        if frequency_hz <= 0.0 || interval_ms == 0 {
            return Err(SourceError::InvalidConfiguration(format!(
                "frequency {frequency_hz} Hz / interval {interval_ms} ms"
            )));
        }
        let noise = if noise_sigma > 0.0 {
            Some(Normal::new(0.0, noise_sigma).map_err(|e| {
                SourceError::InvalidConfiguration(format!("noise sigma {noise_sigma}: {e}"))
            })?)
        } else {
            None
        };
        Ok(Self {
            channel: channel.into(),
            frequency_hz,
            amplitude,
            noise,
            interval: Duration::from_millis(interval_ms),
            rng: StdRng::seed_from_u64(seed),
            emitted: 0,
            start_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
            limit: None,
        })
    }

    /// Stop after `n` samples. Used by tests and bounded demo runs.
    pub fn with_limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    fn value_at(&mut self, t_secs: f64) -> f64 {
        let clean = self.amplitude * (2.0 * std::f64::consts::PI * self.frequency_hz * t_secs).sin();
        match &self.noise {
            Some(dist) => clean + dist.sample(&mut self.rng),
            None => clean,
        }
    }
}

#[async_trait]
impl SampleSource for SyntheticSource {
    async fn next_sample(&mut self) -> Result<Option<Sample>, SourceError> {
        if let Some(limit) = self.limit {
            if self.emitted >= limit {
                return Ok(None);
            }
        }
        if self.emitted > 0 {
            tokio::time::sleep(self.interval).await;
        }
        let offset_ms = self.emitted * self.interval.as_millis() as u64;
        let value = self.value_at(offset_ms as f64 / 1_000.0);
        self.emitted += 1;
        Ok(Some(Sample::new(
            self.start_ms + offset_ms,
            value,
            self.channel.clone(),
        )))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

/// Newline-delimited JSON samples from stdin.
///
/// Malformed lines are logged and skipped; a bad line in a long recording
/// should not kill the run.
pub struct StdinNdjsonSource {
    reader: BufReader<Stdin>,
    line: String,
    skipped: u64,
}

impl StdinNdjsonSource {
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
            line: String::with_capacity(512),
            skipped: 0,
        }
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl Default for StdinNdjsonSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SampleSource for StdinNdjsonSource {
    async fn next_sample(&mut self) -> Result<Option<Sample>, SourceError> {
        loop {
            self.line.clear();
            let n = self.reader.read_line(&mut self.line).await?;
            if n == 0 {
                debug!(skipped = self.skipped, "stdin exhausted");
                return Ok(None);
            }
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Sample>(trimmed) {
                Ok(sample) => return Ok(Some(sample)),
                Err(err) => {
                    self.skipped += 1;
                    warn!(%err, "skipping malformed input line");
                }
            }
        }
    }

    fn name(&self) -> &str {
        "stdin"
    }
}
