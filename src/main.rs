//! Pulsegate binary: run the telemetry engine against a sample source.
//!
//! # Usage
//!
//! ```bash
//! # Synthetic sinusoid source (default)
//! cargo run --release
//!
//! # Replay recorded telemetry piped in as NDJSON
//! cat recording.ndjson | pulsegate --stdin
//!
//! # Bounded demo run with a config file
//! PULSEGATE_CONFIG=demo.toml pulsegate --limit 1000
//! ```
//!
//! # Environment Variables
//!
//! - `PULSEGATE_CONFIG`: path to a TOML config file
//! - `RUST_LOG`: logging filter (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use pulsegate::config::{EngineConfig, SourceKind};
use pulsegate::{Engine, SampleSource, SyntheticSource};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pulsegate")]
#[command(about = "Streaming telemetry backpressure and analysis engine")]
#[command(version)]
struct CliArgs {
    /// Read NDJSON samples from stdin instead of the synthetic source
    #[arg(long)]
    stdin: bool,

    /// Path to a TOML config file (overrides PULSEGATE_CONFIG)
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    /// Stop the synthetic source after this many samples (0 = unbounded)
    #[arg(long, default_value = "0")]
    limit: u64,

    /// Print the effective config as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from_file(std::path::Path::new(path))
            .with_context(|| format!("loading config from {path}"))?,
        None => EngineConfig::load(),
    };
    if args.stdin {
        config.source.kind = SourceKind::Stdin;
    }

    if args.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let mut engine = Engine::new(config.clone())?;

    // Ctrl-C triggers a clean drain-and-report shutdown
    let cancel = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            cancel.cancel();
        }
    });

    let mut source: Box<dyn SampleSource> =
        if args.limit > 0 && config.source.kind == SourceKind::Synthetic {
            let src = SyntheticSource::new(
                config.source.channel.clone(),
                config.source.frequency_hz,
                config.source.amplitude,
                config.source.noise_sigma,
                config.source.interval_ms,
                config.pipeline.seed,
            )?;
            Box::new(src.with_limit(args.limit))
        } else {
            engine.default_source()?
        };

    let stats = engine.run(source.as_mut()).await?;
    info!(
        ingested = stats.ingested,
        shaped = stats.shaped,
        dropped = stats.dropped,
        "run complete"
    );
    Ok(())
}
