//! frametrace entry point.

use clap::Parser;
use eyre::{Result, WrapErr};
use frametrace::{Config, FrameTracer};
use std::{path::PathBuf, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Merge the consumer, producer and daemon logs of a media session into
/// one frame trace.
#[derive(Debug, Parser)]
#[command(name = "frametrace", version, about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Write the report here instead of the configured output.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Span of one report window, e.g. `20ms`.
    #[arg(long, value_parser = parse_duration)]
    window_size: Option<Duration>,

    /// Number of windows held before a flush is attempted.
    #[arg(long)]
    max_batch_size: Option<usize>,

    /// Stop reading the logs after this long, e.g. `10m`.
    #[arg(long, value_parser = parse_duration)]
    deadline: Option<Duration>,

    /// Logging filter (trace, debug, info, warn, error). Defaults to
    /// `RUST_LOG`, then `info`.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Apply the command line overrides to the loaded configuration.
    fn apply(&self, mut config: Config) -> Result<Config> {
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if let Some(window_size) = self.window_size {
            config.merge.window_size = window_size;
        }
        if let Some(max_batch_size) = self.max_batch_size {
            config.merge.max_batch_size = max_batch_size;
        }
        if let Some(deadline) = self.deadline {
            config.merge.deadline = Some(deadline);
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_duration(text: &str) -> Result<Duration, humantime_serde::re::humantime::DurationError> {
    humantime_serde::re::humantime::parse_duration(text)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level)
            .wrap_err_with(|| format!("Invalid log level: {level}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(config = %cli.config.display(), "Loading configuration");
    let config = cli.apply(Config::load(&cli.config)?)?;

    info!(
        output = %config.output.display(),
        window_size = ?config.merge.window_size,
        max_batch_size = config.merge.max_batch_size,
        deadline = ?config.merge.deadline,
        "Configuration loaded"
    );

    let tracer = FrameTracer::new(config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("Failed to create tokio runtime")?;

    let summary = runtime.block_on(tracer.run())?;

    for worker in &summary.workers {
        info!(
            path = %worker.path.display(),
            lines = worker.lines,
            matched = worker.matched,
            late = worker.late,
            overwritten = worker.overwritten,
            timed_out = worker.timed_out,
            "Source summary"
        );
    }
    info!(
        windows = summary.flush.windows_written,
        events = summary.aggregator.stored,
        "Frame trace written"
    );

    Ok(())
}
