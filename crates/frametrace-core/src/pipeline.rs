use crate::{
    Config,
    aggregator::{Aggregator, AggregatorStats},
    coordinator::{FlushCoordinator, FlushStats},
    extract::PatternRule,
    report::ReportWriter,
    worker::{ParserWorker, WorkerReport},
};
use eyre::{Result, bail, ensure};
use itertools::Itertools;
use std::{path::PathBuf, sync::Arc};
use tokio::{task::JoinSet, time::Instant};
use tracing::{error, info};

/// One log file and the rules applied to it.
#[derive(Debug, Clone)]
pub struct Source {
    pub path: PathBuf,
    pub rules: Arc<[PatternRule]>,
}

/// The outcome of a successful [Pipeline::run].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Per-source reports in the order the sources were added.
    pub workers: Vec<WorkerReport>,
    pub aggregator: AggregatorStats,
    pub flush: FlushStats,
}

/// Runs one parser worker per source against a shared aggregator and
/// writes the merged report.
#[derive(Debug)]
pub struct Pipeline {
    config: Config,
    writer: ReportWriter,
    sources: Vec<Source>,
}

impl Pipeline {
    pub fn new(config: Config, writer: ReportWriter) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            writer,
            sources: vec![],
        })
    }

    /// Add a log file to parse with the given rules.
    pub fn add_source(
        &mut self,
        path: impl Into<PathBuf>,
        rules: impl IntoIterator<Item = PatternRule>,
    ) -> &mut Self {
        self.sources.push(Source {
            path: path.into(),
            rules: rules.into_iter().collect(),
        });
        self
    }

    /// Parse all sources concurrently. Fails if any worker failed; the
    /// windows collected by the other workers are still written.
    pub async fn run(self) -> Result<RunSummary> {
        let Self {
            config,
            writer,
            sources,
        } = self;
        ensure!(!sources.is_empty(), "At least one source is required");

        let aggregator = Arc::new(Aggregator::new(config.window_ms()));
        let coordinator = Arc::new(FlushCoordinator::new(
            aggregator.clone(),
            writer,
            config.max_batch_size,
        ));
        let deadline = config.deadline.map(|deadline| Instant::now() + deadline);

        info!(
            sources = sources.len(),
            window_ms = config.window_ms(),
            max_batch_size = config.max_batch_size,
            deadline = ?config.deadline,
            "Starting merge"
        );

        // All workers are registered before the first one starts, so the
        // barrier never completes with a party missing.
        let workers: Vec<_> = sources
            .into_iter()
            .map(|source| {
                let worker = ParserWorker::new(source.path, source.rules, aggregator.clone())
                    .with_deadline(deadline);
                (worker, coordinator.register())
            })
            .collect();

        let total = workers.len();
        let mut tasks = JoinSet::new();
        for (index, (worker, active)) in workers.into_iter().enumerate() {
            tasks.spawn(async move { (index, worker.run(active).await) });
        }

        let mut reports = Vec::with_capacity(total);
        let mut failures = vec![];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(report))) => reports.push((index, report)),
                Ok((_, Err(err))) => {
                    let message = format!("{err:#}");
                    error!(error = %message, "Worker failed");
                    failures.push(message);
                }
                Err(err) => {
                    error!(error = %err, "Worker panicked");
                    failures.push(err.to_string());
                }
            }
        }

        coordinator.drain().await?;

        if !failures.is_empty() {
            bail!(
                "{} of {} workers failed: {}",
                failures.len(),
                total,
                failures.iter().join("; ")
            );
        }

        let workers = reports
            .into_iter()
            .sorted_by_key(|(index, _)| *index)
            .map(|(_, report)| report)
            .collect();

        let summary = RunSummary {
            workers,
            aggregator: aggregator.stats(),
            flush: coordinator.stats(),
        };
        info!(
            stored = summary.aggregator.stored,
            overwritten = summary.aggregator.overwritten,
            late = summary.aggregator.late,
            windows = summary.flush.windows_written,
            flushes = summary.flush.flushes,
            "Merge finished"
        );
        Ok(summary)
    }
}
