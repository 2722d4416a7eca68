use crate::{
    aggregator::{Aggregator, Insert},
    coordinator::ActiveWorker,
    extract::{PatternRule, extract_all},
};
use eyre::{Result, WrapErr};
use std::{path::PathBuf, sync::Arc};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
    time::{Instant, timeout_at},
};
use tracing::{debug, info, warn};

/// What a worker did with its file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub path: PathBuf,
    pub lines: u64,
    pub matched: u64,
    pub overwritten: u64,
    pub late: u64,
    /// The deadline expired before the end of the file.
    pub timed_out: bool,
}

/// Streams one log file into the aggregator.
#[derive(Debug, Clone)]
pub struct ParserWorker {
    path: PathBuf,
    rules: Arc<[PatternRule]>,
    aggregator: Arc<Aggregator>,
    deadline: Option<Instant>,
}

impl ParserWorker {
    pub fn new(
        path: impl Into<PathBuf>,
        rules: Arc<[PatternRule]>,
        aggregator: Arc<Aggregator>,
    ) -> Self {
        Self {
            path: path.into(),
            rules,
            aggregator,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Parse the whole file. The worker leaves the barrier on every
    /// exit path before an error is returned.
    ///
    /// The deadline is only checked between lines, so a flush in
    /// progress is never interrupted.
    pub async fn run(self, mut active: ActiveWorker) -> Result<WorkerReport> {
        info!(
            path = %self.path.display(),
            worker = active.id(),
            rules = self.rules.len(),
            "parsing"
        );

        let mut report = WorkerReport {
            path: self.path.clone(),
            ..WorkerReport::default()
        };

        let streamed = self.stream(&mut active, &mut report).await;

        let flushed = match &streamed {
            Ok(()) => active.flush_forced().await,
            Err(_) => Ok(()),
        };
        let finished = active.finish().await;

        streamed
            .and(flushed)
            .and(finished)
            .wrap_err_with(|| format!("Worker for {} failed", self.path.display()))?;

        if report.late > 0 {
            warn!(
                path = %self.path.display(),
                late = report.late,
                "events arrived after their window was flushed and were dropped"
            );
        }
        if report.overwritten > 0 {
            warn!(
                path = %self.path.display(),
                overwritten = report.overwritten,
                "events replaced an earlier event of the same bucket and timestamp"
            );
        }
        info!(
            path = %self.path.display(),
            lines = report.lines,
            matched = report.matched,
            "finished parsing"
        );

        Ok(report)
    }

    async fn stream(&self, active: &mut ActiveWorker, report: &mut WorkerReport) -> Result<()> {
        let file = File::open(&self.path)
            .await
            .wrap_err_with(|| format!("Failed to open {}", self.path.display()))?;
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let Some(read) = self.read_line(&mut reader, &mut buf).await? else {
                warn!(
                    path = %self.path.display(),
                    lines = report.lines,
                    "deadline expired, stop parsing"
                );
                report.timed_out = true;
                break;
            };
            if read == 0 {
                break;
            }
            report.lines += 1;

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);

            for event in extract_all(line, &self.rules) {
                report.matched += 1;
                let timestamp = event.timestamp;

                match self.aggregator.insert(timestamp, event.bucket, event.payload) {
                    Insert::Stored => {}
                    Insert::Overwrote => report.overwritten += 1,
                    Insert::Late => report.late += 1,
                }
                active.check_and_flush(timestamp).await?;
            }
        }

        debug!(path = %self.path.display(), lines = report.lines, "reached end of file");
        Ok(())
    }

    /// Read the next line into `buf`. Returns `None` once the deadline
    /// has passed.
    async fn read_line(
        &self,
        reader: &mut BufReader<File>,
        buf: &mut Vec<u8>,
    ) -> Result<Option<usize>> {
        let read = match self.deadline {
            Some(deadline) if Instant::now() >= deadline => return Ok(None),
            Some(deadline) => match timeout_at(deadline, reader.read_until(b'\n', buf)).await {
                Ok(read) => read,
                Err(_) => return Ok(None),
            },
            None => reader.read_until(b'\n', buf).await,
        };
        let read = read.wrap_err_with(|| format!("Failed to read {}", self.path.display()))?;
        Ok(Some(read))
    }
}
