//! FrameTracer implementation.

use crate::{calibration::read_ntp_delay, config::Config, rules::MediaRules};
use eyre::{Result, WrapErr, bail};
use frametrace_core::{ClockAligner, ClockAlignment, PatternRule, Pipeline, ReportWriter, RunSummary};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Merges the logs of one media session into a frame trace.
///
/// Creating the tracer aligns the producer clock with the consumer
/// clock; running it parses every configured log and writes the
/// report.
#[derive(Debug)]
pub struct FrameTracer {
    config: Config,
    alignment: ClockAlignment,
}

impl FrameTracer {
    /// Read the calibration inputs and align the clocks.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let calibration = &config.calibration;
        let producer_delay = calibration.producer_ntp.as_deref().map_or(0.0, read_ntp_delay);
        let consumer_delay = calibration.consumer_ntp.as_deref().map_or(0.0, read_ntp_delay);

        let aligner = match &calibration.pattern {
            Some(pattern) => ClockAligner::with_pattern(pattern)?,
            None => ClockAligner::default(),
        };
        let alignment = aligner
            .align(
                &config.sources.producer_log,
                &config.sources.consumer_log,
                producer_delay,
                consumer_delay,
            )
            .wrap_err("Failed to align producer and consumer clocks")?;

        Ok(Self { config, alignment })
    }

    pub fn alignment(&self) -> &ClockAlignment {
        &self.alignment
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The rules applied to each log, keyed by the log's config name in
    /// the order the workers are started.
    pub fn source_rules(&self) -> Result<IndexMap<&'static str, (PathBuf, Vec<PatternRule>)>> {
        let rules = MediaRules::new(self.alignment);
        let mut table = IndexMap::new();

        for (name, path) in self.config.sources.logs() {
            let source_rules = match name {
                "consumer_log" => rules.consumer()?,
                "producer_log" => rules.producer()?,
                "local_daemon_log" => {
                    self.warn_unaligned(name, path, self.alignment.consumer_marker().is_none());
                    rules.local_daemon()?
                }
                "remote_daemon_log" => {
                    self.warn_unaligned(name, path, self.alignment.producer_marker().is_none());
                    rules.remote_daemon()?
                }
                other => bail!("No rules for source {other}"),
            };
            table.insert(name, (path.to_path_buf(), source_rules));
        }
        Ok(table)
    }

    fn warn_unaligned(&self, name: &str, path: &Path, missing_marker: bool) {
        if missing_marker {
            warn!(
                source = name,
                path = %path.display(),
                "No calibration marker for this machine, daemon events are skipped"
            );
        }
    }

    /// Parse all logs and write the frame trace.
    pub async fn run(self) -> Result<RunSummary> {
        let table = self.source_rules()?;

        let writer = ReportWriter::create(&self.config.output).await?;
        let mut pipeline = Pipeline::new(self.config.merge.clone(), writer)?;
        for (name, (path, rules)) in table {
            info!(
                source = name,
                path = %path.display(),
                rules = rules.len(),
                "Adding source"
            );
            pipeline.add_source(path, rules);
        }

        info!(
            output = %self.config.output.display(),
            offset_ms = self.alignment.offset_ms(),
            "Merging logs"
        );
        pipeline.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frametrace_core::Bucket;

    #[test]
    fn test_source_table_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = |name: &str, text: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, text).unwrap();
            path
        };

        let mut config = Config::new(
            log("consumer.log", "300 [INFO ][app] unix timestamp: 1375815442.000000\n"),
            log("producer.log", "500 [INFO ][app] unix timestamp: 1375815442.000000\n"),
        );
        config.sources.remote_daemon_log = Some(log("remote.log", ""));
        config.output = dir.path().join("trace.log");

        let tracer = FrameTracer::new(config).unwrap();
        assert_eq!(tracer.alignment().offset_ms(), -200);

        let table = tracer.source_rules().unwrap();
        let names: Vec<_> = table.keys().copied().collect();
        assert_eq!(names, ["consumer_log", "remote_daemon_log", "producer_log"]);
        assert_eq!(table["consumer_log"].1.len(), 3);
        assert_eq!(table["producer_log"].1[0].bucket(), Bucket::Producer);
        assert_eq!(table["remote_daemon_log"].1[0].bucket(), Bucket::ProducerDaemon);
    }

    #[test]
    fn test_missing_application_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path().join("c.log"), dir.path().join("p.log"));
        config.output = dir.path().join("trace.log");
        assert!(FrameTracer::new(config).is_err());
    }
}
