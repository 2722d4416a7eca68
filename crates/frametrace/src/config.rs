//! Configuration parsing and validation for the frametrace tool.

use eyre::{Result, WrapErr, ensure};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Log files to merge.
    pub sources: SourcesConfig,

    /// Inputs for the clock alignment.
    #[serde(default)]
    pub calibration: CalibrationConfig,

    /// The merged report. Truncated at startup.
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Windowing and batching parameters.
    #[serde(default)]
    pub merge: frametrace_core::Config,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// A config merging only the two application logs.
    pub fn new(consumer_log: impl Into<PathBuf>, producer_log: impl Into<PathBuf>) -> Self {
        Self {
            sources: SourcesConfig {
                consumer_log: consumer_log.into(),
                producer_log: producer_log.into(),
                local_daemon_log: None,
                remote_daemon_log: None,
            },
            calibration: CalibrationConfig::default(),
            output: default_output(),
            merge: frametrace_core::Config::default(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        for (name, path) in self.sources.logs() {
            ensure!(
                !path.as_os_str().is_empty(),
                "sources.{name} cannot be empty"
            );
        }

        ensure!(
            !self.output.as_os_str().is_empty(),
            "output cannot be empty"
        );

        ensure!(
            self.sources.logs().all(|(_, path)| path != self.output.as_path()),
            "output {} would overwrite one of the sources",
            self.output.display()
        );

        if let Some(pattern) = &self.calibration.pattern {
            ensure!(
                !pattern.is_empty(),
                "calibration.pattern cannot be empty"
            );
        }

        self.merge.validate().wrap_err("Invalid merge parameters")?;
        Ok(())
    }
}

fn default_output() -> PathBuf {
    PathBuf::from("frame-trace.log")
}

/// The logs of one session.
#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    /// The consumer application log: interests, data and buffer dumps.
    pub consumer_log: PathBuf,

    /// The producer application log: published segments.
    pub producer_log: PathBuf,

    /// The forwarding daemon on the consumer machine.
    #[serde(default)]
    pub local_daemon_log: Option<PathBuf>,

    /// The forwarding daemon on the producer machine.
    #[serde(default)]
    pub remote_daemon_log: Option<PathBuf>,
}

impl SourcesConfig {
    /// The configured logs keyed by their config name, in report column
    /// order.
    pub fn logs(&self) -> impl Iterator<Item = (&'static str, &Path)> + '_ {
        [
            ("consumer_log", Some(&self.consumer_log)),
            ("local_daemon_log", self.local_daemon_log.as_ref()),
            ("remote_daemon_log", self.remote_daemon_log.as_ref()),
            ("producer_log", Some(&self.producer_log)),
        ]
        .into_iter()
        .filter_map(|(name, path)| Some((name, path?.as_path())))
    }
}

/// Clock alignment inputs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalibrationConfig {
    /// `ntpq -p` output captured on the consumer machine.
    #[serde(default)]
    pub consumer_ntp: Option<PathBuf>,

    /// `ntpq -p` output captured on the producer machine.
    #[serde(default)]
    pub producer_ntp: Option<PathBuf>,

    /// Overrides the calibration line pattern. Needs the named groups
    /// `local` and `wall`.
    #[serde(default)]
    pub pattern: Option<String>,
}
