use eyre::{Result, ensure};
use serde::Deserialize;
use std::time::Duration;

/// The largest accepted window size.
pub const MAX_WINDOW_SIZE: Duration = Duration::from_secs(24 * 60 * 60);

/// Parameters of the windowed merge that are passed to
/// [Pipeline](crate::Pipeline).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    /// The span of one report window. Must be a whole number of
    /// milliseconds.
    #[serde(default = "default_window_size", with = "humantime_serde")]
    pub window_size: Duration,

    /// The number of windows held in memory before a size-triggered
    /// flush is attempted.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Stop reading sources after this long. The remaining windows
    /// are still flushed.
    #[serde(default, with = "humantime_serde")]
    pub deadline: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            max_batch_size: default_max_batch_size(),
            deadline: None,
        }
    }
}

impl Config {
    /// Create a config with the given window size in milliseconds and
    /// batch size.
    pub fn new(window_ms: u64, max_batch_size: usize) -> Self {
        Self {
            window_size: Duration::from_millis(window_ms),
            max_batch_size,
            deadline: None,
        }
    }

    /// Set a deadline after which workers stop reading.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The window size in whole milliseconds. Saturates for sizes that
    /// [validate](Self::validate) rejects.
    pub fn window_ms(&self) -> u64 {
        u64::try_from(self.window_size.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.window_size >= Duration::from_millis(1),
            "window_size must be at least 1ms"
        );
        ensure!(
            self.window_size <= MAX_WINDOW_SIZE,
            "window_size must be at most {:?}, got {:?}",
            MAX_WINDOW_SIZE,
            self.window_size
        );
        ensure!(
            self.window_size.subsec_nanos() % 1_000_000 == 0,
            "window_size must be a whole number of milliseconds, got {:?}",
            self.window_size
        );
        ensure!(
            self.max_batch_size > 0,
            "max_batch_size must be greater than zero"
        );
        if let Some(deadline) = self.deadline {
            ensure!(!deadline.is_zero(), "deadline must be greater than zero");
        }
        Ok(())
    }
}

fn default_window_size() -> Duration {
    Duration::from_millis(20)
}

fn default_max_batch_size() -> usize {
    50
}
