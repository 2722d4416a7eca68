//! Clock alignment between the producer and consumer machines.
//!
//! Every application log is expected to carry one informational line
//! that pairs the local millisecond clock with the wall clock, e.g.
//!
//! ```text
//! 1375815442 [INFO ][session] unix timestamp: 1375815442.123456
//! ```
//!
//! From one such marker per machine and the NTP delays measured on
//! both machines the aligner computes the offset that moves producer
//! local timestamps into the consumer local frame.

use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use regex::Regex;
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};
use tracing::{debug, info, warn};

/// The default calibration line pattern. The `local` group carries the
/// local millisecond clock and `wall` the wall clock in seconds with
/// microsecond precision.
pub const DEFAULT_CALIBRATION_PATTERN: &str =
    r"^(?P<local>[0-9]+) \[INFO \].*\sunix timestamp:\s(?P<wall>[0-9]{10}\.[0-9]{6})";

/// One local clock reading paired with the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationMarker {
    pub local_ms: u64,
    pub wall_clock_us: i64,
}

impl CalibrationMarker {
    /// Parse `<seconds>.<fraction>` into microseconds without going
    /// through floating point.
    pub fn parse_wall_clock(text: &str) -> Option<i64> {
        let (secs, frac) = text.split_once('.').unwrap_or((text, ""));
        let secs: i64 = secs.parse().ok()?;
        if frac.len() > 6 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let micros: i64 = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<6}").parse().ok()?
        };
        secs.checked_mul(1_000_000)?.checked_add(micros)
    }

    pub fn wall_clock_ms(&self) -> i64 {
        self.wall_clock_us.div_euclid(1000)
    }

    pub fn wall_clock(&self) -> Option<DateTime<Utc>> {
        let secs = self.wall_clock_us.div_euclid(1_000_000);
        let nanos = self.wall_clock_us.rem_euclid(1_000_000) * 1000;
        DateTime::from_timestamp(secs, nanos as u32)
    }

    /// Map a wall-clock reading (milliseconds) taken on the same
    /// machine to its local clock.
    fn wall_to_local(&self, wall_ms: i64) -> i64 {
        wall_ms - self.wall_clock_ms() + self.local_ms as i64
    }
}

/// The result of aligning the two machines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockAlignment {
    offset_ms: i64,
    producer: Option<CalibrationMarker>,
    consumer: Option<CalibrationMarker>,
}

impl ClockAlignment {
    /// No alignment: producer timestamps are used as they are.
    pub fn unaligned() -> Self {
        Self {
            offset_ms: 0,
            producer: None,
            consumer: None,
        }
    }

    /// Compute the alignment from the markers found on each machine and
    /// the NTP delays (milliseconds) measured there.
    pub fn from_markers(
        producer: Option<CalibrationMarker>,
        consumer: Option<CalibrationMarker>,
        producer_ntp_delay: f64,
        consumer_ntp_delay: f64,
    ) -> Self {
        let (Some(p), Some(c)) = (producer, consumer) else {
            warn!(
                producer_marker = producer.is_some(),
                consumer_marker = consumer.is_some(),
                "Calibration marker missing, producer events are not aligned"
            );
            return Self {
                offset_ms: 0,
                producer,
                consumer,
            };
        };

        let wall_diff_ms = (p.wall_clock_us - c.wall_clock_us) as f64 / 1000.0;
        let delta_ms = (wall_diff_ms + (consumer_ntp_delay - producer_ntp_delay)) as i64;
        let offset_ms = c.local_ms as i64 - p.local_ms as i64 + delta_ms;

        debug!(delta_ms, offset_ms, "Computed clock offset");

        Self {
            offset_ms,
            producer,
            consumer,
        }
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    /// True when both markers were found.
    pub fn is_aligned(&self) -> bool {
        self.producer.is_some() && self.consumer.is_some()
    }

    pub fn producer_marker(&self) -> Option<CalibrationMarker> {
        self.producer
    }

    pub fn consumer_marker(&self) -> Option<CalibrationMarker> {
        self.consumer
    }

    /// Move a producer local timestamp into the consumer local frame.
    /// Returns `None` when the result would be negative.
    pub fn producer_to_consumer(&self, producer_ms: u64) -> Option<u64> {
        producer_ms.checked_add_signed(self.offset_ms)
    }

    /// Map a consumer machine wall-clock reading (milliseconds) into the
    /// consumer local frame.
    pub fn consumer_wall_to_local(&self, wall_ms: i64) -> Option<u64> {
        let local = self.consumer?.wall_to_local(wall_ms);
        u64::try_from(local).ok()
    }

    /// Map a producer machine wall-clock reading (milliseconds) into the
    /// consumer local frame.
    pub fn producer_wall_to_local(&self, wall_ms: i64) -> Option<u64> {
        let producer_local = self.producer?.wall_to_local(wall_ms);
        u64::try_from(producer_local + self.offset_ms).ok()
    }
}

/// Finds calibration markers in log files.
#[derive(Debug, Clone)]
pub struct ClockAligner {
    pattern: Regex,
}

impl Default for ClockAligner {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_CALIBRATION_PATTERN)
                .expect("default calibration pattern is valid"),
        }
    }
}

impl ClockAligner {
    /// Use a custom calibration pattern. It must have the named groups
    /// `local` and `wall`.
    pub fn with_pattern(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).wrap_err("Invalid calibration pattern")?;
        let names: Vec<_> = pattern.capture_names().flatten().collect();
        eyre::ensure!(
            names.contains(&"local") && names.contains(&"wall"),
            "Calibration pattern needs the named groups 'local' and 'wall'"
        );
        Ok(Self { pattern })
    }

    /// Return the first marker found in the reader. Lines are decoded
    /// lossily, so invalid UTF-8 never hides a later marker.
    pub fn find_marker_in<R: BufRead>(&self, mut reader: R) -> Result<Option<CalibrationMarker>> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .wrap_err("Failed to read calibration source")?;
            if read == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let Some(caps) = self.pattern.captures(line.trim_end_matches(['\n', '\r'])) else {
                continue;
            };
            let local_ms = caps["local"].parse::<u64>().ok();
            let wall_clock_us = CalibrationMarker::parse_wall_clock(&caps["wall"]);
            if let (Some(local_ms), Some(wall_clock_us)) = (local_ms, wall_clock_us) {
                return Ok(Some(CalibrationMarker {
                    local_ms,
                    wall_clock_us,
                }));
            }
        }
        Ok(None)
    }

    pub fn find_marker(&self, path: impl AsRef<Path>) -> Result<Option<CalibrationMarker>> {
        let path = path.as_ref();
        let file = File::open(path)
            .wrap_err_with(|| format!("Failed to open log for calibration: {}", path.display()))?;
        let marker = self
            .find_marker_in(BufReader::new(file))
            .wrap_err_with(|| format!("Failed to scan {}", path.display()))?;

        match &marker {
            Some(marker) => info!(
                path = %path.display(),
                local_ms = marker.local_ms,
                wall_clock = ?marker.wall_clock(),
                "Found calibration marker"
            ),
            None => warn!(path = %path.display(), "No calibration marker found"),
        }
        Ok(marker)
    }

    /// Compute the producer to consumer clock offset from the two
    /// application logs and the NTP delays (milliseconds).
    pub fn align(
        &self,
        producer_log: impl AsRef<Path>,
        consumer_log: impl AsRef<Path>,
        producer_ntp_delay: f64,
        consumer_ntp_delay: f64,
    ) -> Result<ClockAlignment> {
        let producer = self.find_marker(producer_log)?;
        let consumer = self.find_marker(consumer_log)?;
        let alignment = ClockAlignment::from_markers(
            producer,
            consumer,
            producer_ntp_delay,
            consumer_ntp_delay,
        );
        info!(
            offset_ms = alignment.offset_ms(),
            aligned = alignment.is_aligned(),
            "Clock alignment done"
        );
        Ok(alignment)
    }
}

/// Align with the default calibration pattern.
pub fn align(
    producer_log: impl AsRef<Path>,
    consumer_log: impl AsRef<Path>,
    producer_ntp_delay: f64,
    consumer_ntp_delay: f64,
) -> Result<ClockAlignment> {
    ClockAligner::default().align(
        producer_log,
        consumer_log,
        producer_ntp_delay,
        consumer_ntp_delay,
    )
}
