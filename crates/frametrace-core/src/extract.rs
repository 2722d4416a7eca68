//! Turning log lines into [RawEvent]s.

use crate::types::{Bucket, RawEvent};
use eyre::{Result, WrapErr};
use regex::{Captures, Regex};
use std::{fmt, sync::Arc};

/// Reads the event timestamp (milliseconds, common clock frame) from
/// the captures of a matched line. `None` marks the line as not
/// applicable.
pub type TimestampFn = Arc<dyn Fn(&Captures<'_>) -> Option<u64> + Send + Sync>;

/// Renders the report payload from the captures of a matched line.
pub type PayloadFn = Arc<dyn Fn(&Captures<'_>) -> String + Send + Sync>;

/// Describes how one kind of log line becomes an event.
///
/// Rules are built once at startup and shared read-only between
/// workers.
#[derive(Clone)]
pub struct PatternRule {
    name: String,
    pattern: Regex,
    bucket: Bucket,
    timestamp: TimestampFn,
    payload: PayloadFn,
}

impl fmt::Debug for PatternRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternRule")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl PatternRule {
    /// Compile a rule. By default the timestamp is the first capture
    /// group parsed as an integer and the payload is the whole match.
    pub fn new(name: impl Into<String>, pattern: &str, bucket: Bucket) -> Result<Self> {
        let name = name.into();
        let pattern = Regex::new(pattern)
            .wrap_err_with(|| format!("Invalid pattern for rule '{name}'"))?;

        Ok(Self {
            name,
            pattern,
            bucket,
            timestamp: Arc::new(|caps| parse_millis(caps.get(1)?.as_str())),
            payload: Arc::new(|caps| caps[0].to_string()),
        })
    }

    pub fn with_timestamp<F>(mut self, f: F) -> Self
    where
        F: Fn(&Captures<'_>) -> Option<u64> + Send + Sync + 'static,
    {
        self.timestamp = Arc::new(f);
        self
    }

    pub fn with_payload<F>(mut self, f: F) -> Self
    where
        F: Fn(&Captures<'_>) -> String + Send + Sync + 'static,
    {
        self.payload = Arc::new(f);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bucket(&self) -> Bucket {
        self.bucket
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    /// Apply the rule to a line. Returns `None` when the line does not
    /// match or its timestamp cannot be read.
    pub fn extract(&self, line: &str) -> Option<RawEvent> {
        let caps = self.pattern.captures(line)?;
        let timestamp = (self.timestamp)(&caps)?;
        let payload = (self.payload)(&caps);

        Some(RawEvent {
            timestamp,
            bucket: self.bucket,
            payload,
        })
    }
}

/// Parse a millisecond timestamp. A fractional part is truncated.
pub fn parse_millis(text: &str) -> Option<u64> {
    let whole = text.split('.').next()?;
    whole.parse().ok()
}

/// Try each rule in order and return the events produced by the
/// rules that apply.
pub fn extract_all<'a>(
    line: &'a str,
    rules: &'a [PatternRule],
) -> impl Iterator<Item = RawEvent> + 'a {
    rules.iter().filter_map(move |rule| rule.extract(line))
}
