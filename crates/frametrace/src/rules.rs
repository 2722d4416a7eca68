//! Pattern rules for the media session logs.
//!
//! Application log lines start with the local millisecond clock, the
//! severity and the component:
//!
//! ```text
//! 1375815442 [STAT ][cchannel-iqueue]-iqueue: express /ndn/.../frames/delta/14/data/%00%01
//! ```
//!
//! Forwarding daemon lines start with the wall clock instead:
//!
//! ```text
//! 1375815442.123456 ndnd[4242]: interest_from 7 ccnx:/ndn/.../frames/delta/14/data/%00%01
//! ```

use crate::names::{BUFFER_DUMP_PATTERN, BufferDump, MediaName};
use eyre::Result;
use frametrace_core::{Bucket, ClockAlignment, PatternRule, align::CalibrationMarker, extract::parse_millis};
use regex::Captures;
use std::sync::Arc;

const DAEMON_PATTERN: &str = r"^(?P<wall>[0-9]+\.[0-9]+)\s.*?\b(?P<event>interest_from|interest_to|content_from|content_to)\s+[0-9]+\s+(?:ccnx:)?(?P<name>[/A-Za-z0-9%]*)";

/// A pattern for `<ts> [<entry>][<component>]... <token> <name>` lines.
/// Group 1 is the timestamp and the last group the name.
pub fn interest_pattern(entry: &str, component: &str, token: &str) -> String {
    format!(
        r"^([.0-9]+) \[{}\]\[{}\].*{token}\s([/A-Za-z0-9%]*)",
        regex::escape(entry),
        regex::escape(component)
    )
}

/// A pattern for buffer dump lines. Group 1 is the timestamp, group 2
/// the operation matched by `token` and group 3 the dump.
pub fn buffer_pattern(entry: &str, component: &str, token: &str) -> String {
    format!(
        r"^(?P<ts>[0-9]+) \[{}\]\[{}\].*{token}\s({BUFFER_DUMP_PATTERN})",
        regex::escape(entry),
        regex::escape(component)
    )
}

/// The daemon notation for an event kind.
fn daemon_arrow(event: &str) -> &'static str {
    match event {
        "interest_from" => "->",
        "interest_to" => "-->",
        "content_from" => "<-",
        _ => "<--",
    }
}

/// Builds the rule sets for each log of a session.
#[derive(Debug, Clone)]
pub struct MediaRules {
    alignment: Arc<ClockAlignment>,
}

impl MediaRules {
    pub fn new(alignment: ClockAlignment) -> Self {
        Self {
            alignment: Arc::new(alignment),
        }
    }

    pub fn alignment(&self) -> &ClockAlignment {
        &self.alignment
    }

    /// Expressed interests, arrived data and buffer dumps from the
    /// consumer application log.
    pub fn consumer(&self) -> Result<Vec<PatternRule>> {
        let interests = PatternRule::new(
            "interests",
            &interest_pattern("STAT ", "cchannel-iqueue", "express"),
            Bucket::Consumer,
        )?
        .with_payload(|caps| format!("I->{}", MediaName::parse(&caps[2])));

        let data = PatternRule::new(
            "data",
            &interest_pattern("TRACE", "vconsumer", "data"),
            Bucket::Consumer,
        )?
        .with_payload(|caps| format!("D<-{}", MediaName::parse(&caps[2])));

        let buffer = PatternRule::new(
            "buffer",
            &buffer_pattern("STAT ", "vconsumer-buffer-pqueue", ".(pop|push)"),
            Bucket::Buffer,
        )?
        .with_payload(|caps| match BufferDump::parse(&caps[3]) {
            Some(dump) => format!("{} {dump}", &caps[2]),
            None => format!("{} <n/a>", &caps[2]),
        });

        Ok(vec![interests, data, buffer])
    }

    /// Published segments from the producer application log, moved into
    /// the consumer clock.
    pub fn producer(&self) -> Result<Vec<PatternRule>> {
        let alignment = self.alignment.clone();
        let published = PatternRule::new(
            "published",
            &interest_pattern("TRACE", "vsender", "published"),
            Bucket::Producer,
        )?
        .with_timestamp(move |caps| alignment.producer_to_consumer(parse_millis(&caps[1])?))
        .with_payload(|caps| format!("P: {}", MediaName::parse(&caps[2])));

        Ok(vec![published])
    }

    /// Interest and content events of the daemon on the consumer
    /// machine.
    pub fn local_daemon(&self) -> Result<Vec<PatternRule>> {
        let alignment = self.alignment.clone();
        let rule = daemon_rule("local-daemon", Bucket::ConsumerDaemon)?.with_timestamp(
            move |caps| alignment.consumer_wall_to_local(wall_millis(caps)?),
        );
        Ok(vec![rule])
    }

    /// Interest and content events of the daemon on the producer
    /// machine.
    pub fn remote_daemon(&self) -> Result<Vec<PatternRule>> {
        let alignment = self.alignment.clone();
        let rule = daemon_rule("remote-daemon", Bucket::ProducerDaemon)?.with_timestamp(
            move |caps| alignment.producer_wall_to_local(wall_millis(caps)?),
        );
        Ok(vec![rule])
    }
}

fn daemon_rule(name: &str, bucket: Bucket) -> Result<PatternRule> {
    Ok(PatternRule::new(name, DAEMON_PATTERN, bucket)?.with_payload(|caps| {
        format!(
            "{}{}",
            daemon_arrow(&caps["event"]),
            MediaName::parse(&caps["name"])
        )
    }))
}

fn wall_millis(caps: &Captures<'_>) -> Option<i64> {
    let micros = CalibrationMarker::parse_wall_clock(&caps["wall"])?;
    Some(micros.div_euclid(1000))
}
