//! This library merges several log files, each written against its own
//! millisecond clock, into one report where events close in time end up
//! next to each other.
//!
//! Every log file is parsed by its own worker. Lines matching a
//! [PatternRule] become events which are grouped into fixed-size time
//! windows and, within a window, by timestamp. Workers synchronize on a
//! barrier before windows are written, so a window is only written once
//! every worker has moved past it.
//!
//! # Usage
//!
//! ```rust
//! use frametrace_core::{Bucket, Config, Pipeline, PatternRule, ReportWriter};
//!
//! # #[tokio::main]
//! # async fn main() -> eyre::Result<()> {
//! # let dir = tempfile::tempdir()?;
//! # let consumer_log = dir.path().join("consumer.log");
//! # let producer_log = dir.path().join("producer.log");
//! # std::fs::write(&consumer_log, "100 express /frames/delta/7\n104 pop [7]\n")?;
//! # std::fs::write(&producer_log, "301 published /frames/delta/7\n")?;
//! # let report = dir.path().join("frame-trace.log");
//! // Rules describe how a log line becomes an event.
//! let interests = PatternRule::new("interests", r"^([0-9]+) express (\S+)", Bucket::Consumer)?
//!     .with_payload(|caps| format!("I->{}", &caps[2]));
//! let buffer = PatternRule::new("buffer", r"^([0-9]+) (pop|push) (.*)", Bucket::Buffer)?
//!     .with_payload(|caps| format!("{} {}", &caps[2], &caps[3]));
//!
//! // The producer clock runs 200ms ahead of the consumer clock.
//! let published = PatternRule::new("published", r"^([0-9]+) published (\S+)", Bucket::Producer)?
//!     .with_timestamp(|caps| caps[1].parse::<u64>().ok()?.checked_sub(200))
//!     .with_payload(|caps| format!("P:{}", &caps[2]));
//!
//! let writer = ReportWriter::create(&report).await?;
//! let mut pipeline = Pipeline::new(Config::default(), writer)?;
//! pipeline
//!     .add_source(&consumer_log, [interests, buffer])
//!     .add_source(&producer_log, [published]);
//! let summary = pipeline.run().await?;
//!
//! assert_eq!(summary.aggregator.stored, 3);
//! assert_eq!(
//!     std::fs::read_to_string(&report)?,
//!     "100:\n\
//!      +0\tI->/frames/delta/7\t\t\t\t\n\
//!      +1\t\t\t\t\tP:/frames/delta/7\n\
//!      +4\t\tpop [7]\t\t\t\n"
//! );
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod align;
mod config;
pub mod coordinator;
pub mod extract;
mod pipeline;
pub mod report;
mod types;
pub mod window;
pub mod worker;

pub use aggregator::{Aggregator, AggregatorStats, Insert};
pub use align::{ClockAligner, ClockAlignment, align};
pub use config::Config;
pub use coordinator::{ActiveWorker, FlushCoordinator, FlushStats};
pub use extract::PatternRule;
pub use pipeline::{Pipeline, RunSummary, Source};
pub use report::ReportWriter;
pub use types::*;
pub use window::{MergeRecord, Window};
pub use worker::{ParserWorker, WorkerReport};
