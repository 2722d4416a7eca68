//! frametrace - Merge the logs of a media streaming session into one
//! frame trace.
//!
//! A session leaves four logs behind: the consumer and producer
//! applications and the forwarding daemons on both machines. Each log
//! is written against its own clock. This crate aligns the clocks with
//! the calibration lines found in the application logs and the NTP
//! delays measured on both machines, then merges the logs with
//! [frametrace_core] so that the interest, the data and the buffer
//! state of one segment end up on the same report line.
//!
//! # Configuration
//!
//! The tool reads a YAML file naming the logs, the calibration inputs,
//! the output file and the merge parameters. See `config/example.yaml`
//! for a complete example.

pub mod calibration;
pub mod config;
pub mod names;
pub mod rules;
pub mod tracer;

pub use config::Config;
pub use names::{BufferDump, MediaName};
pub use rules::MediaRules;
pub use tracer::FrameTracer;
