use std::fmt;

/// The logical source category of an event.
///
/// The declaration order is the column order of the merged report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    Consumer,
    Buffer,
    ConsumerDaemon,
    ProducerDaemon,
    Producer,
}

impl Bucket {
    /// All buckets in report column order.
    pub const ALL: [Bucket; 5] = [
        Bucket::Consumer,
        Bucket::Buffer,
        Bucket::ConsumerDaemon,
        Bucket::ProducerDaemon,
        Bucket::Producer,
    ];

    /// Number of payload slots carried by a merge record.
    pub const COUNT: usize = Self::ALL.len();

    /// The slot index of the bucket within a merge record.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Bucket::Consumer => "consumer",
            Bucket::Buffer => "buffer",
            Bucket::ConsumerDaemon => "consumer-daemon",
            Bucket::ProducerDaemon => "producer-daemon",
            Bucket::Producer => "producer",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An event extracted from one log line.
///
/// The timestamp is in milliseconds and already expressed in the
/// common (consumer local) clock frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub timestamp: u64,
    pub bucket: Bucket,
    pub payload: String,
}

/// A window that left the aggregator, with its records ordered by
/// offset.
pub type FlushedWindow = (u64, Vec<(u64, crate::window::MergeRecord)>);

/// A batch of flushed windows ordered by window start.
pub type Batch = Vec<FlushedWindow>;
