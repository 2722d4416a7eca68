use crate::{
    types::{Batch, Bucket},
    window::Window,
};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::debug;

/// The outcome of [Aggregator::insert].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// The payload went into an empty slot.
    Stored,
    /// The payload replaced an earlier payload of the same bucket.
    Overwrote,
    /// The window was already flushed. The event is dropped.
    Late,
}

/// Counters kept by the [Aggregator].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub stored: u64,
    pub overwritten: u64,
    pub late: u64,
    pub flushed_windows: u64,
}

#[derive(Debug, Default)]
struct Progress {
    latest_ts: Option<u64>,
    flushed_through: Option<u64>,
}

/// The shared time-ordered window map.
///
/// Inserts hold the map's read lock and lock only their own window, so
/// inserts into different windows proceed in parallel. Creating a window
/// or taking windows out needs the write lock.
#[derive(Debug)]
pub struct Aggregator {
    window_ms: u64,
    windows: RwLock<BTreeMap<u64, Mutex<Window>>>,
    progress: Mutex<Progress>,
    stored: AtomicU64,
    overwritten: AtomicU64,
    late: AtomicU64,
    flushed_windows: AtomicU64,
}

impl Aggregator {
    /// # Panics
    /// Panics if `window_ms` is zero.
    pub fn new(window_ms: u64) -> Self {
        assert!(window_ms > 0, "window size must be positive");
        Self {
            window_ms,
            windows: RwLock::new(BTreeMap::new()),
            progress: Mutex::new(Progress::default()),
            stored: AtomicU64::new(0),
            overwritten: AtomicU64::new(0),
            late: AtomicU64::new(0),
            flushed_windows: AtomicU64::new(0),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// The start of the window containing `timestamp`.
    pub fn window_start(&self, timestamp: u64) -> u64 {
        timestamp - timestamp % self.window_ms
    }

    /// Put one event into its window.
    pub fn insert(&self, timestamp: u64, bucket: Bucket, payload: String) -> Insert {
        let start = self.window_start(timestamp);
        let offset = timestamp - start;

        {
            let windows = self.windows.read();
            if self.is_closed(start) {
                return self.reject(timestamp, bucket);
            }
            if let Some(window) = windows.get(&start) {
                let replaced = window.lock().upsert(offset, bucket, payload);
                return self.record(timestamp, replaced.is_some());
            }
        }

        // The window may have been created or flushed between the two
        // locks.
        let mut windows = self.windows.write();
        if self.is_closed(start) {
            return self.reject(timestamp, bucket);
        }
        let replaced = windows
            .entry(start)
            .or_insert_with(|| Mutex::new(Window::new(start)))
            .get_mut()
            .upsert(offset, bucket, payload);
        drop(windows);
        self.record(timestamp, replaced.is_some())
    }

    /// Must be called with the window map locked.
    fn is_closed(&self, start: u64) -> bool {
        self.progress
            .lock()
            .flushed_through
            .is_some_and(|flushed| start <= flushed)
    }

    fn reject(&self, timestamp: u64, bucket: Bucket) -> Insert {
        self.late.fetch_add(1, Ordering::Relaxed);
        debug!(timestamp, %bucket, "drop an event for a flushed window");
        Insert::Late
    }

    fn record(&self, timestamp: u64, replaced: bool) -> Insert {
        {
            let mut progress = self.progress.lock();
            progress.latest_ts = progress.latest_ts.max(Some(timestamp));
        }
        if replaced {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
            Insert::Overwrote
        } else {
            self.stored.fetch_add(1, Ordering::Relaxed);
            Insert::Stored
        }
    }

    /// The number of windows currently held.
    pub fn window_count(&self) -> usize {
        self.windows.read().len()
    }

    /// The start of the newest window currently held.
    pub fn newest_window(&self) -> Option<u64> {
        self.windows.read().keys().next_back().copied()
    }

    /// The greatest timestamp inserted so far.
    pub fn latest_timestamp(&self) -> Option<u64> {
        self.progress.lock().latest_ts
    }

    /// The start of the newest window that was flushed.
    pub fn flushed_through(&self) -> Option<u64> {
        self.progress.lock().flushed_through
    }

    /// Take every held window, ordered by start, and leave the
    /// aggregator empty.
    pub fn snapshot_and_clear(&self) -> Batch {
        self.take_windows(|_| true)
    }

    /// Take the windows that end at or before `limit`, ordered by start.
    /// Later windows stay in place.
    pub fn snapshot_before(&self, limit: u64) -> Batch {
        let window_ms = self.window_ms;
        self.take_windows(|start| start.saturating_add(window_ms) <= limit)
    }

    /// Windows are keyed by start, so the taken windows always form a
    /// prefix of the map. Windows at or before the newest taken window
    /// are closed for further inserts.
    fn take_windows(&self, take: impl Fn(u64) -> bool) -> Batch {
        let taken = {
            let mut windows = self.windows.write();
            let split = windows.keys().copied().find(|&start| !take(start));
            let taken = match split {
                Some(split) => {
                    let rest = windows.split_off(&split);
                    std::mem::replace(&mut *windows, rest)
                }
                None => std::mem::take(&mut *windows),
            };

            // Raised before the write lock is released, so no insert can
            // recreate a taken window.
            if let Some(&newest) = taken.keys().next_back() {
                let mut progress = self.progress.lock();
                progress.flushed_through = progress.flushed_through.max(Some(newest));
            }
            taken
        };
        self.flushed_windows
            .fetch_add(taken.len() as u64, Ordering::Relaxed);

        let mut records = 0;
        let batch: Batch = taken
            .into_values()
            .map(Mutex::into_inner)
            .map(|window| {
                records += window.len();
                (window.start(), window.into_records())
            })
            .collect();
        debug!(windows = batch.len(), records, "took windows");
        batch
    }

    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            stored: self.stored.load(Ordering::Relaxed),
            overwritten: self.overwritten.load(Ordering::Relaxed),
            late: self.late.load(Ordering::Relaxed),
            flushed_windows: self.flushed_windows.load(Ordering::Relaxed),
        }
    }
}
