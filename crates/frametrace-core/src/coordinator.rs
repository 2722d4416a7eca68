//! The flush barrier shared by all parser workers.
//!
//! A flush is requested when a worker finishes its file or when the
//! aggregator holds too many windows and the worker has caught up with
//! the newest one. Every active worker must request the flush before it
//! happens; the last one to arrive writes the batch and releases the
//! others. This is a cyclic barrier whose party count is the number of
//! active workers.
//!
//! Only windows that every active worker has moved past are written. A
//! worker that finished reading no longer holds anything back.
//!
//! Liveness relies on every registered worker eventually leaving the
//! barrier. [ActiveWorker] enforces this: [ActiveWorker::finish]
//! deregisters explicitly and dropping an unfinished worker deregisters
//! on the way out.

use crate::{aggregator::Aggregator, report::ReportWriter};
use eyre::{Result, WrapErr};
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tracing::{debug, warn};

/// How far a worker has read, in the common clock frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Position {
    NotStarted,
    At(u64),
    Done,
}

impl Position {
    /// Events at or after this timestamp may still arrive from the
    /// worker.
    fn horizon(self) -> u64 {
        match self {
            Position::NotStarted => 0,
            Position::At(ts) => ts,
            Position::Done => u64::MAX,
        }
    }
}

#[derive(Debug, Default)]
struct BarrierState {
    active: usize,
    ready: usize,
    generation: u64,
    next_id: usize,
    positions: Vec<(usize, Position)>,
}

impl BarrierState {
    fn position_mut(&mut self, id: usize) -> Option<&mut Position> {
        self.positions
            .iter_mut()
            .find(|(worker, _)| *worker == id)
            .map(|(_, position)| position)
    }

    /// The earliest timestamp any active worker may still insert.
    fn horizon(&self) -> u64 {
        self.positions
            .iter()
            .map(|(_, position)| position.horizon())
            .min()
            .unwrap_or(u64::MAX)
    }

    fn remove(&mut self, id: usize) {
        self.positions.retain(|(worker, _)| *worker != id);
        self.active -= 1;
    }

    /// All remaining workers are waiting on the barrier.
    fn is_complete(&self) -> bool {
        self.ready > 0 && self.ready >= self.active
    }
}

/// Counters kept by the [FlushCoordinator].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub flushes: u64,
    pub windows_written: u64,
}

/// Decides when the aggregator is flushed and synchronizes the workers
/// around each flush.
#[derive(Debug)]
pub struct FlushCoordinator {
    aggregator: Arc<Aggregator>,
    writer: ReportWriter,
    max_batch_size: usize,
    state: Mutex<BarrierState>,
    /// Serializes batch extraction and writing.
    flush_lock: AsyncMutex<()>,
    /// Publishes the barrier generation. Waiters are released when it
    /// moves past the generation they arrived in.
    permit_tx: watch::Sender<u64>,
    flushes: AtomicU64,
    windows_written: AtomicU64,
}

impl FlushCoordinator {
    pub fn new(aggregator: Arc<Aggregator>, writer: ReportWriter, max_batch_size: usize) -> Self {
        let (permit_tx, _) = watch::channel(0);
        Self {
            aggregator,
            writer,
            max_batch_size,
            state: Mutex::new(BarrierState::default()),
            flush_lock: AsyncMutex::new(()),
            permit_tx,
            flushes: AtomicU64::new(0),
            windows_written: AtomicU64::new(0),
        }
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Register a worker as active. The barrier waits for it until it
    /// finishes or is dropped.
    pub fn register(self: &Arc<Self>) -> ActiveWorker {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.active += 1;
        state.positions.push((id, Position::NotStarted));

        ActiveWorker {
            coordinator: self.clone(),
            id,
            waiting: None,
            finished: false,
        }
    }

    /// The number of workers currently registered.
    pub fn active_workers(&self) -> usize {
        self.state.lock().active
    }

    pub fn stats(&self) -> FlushStats {
        FlushStats {
            flushes: self.flushes.load(Ordering::Relaxed),
            windows_written: self.windows_written.load(Ordering::Relaxed),
        }
    }

    fn size_trigger(&self, timestamp: u64) -> bool {
        self.aggregator.window_count() >= self.max_batch_size
            && self
                .aggregator
                .newest_window()
                .is_none_or(|newest| timestamp >= newest)
    }

    async fn arrive(
        &self,
        worker: &mut ActiveWorker,
        timestamp: Option<u64>,
        forced: bool,
    ) -> Result<()> {
        let wait_generation = {
            let mut state = self.state.lock();

            if let Some(position) = state.position_mut(worker.id) {
                if forced {
                    *position = Position::Done;
                } else if let Some(ts) = timestamp {
                    *position = Position::At(ts);
                }
            }

            // A wait that was cancelled before its release still counts
            // the worker as ready.
            let counted = worker.waiting.take() == Some(state.generation);
            if !counted {
                let triggered = forced || timestamp.is_some_and(|ts| self.size_trigger(ts));
                if !triggered {
                    return Ok(());
                }
                // The generation stays fixed until the flush, so reading
                // it here arms the barrier for this round.
                state.ready += 1;
            }

            if state.ready >= state.active {
                None
            } else {
                Some(state.generation)
            }
        };

        match wait_generation {
            None => self.flush_and_release().await,
            Some(generation) => {
                debug!(worker = worker.id, "waiting for other workers to be ready");
                worker.waiting = Some(generation);
                let mut permit_rx = self.permit_tx.subscribe();
                let released = permit_rx
                    .wait_for(|&current| current > generation)
                    .await
                    .map(|_| ());
                worker.waiting = None;
                released.wrap_err("Flush coordinator closed while waiting")
            }
        }
    }

    /// Write the windows every worker has moved past and release the
    /// waiting workers.
    async fn flush_and_release(&self) -> Result<()> {
        let _flush = self.flush_lock.lock().await;

        let horizon = self.state.lock().horizon();
        let batch = if horizon == u64::MAX {
            self.aggregator.snapshot_and_clear()
        } else {
            self.aggregator.snapshot_before(horizon)
        };
        let result = self.writer.write(&batch).await;

        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.windows_written
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        debug!(
            windows = batch.len(),
            held = self.aggregator.window_count(),
            horizon,
            "flushed batch"
        );

        self.release();
        result
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.ready = 0;
        state.generation += 1;
        self.permit_tx.send_replace(state.generation);
    }

    async fn deregister(&self, id: usize) -> Result<()> {
        let flush = {
            let mut state = self.state.lock();
            state.remove(id);
            state.active == 0 || state.is_complete()
        };

        if flush {
            self.flush_and_release().await
        } else {
            Ok(())
        }
    }

    /// Deregister a worker that did not finish. Waiters are released
    /// without a flush when the worker was the last one they were
    /// waiting for; its windows are written by a later flush.
    fn abandon(&self, id: usize, waiting: Option<u64>) {
        let mut state = self.state.lock();
        state.remove(id);
        if waiting == Some(state.generation) {
            state.ready -= 1;
        }
        if state.is_complete() {
            state.ready = 0;
            state.generation += 1;
            self.permit_tx.send_replace(state.generation);
        }
        warn!(worker = id, active = state.active, "worker left without finishing");
    }

    /// Write whatever the aggregator still holds. Used once all workers
    /// are gone.
    pub async fn drain(&self) -> Result<()> {
        let _flush = self.flush_lock.lock().await;
        let batch = self.aggregator.snapshot_and_clear();
        if batch.is_empty() {
            return Ok(());
        }
        warn!(windows = batch.len(), "writing windows left after all workers stopped");
        self.windows_written
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.writer.write(&batch).await
    }
}

/// A worker registered with the [FlushCoordinator].
#[derive(Debug)]
pub struct ActiveWorker {
    coordinator: Arc<FlushCoordinator>,
    id: usize,
    /// The barrier generation this worker is waiting in.
    waiting: Option<u64>,
    finished: bool,
}

impl ActiveWorker {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Report that an event at `timestamp` was inserted and flush if the
    /// batch is large enough. May wait for the other workers.
    pub async fn check_and_flush(&mut self, timestamp: u64) -> Result<()> {
        let coordinator = self.coordinator.clone();
        coordinator.arrive(self, Some(timestamp), false).await
    }

    /// Report that this worker will insert nothing more and wait for the
    /// resulting flush.
    pub async fn flush_forced(&mut self) -> Result<()> {
        let coordinator = self.coordinator.clone();
        coordinator.arrive(self, None, true).await
    }

    /// Leave the barrier. The last worker to leave writes everything
    /// that is left.
    pub async fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.coordinator.deregister(self.id).await
    }
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        if !self.finished {
            self.coordinator.abandon(self.id, self.waiting);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bucket;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn setup(
        window_ms: u64,
        max_batch_size: usize,
    ) -> (tempfile::TempDir, Arc<FlushCoordinator>) {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::create(dir.path().join("trace.log")).await.unwrap();
        let aggregator = Arc::new(Aggregator::new(window_ms));
        let coordinator = Arc::new(FlushCoordinator::new(aggregator, writer, max_batch_size));
        (dir, coordinator)
    }

    fn report(dir: &tempfile::TempDir) -> String {
        std::fs::read_to_string(dir.path().join("trace.log")).unwrap()
    }

    #[tokio::test]
    async fn test_single_worker_without_events() {
        let (dir, coordinator) = setup(20, 50).await;
        let mut worker = coordinator.register();
        assert_eq!(coordinator.active_workers(), 1);

        timeout(Duration::from_secs(5), worker.flush_forced())
            .await
            .unwrap()
            .unwrap();
        worker.finish().await.unwrap();

        assert_eq!(coordinator.active_workers(), 0);
        assert_eq!(coordinator.stats().flushes, 2);
        assert_eq!(coordinator.stats().windows_written, 0);
        assert_eq!(report(&dir), "");
    }

    #[tokio::test]
    async fn test_below_batch_size_does_not_flush() {
        let (dir, coordinator) = setup(20, 3).await;
        let mut worker = coordinator.register();
        for ts in [0, 20] {
            coordinator.aggregator().insert(ts, Bucket::Consumer, "x".into());
            worker.check_and_flush(ts).await.unwrap();
        }
        assert_eq!(coordinator.stats().flushes, 0);

        worker.finish().await.unwrap();
        assert_eq!(coordinator.stats().windows_written, 2);
        assert_eq!(report(&dir), "0:\n+0\tx\t\t\t\t\n20:\n+0\tx\t\t\t\t\n");
    }

    #[tokio::test]
    async fn test_size_trigger_flushes_passed_windows() {
        let (dir, coordinator) = setup(20, 2).await;
        let mut worker = coordinator.register();
        let aggregator = coordinator.aggregator().clone();

        aggregator.insert(5, Bucket::Consumer, "a".into());
        worker.check_and_flush(5).await.unwrap();
        aggregator.insert(25, Bucket::Consumer, "b".into());
        worker.check_and_flush(25).await.unwrap();

        // Window 0 is behind the worker, window 20 is not.
        assert_eq!(coordinator.stats().windows_written, 1);
        assert_eq!(aggregator.window_count(), 1);
        assert_eq!(report(&dir), "0:\n+5\ta\t\t\t\t\n");

        worker.flush_forced().await.unwrap();
        worker.finish().await.unwrap();
        assert_eq!(coordinator.stats().windows_written, 2);
    }

    #[tokio::test]
    async fn test_older_timestamp_does_not_trigger() {
        let (_dir, coordinator) = setup(20, 1).await;
        let mut worker = coordinator.register();
        let aggregator = coordinator.aggregator().clone();

        aggregator.insert(100, Bucket::Consumer, "a".into());
        aggregator.insert(40, Bucket::Buffer, "b".into());
        worker.check_and_flush(40).await.unwrap();
        assert_eq!(coordinator.stats().flushes, 0);

        worker.finish().await.unwrap();
        assert_eq!(coordinator.stats().windows_written, 2);
    }

    #[tokio::test]
    async fn test_forced_flush_waits_for_other_worker() {
        let (_dir, coordinator) = setup(20, 50).await;
        let mut first = coordinator.register();
        let second = coordinator.register();

        let waiter = tokio::spawn(async move {
            first.flush_forced().await.unwrap();
            first.finish().await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        assert_eq!(coordinator.stats().flushes, 0);

        // The second worker leaves, completing the barrier for the first.
        second.finish().await.unwrap();
        timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
        assert_eq!(coordinator.active_workers(), 0);
    }

    #[tokio::test]
    async fn test_dropped_worker_releases_waiters() {
        let (_dir, coordinator) = setup(20, 50).await;
        let mut first = coordinator.register();
        let second = coordinator.register();
        coordinator.aggregator().insert(3, Bucket::Producer, "p".into());

        let waiter = tokio::spawn(async move {
            first.flush_forced().await.unwrap();
            first.finish().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        drop(second);
        timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();

        assert_eq!(coordinator.active_workers(), 0);
        assert_eq!(coordinator.aggregator().window_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_writes_leftovers() {
        let (dir, coordinator) = setup(20, 50).await;
        coordinator.aggregator().insert(7, Bucket::Buffer, "left".into());
        coordinator.drain().await.unwrap();
        coordinator.drain().await.unwrap();
        assert_eq!(report(&dir), "0:\n+7\t\tleft\t\t\t\n");
        assert_eq!(coordinator.stats().flushes, 1);
    }
}
