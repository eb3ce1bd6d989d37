//! Windowed batching
//!
//! Items accumulate in a bounded buffer. A sweeper snapshots the buffer
//! every `max_delay - min_delay` into a batch, and a dispatcher hands each
//! batch to its own task which waits a further `min_delay` before invoking
//! the callback for every item in arrival order. An item therefore waits
//! at most about `max_delay` before delivery.

use crate::config::WindowConfig;
use crate::error::{DelayError, Result};
use crate::Callback;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

/// Extra queue slots beyond the number of batches one window can hold
const QUEUE_HEADROOM: usize = 5;

/// Upper bound on queued batches, well under tokio's channel limit
const MAX_QUEUE_DEPTH: usize = 4096;

/// Windowed batch scheduler
///
/// Inactive until [`BatchWindower::start`]. The callback may be invoked
/// concurrently from different batches and must be safe for that.
pub struct BatchWindower<T> {
    shared: Arc<Shared<T>>,
    sweep_interval: Duration,
    settle_delay: Duration,
    queue_depth: usize,
    runtime: Handle,
    /// Sweeper, dispatcher and per-batch tasks
    tracker: TaskTracker,
    /// Cancels the sweeper of the current run
    shutdown: Mutex<Option<CancellationToken>>,
}

struct Shared<T> {
    callback: Callback<T>,
    capacity: usize,
    buffer: Mutex<Buffer<T>>,
}

struct Buffer<T> {
    active: bool,
    items: Vec<T>,
}

impl<T> Shared<T> {
    /// Snapshot and clear the live buffer
    fn take(&self) -> Vec<T> {
        std::mem::take(&mut self.buffer.lock().items)
    }

    fn deliver(&self, batch: Vec<T>) {
        for item in batch {
            (self.callback)(item);
        }
    }
}

impl<T: Send + 'static> BatchWindower<T> {
    /// Create a windower on the current tokio runtime
    ///
    /// Requires `max_delay > min_delay`; the difference is the sweep
    /// interval and `min_delay` is the settle delay (zero is allowed).
    pub fn new<F>(
        callback: F,
        buffer_capacity: usize,
        min_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::new_in(Handle::try_current()?, callback, buffer_capacity, min_delay, max_delay)
    }

    /// Create a windower that spawns its tasks on `runtime`
    pub fn new_in<F>(
        runtime: Handle,
        callback: F,
        buffer_capacity: usize,
        min_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        if max_delay <= min_delay {
            return Err(DelayError::InvalidWindow {
                min: min_delay,
                max: max_delay,
            });
        }
        if buffer_capacity == 0 {
            return Err(DelayError::ZeroCapacity);
        }

        let sweep_interval = max_delay - min_delay;
        let queue_depth = usize::try_from(max_delay.as_nanos() / sweep_interval.as_nanos())
            .unwrap_or(usize::MAX)
            .saturating_add(QUEUE_HEADROOM)
            .min(MAX_QUEUE_DEPTH);

        Ok(Self {
            shared: Arc::new(Shared {
                callback: Arc::new(callback),
                capacity: buffer_capacity,
                buffer: Mutex::new(Buffer {
                    active: false,
                    items: Vec::with_capacity(buffer_capacity.min(1024)),
                }),
            }),
            sweep_interval,
            settle_delay: min_delay,
            queue_depth,
            runtime,
            tracker: TaskTracker::new(),
            shutdown: Mutex::new(None),
        })
    }

    /// Create a windower from configuration
    pub fn from_config<F>(callback: F, config: &WindowConfig) -> Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::new(
            callback,
            config.buffer_capacity,
            config.min_delay(),
            config.max_delay(),
        )
    }

    /// Launch the sweeper and dispatcher and start accepting items
    ///
    /// No-op if already running. A stopped windower can be started again.
    pub fn start(&self) {
        let mut shutdown = self.shutdown.lock();
        let mut buffer = self.shared.buffer.lock();
        if buffer.active {
            return;
        }

        let token = CancellationToken::new();
        let (batch_tx, batch_rx) = mpsc::channel(self.queue_depth);

        self.tracker.reopen();
        self.tracker.spawn_on(
            sweep(
                Arc::clone(&self.shared),
                self.sweep_interval,
                batch_tx,
                token.clone(),
            ),
            &self.runtime,
        );
        self.tracker.spawn_on(
            dispatch(
                Arc::clone(&self.shared),
                self.settle_delay,
                batch_rx,
                self.tracker.clone(),
            ),
            &self.runtime,
        );

        *shutdown = Some(token);
        buffer.active = true;

        info!(
            "Batch windower started (sweep interval: {:?}, settle delay: {:?})",
            self.sweep_interval, self.settle_delay
        );
    }

    /// Buffer `item` for the next batch
    ///
    /// Returns `false` if the windower is not running or the buffer is full.
    pub fn exec(&self, item: T) -> bool {
        let mut buffer = self.shared.buffer.lock();

        if !buffer.active {
            debug!("Batch windower inactive, dropping item");
            return false;
        }
        if buffer.items.len() >= self.shared.capacity {
            debug!("Batch buffer full ({}), dropping item", self.shared.capacity);
            return false;
        }

        buffer.items.push(item);
        true
    }

    /// Deliver every buffered item now, in the calling context
    ///
    /// Bypasses the settle delay. Batches already taken by the sweeper are
    /// not waited for. Returns the number of items delivered.
    pub fn flush(&self) -> usize {
        let batch = self.shared.take();
        let count = batch.len();
        if count > 0 {
            trace!("Flushing {} buffered items", count);
        }
        self.shared.deliver(batch);
        count
    }

    /// Stop accepting items, deliver what is buffered and wait for every
    /// batch in flight to finish
    pub async fn stop(&self) {
        let token = {
            let mut shutdown = self.shutdown.lock();
            self.shared.buffer.lock().active = false;
            shutdown.take()
        };

        if let Some(token) = token {
            info!("Stopping batch windower");
            token.cancel();
        }

        let flushed = self.flush();

        // The dispatcher keeps spawning until the sweeper drops its sender,
        // so the tracker cannot drain early.
        self.tracker.close();
        self.tracker.wait().await;

        info!("Batch windower stopped ({} flushed on shutdown)", flushed);
    }

    /// Number of items waiting for the next sweep
    pub fn buffered(&self) -> usize {
        self.shared.buffer.lock().items.len()
    }

    pub fn is_active(&self) -> bool {
        self.shared.buffer.lock().active
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }
}

/// Periodically move the buffer into a batch until cancelled
async fn sweep<T>(
    shared: Arc<Shared<T>>,
    period: Duration,
    batch_tx: mpsc::Sender<Vec<T>>,
    shutdown: CancellationToken,
) {
    // A period past the end of the clock never ticks
    let first_tick = match Instant::now().checked_add(period) {
        Some(first_tick) => first_tick,
        None => {
            shutdown.cancelled().await;
            debug!("Sweeper exited");
            return;
        }
    };

    let mut ticker = interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let batch = shared.take();
                if batch.is_empty() {
                    continue;
                }

                trace!("Swept batch of {} items", batch.len());
                if batch_tx.send(batch).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!("Sweeper exited");
}

/// Spawn a settle-then-deliver task per batch until the sweeper hangs up
async fn dispatch<T: Send + 'static>(
    shared: Arc<Shared<T>>,
    settle_delay: Duration,
    mut batch_rx: mpsc::Receiver<Vec<T>>,
    tracker: TaskTracker,
) {
    while let Some(batch) = batch_rx.recv().await {
        let shared = Arc::clone(&shared);
        tracker.spawn(async move {
            if !settle_delay.is_zero() {
                tokio::time::sleep(settle_delay).await;
            }
            shared.deliver(batch);
        });
    }

    debug!("Dispatcher exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    type Record = Arc<Mutex<Vec<u32>>>;

    fn recording(capacity: usize, min_ms: u64, max_ms: u64) -> (BatchWindower<u32>, Record) {
        let record: Record = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&record);
        let windower = BatchWindower::new(
            move |item| sink.lock().push(item),
            capacity,
            Duration::from_millis(min_ms),
            Duration::from_millis(max_ms),
        )
        .unwrap();
        (windower, record)
    }

    #[tokio::test]
    async fn test_rejects_empty_window() {
        let result = BatchWindower::<u32>::new(
            |_| {},
            10,
            Duration::from_millis(50),
            Duration::from_millis(50),
        );
        assert!(matches!(result, Err(DelayError::InvalidWindow { .. })));

        let result = BatchWindower::<u32>::new(
            |_| {},
            10,
            Duration::from_millis(60),
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(DelayError::InvalidWindow { .. })));
    }

    #[tokio::test]
    async fn test_rejects_zero_capacity() {
        let result = BatchWindower::<u32>::new(|_| {}, 0, Duration::ZERO, Duration::from_millis(10));
        assert!(matches!(result, Err(DelayError::ZeroCapacity)));
    }

    #[tokio::test]
    async fn test_derived_timings() {
        let (windower, _) = recording(10, 10, 60);

        assert_eq!(windower.sweep_interval(), Duration::from_millis(50));
        assert_eq!(windower.settle_delay(), Duration::from_millis(10));
        assert_eq!(windower.queue_depth, 1 + QUEUE_HEADROOM);
    }

    #[tokio::test]
    async fn test_extreme_window_bounds_start_and_stop() {
        // Sweep interval of 1ns against a huge max delay
        let min_delay = Duration::from_secs(10_000_000_000);
        let windower = BatchWindower::<u32>::new(
            |_| {},
            10,
            min_delay,
            min_delay + Duration::from_nanos(1),
        )
        .unwrap();
        assert_eq!(windower.queue_depth, MAX_QUEUE_DEPTH);

        windower.start();
        assert!(windower.is_active());
        windower.stop().await;

        // Sweep interval that overflows the clock
        let windower =
            BatchWindower::<u32>::new(|_| {}, 10, Duration::ZERO, Duration::MAX).unwrap();
        assert_eq!(windower.queue_depth, 1 + QUEUE_HEADROOM);

        windower.start();
        windower.stop().await;
    }

    #[tokio::test]
    async fn test_exec_before_start_is_dropped() {
        let (windower, record) = recording(10, 10, 60);

        assert!(!windower.is_active());
        assert!(!windower.exec(1));
        assert_eq!(windower.buffered(), 0);

        windower.stop().await;
        assert!(record.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_then_settle() {
        let (windower, record) = recording(10, 10, 60);
        windower.start();

        windower.exec(1);
        windower.exec(2);
        windower.exec(3);

        // Swept at 50ms, delivered at 60ms
        sleep(Duration::from_millis(55)).await;
        assert_eq!(windower.buffered(), 0);
        assert!(record.lock().is_empty());

        sleep(Duration::from_millis(10)).await;
        assert_eq!(*record.lock(), vec![1, 2, 3]);

        windower.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_settle_delay() {
        let (windower, record) = recording(10, 0, 20);
        windower.start();

        windower.exec(7);
        sleep(Duration::from_millis(25)).await;

        assert_eq!(*record.lock(), vec![7]);
        windower.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_capacity() {
        let (windower, record) = recording(3, 10, 60);
        windower.start();

        let accepted = (0..5).filter(|&item| windower.exec(item)).count();
        assert_eq!(accepted, 3);
        assert_eq!(windower.buffered(), 3);

        windower.stop().await;
        assert_eq!(*record.lock(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_is_synchronous() {
        let (windower, record) = recording(10, 10, 60);
        windower.start();

        windower.exec(4);
        windower.exec(5);

        assert_eq!(windower.flush(), 2);
        assert_eq!(*record.lock(), vec![4, 5]);
        assert_eq!(windower.flush(), 0);

        windower.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_settling_batch() {
        let (windower, record) = recording(10, 1_000, 1_050);
        windower.start();

        windower.exec(1);
        sleep(Duration::from_millis(60)).await;
        // Swept but still settling
        assert!(record.lock().is_empty());

        windower.exec(2);
        windower.stop().await;

        let mut delivered = record.lock().clone();
        delivered.sort_unstable();
        assert_eq!(delivered, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let (windower, record) = recording(10, 10, 60);

        windower.start();
        windower.exec(1);
        windower.stop().await;
        assert!(!windower.exec(2));

        windower.start();
        assert!(windower.is_active());
        windower.exec(3);
        sleep(Duration::from_millis(70)).await;
        windower.stop().await;

        assert_eq!(*record.lock(), vec![1, 3]);
    }
}
