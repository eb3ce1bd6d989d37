//! Per-key debouncing
//!
//! Every key owns at most one timer. Registering a key again cancels the
//! previous timer and discards its payload, so the delivered payload is
//! always the most recent one and the delay restarts from the latest
//! registration.

use crate::config::DebounceConfig;
use crate::error::{DelayError, Result};
use crate::Callback;
use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

/// Keyed debounce scheduler
///
/// Timers run as tasks on the tokio runtime captured at construction, so
/// `register`, `cancel` and `flush` may be called from any thread.
///
/// The callback may run concurrently for different keys and must be safe
/// for that. A callback that never returns blocks [`KeyedDebouncer::stop`].
///
/// Dropping the debouncer without calling `stop` leaves armed timers
/// running; they still deliver when they expire.
pub struct KeyedDebouncer<K, V> {
    shared: Arc<Shared<K, V>>,
    delay: Duration,
    capacity: usize,
    runtime: Handle,
    /// One task per armed timer; drained by `stop`
    tracker: TaskTracker,
}

struct Shared<K, V> {
    callback: Callback<V>,
    state: Mutex<State<K, V>>,
}

struct State<K, V> {
    active: bool,
    /// Generation counter distinguishing successive entries for one key
    next_id: u64,
    entries: AHashMap<K, PendingEntry<V>>,
}

struct PendingEntry<V> {
    id: u64,
    slot: Slot<V>,
    flush: Arc<Notify>,
    timer: AbortHandle,
}

/// Armed entries still own their payload. The expiry path takes it and
/// leaves `Firing` behind until the callback returns.
enum Slot<V> {
    Armed(V),
    Firing,
}

impl<V> PendingEntry<V> {
    fn is_armed(&self) -> bool {
        matches!(self.slot, Slot::Armed(_))
    }

    /// Wake the timer immediately; its normal expiry path does the rest
    fn force(&self) -> bool {
        if self.is_armed() {
            self.flush.notify_one();
            true
        } else {
            false
        }
    }
}

impl<K, V> KeyedDebouncer<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    /// Create a debouncer on the current tokio runtime
    ///
    /// Fails with [`DelayError::NoRuntime`] outside a runtime context.
    pub fn new<F>(callback: F, delay: Duration, capacity: usize) -> Result<Self>
    where
        F: Fn(V) + Send + Sync + 'static,
    {
        Self::new_in(Handle::try_current()?, callback, delay, capacity)
    }

    /// Create a debouncer that spawns its timers on `runtime`
    pub fn new_in<F>(runtime: Handle, callback: F, delay: Duration, capacity: usize) -> Result<Self>
    where
        F: Fn(V) + Send + Sync + 'static,
    {
        if capacity == 0 {
            return Err(DelayError::ZeroCapacity);
        }

        Ok(Self {
            shared: Arc::new(Shared {
                callback: Arc::new(callback),
                state: Mutex::new(State {
                    active: true,
                    next_id: 0,
                    entries: AHashMap::with_capacity(capacity.min(1024)),
                }),
            }),
            delay,
            capacity,
            runtime,
            tracker: TaskTracker::new(),
        })
    }

    /// Create a debouncer from configuration
    pub fn from_config<F>(callback: F, config: &DebounceConfig) -> Result<Self>
    where
        F: Fn(V) + Send + Sync + 'static,
    {
        Self::new(callback, config.delay(), config.capacity)
    }

    /// Schedule `payload` for delivery under `key`
    ///
    /// Replaces any pending entry for `key`. Returns `false` without
    /// scheduling anything if the debouncer is stopped, or if `capacity`
    /// distinct keys are already pending and `key` is not one of them.
    pub fn register(&self, key: K, payload: V) -> bool {
        let mut state = self.shared.state.lock();

        if !state.active {
            debug!("Debouncer stopped, dropping registration");
            return false;
        }

        let previous = state.entries.remove(&key);
        match previous {
            Some(previous) => {
                // A firing entry keeps running; its release only matches its own id
                if previous.is_armed() {
                    previous.timer.abort();
                    trace!("Replaced pending entry");
                }
            }
            None if state.entries.len() >= self.capacity => {
                debug!("Debouncer at capacity ({}), dropping registration", self.capacity);
                return false;
            }
            None => {}
        }

        let id = state.next_id;
        state.next_id += 1;

        let flush = Arc::new(Notify::new());
        let timer = self
            .tracker
            .spawn_on(
                expire(
                    Arc::clone(&self.shared),
                    key.clone(),
                    id,
                    self.delay,
                    Arc::clone(&flush),
                ),
                &self.runtime,
            )
            .abort_handle();

        state.entries.insert(
            key,
            PendingEntry {
                id,
                slot: Slot::Armed(payload),
                flush,
                timer,
            },
        );
        true
    }

    /// Cancel the pending entry for `key` before it fires
    ///
    /// Returns `false` if nothing is armed for `key`, including when its
    /// callback is already running.
    pub fn cancel(&self, key: &K) -> bool {
        let mut state = self.shared.state.lock();

        if !state.entries.get(key).map_or(false, PendingEntry::is_armed) {
            return false;
        }

        if let Some(entry) = state.entries.remove(key) {
            entry.timer.abort();
            trace!("Cancelled pending entry");
        }
        true
    }

    /// Number of keys with a live entry, including ones whose callback is running
    pub fn pending(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    /// Whether `key` has a live entry
    pub fn is_pending(&self, key: &K) -> bool {
        self.shared.state.lock().entries.contains_key(key)
    }

    /// Force pending entries to fire now
    ///
    /// An empty `keys` slice forces every armed entry. Returns how many
    /// entries were forced.
    ///
    /// Flushing is asynchronous: each forced timer runs its normal expiry
    /// path on the runtime, so callbacks may not have run when this
    /// returns. Await [`KeyedDebouncer::stop`] to wait for them.
    pub fn flush(&self, keys: &[K]) -> usize {
        let state = self.shared.state.lock();

        let flushed = if keys.is_empty() {
            state.entries.values().filter(|entry| entry.force()).count()
        } else {
            let mut seen = AHashSet::with_capacity(keys.len());
            keys.iter()
                .filter(|key| seen.insert(*key))
                .filter_map(|key| state.entries.get(key))
                .filter(|entry| entry.force())
                .count()
        };

        trace!("Flushed {} pending entries", flushed);
        flushed
    }

    /// Force every armed entry to fire now
    pub fn flush_all(&self) -> usize {
        self.flush(&[])
    }

    /// Stop accepting registrations, flush everything and wait for every
    /// armed timer to fire or be cancelled
    ///
    /// Callbacks already running are never interrupted; this waits for them.
    pub async fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.active {
                state.active = false;
                info!("Stopping debouncer ({} pending)", state.entries.len());
            }
        }

        self.flush_all();
        self.tracker.close();
        self.tracker.wait().await;

        info!("Debouncer stopped");
    }

    pub fn is_active(&self) -> bool {
        self.shared.state.lock().active
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<K: Eq + Hash, V> Shared<K, V> {
    /// Move entry `id` from armed to firing, taking its payload
    fn claim(&self, key: &K, id: u64) -> Option<V> {
        let mut state = self.state.lock();
        let entry = state.entries.get_mut(key).filter(|entry| entry.id == id)?;

        match std::mem::replace(&mut entry.slot, Slot::Firing) {
            Slot::Armed(payload) => Some(payload),
            Slot::Firing => None,
        }
    }

    /// Remove entry `id` if it is still the one mapped to `key`
    fn release(&self, key: &K, id: u64) {
        let mut state = self.state.lock();
        if state.entries.get(key).map_or(false, |entry| entry.id == id) {
            state.entries.remove(key);
        }
    }
}

/// Removes a fired entry once its callback returns or unwinds
struct Release<'a, K: Eq + Hash, V> {
    shared: &'a Shared<K, V>,
    key: &'a K,
    id: u64,
}

impl<K: Eq + Hash, V> Drop for Release<'_, K, V> {
    fn drop(&mut self) {
        self.shared.release(self.key, self.id);
    }
}

/// Timer task body for a single entry
async fn expire<K, V>(
    shared: Arc<Shared<K, V>>,
    key: K,
    id: u64,
    delay: Duration,
    flush: Arc<Notify>,
) where
    K: Eq + Hash,
{
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = flush.notified() => trace!("Timer forced by flush"),
    }

    // Lost the race against cancel or replacement
    let payload = match shared.claim(&key, id) {
        Some(payload) => payload,
        None => return,
    };

    let _release = Release {
        shared: &shared,
        key: &key,
        id,
    };
    (shared.callback)(payload);
}
