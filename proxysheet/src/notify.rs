//! Image cache change notifications.
//!
//! Every image cache mutation appends one [`ImageCacheChange`] to a bounded
//! [`ChangeQueue`]. Consumers pull batches with [`ChangeQueue::drain`]; an
//! optional observer is woken when new data is available.
//!
//! # Wake coalescing
//!
//! The wake is a level signal: at most one call per coalescing window, no
//! matter how many events arrive inside it. The first event after a quiet
//! period wakes immediately. Events arriving within the window of the
//! previous wake schedule a single delayed wake at the window's end, so the
//! last burst of events is never left unsignalled.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, trace};

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A URL was inserted.
    Cached,
    /// A URL was removed.
    Removed,
}

impl ChangeKind {
    /// Numeric value used at the C boundary.
    pub fn as_u8(self) -> u8 {
        match self {
            ChangeKind::Cached => 1,
            ChangeKind::Removed => 2,
        }
    }
}

/// One image cache mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCacheChange {
    pub kind: ChangeKind,
    pub url: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl ImageCacheChange {
    /// Stamp a change with the current wall-clock time.
    pub fn now(kind: ChangeKind, url: impl Into<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            kind,
            url: url.into(),
            timestamp_ms,
        }
    }
}

/// Wake callback installed by an observer.
pub type WakeFn = Arc<dyn Fn() + Send + Sync>;

struct WakeState {
    observer: Option<WakeFn>,
    last_wake: Option<Instant>,
}

/// Bounded queue of image cache changes with a coalesced observer wake.
pub struct ChangeQueue {
    events: Mutex<VecDeque<ImageCacheChange>>,
    capacity: usize,
    dropped: AtomicU64,
    wake: Mutex<WakeState>,
    wake_scheduled: AtomicBool,
    window: Duration,
    runtime: Option<Handle>,
}

impl ChangeQueue {
    /// Create a queue holding at most `capacity` events.
    ///
    /// Without a runtime handle there is nothing to run delayed wakes on, so
    /// every signal wakes the observer immediately.
    pub fn new(capacity: usize, window: Duration, runtime: Option<Handle>) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            wake: Mutex::new(WakeState {
                observer: None,
                last_wake: None,
            }),
            wake_scheduled: AtomicBool::new(false),
            window,
            runtime,
        }
    }

    /// Append an event and signal the observer.
    pub fn push(self: &Arc<Self>, change: ImageCacheChange) {
        self.push_all(std::iter::once(change));
    }

    /// Append a batch of events with a single signal.
    pub fn push_all(self: &Arc<Self>, changes: impl IntoIterator<Item = ImageCacheChange>) {
        let mut pushed = 0usize;
        {
            let mut events = self.events.lock();
            for change in changes {
                if events.len() >= self.capacity {
                    events.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                trace!(url = %change.url, kind = ?change.kind, "Queued image cache change");
                events.push_back(change);
                pushed += 1;
            }
        }

        if pushed > 0 {
            self.signal();
        }
    }

    /// Remove and return everything queued since the last drain.
    pub fn drain(&self) -> Vec<ImageCacheChange> {
        self.events.lock().drain(..).collect()
    }

    /// Hand the pending events to `build` and remove them only if it
    /// succeeds. Pushes wait until `build` returns.
    pub fn drain_with<T, E>(
        &self,
        build: impl FnOnce(&[ImageCacheChange]) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut events = self.events.lock();
        let built = build(events.make_contiguous())?;
        events.clear();
        Ok(built)
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Install the observer, replacing any previous one.
    pub fn register(&self, wake: WakeFn) {
        let mut state = self.wake.lock();
        let replaced = state.observer.replace(wake).is_some();
        debug!(replaced, "Registered image cache observer");
    }

    /// Remove the observer. Returns whether one was installed.
    pub fn unregister(&self) -> bool {
        let removed = self.wake.lock().observer.take().is_some();
        if removed {
            debug!("Unregistered image cache observer");
        }
        removed
    }

    pub fn has_observer(&self) -> bool {
        self.wake.lock().observer.is_some()
    }

    fn signal(self: &Arc<Self>) {
        if self.wake_scheduled.swap(true, Ordering::AcqRel) {
            // A wake is already on its way and will cover this event.
            return;
        }

        let delay = {
            let state = self.wake.lock();
            state
                .last_wake
                .map(|last| self.window.saturating_sub(last.elapsed()))
                .unwrap_or(Duration::ZERO)
        };

        match (&self.runtime, delay.is_zero()) {
            (Some(handle), false) => {
                let queue = Arc::clone(self);
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.fire();
                });
            }
            _ => self.fire(),
        }
    }

    /// Run the observer on the current thread: the pusher's thread for an
    /// immediate wake, a runtime worker for a delayed one.
    fn fire(&self) {
        let observer = {
            let mut state = self.wake.lock();
            state.last_wake = Some(Instant::now());
            self.wake_scheduled.store(false, Ordering::Release);
            state.observer.clone()
        };

        // Invoked outside the lock so the callback may poll or re-register.
        if let Some(wake) = observer {
            wake();
        }
    }
}
