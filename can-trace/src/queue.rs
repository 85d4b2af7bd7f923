//! Bounded multi-producer frame queue
//!
//! Capture workers push into the queue, a single output worker drains it.
//! A full queue blocks producers (backpressure). Shutdown refuses new items
//! but keeps buffered ones drainable until the queue is empty.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::types::TraceError;

/// Default capacity used by the capture pipeline
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// How long a blocked consumer sleeps before re-checking shutdown
pub const CONSUMER_WAKE_INTERVAL: Duration = Duration::from_millis(50);

/// Returned once the queue has been shut down (and, for consumers, drained)
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queue closed")]
pub struct QueueClosed;

impl From<QueueClosed> for TraceError {
    fn from(_: QueueClosed) -> Self {
        TraceError::QueueClosed
    }
}

struct State<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// Fixed-capacity blocking FIFO
pub struct BoundedQueue<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered items
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an item, blocking while the queue is full.
    ///
    /// Fails without inserting once the queue is shut down, including when
    /// shutdown arrives while blocked.
    pub fn enqueue(&self, item: T) -> Result<(), QueueClosed> {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity && !state.shutdown {
            self.not_full.wait(&mut state);
        }
        if state.shutdown {
            return Err(QueueClosed);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest item, blocking until one is available.
    ///
    /// Returns `QueueClosed` only when the queue is shut down and empty.
    pub fn dequeue(&self) -> Result<T, QueueClosed> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(item);
            }
            if state.shutdown {
                return Err(QueueClosed);
            }
            self.not_empty.wait_for(&mut state, CONSUMER_WAKE_INTERVAL);
        }
    }

    /// Like [`dequeue`](Self::dequeue) but gives up after `timeout`,
    /// returning `Ok(None)`.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Result<Option<T>, QueueClosed> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(Some(item));
            }
            if state.shutdown {
                return Err(QueueClosed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = (deadline - now).min(CONSUMER_WAKE_INTERVAL);
            self.not_empty.wait_for(&mut state, wait);
        }
    }

    /// Non-blocking variant: `Ok(None)` when empty and still open
    pub fn try_dequeue(&self) -> Result<Option<T>, QueueClosed> {
        self.dequeue_timeout(Duration::ZERO)
    }

    /// Refuse further items and wake every waiter. Buffered items stay.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}
