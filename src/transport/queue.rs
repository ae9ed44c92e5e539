//! History-bounded hand-off queue between the publisher and a transport backend.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{History, QosConfig};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    evicted: u64,
}

/// Multi-producer, multi-consumer queue applying a `History` policy on push.
///
/// Under keep-last the oldest entry is evicted once `depth` is reached, so a
/// slow consumer never stalls the producer. Under keep-all nothing is evicted.
pub struct QosQueue<T> {
    inner: Arc<(Mutex<QueueState<T>>, Condvar)>,
    capacity: Option<usize>,
}

impl<T> Clone for QosQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            capacity: self.capacity,
        }
    }
}

impl<T> QosQueue<T> {
    pub fn new(qos: &QosConfig) -> Self {
        let capacity = match qos.history {
            History::KeepLast => Some(qos.depth.max(1)),
            History::KeepAll => None,
        };
        Self {
            inner: Arc::new((
                Mutex::new(QueueState {
                    items: VecDeque::new(),
                    closed: false,
                    evicted: 0,
                }),
                Condvar::new(),
            )),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue an item. Returns it back if the queue has been closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.lock();
        if state.closed {
            return Err(item);
        }
        if let Some(capacity) = self.capacity {
            while state.items.len() >= capacity {
                state.items.pop_front();
                state.evicted += 1;
            }
        }
        state.items.push_back(item);
        drop(state);
        self.inner.1.notify_one();
        Ok(())
    }

    pub fn try_pop(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Wait up to `timeout` for an item. Returns `None` on timeout or once
    /// the queue is closed and drained.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = match self.inner.1.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
    }

    /// Stop accepting items and wake every waiter. Queued items stay poppable.
    pub fn close(&self) {
        self.lock().closed = true;
        self.inner.1.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items discarded by the keep-last policy so far.
    pub fn evicted(&self) -> u64 {
        self.lock().evicted
    }
}
