use conveyor_core::BlockingQueueConfig;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

struct State<T> {
    items: VecDeque<T>,
    /// Cleared once by `unblock`; never set again.
    open: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    /// 0 means unbounded.
    capacity: usize,
}

impl<T> Shared<T> {
    #[inline]
    fn has_room(&self, len: usize) -> bool {
        self.capacity == 0 || len < self.capacity
    }
}

/// Optionally bounded FIFO queue with all access guarded by one mutex.
///
/// Supports any number of producers and consumers. Consumers may block in
/// [`take`](Self::take) / [`take_timeout`](Self::take_timeout) until an element
/// arrives. Cloning yields another handle to the same queue.
pub struct BlockingQueue<T> {
    inner: Arc<Shared<T>>,
}

impl<T> Clone for BlockingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    /// Unbounded queue.
    pub fn new() -> Self {
        Self::bounded(0)
    }

    /// Queue holding at most `capacity` elements; `0` means unbounded.
    pub fn bounded(capacity: usize) -> Self {
        if capacity == 0 {
            debug!("Created unbounded blocking queue");
        } else {
            debug!("Created blocking queue with capacity {}", capacity);
        }
        Self {
            inner: Arc::new(Shared {
                state: Mutex::new(State {
                    items: VecDeque::new(),
                    open: true,
                }),
                not_empty: Condvar::new(),
                capacity,
            }),
        }
    }

    pub fn from_config(config: &BlockingQueueConfig) -> Self {
        if config.is_bounded() {
            Self::bounded(config.capacity as usize)
        } else {
            Self::new()
        }
    }

    /// Append `value` at the tail, handing it back if the queue is full.
    ///
    /// Wakes every waiting consumer when the queue goes from empty to non-empty.
    pub fn emplace(&self, value: T) -> Result<(), T> {
        let mut state = self.inner.state.lock();
        let len = state.items.len();
        if !self.inner.has_room(len) {
            trace!("Blocking queue full at {} elements, rejecting", len);
            return Err(value);
        }
        state.items.push_back(value);
        if len == 0 {
            // notify_one can strand a waiter that loses the re-check race
            self.inner.not_empty.notify_all();
        }
        Ok(())
    }

    /// Append elements from `values` until it runs out or the queue is full.
    ///
    /// Returns how many were appended. No element is pulled from the iterator
    /// once the queue is full, so passing `iter.by_ref()` leaves the rest with
    /// the caller. The iterator runs under the queue lock and must not touch
    /// this queue; on an unbounded queue it must also be finite.
    pub fn emplace_range<I>(&self, values: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let mut values = values.into_iter();
        let mut state = self.inner.state.lock();
        let was_empty = state.items.is_empty();
        let mut count = 0;
        while self.inner.has_room(state.items.len()) {
            match values.next() {
                Some(value) => {
                    state.items.push_back(value);
                    count += 1;
                }
                None => break,
            }
        }
        if was_empty && count > 0 {
            self.inner.not_empty.notify_all();
        }
        count
    }

    /// Remove the head element without waiting.
    pub fn poll(&self) -> Option<T> {
        self.inner.state.lock().items.pop_front()
    }

    /// Remove the head element, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout, or right away once the queue is unblocked
    /// and empty.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        self.take_with(Some(timeout))
    }

    /// Like [`take_timeout`](Self::take_timeout); `None` waits without a bound
    /// but still returns `None` once the queue is unblocked and empty.
    pub fn take_with(&self, timeout: Option<Duration>) -> Option<T> {
        let mut state = self.inner.state.lock();
        if let Some(value) = state.items.pop_front() {
            return Some(value);
        }

        // A deadline past the clock's range is treated as no deadline.
        match timeout.and_then(|t| Instant::now().checked_add(t)) {
            Some(deadline) => {
                while state.items.is_empty() && state.open {
                    if self
                        .inner
                        .not_empty
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
            }
            None => {
                while state.items.is_empty() && state.open {
                    self.inner.not_empty.wait(&mut state);
                }
            }
        }
        state.items.pop_front()
    }

    /// Remove the head element, waiting as long as it takes.
    ///
    /// `unblock` does not release this call; a queue that stays empty keeps
    /// the caller waiting. Use [`take_with`](Self::take_with) to observe
    /// unblocking.
    pub fn take(&self) -> T {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(value) = state.items.pop_front() {
                return value;
            }
            self.inner.not_empty.wait(&mut state);
        }
    }

    /// Drain everything currently queued into `visitor`, in FIFO order.
    ///
    /// The content is detached under the lock and visited after releasing it,
    /// so elements emplaced meanwhile are left for the next caller.
    pub fn consume<F>(&self, mut visitor: F) -> usize
    where
        F: FnMut(T),
    {
        let drained = std::mem::take(&mut self.inner.state.lock().items);
        let count = drained.len();
        for value in drained {
            visitor(value);
        }
        count
    }

    /// Release every consumer waiting on an empty queue, now and from now on.
    ///
    /// Producers and `poll` are unaffected. Calling it again is a no-op.
    pub fn unblock(&self) {
        let mut state = self.inner.state.lock();
        if state.open {
            state.open = false;
            debug!(
                "Blocking queue unblocked with {} elements queued",
                state.items.len()
            );
        }
        self.inner.not_empty.notify_all();
    }

    pub fn is_unblocked(&self) -> bool {
        !self.inner.state.lock().open
    }

    /// Run `f` on the head element while holding the lock.
    pub fn front<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.inner.state.lock().items.front().map(f)
    }

    pub fn front_cloned(&self) -> Option<T>
    where
        T: Clone,
    {
        self.front(T::clone)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().items.is_empty()
    }

    /// Always `false` for an unbounded queue.
    pub fn is_full(&self) -> bool {
        let len = self.inner.state.lock().items.len();
        !self.inner.has_room(len)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    /// `None` for an unbounded queue.
    pub fn capacity(&self) -> Option<usize> {
        (self.inner.capacity != 0).then_some(self.inner.capacity)
    }
}

impl<T> fmt::Debug for BlockingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("BlockingQueue")
            .field("len", &state.items.len())
            .field("capacity", &self.capacity())
            .field("open", &state.open)
            .finish()
    }
}
