//! Thread-Safe Blocking Queue
//!
//! A FIFO guarded by one mutex and one condition variable. It hands items
//! from a producer thread (a receive loop) to a consumer thread chosen by
//! the owner (e.g. a UI loop).
//!
//! ## Shutdown Semantics
//!
//! ```text
//!  push(a) push(b) shutdown()  pop() -> a   pop() -> b   pop() -> None
//!                                 └── drain ──┘            └ end-of-stream
//! ```
//!
//! Shutdown is one-way. Items queued before (or after) it are never dropped;
//! poppers drain them first and only then observe end-of-stream.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Why a [`BlockingQueue::pop_timeout`] returned without an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopTimeoutError {
    /// The duration elapsed while the queue stayed empty
    Timeout,
    /// The queue was shut down and is fully drained
    Closed,
}

/// Why a [`BlockingQueue::try_pop`] returned without an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryPopError {
    /// Nothing queued right now
    Empty,
    /// The queue was shut down and is fully drained
    Closed,
}

impl fmt::Display for PopTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PopTimeoutError::Timeout => f.write_str("timed out waiting on an empty queue"),
            PopTimeoutError::Closed => f.write_str("queue is closed"),
        }
    }
}

impl fmt::Display for TryPopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryPopError::Empty => f.write_str("queue is empty"),
            TryPopError::Closed => f.write_str("queue is closed"),
        }
    }
}

impl std::error::Error for PopTimeoutError {}
impl std::error::Error for TryPopError {}

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A blocking, shutdown-aware FIFO queue.
///
/// The queue is not `Clone`; share it behind an `Arc`.
#[derive(Debug)]
pub struct BlockingQueue<T> {
    /// Buffered items plus the closed flag
    state: Mutex<State<T>>,
    /// Signalled on push (one waiter) and on shutdown (all waiters)
    available: Condvar,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    /// Creates an empty, open queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an item to the tail and wakes one waiting popper.
    ///
    /// Never blocks beyond the critical section. Pushing after shutdown is
    /// allowed; the item is buffered and will be drained.
    pub fn push(&self, item: T) {
        let mut state = self.lock();
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
    }

    /// Removes the oldest item, blocking until one is available.
    ///
    /// Returns `None` once the queue is shut down and empty (end-of-stream).
    pub fn pop(&self) -> Option<T> {
        let mut state = self
            .available
            .wait_while(self.lock(), |s| s.items.is_empty() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        state.items.pop_front()
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    ///
    /// A timeout too large to represent as a deadline waits without bound.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, PopTimeoutError> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.pop().ok_or(PopTimeoutError::Closed);
        };
        let mut state = self.lock();

        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            if state.closed {
                return Err(PopTimeoutError::Closed);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PopTimeoutError::Timeout);
            }

            let (guard, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Removes the oldest item without waiting.
    pub fn try_pop(&self) -> Result<T, TryPopError> {
        let mut state = self.lock();
        match state.items.pop_front() {
            Some(item) => Ok(item),
            None if state.closed => Err(TryPopError::Closed),
            None => Err(TryPopError::Empty),
        }
    }

    /// Closes the queue permanently and wakes every waiter. Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.closed = true;
        drop(state);
        self.available.notify_all();
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let q = BlockingQueue::new();
        for i in 0..100 {
            q.push(i);
        }
        for i in 0..100 {
            assert_eq!(q.pop(), Some(i));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_try_pop() {
        let q = BlockingQueue::new();
        assert_eq!(q.try_pop(), Err(TryPopError::Empty));

        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.try_pop(), Ok(1));
        assert_eq!(q.try_pop(), Ok(2));
        assert_eq!(q.try_pop(), Ok(3));
        assert_eq!(q.try_pop(), Err(TryPopError::Empty));
    }

    #[test]
    fn test_shutdown_drains_then_ends() {
        let q = BlockingQueue::new();
        q.push("a");
        q.push("b");
        q.push("c");
        q.shutdown();

        assert_eq!(q.pop(), Some("a"));
        assert_eq!(q.pop(), Some("b"));
        assert_eq!(q.pop(), Some("c"));
        assert_eq!(q.pop(), None);
        assert_eq!(q.try_pop(), Err(TryPopError::Closed));
    }

    #[test]
    fn test_timeout_is_not_shutdown() {
        let q: BlockingQueue<u32> = BlockingQueue::new();
        let start = Instant::now();
        assert_eq!(
            q.pop_timeout(Duration::from_millis(50)),
            Err(PopTimeoutError::Timeout)
        );
        assert!(start.elapsed() >= Duration::from_millis(50));

        q.shutdown();
        assert_eq!(
            q.pop_timeout(Duration::from_millis(50)),
            Err(PopTimeoutError::Closed)
        );
    }

    #[test]
    fn test_pop_timeout_returns_item() {
        let q = BlockingQueue::new();
        q.push(7);
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), Ok(7));
    }

    #[test]
    fn test_pop_timeout_with_unbounded_duration() {
        let q = BlockingQueue::new();
        q.push(1);
        assert_eq!(q.pop_timeout(Duration::MAX), Ok(1));

        q.shutdown();
        assert_eq!(q.pop_timeout(Duration::MAX), Err(PopTimeoutError::Closed));
    }

    #[test]
    fn test_push_after_shutdown_is_buffered() {
        let q = BlockingQueue::new();
        q.shutdown();
        q.shutdown();
        q.push(9);
        assert!(q.is_closed());
        assert_eq!(q.pop(), Some(9));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_shutdown_wakes_blocked_popper() {
        let q: Arc<BlockingQueue<u32>> = Arc::new(BlockingQueue::new());
        let popper = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        };

        thread::sleep(Duration::from_millis(50));
        q.shutdown();

        assert_eq!(popper.join().unwrap(), None);
    }

    #[test]
    fn test_blocked_popper_receives_push() {
        let q = Arc::new(BlockingQueue::new());
        let popper = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        };

        thread::sleep(Duration::from_millis(50));
        q.push(42u32);

        assert_eq!(popper.join().unwrap(), Some(42));
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let q = Arc::new(BlockingQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..250 {
                        q.push(p * 1000 + i);
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        q.shutdown();

        let mut seen = Vec::new();
        while let Some(item) = q.pop() {
            seen.push(item);
        }
        assert_eq!(seen.len(), 1000);

        // Each producer's items stay in push order.
        for p in 0..4 {
            let mine: Vec<_> = seen.iter().filter(|&&v| v / 1000 == p).collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
