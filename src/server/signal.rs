//! Disconnect Signal
//!
//! The completion signal shared between a server's accept loop and every
//! connection handler it spawns. A handler fires it exactly once when its
//! receive loop exits; the accept loop waits on it while the pool is full.
//!
//! Waiters always re-check a predicate under the signal's own lock, and
//! [`notify`](DisconnectSignal::notify) takes that same lock, so neither a
//! spurious wakeup nor a notification racing the predicate check is lost.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A predicate-based wake-up shared by a pool and its handlers.
#[derive(Debug, Default)]
pub struct DisconnectSignal {
    /// Number of notifications so far
    generation: Mutex<u64>,
    changed: Condvar,
}

impl DisconnectSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        self.generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wakes every waiter so it re-evaluates its predicate.
    pub fn notify(&self) {
        let mut generation = self.lock();
        *generation += 1;
        self.changed.notify_all();
    }

    /// Number of notifications issued so far.
    pub fn generation(&self) -> u64 {
        *self.lock()
    }

    /// Blocks until `ready` returns true.
    ///
    /// `ready` is evaluated while the signal's lock is held; it must not
    /// call back into this signal.
    pub fn wait_until<F>(&self, mut ready: F)
    where
        F: FnMut() -> bool,
    {
        let mut guard = self.lock();
        while !ready() {
            guard = self
                .changed
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait_until`](Self::wait_until) with an upper bound.
    ///
    /// Returns the final value of `ready`.
    pub fn wait_until_timeout<F>(&self, timeout: Duration, mut ready: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait_until(ready);
            return true;
        };
        let mut guard = self.lock();
        loop {
            if ready() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .changed
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_notify_counts_generations() {
        let signal = DisconnectSignal::new();
        assert_eq!(signal.generation(), 0);
        signal.notify();
        signal.notify();
        assert_eq!(signal.generation(), 2);
    }

    #[test]
    fn test_wait_until_wakes_on_notify() {
        let signal = Arc::new(DisconnectSignal::new());
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let signal = Arc::clone(&signal);
            let flag = Arc::clone(&flag);
            thread::spawn(move || signal.wait_until(|| flag.load(Ordering::SeqCst)))
        };

        thread::sleep(Duration::from_millis(50));
        flag.store(true, Ordering::SeqCst);
        signal.notify();

        waiter.join().unwrap();
    }

    #[test]
    fn test_wait_until_timeout_expires() {
        let signal = DisconnectSignal::new();
        assert!(!signal.wait_until_timeout(Duration::from_millis(30), || false));
        assert!(signal.wait_until_timeout(Duration::from_millis(30), || true));
    }

    #[test]
    fn test_wait_until_timeout_with_unbounded_duration() {
        let signal = Arc::new(DisconnectSignal::new());
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let signal = Arc::clone(&signal);
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                signal.wait_until_timeout(Duration::MAX, || flag.load(Ordering::SeqCst))
            })
        };

        thread::sleep(Duration::from_millis(50));
        flag.store(true, Ordering::SeqCst);
        signal.notify();

        assert!(waiter.join().unwrap());
    }
}
