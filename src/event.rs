use std::time::{Duration, Instant};
use parking_lot::{Condvar, Mutex};

/// Counting wake-up event.
///
/// Each `signal()` bumps a counter and wakes the waiters. A waiter first
/// samples `value()`, then blocks in `wait_*` until the counter moves away
/// from the sampled value. Sampling before the condition is checked means
/// a signal that lands between the check and the wait is never lost.
///
/// The writer thread sleeps on one of these between commit cycles, and
/// every stream has one that `close_file` waits on.
pub struct Event {
    count: Mutex<u64>,
    cond: Condvar,
}

impl Event {
    pub const fn new() -> Self {
        Self {
            count: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Current counter value.
    pub fn value(&self) -> u64 {
        *self.count.lock()
    }

    pub fn signal(&self) {
        let mut count = self.count.lock();
        *count = count.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Blocks until the counter differs from `seen`.
    pub fn wait(&self, seen: u64) {
        let mut count = self.count.lock();
        while *count == seen {
            self.cond.wait(&mut count);
        }
    }

    /// Blocks until the counter differs from `seen` or `timeout` elapses.
    ///
    /// # Returns
    ///
    /// `true` if the event was signalled, `false` on timeout.
    /// A timeout too large to represent as a deadline waits without one.
    pub fn wait_timeout(&self, seen: u64, timeout: Duration) -> bool {
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => {
                self.wait(seen);
                return true;
            }
        };
        let mut count = self.count.lock();
        while *count == seen {
            if self.cond.wait_until(&mut count, deadline).timed_out() {
                return *count != seen;
            }
        }
        true
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signal_before_wait_is_not_lost() {
        let event = Event::new();
        let seen = event.value();
        event.signal();
        assert!(event.wait_timeout(seen, Duration::from_millis(1)));
        event.wait(seen);
    }

    #[test]
    fn test_wait_times_out() {
        let event = Event::new();
        let start = Instant::now();
        assert!(!event.wait_timeout(event.value(), Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_cross_thread_wakeup() {
        let event = Arc::new(Event::new());
        let seen = event.value();
        let signaller = {
            let event = event.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                event.signal();
            })
        };
        assert!(event.wait_timeout(seen, Duration::from_secs(5)));
        signaller.join().unwrap();
        assert_eq!(event.value(), seen + 1);
    }

    #[test]
    fn test_unbounded_timeout_waits_for_signal() {
        let event = Arc::new(Event::new());
        let seen = event.value();
        let signaller = {
            let event = event.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                event.signal();
            })
        };
        assert!(event.wait_timeout(seen, Duration::MAX));
        signaller.join().unwrap();
    }
}
