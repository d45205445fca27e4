//! Count-down latch used for the drainer's milestones.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// One-shot gate that opens once its count reaches zero.
#[derive(Debug)]
pub struct Latch {
    count: Mutex<usize>,
    opened: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            opened: Condvar::new(),
        }
    }

    /// A latch that is already open.
    pub fn open() -> Self {
        Self::new(0)
    }

    /// Decrement the count, opening the latch when it hits zero.
    ///
    /// Counting down an open latch has no effect.
    pub fn count_down(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        if *count > 0 {
            *count -= 1;
            if *count == 0 {
                self.opened.notify_all();
            }
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self) -> bool {
        self.count() == 0
    }

    /// Block until the latch opens.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = self
                .opened
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the latch opens or `timeout` elapses; returns whether it opened.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = self
                .opened
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_count_down_opens() {
        let latch = Latch::new(2);
        assert!(!latch.is_open());
        latch.count_down();
        assert_eq!(latch.count(), 1);
        latch.count_down();
        assert!(latch.is_open());
        latch.count_down();
        assert_eq!(latch.count(), 0);
    }

    #[test]
    fn test_wait_timeout_expires() {
        let latch = Latch::new(1);
        assert!(!latch.wait_timeout(Duration::from_millis(10)));
        assert!(Latch::open().wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_waiter_released_from_other_thread() {
        let latch = Arc::new(Latch::new(1));
        let waiter = {
            let latch = latch.clone();
            thread::spawn(move || latch.wait())
        };
        thread::sleep(Duration::from_millis(10));
        latch.count_down();
        waiter.join().unwrap();
    }
}
