//! One-shot broadcast signal.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A latch that fires once and stays fired.
///
/// Any number of threads may wait on it; all are released by the first
/// `fire` and later waits return immediately.
#[derive(Debug, Default)]
pub(crate) struct OneShot {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl OneShot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub(crate) fn fire(&self) -> bool {
        let mut fired = self.fired.lock().unwrap_or_else(PoisonError::into_inner);
        if *fired {
            return false;
        }
        *fired = true;
        self.cond.notify_all();
        true
    }

    pub(crate) fn is_fired(&self) -> bool {
        *self.fired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn wait(&self) {
        let fired = self.fired.lock().unwrap_or_else(PoisonError::into_inner);
        let _fired = self
            .cond
            .wait_while(fired, |fired| !*fired)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Wait up to `timeout`. Returns whether the signal has fired.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let mut fired = self.fired.lock().unwrap_or_else(PoisonError::into_inner);
        while !*fired {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return false;
            }
            fired = self
                .cond
                .wait_timeout(fired, timeout - elapsed)
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
    fn fires_once() {
        let signal = OneShot::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
    }

    #[test]
    fn wait_timeout_expires_when_unfired() {
        let signal = OneShot::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn releases_every_waiter() {
        let signal = Arc::new(OneShot::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                thread::spawn(move || signal.wait_timeout(Duration::from_secs(10)))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        signal.fire();

        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
        signal.wait();
    }
}
