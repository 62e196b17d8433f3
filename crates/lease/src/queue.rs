//! Delaying work queue of distinct string keys.
//!
//! Semantics:
//! - A key is queued at most once, however many times it is added.
//! - A key added while a worker holds it is parked, and re-queued by `done`.
//! - `add_after` keeps one timer per key; the earlier fire time wins.
//! - `get` blocks until a key is ready or the queue is shut down.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::clock::deadline;

fn deadline_after(delay: Duration) -> Instant {
    deadline(Instant::now(), delay)
}

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    /// Pending fire time per delayed key.
    waiting: HashMap<String, Instant>,
    /// Timer heap; entries whose instant no longer matches `waiting` are stale.
    timers: BinaryHeap<Reverse<(Instant, String)>>,
    shutting_down: bool,
}

impl Inner {
    fn add(&mut self, key: String) -> bool {
        if self.shutting_down || self.dirty.contains(&key) {
            return false;
        }
        self.waiting.remove(&key);
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        true
    }

    /// Moves due timers onto the queue; returns the next pending fire time.
    fn fire_due(&mut self, now: Instant) -> Option<Instant> {
        while let Some(Reverse((at, _))) = self.timers.peek() {
            if *at > now {
                return Some(*at);
            }
            let Some(Reverse((at, key))) = self.timers.pop() else {
                break;
            };
            if self.waiting.get(&key) == Some(&at) {
                self.waiting.remove(&key);
                self.add(key);
            }
        }
        None
    }
}

/// Blocking FIFO of distinct keys with delayed insertion.
#[derive(Debug, Default)]
pub struct DelayingQueue {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl DelayingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `key` now. Adding a key that is already queued is a no-op.
    pub fn add(&self, key: impl Into<String>) {
        if self.lock().add(key.into()) {
            // `sleep` shares the condvar, so a single wakeup could be lost on it.
            self.cond.notify_all();
        }
    }

    /// Queue `key` no earlier than `delay` from now.
    pub fn add_after(&self, key: impl Into<String>, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let key = key.into();
        let at = deadline_after(delay);
        let mut inner = self.lock();
        if inner.shutting_down || inner.dirty.contains(&key) {
            return;
        }
        if let Some(existing) = inner.waiting.get(&key) {
            if *existing <= at {
                return;
            }
        }
        inner.waiting.insert(key.clone(), at);
        inner.timers.push(Reverse((at, key)));
        drop(inner);

        // Wake the worker so it can shorten its wait if this timer is earliest.
        self.cond.notify_all();
    }

    /// Block until a key is ready. Returns `None` once the queue is shut down.
    ///
    /// The returned key stays in the processing set until `done` is called.
    pub fn get(&self) -> Option<String> {
        let mut inner = self.lock();
        loop {
            if inner.shutting_down {
                return None;
            }
            let next_timer = inner.fire_due(Instant::now());
            if let Some(key) = inner.queue.pop_front() {
                inner.dirty.remove(&key);
                inner.processing.insert(key.clone());
                return Some(key);
            }

            inner = match next_timer {
                Some(at) => {
                    let timeout = at.saturating_duration_since(Instant::now());
                    self.cond
                        .wait_timeout(inner, timeout)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.cond.wait(inner).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Mark processing of `key` finished; a key re-added meanwhile is queued.
    pub fn done(&self, key: &str) {
        let mut inner = self.lock();
        inner.processing.remove(key);
        if inner.dirty.contains(key) && !inner.shutting_down {
            inner.queue.push_back(key.to_string());
            drop(inner);
            self.cond.notify_all();
        }
    }

    /// Stop accepting keys and release every blocked `get`.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.cond.notify_all();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Keys ready to be handed out (excludes delayed and in-flight keys).
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys waiting on a timer.
    pub fn delayed_len(&self) -> usize {
        self.lock().waiting.len()
    }

    /// Sleep for `duration`, waking early on shutdown.
    ///
    /// Returns `false` if the queue was shut down before the time elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let until = deadline_after(duration);
        let mut inner = self.lock();
        loop {
            if inner.shutting_down {
                return false;
            }
            let now = Instant::now();
            if now >= until {
                return true;
            }
            inner = self
                .cond
                .wait_timeout(inner, until - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn add_is_idempotent() {
        let q = DelayingQueue::new();
        q.add("a");
        q.add("a");
        q.add("b");

        assert_eq!(q.len(), 2);
        assert_eq!(q.get().as_deref(), Some("a"));
        assert_eq!(q.get().as_deref(), Some("b"));
        assert!(q.is_empty());
    }

    #[test]
    fn key_added_during_processing_is_requeued_on_done() {
        let q = DelayingQueue::new();
        q.add("a");
        let key = q.get().unwrap();

        q.add("a");
        assert!(q.is_empty(), "in-flight key must not be handed out twice");

        q.done(&key);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().as_deref(), Some("a"));
    }

    #[test]
    fn done_without_readd_drops_key() {
        let q = DelayingQueue::new();
        q.add("a");
        let key = q.get().unwrap();
        q.done(&key);

        assert!(q.is_empty());
    }

    #[test]
    fn add_after_fires_later() {
        let q = DelayingQueue::new();
        let start = Instant::now();
        q.add_after("a", Duration::from_millis(50));
        assert!(q.is_empty());
        assert_eq!(q.delayed_len(), 1);

        assert_eq!(q.get().as_deref(), Some("a"));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(q.delayed_len(), 0);
    }

    #[test]
    fn add_after_keeps_earliest_fire_time() {
        let q = DelayingQueue::new();
        let start = Instant::now();
        q.add_after("a", Duration::from_secs(30));
        q.add_after("a", Duration::from_millis(20));
        q.add_after("a", Duration::from_secs(60));

        assert_eq!(q.delayed_len(), 1);
        assert_eq!(q.get().as_deref(), Some("a"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn add_supersedes_pending_timer() {
        let q = DelayingQueue::new();
        q.add_after("a", Duration::from_secs(30));
        q.add("a");

        assert_eq!(q.delayed_len(), 0);
        assert_eq!(q.get().as_deref(), Some("a"));
    }

    #[test]
    fn shut_down_releases_blocked_get() {
        let q = Arc::new(DelayingQueue::new());
        let worker = {
            let q = q.clone();
            thread::spawn(move || q.get())
        };

        thread::sleep(Duration::from_millis(20));
        q.shut_down();

        assert_eq!(worker.join().unwrap(), None);
        q.add("late");
        assert!(q.is_empty());
    }

    #[test]
    fn sleep_wakes_on_shutdown() {
        let q = Arc::new(DelayingQueue::new());
        let sleeper = {
            let q = q.clone();
            thread::spawn(move || q.sleep(Duration::from_secs(30)))
        };

        thread::sleep(Duration::from_millis(20));
        q.shut_down();

        assert!(!sleeper.join().unwrap());
    }

    #[test]
    fn add_reaches_getter_while_another_thread_sleeps() {
        let q = Arc::new(DelayingQueue::new());
        let sleeper = {
            let q = q.clone();
            thread::spawn(move || q.sleep(Duration::from_secs(30)))
        };
        let (tx, rx) = std::sync::mpsc::channel();
        let getter = {
            let q = q.clone();
            thread::spawn(move || {
                let key = q.get();
                let _ = tx.send(key.clone());
                key
            })
        };

        thread::sleep(Duration::from_millis(20));
        q.add("a");

        let got = rx.recv_timeout(Duration::from_secs(5));
        q.shut_down();
        assert_eq!(got, Ok(Some("a".to_string())));
        assert_eq!(getter.join().unwrap().as_deref(), Some("a"));
        assert!(!sleeper.join().unwrap());
    }

    #[test]
    fn sleep_runs_to_completion() {
        let q = DelayingQueue::new();
        let start = Instant::now();
        assert!(q.sleep(Duration::from_millis(15)));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
