//! The write-coordination engine and its coordinator loop.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{FollowerWait, LeaseConfig};
use crate::error::{ConfigError, LeaseError};
use crate::queue::DelayingQueue;
use crate::registry::{WorkFn, WorkOutcome, WorkRegistry};
use crate::signal::OneShot;
use crate::state::{LeaseSnapshot, LeaseState, Phase, WorkResult};

/// Registry and lease state, always read and written together.
#[derive(Debug, Default)]
struct Shared {
    state: LeaseState,
    registry: WorkRegistry,
}

#[derive(Debug)]
struct Inner {
    config: LeaseConfig,
    clock: Arc<dyn Clock>,
    queue: DelayingQueue,
    resolved: OneShot,
    shared: Mutex<Shared>,
    /// Set once a coordinator has been started; never cleared.
    started: AtomicBool,
}

/// Decides which of several replicas performs writes, by observing whether
/// its own writes win.
///
/// Work submitted with [`try_work`](Self::try_work) runs on a single
/// coordinator thread started by [`run`](Self::run) or
/// [`spawn`](Self::spawn). Only the most recent work for a key runs. While
/// this process is a follower, work is held back until the presumed leader's
/// lease runs out.
///
/// Cloning is cheap; clones share the same engine.
#[derive(Debug, Clone)]
pub struct WriterLease {
    inner: Arc<Inner>,
}

impl WriterLease {
    pub fn new(config: LeaseConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build an engine whose lease expiry is measured against `clock`.
    pub fn with_clock(config: LeaseConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                clock,
                queue: DelayingQueue::new(),
                resolved: OneShot::new(),
                shared: Mutex::new(Shared::default()),
                started: AtomicBool::new(false),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.inner.config
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Request `work` for `key`, superseding any work still pending for it.
    ///
    /// Runs as soon as the coordinator gets to it unless this process is a
    /// follower, in which case it waits for the remaining lease and never
    /// less than twice the backoff base.
    pub fn try_work<F, R>(&self, key: impl Into<String>, work: F)
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Into<WorkOutcome>,
    {
        let key = key.into();
        let work: WorkFn = Arc::new(move || -> WorkOutcome { work().into() });

        let mut shared = self.lock();
        let sequence = shared.registry.insert(&key, work);
        if shared.state.phase() == Phase::Follower {
            let remaining = shared.state.remaining(self.inner.clock.now());
            let delay = remaining.max(self.inner.config.follower_floor());
            debug!(
                lease = %self.name(),
                key = %key,
                sequence,
                delay = ?delay,
                "follower deferring work"
            );
            self.inner.queue.add_after(key, delay);
        } else {
            debug!(lease = %self.name(), key = %key, sequence, "queued work");
            self.inner.queue.add(key);
        }
    }

    /// Record that another process was seen writing `key`.
    ///
    /// Pending work for the key is dropped as redundant. A follower also
    /// backs off one more step, since the competitor is evidently alive.
    pub fn extend(&self, key: &str) {
        let mut shared = self.lock();
        if !shared.registry.remove(key) {
            return;
        }
        let now = self.inner.clock.now();
        let lease_duration = self.inner.config.lease_duration;
        if let Some(delay) =
            shared
                .state
                .observe_competitor(now, &self.inner.config.backoff, lease_duration)
        {
            debug!(
                lease = %self.name(),
                key = %key,
                extended_by = ?delay,
                "cleared queued work and extended lease"
            );
        }
    }

    /// Drop pending work for `key`. The lease is unaffected.
    pub fn remove(&self, key: &str) {
        self.lock().registry.remove(key);
    }

    /// Number of keys with pending work.
    pub fn len(&self) -> usize {
        self.lock().registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until the first outcome resolves the election, then report
    /// whether this process is currently the leader.
    pub fn wait(&self) -> bool {
        self.inner.resolved.wait();
        self.snapshot().is_leader()
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns `None` if the election is still undecided.
    pub fn wait_until(&self, timeout: Duration) -> Option<bool> {
        if !self.inner.resolved.wait_timeout(timeout) {
            return None;
        }
        Some(self.snapshot().is_leader())
    }

    /// Whether any outcome has resolved the election yet.
    pub fn is_resolved(&self) -> bool {
        self.inner.resolved.is_fired()
    }

    /// Force the lease to count as expired.
    pub fn expire(&self) {
        self.lock().state.expire();
    }

    pub fn snapshot(&self) -> LeaseSnapshot {
        self.lock().state.snapshot()
    }

    /// Run the coordinator until `stop` yields a value or its sender is
    /// dropped. Work already executing is allowed to finish.
    ///
    /// An engine runs one coordinator in its lifetime: once `run` or
    /// [`spawn`](Self::spawn) has been called on it or any clone, further
    /// calls fail with [`LeaseError::AlreadyRunning`]. The queue stays shut
    /// down after a stop.
    pub fn run(&self, stop: &mpsc::Receiver<()>) -> Result<(), LeaseError> {
        let worker = self.start_worker()?;
        let _ = stop.recv();
        self.inner.queue.shut_down();
        if worker.join().is_err() {
            error!(lease = %self.name(), "coordinator thread panicked");
        }
        Ok(())
    }

    /// Start the coordinator in the background. Same single-start rule as
    /// [`run`](Self::run).
    pub fn spawn(&self) -> Result<LeaseHandle, LeaseError> {
        let worker = self.start_worker()?;
        Ok(LeaseHandle {
            lease: self.clone(),
            join: Some(worker),
        })
    }

    fn start_worker(&self) -> Result<thread::JoinHandle<()>, LeaseError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!(lease = %self.name(), "coordinator already started");
            return Err(LeaseError::AlreadyRunning);
        }
        let lease = self.clone();
        let worker = thread::Builder::new()
            .name(format!("writerlease-{}", self.name()))
            .spawn(move || {
                info!(lease = %lease.name(), "coordinator started");
                while lease.process_next() {}
                info!(lease = %lease.name(), "coordinator stopped");
            });
        match worker {
            Ok(worker) => Ok(worker),
            Err(err) => {
                self.inner.started.store(false, Ordering::SeqCst);
                Err(LeaseError::Spawn(err))
            }
        }
    }

    /// Handle one key from the queue. Returns `false` once shut down.
    fn process_next(&self) -> bool {
        let Some(key) = self.inner.queue.get() else {
            return false;
        };

        let (sequence, work, snapshot) = {
            let shared = self.lock();
            match shared.registry.get(&key) {
                Some((sequence, work)) => (sequence, work, shared.state.snapshot()),
                None => {
                    self.inner.queue.done(&key);
                    return true;
                }
            }
        };

        if snapshot.phase == Phase::Follower {
            let remaining = snapshot.remaining(self.inner.clock.now());
            if !remaining.is_zero() {
                self.defer(&key, remaining);
                return true;
            }
            debug!(lease = %self.name(), key = %key, "lease expired, running work");
        } else {
            debug!(lease = %self.name(), key = %key, phase = %snapshot.phase, "running work");
        }

        let outcome = self.execute(&key, &work);
        self.finish(&key, sequence, outcome);
        true
    }

    /// Hold `key` back until the follower grace period has passed.
    fn defer(&self, key: &str, remaining: Duration) {
        debug!(
            lease = %self.name(),
            key = %key,
            remaining = ?remaining,
            "follower, waiting out lease"
        );
        match self.inner.config.follower_wait {
            FollowerWait::Sleep => {
                if self.inner.queue.sleep(remaining) {
                    self.inner.queue.add(key);
                }
            }
            FollowerWait::Requeue => self.inner.queue.add_after(key, remaining),
        }
        self.inner.queue.done(key);
    }

    fn execute(&self, key: &str, work: &WorkFn) -> WorkOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| work())) {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(lease = %self.name(), key = %key, "work panicked, will retry");
                WorkOutcome::retry(WorkResult::None)
            }
        }
    }

    fn finish(&self, key: &str, sequence: u64, outcome: WorkOutcome) {
        let config = &self.inner.config;
        let mut shared = self.lock();
        let before = shared.state.phase();
        let resolved = shared.state.next_state(
            outcome.result,
            self.inner.clock.now(),
            &config.backoff,
            config.lease_duration,
        );

        if outcome.retry {
            self.inner.queue.add_after(key, config.retry_interval);
        } else {
            shared.registry.remove_if_current(key, sequence);
        }
        self.inner.queue.done(key);

        if resolved {
            self.inner.resolved.fire();
        }

        let snapshot = shared.state.snapshot();
        drop(shared);

        if snapshot.phase != before {
            info!(
                lease = %self.name(),
                from = %before,
                to = %snapshot.phase,
                "lease phase changed"
            );
        }
        debug!(
            lease = %self.name(),
            key = %key,
            result = ?outcome.result,
            retry = outcome.retry,
            phase = %snapshot.phase,
            retry_step = snapshot.retry_step,
            "work finished"
        );
    }
}

/// Handle to a coordinator started with [`WriterLease::spawn`].
#[derive(Debug)]
pub struct LeaseHandle {
    lease: WriterLease,
    join: Option<thread::JoinHandle<()>>,
}

impl LeaseHandle {
    pub fn lease(&self) -> &WriterLease {
        &self.lease
    }

    /// Stop the coordinator and wait for it to exit.
    pub fn shutdown(mut self) {
        self.lease.inner.queue.shut_down();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
