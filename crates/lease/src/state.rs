//! Lease phase tracking and the outcome-driven transition function.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::clock::deadline;

/// Where this process believes it stands with respect to the lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No outcome has resolved leadership yet.
    #[default]
    Election,
    /// This process holds the lease and may write immediately.
    Leader,
    /// Another process is presumed to hold the lease.
    Follower,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Election => "election",
            Phase::Leader => "leader",
            Phase::Follower => "follower",
        };
        f.write_str(name)
    }
}

/// What a unit of work learned about write authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkResult {
    /// Nothing was learned; the lease is left alone.
    #[default]
    None,
    /// The write succeeded uncontested; this process holds the lease.
    Extend,
    /// The write failed or another writer was observed; step back.
    Release,
}

/// Read-only copy of the lease state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseSnapshot {
    pub phase: Phase,
    /// `None` once expired (or before any outcome).
    pub expires: Option<Instant>,
    pub retry_step: u32,
}

impl LeaseSnapshot {
    pub fn is_leader(&self) -> bool {
        self.phase == Phase::Leader
    }

    /// Time left on the lease as seen from `now`.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires
            .map_or(Duration::ZERO, |at| at.saturating_duration_since(now))
    }
}

/// Mutable lease state. Callers hold the engine lock around every method.
#[derive(Debug, Clone, Default)]
pub(crate) struct LeaseState {
    phase: Phase,
    expires: Option<Instant>,
    tick: u32,
}

impl LeaseState {
    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn snapshot(&self) -> LeaseSnapshot {
        LeaseSnapshot {
            phase: self.phase,
            expires: self.expires,
            retry_step: self.tick,
        }
    }

    pub(crate) fn remaining(&self, now: Instant) -> Duration {
        self.snapshot().remaining(now)
    }

    pub(crate) fn expire(&mut self) {
        self.expires = None;
    }

    /// Apply a work outcome. Returns `true` if this outcome resolved the
    /// initial election.
    pub(crate) fn next_state(
        &mut self,
        result: WorkResult,
        now: Instant,
        backoff: &Backoff,
        lease_duration: Duration,
    ) -> bool {
        let resolving = self.phase == Phase::Election;
        match result {
            WorkResult::Extend => {
                if self.phase != Phase::Leader {
                    self.tick = 0;
                    self.phase = Phase::Leader;
                }
                self.expires = Some(deadline(now, lease_duration));
            }
            WorkResult::Release => {
                if self.phase == Phase::Follower {
                    self.tick = self.tick.saturating_add(1);
                } else {
                    self.tick = 0;
                    self.phase = Phase::Follower;
                }
                let delay = backoff.delay(self.tick, lease_duration);
                self.expires = Some(deadline(now, delay));
            }
            WorkResult::None => return false,
        }
        resolving
    }

    /// A competitor was observed writing. Followers push their expiry out by
    /// the next backoff step; other phases are unaffected.
    pub(crate) fn observe_competitor(
        &mut self,
        now: Instant,
        backoff: &Backoff,
        lease_duration: Duration,
    ) -> Option<Duration> {
        if self.phase != Phase::Follower {
            return None;
        }
        self.tick = self.tick.saturating_add(1);
        let delay = backoff.delay(self.tick, lease_duration);
        self.expires = Some(deadline(now, delay));
        Some(delay)
    }
}
