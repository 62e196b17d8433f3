//! Follower contention backoff.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff with per-step jitter.
///
/// Governs how long a follower waits before contesting the lease again. The
/// cap is supplied by the caller (the engine uses the lease duration), so a
/// follower never waits longer than a leader would hold the lease.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    /// Delay at step 0
    pub base: Duration,
    /// Multiplier applied per step
    pub factor: f64,
    /// Steps beyond this return the cap directly
    pub steps: u32,
    /// Upper jitter bound as a fraction of the running delay (0.0 = none)
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(20),
            factor: 4.0,
            steps: 5,
            jitter: 0.5,
        }
    }
}

impl Backoff {
    /// Backoff without jitter, useful where delays must be predictable.
    pub fn fixed_factor(base: Duration, factor: f64, steps: u32) -> Self {
        Self {
            base,
            factor,
            steps,
            jitter: 0.0,
        }
    }

    /// Delay for `step`, capped at `cap`, jittered with the thread RNG.
    pub fn delay(&self, step: u32, cap: Duration) -> Duration {
        self.delay_with(step, cap, &mut rand::thread_rng())
    }

    /// Delay for `step`, capped at `cap`, jittered with `rng`.
    ///
    /// Step 0 is `base` as-is. Each further step jitters the running value
    /// uniformly into `[d, d * (1 + jitter)]` and multiplies by `factor`,
    /// returning `cap` as soon as the value exceeds it.
    pub fn delay_with<R: Rng + ?Sized>(&self, step: u32, cap: Duration, rng: &mut R) -> Duration {
        if step > self.steps {
            return cap;
        }
        if step == 0 {
            return self.base;
        }

        // Non-finite jitter would make the range unsampleable.
        let jitter = if self.jitter.is_finite() && self.jitter > 0.0 {
            self.jitter
        } else {
            0.0
        };
        let cap_nanos = cap.as_nanos() as f64;
        let mut nanos = self.base.as_nanos() as f64;
        for _ in 0..step {
            let adjusted = if jitter > 0.0 {
                nanos + nanos * rng.gen_range(0.0..=jitter)
            } else {
                nanos
            };
            nanos = adjusted * self.factor;
            if nanos > cap_nanos {
                return cap;
            }
        }

        Duration::from_nanos(nanos.round() as u64)
    }
}
