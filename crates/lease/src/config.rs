//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::error::ConfigError;

/// How the coordinator waits out a follower's grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowerWait {
    /// Block the coordinator for the remaining time, then re-queue the key.
    /// No other key is processed meanwhile.
    #[default]
    Sleep,
    /// Hand the remaining time to the queue so other keys keep flowing.
    Requeue,
}

/// Configuration for a [`WriterLease`](crate::WriterLease).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Name for logging; distinguishes replicas in shared logs
    pub name: String,
    /// How long a won lease is held, and the cap on follower backoff
    pub lease_duration: Duration,
    /// Delay before re-running work that asked to be retried
    pub retry_interval: Duration,
    /// Follower contention spacing
    pub backoff: Backoff,
    pub follower_wait: FollowerWait,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            name: random_name(),
            lease_duration: Duration::from_secs(60),
            retry_interval: Duration::from_secs(3),
            backoff: Backoff::default(),
            follower_wait: FollowerWait::default(),
        }
    }
}

impl LeaseConfig {
    pub fn new(lease_duration: Duration, retry_interval: Duration) -> Self {
        Self {
            lease_duration,
            retry_interval,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_follower_wait(mut self, follower_wait: FollowerWait) -> Self {
        self.follower_wait = follower_wait;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lease_duration.is_zero() {
            return Err(ConfigError::ZeroLeaseDuration);
        }
        if self.retry_interval.is_zero() {
            return Err(ConfigError::ZeroRetryInterval);
        }
        if self.backoff.base.is_zero() {
            return Err(ConfigError::ZeroBackoffBase);
        }
        if !self.backoff.factor.is_finite() || self.backoff.factor < 1.0 {
            return Err(ConfigError::InvalidFactor(self.backoff.factor));
        }
        if !self.backoff.jitter.is_finite() || self.backoff.jitter < 0.0 {
            return Err(ConfigError::InvalidJitter(self.backoff.jitter));
        }
        Ok(())
    }

    /// Minimum time a follower waits before a newly requested write runs.
    pub(crate) fn follower_floor(&self) -> Duration {
        self.backoff.base.saturating_mul(2)
    }
}

fn random_name() -> String {
    format!("{:08}", rand::random::<u32>() % 100_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = LeaseConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.name.len(), 8);
    }

    #[test]
    fn rejects_zero_durations() {
        let config = LeaseConfig::new(Duration::ZERO, Duration::from_secs(1));
        assert_eq!(config.validate(), Err(ConfigError::ZeroLeaseDuration));

        let config = LeaseConfig::new(Duration::from_secs(1), Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroRetryInterval));
    }

    #[test]
    fn rejects_shrinking_or_nan_backoff() {
        let mut config = LeaseConfig::default();
        config.backoff.factor = 0.5;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFactor(_))));

        let mut config = LeaseConfig::default();
        config.backoff.jitter = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidJitter(_))));
    }

    #[test]
    fn loads_partial_json_over_defaults() {
        let config: LeaseConfig = serde_json::from_str(
            r#"{
                "name": "router-a",
                "lease_duration": { "secs": 30, "nanos": 0 },
                "follower_wait": "requeue",
                "backoff": { "factor": 2.0 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.name, "router-a");
        assert_eq!(config.lease_duration, Duration::from_secs(30));
        assert_eq!(config.retry_interval, Duration::from_secs(3));
        assert_eq!(config.follower_wait, FollowerWait::Requeue);
        assert_eq!(config.backoff.factor, 2.0);
        assert_eq!(config.backoff.base, Duration::from_millis(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn follower_floor_is_twice_base() {
        let config = LeaseConfig::default().with_backoff(Backoff::fixed_factor(
            Duration::from_millis(50),
            2.0,
            3,
        ));
        assert_eq!(config.follower_floor(), Duration::from_millis(100));
    }
}
