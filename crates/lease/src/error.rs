//! Engine error model.
//!
//! Work failures are not errors here; they travel back as a `WorkOutcome`.
//! These cover construction and startup only.

use thiserror::Error;

/// Invalid engine configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("lease duration must be greater than zero")]
    ZeroLeaseDuration,

    #[error("retry interval must be greater than zero")]
    ZeroRetryInterval,

    #[error("backoff base delay must be greater than zero")]
    ZeroBackoffBase,

    #[error("backoff factor must be a finite value >= 1.0, got {0}")]
    InvalidFactor(f64),

    #[error("backoff jitter must be a finite value >= 0.0, got {0}")]
    InvalidJitter(f64),
}

/// Failure to build or start an engine.
#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to spawn coordinator thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("a coordinator has already been started for this engine")]
    AlreadyRunning,
}
