//! `writerlease`: lease-based write coordination between replicas.
//!
//! Several replicas of a controller may all want to perform the same
//! expensive, side-effecting write for a resource key. Rather than consult a
//! lock service, each replica infers who holds write authority from the
//! outcome of its own writes:
//!
//! - A write that wins uncontested extends this replica's lease (`Leader`).
//! - A write that loses, or sees another writer, releases it (`Follower`),
//!   and the replica holds back further writes with exponential backoff.
//!
//! ## Components
//!
//! - `Backoff`: capped, jittered delay per losing step
//! - `DelayingQueue`: distinct keys, immediate or delayed, blocking `get`
//! - `WriterLease`: work registry, lease state and the single coordinator loop

pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod lease;
pub mod queue;
pub mod registry;
mod signal;
pub mod state;

pub use backoff::Backoff;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{FollowerWait, LeaseConfig};
pub use error::{ConfigError, LeaseError};
pub use lease::{LeaseHandle, WriterLease};
pub use queue::DelayingQueue;
pub use registry::{WorkFn, WorkOutcome};
pub use state::{LeaseSnapshot, Phase, WorkResult};
