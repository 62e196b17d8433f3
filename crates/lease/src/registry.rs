//! Pending work per key, last writer wins.

use std::collections::HashMap;
use std::sync::Arc;

use crate::state::WorkResult;

/// What a unit of work reports back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkOutcome {
    pub result: WorkResult,
    /// Run the same work again after the retry interval.
    pub retry: bool,
}

impl WorkOutcome {
    /// Finished; the entry is cleared.
    pub fn done(result: WorkResult) -> Self {
        Self {
            result,
            retry: false,
        }
    }

    /// Not finished; the key is re-queued after the retry interval.
    pub fn retry(result: WorkResult) -> Self {
        Self {
            result,
            retry: true,
        }
    }
}

impl From<(WorkResult, bool)> for WorkOutcome {
    fn from((result, retry): (WorkResult, bool)) -> Self {
        Self { result, retry }
    }
}

/// Caller-supplied unit of work. Opaque to the engine.
pub type WorkFn = Arc<dyn Fn() -> WorkOutcome + Send + Sync>;

struct Entry {
    sequence: u64,
    work: WorkFn,
}

/// Registered work keyed by resource. Guarded by the engine lock.
#[derive(Default)]
pub(crate) struct WorkRegistry {
    next_sequence: u64,
    entries: HashMap<String, Entry>,
}

impl std::fmt::Debug for WorkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkRegistry")
            .field("next_sequence", &self.next_sequence)
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl WorkRegistry {
    /// Register `work` for `key`, replacing any pending entry. Returns the
    /// new sequence number.
    pub(crate) fn insert(&mut self, key: &str, work: WorkFn) -> u64 {
        self.next_sequence += 1;
        let sequence = self.next_sequence;
        self.entries
            .insert(key.to_string(), Entry { sequence, work });
        sequence
    }

    pub(crate) fn get(&self, key: &str) -> Option<(u64, WorkFn)> {
        self.entries
            .get(key)
            .map(|entry| (entry.sequence, entry.work.clone()))
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove `key` only if it still holds `sequence`.
    pub(crate) fn remove_if_current(&mut self, key: &str, sequence: u64) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.sequence == sequence => {
                self.entries.remove(key);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
