//! Cancellation tokens and the active-key registry
//!
//! Cancellation is cooperative, never preemptive. A token only stops a job
//! from being *started* (the scheduler drops cancelled jobs when it pops
//! them) or lets a running executor bail out early when it polls
//! `is_cancelled()` at a safe point: between loop iterations, before a
//! blocking read. An executor that never polls runs to completion even
//! after its token was cancelled.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cancellation token for cooperative job cancellation
///
/// A shared flag that can be set exactly once. All clones observe the same
/// state.
///
/// # Example
///
/// ```
/// use pageview_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// // In the executor:
/// // for chunk in chunks {
/// //     if worker_token.is_cancelled() {
/// //         return Err(JobError::Cancelled);
/// //     }
/// //     // ... read chunk ...
/// // }
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel this token
    ///
    /// Idempotent. There is no way back to the non-cancelled state.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if this token (or any clone) has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns true if both tokens share the same flag
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct ActiveEntry {
    sequence: u64,
    token: CancellationToken,
}

/// Map of job key to the token of its newest submission
///
/// Holds at most one entry per key. Registering a key that is already
/// present cancels the previous token first, so at any instant at most one
/// non-cancelled token exists per key.
///
/// Not synchronized on its own; the scheduler keeps it under the same lock
/// as its queue.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    entries: HashMap<String, ActiveEntry>,
}

impl CancellationRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh token for `key`, superseding any existing one
    ///
    /// Returns the new token and whether an older submission was cancelled.
    pub fn supersede(&mut self, key: &str, sequence: u64) -> (CancellationToken, bool) {
        let token = CancellationToken::new();
        let previous = self.entries.insert(
            key.to_string(),
            ActiveEntry {
                sequence,
                token: token.clone(),
            },
        );

        let superseded = match previous {
            Some(old) => {
                old.token.cancel();
                true
            }
            None => false,
        };

        (token, superseded)
    }

    /// Cancel and forget every key starting with `prefix`
    ///
    /// Returns the number of tokens cancelled.
    pub fn cancel_prefix(&mut self, prefix: &str) -> usize {
        let mut cancelled = 0;
        self.entries.retain(|key, entry| {
            if key.starts_with(prefix) {
                entry.token.cancel();
                cancelled += 1;
                false
            } else {
                true
            }
        });
        cancelled
    }

    /// Cancel and forget every registered key
    pub fn cancel_all(&mut self) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            entry.token.cancel();
        }
        count
    }

    /// Release `key` if it is still owned by `sequence`
    ///
    /// A superseded job finishing after its successor was registered must
    /// not erase the successor's entry. Returns `true` if an entry was removed.
    pub fn release(&mut self, key: &str, sequence: u64) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.sequence == sequence => {
                self.entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Get the current token for a key
    pub fn get(&self, key: &str) -> Option<CancellationToken> {
        self.entries.get(key).map(|entry| entry.token.clone())
    }

    /// Check whether a key is registered
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of registered keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
