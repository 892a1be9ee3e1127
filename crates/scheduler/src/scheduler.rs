//! Job scheduler implementation
//!
//! The queue and the active-key registry share one mutex. It is held only
//! for bookkeeping (enqueue, dequeue, cancel, complete) and never while an
//! executor runs. Workers waiting for eligible work park on a condition
//! variable that every enqueue signals.

use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::priority::{Job, JobPriority, PriorityQueue, QueuedJob};
use serde::Serialize;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Returned by `enqueue`
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub key: String,
    pub sequence: u64,
    pub token: CancellationToken,
}

/// Job scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Records currently in the queue, including cancelled ones not yet reached
    pub queue_size: usize,

    /// Keys with a live (submitted, not completed) job
    pub active_count: usize,

    /// Last sequence number handed out
    pub sequence: u64,

    /// Total jobs submitted
    pub jobs_submitted: u64,

    /// Submissions that cancelled an older job with the same key
    pub jobs_superseded: u64,

    /// Jobs reported complete by workers
    pub jobs_completed: u64,

    /// Cancelled records dropped when popped
    pub jobs_discarded: u64,
}

struct SchedulerState {
    queue: PriorityQueue,
    active: CancellationRegistry,
    stats: SchedulerStats,
    closed: bool,
}

impl SchedulerState {
    fn push(&mut self, job: Job) -> JobHandle {
        self.stats.sequence += 1;
        let sequence = self.stats.sequence;
        let key = job.key().to_string();

        if self.closed {
            let token = CancellationToken::new();
            token.cancel();
            debug!(key = %key, "scheduler closed, job dropped");
            return JobHandle {
                key,
                sequence,
                token,
            };
        }

        let (token, superseded) = self.active.supersede(&key, sequence);
        if superseded {
            self.stats.jobs_superseded += 1;
            debug!(key = %key, "superseded older job");
        }

        debug!(key = %key, priority = ?job.priority(), sequence, "enqueue");
        self.stats.jobs_submitted += 1;
        self.queue.push(QueuedJob {
            job,
            sequence,
            token: token.clone(),
        });

        JobHandle {
            key,
            sequence,
            token,
        }
    }

    /// Pop the best job at or above `min_priority`, dropping cancelled records
    fn pop_eligible(&mut self, min_priority: JobPriority) -> Option<QueuedJob> {
        loop {
            if self.queue.peek()?.job.priority() < min_priority {
                return None;
            }
            let queued = self.queue.pop()?;
            if queued.token.is_cancelled() {
                self.stats.jobs_discarded += 1;
                debug!(key = %queued.job.key(), sequence = queued.sequence, "discard cancelled job");
                continue;
            }
            return Some(queued);
        }
    }
}

/// Job scheduler with per-key deduplication
///
/// Submitting a key that already has a live job cancels the older job;
/// the newest request for a resource always wins. Cancelled jobs stay in
/// the queue until a worker reaches them and are then discarded without
/// running.
///
/// # Example
///
/// ```
/// use pageview_scheduler::{Job, JobPriority, JobScheduler};
///
/// let scheduler = JobScheduler::new();
///
/// let old = scheduler.enqueue(Job::page("book", 5, "005.jpg", JobPriority::Preload));
/// let new = scheduler.enqueue(Job::page("book", 5, "005.jpg", JobPriority::CurrentPage));
/// assert!(old.token.is_cancelled());
///
/// let next = scheduler.try_dequeue(JobPriority::Thumbnail).unwrap();
/// assert_eq!(next.sequence, new.sequence);
/// scheduler.complete(next.job.key(), next.sequence);
/// ```
pub struct JobScheduler {
    state: Mutex<SchedulerState>,
    available: Condvar,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                queue: PriorityQueue::new(),
                active: CancellationRegistry::new(),
                stats: SchedulerStats::default(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit a job
    ///
    /// Cancels any live job with the same key, registers a fresh token for
    /// the key and wakes waiting workers.
    pub fn enqueue(&self, job: Job) -> JobHandle {
        let handle = self.lock().push(job);
        self.available.notify_all();
        handle
    }

    /// Submit several jobs under one lock acquisition
    pub fn enqueue_batch(&self, jobs: Vec<Job>) -> Vec<JobHandle> {
        let handles = {
            let mut state = self.lock();
            jobs.into_iter().map(|job| state.push(job)).collect()
        };
        self.available.notify_all();
        handles
    }

    /// Wait for a job with `priority >= min_priority`
    ///
    /// Blocks until one is available. Returns `None` only once the
    /// scheduler has been closed.
    pub fn dequeue(&self, min_priority: JobPriority) -> Option<QueuedJob> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(queued) = state.pop_eligible(min_priority) {
                return Some(queued);
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like `dequeue`, but gives up after `timeout`
    pub fn dequeue_timeout(
        &self,
        min_priority: JobPriority,
        timeout: Duration,
    ) -> Option<QueuedJob> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(queued) = state.pop_eligible(min_priority) {
                return Some(queued);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            state = self
                .available
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Pop an eligible job without waiting
    pub fn try_dequeue(&self, min_priority: JobPriority) -> Option<QueuedJob> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.pop_eligible(min_priority)
    }

    /// Cancel every live job whose key starts with `prefix`
    ///
    /// The queue is left untouched; the cancelled records are dropped when
    /// a worker reaches them. Returns the number of jobs cancelled.
    pub fn cancel_by_prefix(&self, prefix: &str) -> usize {
        let cancelled = self.lock().active.cancel_prefix(prefix);
        if cancelled > 0 {
            debug!(prefix, cancelled, "cancel by prefix");
        }
        cancelled
    }

    /// Cancel every live job and empty the queue
    pub fn cancel_all(&self) -> usize {
        let mut state = self.lock();
        state.queue.clear();
        let cancelled = state.active.cancel_all();
        debug!(cancelled, "cancel all");
        cancelled
    }

    /// Mark a job finished, whatever its outcome
    ///
    /// Releases the key's bookkeeping so an identical request afterwards is
    /// treated as fresh. The entry is released only if it still belongs to
    /// `sequence`.
    pub fn complete(&self, key: &str, sequence: u64) -> bool {
        let mut state = self.lock();
        state.stats.jobs_completed += 1;
        state.active.release(key, sequence)
    }

    /// Close the scheduler
    ///
    /// Cancels everything and releases all workers blocked in `dequeue`.
    /// Later submissions are returned already cancelled.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.queue.clear();
            state.active.cancel_all();
        }
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Check whether `key` has a live job
    pub fn has_job(&self, key: &str) -> bool {
        self.lock().active.contains(key)
    }

    /// Current token of a live key
    pub fn token_for(&self, key: &str) -> Option<CancellationToken> {
        self.lock().active.get(key)
    }

    /// Number of records in the queue
    pub fn pending_jobs(&self) -> usize {
        self.lock().queue.len()
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let state = self.lock();
        let mut stats = state.stats.clone();
        stats.queue_size = state.queue.len();
        stats.active_count = state.active.len();
        stats
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn page(container: &str, index: usize, priority: JobPriority) -> Job {
        Job::page(container, index, format!("{:03}.jpg", index), priority)
    }

    #[test]
    fn test_scheduler_basic() {
        let scheduler = JobScheduler::new();
        assert_eq!(scheduler.pending_jobs(), 0);

        let handle = scheduler.enqueue(page("A", 0, JobPriority::CurrentPage));
        assert_eq!(scheduler.pending_jobs(), 1);
        assert!(!handle.token.is_cancelled());
        assert!(scheduler.has_job("page:A:0"));

        let queued = scheduler.try_dequeue(JobPriority::Thumbnail).unwrap();
        assert_eq!(queued.sequence, handle.sequence);
        assert!(queued.token.same_as(&handle.token));

        assert!(scheduler.complete("page:A:0", queued.sequence));
        assert!(!scheduler.has_job("page:A:0"));

        let stats = scheduler.stats();
        assert_eq!(stats.jobs_submitted, 1);
        assert_eq!(stats.jobs_completed, 1);
        assert_eq!(stats.active_count, 0);
    }

    #[test]
    fn test_newer_request_supersedes_older() {
        let scheduler = JobScheduler::new();

        let preload = scheduler.enqueue(page("A", 5, JobPriority::Preload));
        let current = scheduler.enqueue(page("A", 5, JobPriority::CurrentPage));

        assert!(preload.token.is_cancelled());
        assert!(!current.token.is_cancelled());
        assert_eq!(scheduler.stats().active_count, 1);
        assert_eq!(scheduler.stats().jobs_superseded, 1);

        // Only the second submission is ever handed out
        let queued = scheduler.try_dequeue(JobPriority::Thumbnail).unwrap();
        assert_eq!(queued.sequence, current.sequence);
        assert_eq!(queued.job.priority(), JobPriority::CurrentPage);
        assert!(scheduler.try_dequeue(JobPriority::Thumbnail).is_none());
        assert_eq!(scheduler.stats().jobs_discarded, 1);
    }

    #[test]
    fn test_at_most_one_live_token_per_key() {
        let scheduler = JobScheduler::new();

        let handles: Vec<JobHandle> = (0..10)
            .map(|_| scheduler.enqueue(page("A", 1, JobPriority::Preload)))
            .collect();

        let live = handles.iter().filter(|h| !h.token.is_cancelled()).count();
        assert_eq!(live, 1);
        assert!(!handles.last().unwrap().token.is_cancelled());
    }

    #[test]
    fn test_dequeue_respects_priority_floor() {
        let scheduler = JobScheduler::new();

        scheduler.enqueue(Job::thumbnail("A", 0, "000.jpg"));
        scheduler.enqueue(page("A", 1, JobPriority::Preload));

        assert!(scheduler.try_dequeue(JobPriority::CurrentPage).is_none());
        assert!(scheduler
            .dequeue_timeout(JobPriority::CurrentPage, Duration::from_millis(20))
            .is_none());

        let queued = scheduler.try_dequeue(JobPriority::Preload).unwrap();
        assert_eq!(queued.job.priority(), JobPriority::Preload);
        assert!(scheduler.try_dequeue(JobPriority::Preload).is_none());

        let queued = scheduler.try_dequeue(JobPriority::Thumbnail).unwrap();
        assert_eq!(queued.job.priority(), JobPriority::Thumbnail);
    }

    #[test]
    fn test_fifo_within_same_priority() {
        let scheduler = JobScheduler::new();

        scheduler.enqueue(page("A", 1, JobPriority::Preload));
        scheduler.enqueue(page("A", 2, JobPriority::Preload));
        scheduler.enqueue(page("A", 3, JobPriority::Preload));

        let keys: Vec<String> = std::iter::from_fn(|| scheduler.try_dequeue(JobPriority::Thumbnail))
            .map(|q| q.job.key().to_string())
            .collect();
        assert_eq!(keys, vec!["page:A:1", "page:A:2", "page:A:3"]);
    }

    #[test]
    fn test_cancel_by_prefix() {
        let scheduler = JobScheduler::new();

        let a1 = scheduler.enqueue(page("A", 1, JobPriority::Preload));
        let a2 = scheduler.enqueue(page("A", 2, JobPriority::Preload));
        let b1 = scheduler.enqueue(page("B", 1, JobPriority::Preload));

        assert_eq!(scheduler.cancel_by_prefix("page:A:"), 2);
        assert!(a1.token.is_cancelled());
        assert!(a2.token.is_cancelled());
        assert!(!b1.token.is_cancelled());

        // Queue is untouched until workers reach the records
        assert_eq!(scheduler.pending_jobs(), 3);
        let queued = scheduler.try_dequeue(JobPriority::Thumbnail).unwrap();
        assert_eq!(queued.job.key(), "page:B:1");
        assert_eq!(scheduler.pending_jobs(), 0);
    }

    #[test]
    fn test_late_completion_keeps_successor() {
        let scheduler = JobScheduler::new();

        let first = scheduler.enqueue(page("A", 1, JobPriority::Preload));
        let running = scheduler.try_dequeue(JobPriority::Thumbnail).unwrap();
        assert_eq!(running.sequence, first.sequence);

        let second = scheduler.enqueue(page("A", 1, JobPriority::CurrentPage));
        assert!(running.token.is_cancelled());

        // The superseded job finishes after the new one was registered
        assert!(!scheduler.complete("page:A:1", first.sequence));
        assert!(scheduler.has_job("page:A:1"));
        assert!(scheduler
            .token_for("page:A:1")
            .unwrap()
            .same_as(&second.token));
    }

    #[test]
    fn test_complete_makes_next_request_fresh() {
        let scheduler = JobScheduler::new();

        let first = scheduler.enqueue(page("A", 1, JobPriority::CurrentPage));
        let queued = scheduler.try_dequeue(JobPriority::Thumbnail).unwrap();
        scheduler.complete(queued.job.key(), queued.sequence);

        let second = scheduler.enqueue(page("A", 1, JobPriority::CurrentPage));
        assert!(!first.token.is_cancelled());
        assert!(!second.token.is_cancelled());
        assert_eq!(scheduler.stats().jobs_superseded, 0);
    }

    #[test]
    fn test_dequeue_wakes_on_enqueue() {
        let scheduler = Arc::new(JobScheduler::new());
        let waiter = {
            let scheduler = scheduler.clone();
            thread::spawn(move || scheduler.dequeue(JobPriority::CurrentPage))
        };

        thread::sleep(Duration::from_millis(30));
        scheduler.enqueue(page("A", 0, JobPriority::Preload));
        scheduler.enqueue(page("A", 1, JobPriority::CurrentPage));

        let queued = waiter.join().unwrap().unwrap();
        assert_eq!(queued.job.key(), "page:A:1");
        assert_eq!(scheduler.pending_jobs(), 1);
    }

    #[test]
    fn test_close_releases_waiters() {
        let scheduler = Arc::new(JobScheduler::new());
        let waiter = {
            let scheduler = scheduler.clone();
            thread::spawn(move || scheduler.dequeue(JobPriority::Thumbnail))
        };

        thread::sleep(Duration::from_millis(30));
        scheduler.close();

        assert!(waiter.join().unwrap().is_none());
        assert!(scheduler.is_closed());

        let handle = scheduler.enqueue(page("A", 0, JobPriority::CurrentPage));
        assert!(handle.token.is_cancelled());
        assert_eq!(scheduler.pending_jobs(), 0);
    }

    #[test]
    fn test_cancel_all() {
        let scheduler = JobScheduler::new();

        let h1 = scheduler.enqueue(page("A", 0, JobPriority::CurrentPage));
        let h2 = scheduler.enqueue(Job::scan("B"));

        assert_eq!(scheduler.cancel_all(), 2);
        assert!(h1.token.is_cancelled());
        assert!(h2.token.is_cancelled());
        assert_eq!(scheduler.pending_jobs(), 0);
        assert_eq!(scheduler.stats().active_count, 0);
    }

    #[test]
    fn test_enqueue_batch() {
        let scheduler = JobScheduler::new();

        let handles = scheduler.enqueue_batch(vec![
            page("A", 1, JobPriority::Preload),
            page("A", 2, JobPriority::Preload),
        ]);

        assert_eq!(handles.len(), 2);
        assert!(handles[0].sequence < handles[1].sequence);
        assert_eq!(scheduler.stats().jobs_submitted, 2);
    }
}
