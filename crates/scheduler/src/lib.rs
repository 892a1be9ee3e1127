//! Pageview Scheduler Library
//!
//! Priority job scheduler with per-key deduplication, cooperative
//! cancellation and a banded worker pool.
//!
//! Jobs are ordered by priority (urgent container scans, the current page,
//! preloads, thumbnails) and executed in priority order with FIFO ordering
//! within each priority level. At most one live job exists per key: a new
//! submission for a key cancels the older one.
//!
//! # Example
//!
//! ```
//! use pageview_scheduler::{Job, JobPriority, JobScheduler};
//!
//! let scheduler = JobScheduler::new();
//!
//! let handle = scheduler.enqueue(Job::page("book", 0, "001.jpg", JobPriority::CurrentPage));
//!
//! if let Some(queued) = scheduler.try_dequeue(JobPriority::Thumbnail) {
//!     // Executors poll queued.token.is_cancelled() while working
//!     scheduler.complete(queued.job.key(), queued.sequence);
//! }
//!
//! // Cancel everything belonging to a container that is being closed
//! scheduler.cancel_by_prefix("page:book:");
//! assert!(!handle.token.is_cancelled());
//! ```

mod cancel;
mod priority;
mod scheduler;
mod worker;

// Re-export public API
pub use cancel::{CancellationRegistry, CancellationToken};
pub use priority::{
    page_prefix, scan_key, thumbnail_prefix, Job, JobCategory, JobError, JobKind, JobOutput,
    JobPriority, JobResult, PriorityQueue, QueuedJob,
};
pub use scheduler::{JobHandle, JobScheduler, SchedulerStats};
pub use worker::{JobCompleted, JobExecutor, WorkerPool, WorkerPoolConfig};
