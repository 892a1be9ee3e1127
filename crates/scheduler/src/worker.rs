//! Worker pool for parallel job execution.
//!
//! Each worker thread is bound to a priority floor at construction and
//! repeatedly pulls jobs at or above that floor from the scheduler. Giving
//! a subset of workers a high floor reserves capacity for foreground work:
//! an endless stream of thumbnails can never occupy those workers, while the
//! remaining workers still drain background work when nothing urgent is
//! pending.

use crate::{CancellationToken, Job, JobCategory, JobError, JobPriority, JobResult, JobScheduler};
use std::io;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Runs the work described by a job.
///
/// Implementations must return a `JobError` instead of panicking. They
/// should poll `token.is_cancelled()` at safe points (between chunks of a
/// read, before blocking I/O) and return `JobError::Cancelled` when it is
/// set. Cancellation is cooperative: an executor that never polls runs to
/// completion even when its job was superseded.
pub trait JobExecutor: Send + Sync + 'static {
    fn execute(&self, job: &Job, token: &CancellationToken) -> JobResult;
}

impl<F> JobExecutor for F
where
    F: Fn(&Job, &CancellationToken) -> JobResult + Send + Sync + 'static,
{
    fn execute(&self, job: &Job, token: &CancellationToken) -> JobResult {
        self(job, token)
    }
}

/// Published by a worker once a job has finished, failed or been cancelled.
#[derive(Debug, Clone)]
pub struct JobCompleted {
    pub key: String,
    pub sequence: u64,
    pub category: JobCategory,
    pub priority: JobPriority,
    pub result: JobResult,
    pub elapsed: Duration,
}

/// Configuration for the worker pool.
///
/// One priority floor per worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    bands: Vec<JobPriority>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::banded(4, 2, JobPriority::CurrentPage)
    }
}

impl WorkerPoolConfig {
    /// `num_workers` workers that accept every priority.
    pub fn new(num_workers: usize) -> Self {
        Self {
            bands: vec![JobPriority::Thumbnail; num_workers],
        }
    }

    /// `total` workers, the first `foreground` of which only accept
    /// `foreground_floor` and above.
    pub fn banded(total: usize, foreground: usize, foreground_floor: JobPriority) -> Self {
        let foreground = foreground.min(total);
        let mut bands = vec![foreground_floor; foreground];
        bands.extend(std::iter::repeat(JobPriority::Thumbnail).take(total - foreground));
        Self { bands }
    }

    /// Explicit per-worker floors.
    pub fn with_bands(bands: Vec<JobPriority>) -> Self {
        Self { bands }
    }

    pub fn bands(&self) -> &[JobPriority] {
        &self.bands
    }

    pub fn num_workers(&self) -> usize {
        self.bands.len()
    }
}

/// Worker pool for parallel job execution.
///
/// # Example
///
/// ```
/// use pageview_scheduler::{
///     CancellationToken, Job, JobError, JobOutput, JobPriority, JobResult, JobScheduler,
///     WorkerPool, WorkerPoolConfig,
/// };
/// use std::sync::{mpsc, Arc};
///
/// let scheduler = Arc::new(JobScheduler::new());
/// let (tx, rx) = mpsc::channel();
///
/// let executor = Arc::new(|job: &Job, token: &CancellationToken| -> JobResult {
///     if token.is_cancelled() {
///         return Err(JobError::Cancelled);
///     }
///     Ok(JobOutput::ContainerScanned {
///         container: job.kind().container().to_string(),
///         entries: vec!["001.jpg".to_string()],
///     })
/// });
///
/// let mut pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::default(), tx)
///     .unwrap();
///
/// scheduler.enqueue(Job::scan("book"));
/// let done = rx.recv().unwrap();
/// assert!(done.result.is_ok());
///
/// pool.shutdown();
/// ```
pub struct WorkerPool {
    scheduler: Arc<JobScheduler>,
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Create and start a new worker pool.
    ///
    /// # Arguments
    ///
    /// * `scheduler` - Job scheduler to pull jobs from
    /// * `executor` - Runs each job
    /// * `config` - Per-worker priority floors
    /// * `results` - Receives one `JobCompleted` per job
    pub fn new<E: JobExecutor>(
        scheduler: Arc<JobScheduler>,
        executor: Arc<E>,
        config: WorkerPoolConfig,
        results: Sender<JobCompleted>,
    ) -> io::Result<Self> {
        let mut workers = Vec::with_capacity(config.num_workers());

        for (id, floor) in config.bands().iter().copied().enumerate() {
            let worker = Worker::spawn(
                id,
                floor,
                scheduler.clone(),
                executor.clone(),
                results.clone(),
            );
            match worker {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    let mut partial = Self { scheduler, workers };
                    partial.shutdown();
                    return Err(err);
                }
            }
        }

        info!(
            workers = config.num_workers(),
            foreground = config
                .bands()
                .iter()
                .filter(|floor| **floor > JobPriority::Thumbnail)
                .count(),
            "worker pool started"
        );

        Ok(Self { scheduler, workers })
    }

    /// Get the number of running worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Check if the worker pool is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.scheduler.is_closed()
    }

    /// Shutdown the worker pool.
    ///
    /// Closes the scheduler, which cancels every live job and releases
    /// idle workers. Busy workers finish (or abandon, if their executor
    /// polls the token) their current job, then exit. Blocks until every
    /// worker thread has terminated.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.scheduler.close();
        for worker in self.workers.drain(..) {
            worker.join();
        }
        info!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A single worker thread in the worker pool.
struct Worker {
    id: usize,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn<E: JobExecutor>(
        id: usize,
        floor: JobPriority,
        scheduler: Arc<JobScheduler>,
        executor: Arc<E>,
        results: Sender<JobCompleted>,
    ) -> io::Result<Self> {
        let thread = thread::Builder::new()
            .name(format!("pageview-worker-{}", id))
            .spawn(move || Self::run(id, floor, scheduler, executor, results))?;

        Ok(Self {
            id,
            thread: Some(thread),
        })
    }

    /// Main worker loop.
    fn run<E: JobExecutor>(
        id: usize,
        floor: JobPriority,
        scheduler: Arc<JobScheduler>,
        executor: Arc<E>,
        results: Sender<JobCompleted>,
    ) {
        debug!(worker = id, floor = ?floor, "worker started");

        while let Some(queued) = scheduler.dequeue(floor) {
            let job = queued.job;
            let start = Instant::now();

            let result = if queued.token.is_cancelled() {
                Err(JobError::Cancelled)
            } else {
                executor.execute(&job, &queued.token)
            };
            let elapsed = start.elapsed();

            scheduler.complete(job.key(), queued.sequence);

            match &result {
                Ok(_) => debug!(
                    worker = id,
                    key = %job.key(),
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    "job done"
                ),
                Err(JobError::Cancelled) => debug!(worker = id, key = %job.key(), "job cancelled"),
                Err(err) => debug!(worker = id, key = %job.key(), error = %err, "job failed"),
            }

            let event = JobCompleted {
                key: job.key().to_string(),
                sequence: queued.sequence,
                category: job.category(),
                priority: job.priority(),
                result,
                elapsed,
            };
            if results.send(event).is_err() {
                warn!(worker = id, "result channel closed");
                break;
            }
        }

        debug!(worker = id, "worker stopped");
    }

    /// Wait for the worker thread to finish.
    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(worker = self.id, "worker thread panicked");
            }
        }
    }
}
