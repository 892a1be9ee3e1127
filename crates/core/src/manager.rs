//! Content manager
//!
//! Orchestrates navigation for one open container at a time:
//! 1. Check the page pool → return immediately on a hit
//! 2. On a miss, submit the page at current-page priority and its
//!    neighbours at preload priority
//! 3. Wait (bounded by the navigation timeout) for the page's job
//!
//! A dispatcher thread drains worker results: loaded pages go into the pool
//! using the session's position at that moment, waiters are resolved and
//! notifications are published. Results for a container that has since been
//! closed are dropped.

use crate::config::EngineConfig;
use crate::error::{ContentError, ContentResult};
use crate::extract::{detect_mime_type, Extractor, ExtractorExecutor};
use crate::notify::{Notification, Subscribers};
use crate::session::Session;
use pageview_cache::{ClearOutcome, MemoryPool, MemoryPoolStats, PageKey};
use pageview_scheduler::{
    page_prefix, scan_key, thumbnail_prefix, Job, JobCompleted, JobError, JobHandle, JobOutput,
    JobPriority, JobScheduler, SchedulerStats, WorkerPool,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// A page returned by navigation
#[derive(Debug, Clone)]
pub struct PageContent {
    pub index: usize,
    pub data: Arc<[u8]>,
    pub mime_type: &'static str,
    /// Served from the pool without submitting any job
    pub from_cache: bool,
}

impl PageContent {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Result of opening a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    pub container: String,
    pub total_pages: usize,
}

/// Snapshot of the engine state
#[derive(Debug, Clone, Serialize)]
pub struct ContentStats {
    pub scheduler: SchedulerStats,
    pub pool: MemoryPoolStats,
    pub container: Option<String>,
    pub current_index: Option<usize>,
    pub total_pages: usize,
    pub cached_pages: Vec<usize>,
}

#[derive(Debug, Clone)]
enum Delivery {
    Bytes(Arc<[u8]>),
    Entries(Vec<String>),
}

type DeliveryResult = Result<Delivery, JobError>;

/// Callers waiting on the newest job for one key
struct Waiter {
    container: String,
    sequence: u64,
    senders: Vec<Sender<DeliveryResult>>,
}

struct Shared {
    config: EngineConfig,
    scheduler: Arc<JobScheduler>,
    pool: MemoryPool,
    session: Mutex<Option<Session>>,
    waiters: Mutex<HashMap<String, Waiter>>,
    subscribers: Subscribers,
}

impl Shared {
    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_waiters(&self) -> MutexGuard<'_, HashMap<String, Waiter>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit `job` plus background `extra` jobs and register to hear
    /// about `job`'s outcome.
    ///
    /// The waiter map stays locked across the enqueue so the dispatcher
    /// cannot resolve the job before its waiter exists.
    fn submit_and_wait(&self, job: Job, extra: Vec<Job>) -> Receiver<DeliveryResult> {
        let (tx, rx) = mpsc::channel();
        let container = job.kind().container().to_string();

        let mut waiters = self.lock_waiters();
        let handle = self.scheduler.enqueue(job);
        waiters
            .entry(handle.key.clone())
            .or_insert_with(|| Waiter {
                container,
                sequence: handle.sequence,
                senders: Vec::new(),
            })
            .senders
            .push(tx);
        retarget(&mut waiters, &handle);

        for handle in self.scheduler.enqueue_batch(extra) {
            retarget(&mut waiters, &handle);
        }
        rx
    }

    /// `submit_and_wait` for a job of the open container.
    ///
    /// The session stays locked across the submission so a racing close
    /// cannot leave the old container's jobs live. Fails with `Cancelled`
    /// when the job's container is no longer open.
    fn submit_to_open(
        &self,
        job: Job,
        extra: Vec<Job>,
    ) -> ContentResult<Receiver<DeliveryResult>> {
        let session = self.lock_session();
        let open = session
            .as_ref()
            .is_some_and(|session| session.container() == job.kind().container());
        if !open {
            debug!(key = %job.key(), "container closed before submission");
            return Err(ContentError::Cancelled);
        }
        Ok(self.submit_and_wait(job, extra))
    }

    fn handle_completed(&self, done: JobCompleted) {
        let JobCompleted {
            key,
            sequence,
            priority,
            result,
            elapsed,
            ..
        } = done;

        let delivery = match result {
            Ok(JobOutput::PageLoaded {
                container,
                page_index,
                data,
            }) => {
                let data: Arc<[u8]> = data.into();
                self.store_page(&container, page_index, data.clone());
                Ok(Delivery::Bytes(data))
            }
            Ok(JobOutput::ThumbnailLoaded { data, .. }) => Ok(Delivery::Bytes(data.into())),
            Ok(JobOutput::ContainerScanned { entries, .. }) => Ok(Delivery::Entries(entries)),
            Err(JobError::Cancelled) => Err(JobError::Cancelled),
            Err(err) => {
                if priority < JobPriority::CurrentPage {
                    warn!(key = %key, error = %err, "background load failed");
                } else {
                    debug!(
                        key = %key,
                        error = %err,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "load failed"
                    );
                }
                Err(err)
            }
        };

        self.resolve(&key, sequence, delivery);
    }

    /// Insert a loaded page if its container is still open
    fn store_page(&self, container: &str, page_index: usize, data: Arc<[u8]>) {
        // Held across the insert so a concurrent close cannot be undone
        let guard = self.lock_session();
        let Some(session) = guard.as_ref().filter(|s| s.container() == container) else {
            debug!(container, page = page_index, "dropping page of closed container");
            return;
        };

        let key = PageKey::new(container, page_index);
        let size = data.len();
        let outcome = self
            .pool
            .insert(key.clone(), data, session.current_index(), session.direction());
        if self.config.pin_current && page_index == session.current_index() {
            self.pool.lock(&key);
        }

        self.subscribers
            .publish(Notification::PageReady { index: page_index, size });
        for evicted in outcome.evicted {
            if evicted.container == container {
                self.subscribers.publish(Notification::PageDiscarded {
                    index: evicted.page_index,
                });
            }
        }
        if outcome.pressure_crossed {
            let stats = self.pool.stats();
            info!(
                total = stats.total_size,
                max = stats.max_size,
                "page pool under memory pressure"
            );
            self.subscribers.publish(Notification::MemoryPressure {
                current: stats.total_size,
                limit: stats.max_size,
            });
        }
    }

    fn resolve(&self, key: &str, sequence: u64, delivery: DeliveryResult) {
        let waiter = {
            let mut waiters = self.lock_waiters();
            let superseded = match waiters.get(key) {
                None => return,
                // A superseded job's cancellation leaves the waiters to its successor
                Some(waiter) => {
                    waiter.sequence != sequence && matches!(delivery, Err(JobError::Cancelled))
                }
            };
            if superseded {
                return;
            }
            waiters.remove(key)
        };

        if let Some(waiter) = waiter {
            for sender in waiter.senders {
                // The caller may have timed out already
                let _ = sender.send(delivery.clone());
            }
        }
    }

    fn close_session(&self) -> Option<String> {
        let mut session = self.lock_session();
        let container = session.take()?.container().to_string();

        let mut cancelled = self.scheduler.cancel_by_prefix(&page_prefix(&container));
        cancelled += self
            .scheduler
            .cancel_by_prefix(&thumbnail_prefix(&container));
        if let Some(token) = self.scheduler.token_for(&scan_key(&container)) {
            token.cancel();
            cancelled += 1;
        }

        let cleared = self.pool.clear(&container);

        // Dropping the senders wakes anyone still waiting with `Cancelled`
        self.lock_waiters()
            .retain(|_, waiter| waiter.container != container);

        info!(
            container = %container,
            cancelled,
            removed = cleared.removed,
            freed = cleared.freed,
            "container closed"
        );
        Some(container)
    }
}

/// Point an existing waiter at the newest job for its key
fn retarget(waiters: &mut HashMap<String, Waiter>, handle: &JobHandle) {
    if let Some(waiter) = waiters.get_mut(&handle.key) {
        waiter.sequence = handle.sequence;
    }
}

fn dispatch(shared: Arc<Shared>, results: Receiver<JobCompleted>) {
    debug!("dispatcher started");
    for done in results {
        shared.handle_completed(done);
    }
    debug!("dispatcher stopped");
}

/// Loads pages of one container at a time, caching what the reader is
/// likely to look at next.
///
/// # Example
///
/// ```no_run
/// use pageview_core::{ContentManager, DirectoryExtractor, EngineConfig};
/// use std::sync::Arc;
///
/// let manager = ContentManager::new(
///     EngineConfig::default(),
///     Arc::new(DirectoryExtractor::new()),
/// )?;
///
/// let info = manager.open("/comics/issue-1")?;
/// for index in 0..info.total_pages {
///     let page = manager.goto(index)?;
///     println!("page {} ({} bytes, cached: {})", index, page.size(), page.from_cache);
/// }
/// # Ok::<(), pageview_core::ContentError>(())
/// ```
pub struct ContentManager {
    shared: Arc<Shared>,
    workers: Option<WorkerPool>,
    dispatcher: Option<JoinHandle<()>>,
}

impl ContentManager {
    /// Validate `config`, start the workers and the result dispatcher.
    pub fn new<X: Extractor>(config: EngineConfig, extractor: Arc<X>) -> ContentResult<Self> {
        config.validate()?;

        let scheduler = Arc::new(JobScheduler::new());
        let shared = Arc::new(Shared {
            pool: MemoryPool::new(config.memory_pool_config()),
            scheduler: scheduler.clone(),
            session: Mutex::new(None),
            waiters: Mutex::new(HashMap::new()),
            subscribers: Subscribers::default(),
            config,
        });

        let (tx, rx) = mpsc::channel();
        let executor = Arc::new(ExtractorExecutor::new(extractor));
        let workers = WorkerPool::new(
            scheduler,
            executor,
            shared.config.worker_pool_config(),
            tx,
        )
        .map_err(ContentError::Startup)?;

        let dispatcher = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("pageview-dispatcher".to_string())
                .spawn(move || dispatch(shared, rx))
                .map_err(ContentError::Startup)?
        };

        info!(
            workers = shared.config.worker_count,
            foreground = shared.config.foreground_workers,
            pool_mb = shared.config.max_pool_mb,
            "content manager started"
        );

        Ok(Self {
            shared,
            workers: Some(workers),
            dispatcher: Some(dispatcher),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    fn ensure_running(&self) -> ContentResult<()> {
        if self.shared.scheduler.is_closed() {
            Err(ContentError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn wait(&self, rx: Receiver<DeliveryResult>, key: &str) -> ContentResult<Delivery> {
        let timeout = self.shared.config.navigation_timeout();
        match rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(ContentError::from),
            Err(RecvTimeoutError::Timeout) => {
                warn!(key, timeout_ms = timeout.as_millis() as u64, "wait timed out");
                Err(ContentError::Timeout {
                    key: key.to_string(),
                    waited: timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.ensure_running()?;
                Err(ContentError::Cancelled)
            }
        }
    }

    /// Open a container, closing the previous one.
    ///
    /// The page list comes from an urgent scan job and the reader starts on
    /// the first page. Nothing is loaded until the first `goto`.
    pub fn open(&self, container: &str) -> ContentResult<ContainerInfo> {
        self.ensure_running()?;
        self.shared.close_session();

        let key = scan_key(container);
        let rx = self.shared.submit_and_wait(Job::scan(container), Vec::new());
        let entries = match self.wait(rx, &key)? {
            Delivery::Entries(entries) => entries,
            Delivery::Bytes(_) => return Err(unexpected_output(&key)),
        };

        let session = Session::new(container, entries);
        let info = ContainerInfo {
            container: container.to_string(),
            total_pages: session.total_pages(),
        };
        *self.shared.lock_session() = Some(session);

        info!(container, pages = info.total_pages, "container opened");
        Ok(info)
    }

    /// Navigate to `index` and return its bytes.
    ///
    /// A pool hit returns at once without submitting any job. A miss
    /// submits the page at current-page priority, preloads the neighbours
    /// that are neither cached nor already in flight, and waits for the
    /// page under the navigation timeout. Preload failures never affect
    /// the result.
    pub fn goto(&self, index: usize) -> ContentResult<PageContent> {
        self.ensure_running()?;
        let shared = &self.shared;

        let (job, preloads, mime_type) = {
            let mut guard = shared.lock_session();
            let session = guard.as_mut().ok_or(ContentError::NoContainer)?;

            let previous = session.current_index();
            if !session.goto(index) {
                return Err(ContentError::PageOutOfRange {
                    index,
                    total: session.total_pages(),
                });
            }
            if shared.config.pin_current && previous != index {
                shared.pool.unlock(&session.page_key(previous));
            }

            let container = session.container().to_string();
            let inner_path = session
                .page(index)
                .map(|page| page.inner_path.clone())
                .unwrap_or_default();
            let mime_type = detect_mime_type(&inner_path);

            let key = session.page_key(index);
            if let Some(page) = shared.pool.get(&key) {
                if shared.config.pin_current {
                    shared.pool.lock(&key);
                }
                debug!(container = %container, page = index, "cache hit");
                return Ok(PageContent {
                    index,
                    data: page.data,
                    mime_type,
                    from_cache: true,
                });
            }

            let preloads: Vec<Job> = session
                .preload_range(shared.config.preload_window)
                .into_iter()
                .filter(|neighbour| !shared.pool.contains(&session.page_key(*neighbour)))
                .filter_map(|neighbour| {
                    session.page(neighbour).map(|page| {
                        Job::page(
                            &container,
                            neighbour,
                            page.inner_path.clone(),
                            JobPriority::Preload,
                        )
                    })
                })
                .filter(|job| !shared.scheduler.has_job(job.key()))
                .collect();

            let job = Job::page(&container, index, inner_path, JobPriority::CurrentPage);
            (job, preloads, mime_type)
        };

        debug!(key = %job.key(), preloads = preloads.len(), "cache miss");
        self.load_page(job, preloads, index, mime_type)
    }

    /// Return page `index` without moving the reader.
    ///
    /// The current page, the direction and the pins stay as they are. A
    /// miss loads this page alone, with no preloads, and caches it.
    pub fn get_page(&self, index: usize) -> ContentResult<PageContent> {
        self.ensure_running()?;

        let (job, mime_type) = {
            let guard = self.shared.lock_session();
            let session = guard.as_ref().ok_or(ContentError::NoContainer)?;
            let page = session.page(index).ok_or(ContentError::PageOutOfRange {
                index,
                total: session.total_pages(),
            })?;
            let mime_type = detect_mime_type(&page.inner_path);

            if let Some(cached) = self.shared.pool.get(&session.page_key(index)) {
                return Ok(PageContent {
                    index,
                    data: cached.data,
                    mime_type,
                    from_cache: true,
                });
            }

            let job = Job::page(
                session.container(),
                index,
                page.inner_path.clone(),
                JobPriority::CurrentPage,
            );
            (job, mime_type)
        };

        self.load_page(job, Vec::new(), index, mime_type)
    }

    fn load_page(
        &self,
        job: Job,
        preloads: Vec<Job>,
        index: usize,
        mime_type: &'static str,
    ) -> ContentResult<PageContent> {
        let key = job.key().to_string();
        let rx = self.shared.submit_to_open(job, preloads)?;
        match self.wait(rx, &key)? {
            Delivery::Bytes(data) => Ok(PageContent {
                index,
                data,
                mime_type,
                from_cache: false,
            }),
            Delivery::Entries(_) => Err(unexpected_output(&key)),
        }
    }

    /// Load the thumbnail of `index`.
    ///
    /// Runs on background workers and is not stored in the page pool.
    pub fn thumbnail(&self, index: usize) -> ContentResult<Arc<[u8]>> {
        self.ensure_running()?;

        let job = {
            let guard = self.shared.lock_session();
            let session = guard.as_ref().ok_or(ContentError::NoContainer)?;
            let page = session.page(index).ok_or(ContentError::PageOutOfRange {
                index,
                total: session.total_pages(),
            })?;
            Job::thumbnail(session.container(), index, page.inner_path.clone())
        };

        let key = job.key().to_string();
        let rx = self.shared.submit_to_open(job, Vec::new())?;
        match self.wait(rx, &key)? {
            Delivery::Bytes(data) => Ok(data),
            Delivery::Entries(_) => Err(unexpected_output(&key)),
        }
    }

    /// Close the open container.
    ///
    /// Cancels its jobs, drops its cached pages and releases anyone waiting
    /// on it. Returns the container that was open, if any.
    pub fn close(&self) -> Option<String> {
        self.shared.close_session()
    }

    /// Drop every cached page, pinned ones included.
    ///
    /// The session stays open; pages are reloaded on demand.
    pub fn clear_cache(&self) -> ClearOutcome {
        let cleared = self.shared.pool.clear_all();
        info!(
            removed = cleared.removed,
            freed = cleared.freed,
            "page pool cleared"
        );
        cleared
    }

    /// Receive notifications from now on
    pub fn subscribe(&self) -> Receiver<Notification> {
        self.shared.subscribers.subscribe()
    }

    /// Snapshot of the open session, if any
    pub fn session(&self) -> Option<Session> {
        self.shared.lock_session().clone()
    }

    pub fn stats(&self) -> ContentStats {
        let (container, current_index, total_pages) = match self.shared.lock_session().as_ref() {
            Some(session) => (
                Some(session.container().to_string()),
                Some(session.current_index()),
                session.total_pages(),
            ),
            None => (None, None, 0),
        };
        let cached_pages = container
            .as_deref()
            .map(|container| self.shared.pool.cached_pages(container))
            .unwrap_or_default();

        ContentStats {
            scheduler: self.shared.scheduler.stats(),
            pool: self.shared.pool.stats(),
            container,
            current_index,
            total_pages,
            cached_pages,
        }
    }

    /// Stop the workers and the dispatcher.
    ///
    /// Running jobs finish (or abandon, if their extractor polls the
    /// token). Later calls fail with `ShutDown`.
    pub fn shutdown(&mut self) {
        let Some(mut workers) = self.workers.take() else {
            return;
        };
        workers.shutdown();
        drop(workers);

        self.shared.lock_waiters().clear();
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                warn!("dispatcher thread panicked");
            }
        }
        info!("content manager stopped");
    }
}

impl Drop for ContentManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn unexpected_output(key: &str) -> ContentError {
    ContentError::Corrupt(format!("unexpected output for {}", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pageview_cache::Direction;
    use pageview_scheduler::CancellationToken;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// In-memory container: `pages` pages of `page_size` bytes each
    struct FakeExtractor {
        pages: usize,
        page_size: usize,
        delay: Duration,
        missing: HashSet<usize>,
        extracted: AtomicUsize,
    }

    impl FakeExtractor {
        fn new(pages: usize, page_size: usize) -> Self {
            Self {
                pages,
                page_size,
                delay: Duration::ZERO,
                missing: HashSet::new(),
                extracted: AtomicUsize::new(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn with_missing(mut self, index: usize) -> Self {
            self.missing.insert(index);
            self
        }
    }

    impl Extractor for FakeExtractor {
        fn scan(&self, _container: &str, _token: &CancellationToken) -> Result<Vec<String>, JobError> {
            Ok((0..self.pages).map(|i| format!("{:03}.png", i)).collect())
        }

        fn extract(
            &self,
            _container: &str,
            inner_path: &str,
            token: &CancellationToken,
        ) -> Result<Vec<u8>, JobError> {
            thread::sleep(self.delay);
            if token.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let index: usize = inner_path
                .trim_end_matches(".png")
                .parse()
                .map_err(|_| JobError::Corrupt(inner_path.to_string()))?;
            if self.missing.contains(&index) {
                return Err(JobError::NotFound(inner_path.to_string()));
            }
            self.extracted.fetch_add(1, Ordering::SeqCst);
            Ok(vec![index as u8; self.page_size])
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
            .with_workers(3, 1)
            .with_pool_mb(16)
            .with_preload_window(2)
            .with_timeout(Duration::from_secs(5))
    }

    fn manager(extractor: FakeExtractor, config: EngineConfig) -> ContentManager {
        ContentManager::new(config, Arc::new(extractor)).unwrap()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_open_reports_pages() {
        let manager = manager(FakeExtractor::new(10, 8), config());

        let info = manager.open("A").unwrap();
        assert_eq!(
            info,
            ContainerInfo {
                container: "A".to_string(),
                total_pages: 10
            }
        );

        let session = manager.session().unwrap();
        assert_eq!(session.current_index(), 0);
        assert_eq!(session.page(3).unwrap().name, "003.png");
    }

    #[test]
    fn test_goto_miss_then_hit() {
        let manager = manager(FakeExtractor::new(10, 8), config());
        manager.open("A").unwrap();

        let page = manager.goto(0).unwrap();
        assert!(!page.from_cache);
        assert_eq!(page.size(), 8);
        assert_eq!(page.mime_type, "image/png");

        // Preloads for pages 1 and 2 land in the pool
        assert!(wait_until(|| manager.stats().cached_pages == vec![0, 1, 2]));
        assert!(wait_until(|| manager.stats().scheduler.active_count == 0));

        let submitted = manager.stats().scheduler.jobs_submitted;
        let page = manager.goto(1).unwrap();
        assert!(page.from_cache);
        assert_eq!(page.data[0], 1);
        assert_eq!(manager.stats().scheduler.jobs_submitted, submitted);
    }

    #[test]
    fn test_goto_requires_open_container() {
        let manager = manager(FakeExtractor::new(3, 8), config());
        assert!(matches!(manager.goto(0), Err(ContentError::NoContainer)));
        assert!(matches!(manager.thumbnail(0), Err(ContentError::NoContainer)));

        manager.open("A").unwrap();
        assert!(matches!(
            manager.goto(3),
            Err(ContentError::PageOutOfRange { index: 3, total: 3 })
        ));
    }

    #[test]
    fn test_current_page_failure_is_surfaced() {
        let manager = manager(FakeExtractor::new(5, 8).with_missing(3), config());
        manager.open("A").unwrap();

        match manager.goto(3) {
            Err(ContentError::NotFound(entry)) => assert_eq!(entry, "003.png"),
            other => panic!("expected NotFound, got {:?}", other.map(|p| p.index)),
        }

        // Failure released the key: a retry is a fresh job
        assert!(wait_until(|| !manager.shared.scheduler.has_job("page:A:3")));
        assert!(matches!(manager.goto(3), Err(ContentError::NotFound(_))));
    }

    #[test]
    fn test_preload_failure_does_not_affect_navigation() {
        let manager = manager(FakeExtractor::new(5, 8).with_missing(1), config());
        manager.open("A").unwrap();

        let page = manager.goto(0).unwrap();
        assert_eq!(page.index, 0);
        assert!(wait_until(|| manager.stats().cached_pages == vec![0, 2]));
    }

    #[test]
    fn test_goto_times_out() {
        let extractor = FakeExtractor::new(5, 8).with_delay(Duration::from_millis(300));
        let config = config().with_timeout(Duration::from_millis(30));
        let manager = manager(extractor, config);

        // Scans are not delayed
        manager.open("A").unwrap();

        match manager.goto(2) {
            Err(ContentError::Timeout { key, waited }) => {
                assert_eq!(key, "page:A:2");
                assert_eq!(waited, Duration::from_millis(30));
            }
            other => panic!("expected Timeout, got {:?}", other.map(|p| p.index)),
        }

        // The late result is still cached
        assert!(wait_until(|| manager.stats().cached_pages.contains(&2)));
    }

    #[test]
    fn test_close_clears_container() {
        let manager = manager(FakeExtractor::new(6, 8), config());
        manager.open("A").unwrap();
        manager.goto(0).unwrap();
        assert!(wait_until(|| manager.stats().pool.entry_count == 3));

        assert_eq!(manager.close(), Some("A".to_string()));
        let stats = manager.stats();
        assert_eq!(stats.pool.entry_count, 0);
        assert_eq!(stats.pool.total_size, 0);
        assert_eq!(stats.container, None);
        assert!(matches!(manager.goto(0), Err(ContentError::NoContainer)));
        assert_eq!(manager.close(), None);
    }

    #[test]
    fn test_open_replaces_previous_container() {
        let manager = manager(FakeExtractor::new(4, 8), config());
        manager.open("A").unwrap();
        manager.goto(0).unwrap();

        manager.open("B").unwrap();
        let stats = manager.stats();
        assert_eq!(stats.container.as_deref(), Some("B"));
        assert_eq!(stats.current_index, Some(0));
        assert!(stats.cached_pages.is_empty());

        // Nothing of A survives, even results that were still in flight
        assert!(wait_until(|| manager.stats().scheduler.active_count == 0));
        assert!(!manager.shared.pool.contains(&PageKey::new("A", 0)));
    }

    #[test]
    fn test_notifications() {
        let config = config().with_pool_mb(1).with_preload_window(0).with_pressure_threshold(0.5);
        let manager = manager(FakeExtractor::new(5, 400 * 1024), config);
        let events = manager.subscribe();
        manager.open("A").unwrap();

        manager.goto(0).unwrap();
        manager.goto(1).unwrap();
        manager.goto(2).unwrap();

        let received: Vec<Notification> = events.try_iter().collect();
        assert!(received.contains(&Notification::PageReady {
            index: 0,
            size: 400 * 1024
        }));
        assert!(received.contains(&Notification::MemoryPressure {
            current: 800 * 1024,
            limit: 1024 * 1024
        }));
        assert!(received.contains(&Notification::PageDiscarded { index: 0 }));
        assert_eq!(manager.stats().cached_pages, vec![1, 2]);
    }

    fn pinned(manager: &ContentManager, index: usize) -> Option<bool> {
        manager
            .shared
            .pool
            .get(&PageKey::new("A", index))
            .map(|page| page.pinned)
    }

    #[test]
    fn test_current_page_is_pinned() {
        let manager = manager(FakeExtractor::new(5, 8), config());
        manager.open("A").unwrap();

        manager.goto(0).unwrap();
        assert!(wait_until(|| manager.stats().cached_pages == vec![0, 1, 2]));
        assert_eq!(manager.stats().pool.locked_count, 1);
        assert_eq!(pinned(&manager, 0), Some(true));

        // Moving on unpins the page left behind
        manager.goto(1).unwrap();
        assert_eq!(manager.stats().pool.locked_count, 1);
        assert_eq!(pinned(&manager, 0), Some(false));
        assert_eq!(pinned(&manager, 1), Some(true));
    }

    #[test]
    fn test_pinning_can_be_disabled() {
        let manager = manager(FakeExtractor::new(3, 8), config().with_pin_current(false));
        manager.open("A").unwrap();
        manager.goto(0).unwrap();
        assert!(wait_until(|| manager.stats().pool.entry_count == 3));
        assert_eq!(manager.stats().pool.locked_count, 0);
    }

    #[test]
    fn test_thumbnail_not_cached() {
        let extractor = FakeExtractor::new(3, 8);
        let manager = manager(extractor, config().with_preload_window(0));
        manager.open("A").unwrap();

        let thumb = manager.thumbnail(2).unwrap();
        assert_eq!(thumb.len(), 8);
        assert_eq!(thumb[0], 2);
        assert!(manager.stats().cached_pages.is_empty());
        assert!(matches!(
            manager.thumbnail(7),
            Err(ContentError::PageOutOfRange { index: 7, total: 3 })
        ));
    }

    #[test]
    fn test_concurrent_goto_same_page() {
        let extractor = FakeExtractor::new(4, 8).with_delay(Duration::from_millis(20));
        let manager = Arc::new(manager(extractor, config().with_preload_window(0)));
        manager.open("A").unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let manager = manager.clone();
                thread::spawn(move || manager.goto(3).map(|page| page.data[0]))
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), 3);
        }
    }

    #[test]
    fn test_shutdown_rejects_requests() {
        let mut manager = manager(FakeExtractor::new(3, 8), config());
        manager.open("A").unwrap();
        manager.shutdown();

        assert!(matches!(manager.goto(0), Err(ContentError::ShutDown)));
        assert!(matches!(manager.open("B"), Err(ContentError::ShutDown)));

        // Idempotent
        manager.shutdown();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = ContentManager::new(
            EngineConfig::default().with_workers(1, 1),
            Arc::new(FakeExtractor::new(1, 1)),
        );
        assert!(matches!(result, Err(ContentError::Config(_))));

        // A pool budget whose byte size overflows is refused, not wrapped
        let result = ContentManager::new(
            EngineConfig::default().with_pool_mb(usize::MAX / 1024),
            Arc::new(FakeExtractor::new(1, 1)),
        );
        assert!(matches!(result, Err(ContentError::Config(_))));
    }

    #[test]
    fn test_get_page_leaves_reader_in_place() {
        let manager = manager(FakeExtractor::new(6, 8), config().with_preload_window(0));
        manager.open("A").unwrap();
        manager.goto(3).unwrap();
        manager.goto(2).unwrap();
        let submitted = manager.stats().scheduler.jobs_submitted;

        let page = manager.get_page(5).unwrap();
        assert!(!page.from_cache);
        assert_eq!(page.data[0], 5);
        assert_eq!(manager.stats().scheduler.jobs_submitted, submitted + 1);

        let session = manager.session().unwrap();
        assert_eq!(session.current_index(), 2);
        assert_eq!(session.direction(), Direction::Backward);
        assert_eq!(pinned(&manager, 2), Some(true));
        assert_eq!(pinned(&manager, 5), Some(false));

        // Second read is served from the pool
        let page = manager.get_page(5).unwrap();
        assert!(page.from_cache);
        assert_eq!(manager.stats().scheduler.jobs_submitted, submitted + 1);

        assert!(matches!(
            manager.get_page(6),
            Err(ContentError::PageOutOfRange { index: 6, total: 6 })
        ));
    }

    #[test]
    fn test_get_page_requires_open_container() {
        let manager = manager(FakeExtractor::new(3, 8), config());
        assert!(matches!(manager.get_page(0), Err(ContentError::NoContainer)));
    }

    #[test]
    fn test_clear_cache_keeps_session() {
        let manager = manager(FakeExtractor::new(4, 8), config());
        manager.open("A").unwrap();
        manager.goto(0).unwrap();
        assert!(wait_until(|| manager.stats().pool.entry_count == 3));

        let cleared = manager.clear_cache();
        assert_eq!(cleared.removed, 3);
        assert_eq!(cleared.freed, 24);

        let stats = manager.stats();
        assert_eq!(stats.pool.total_size, 0);
        assert_eq!(stats.container.as_deref(), Some("A"));

        let page = manager.goto(0).unwrap();
        assert!(!page.from_cache);
    }

    #[test]
    fn test_jobs_of_closed_container_are_refused() {
        let manager = manager(FakeExtractor::new(3, 8), config());
        manager.open("A").unwrap();
        let submitted = manager.stats().scheduler.jobs_submitted;

        // A request prepared for a container that has since been replaced
        let stale = Job::page("B", 0, "000.png", JobPriority::CurrentPage);
        assert!(matches!(
            manager.shared.submit_to_open(stale, Vec::new()),
            Err(ContentError::Cancelled)
        ));
        assert!(!manager.shared.scheduler.has_job("page:B:0"));

        manager.close();
        let stale = Job::page("A", 1, "001.png", JobPriority::CurrentPage);
        assert!(matches!(
            manager.shared.submit_to_open(stale, Vec::new()),
            Err(ContentError::Cancelled)
        ));
        assert!(!manager.shared.scheduler.has_job("page:A:1"));
        assert_eq!(manager.stats().scheduler.jobs_submitted, submitted);
    }
}
