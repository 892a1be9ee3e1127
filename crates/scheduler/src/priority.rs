//! Job definitions and the priority queue
//!
//! Jobs are ordered by priority (higher first), then by submission sequence
//! (earlier first) so that jobs of equal priority keep FIFO order.

use crate::cancel::CancellationToken;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Job priority levels
///
/// Higher values run first. A worker's priority floor is one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum JobPriority {
    /// Thumbnail loading (lowest)
    Thumbnail = 10,

    /// Speculative loading of neighbouring pages
    Preload = 50,

    /// The page the reader is waiting for
    CurrentPage = 90,

    /// Container scans and other work that blocks the session
    Urgent = 100,
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::CurrentPage
    }
}

/// Job category tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JobCategory {
    PageContent,
    Thumbnail,
    ContainerScan,
}

/// Work description, one typed payload per category
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    /// Load the bytes of one page
    PageContent {
        container: String,
        page_index: usize,
        inner_path: String,
    },

    /// Load the thumbnail bytes of one page
    Thumbnail {
        container: String,
        page_index: usize,
        inner_path: String,
    },

    /// List the pages of a container
    ContainerScan { container: String },
}

impl JobKind {
    /// Category tag of this payload
    pub fn category(&self) -> JobCategory {
        match self {
            JobKind::PageContent { .. } => JobCategory::PageContent,
            JobKind::Thumbnail { .. } => JobCategory::Thumbnail,
            JobKind::ContainerScan { .. } => JobCategory::ContainerScan,
        }
    }

    /// Container this work belongs to
    pub fn container(&self) -> &str {
        match self {
            JobKind::PageContent { container, .. }
            | JobKind::Thumbnail { container, .. }
            | JobKind::ContainerScan { container } => container,
        }
    }
}

/// Output of a successful job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutput {
    PageLoaded {
        container: String,
        page_index: usize,
        data: Vec<u8>,
    },
    ThumbnailLoaded {
        container: String,
        page_index: usize,
        data: Vec<u8>,
    },
    ContainerScanned {
        container: String,
        entries: Vec<String>,
    },
}

/// Job failure kinds
///
/// Executors return these instead of panicking. `Corrupt` carries
/// decoding-level failures from the extraction collaborator unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("job cancelled")]
    Cancelled,
    #[error("entry not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("corrupt content: {0}")]
    Corrupt(String),
}

impl JobError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }
}

/// Result type produced by executors
pub type JobResult = Result<JobOutput, JobError>;

/// Key prefix for page jobs of a container
pub fn page_prefix(container: &str) -> String {
    format!("page:{}:", container)
}

/// Key prefix for thumbnail jobs of a container
pub fn thumbnail_prefix(container: &str) -> String {
    format!("thumb:{}:", container)
}

/// Key of the scan job for a container
pub fn scan_key(container: &str) -> String {
    format!("scan:{}", container)
}

/// An immutable unit of work
///
/// The key identifies the resource: two jobs with the same key are
/// duplicates and the newer one supersedes the older.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    key: String,
    priority: JobPriority,
    kind: JobKind,
}

impl Job {
    /// Create a job with an explicit key
    pub fn new(key: impl Into<String>, priority: JobPriority, kind: JobKind) -> Self {
        Self {
            key: key.into(),
            priority,
            kind,
        }
    }

    /// Page-content job keyed `page:{container}:{index}`
    pub fn page(
        container: &str,
        page_index: usize,
        inner_path: impl Into<String>,
        priority: JobPriority,
    ) -> Self {
        Self::new(
            format!("{}{}", page_prefix(container), page_index),
            priority,
            JobKind::PageContent {
                container: container.to_string(),
                page_index,
                inner_path: inner_path.into(),
            },
        )
    }

    /// Thumbnail job keyed `thumb:{container}:{index}`, always at thumbnail priority
    pub fn thumbnail(container: &str, page_index: usize, inner_path: impl Into<String>) -> Self {
        Self::new(
            format!("{}{}", thumbnail_prefix(container), page_index),
            JobPriority::Thumbnail,
            JobKind::Thumbnail {
                container: container.to_string(),
                page_index,
                inner_path: inner_path.into(),
            },
        )
    }

    /// Container scan keyed `scan:{container}`, always urgent
    pub fn scan(container: &str) -> Self {
        Self::new(
            scan_key(container),
            JobPriority::Urgent,
            JobKind::ContainerScan {
                container: container.to_string(),
            },
        )
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    pub fn category(&self) -> JobCategory {
        self.kind.category()
    }
}

/// A job waiting in the queue
///
/// Carries its own token: a popped record is validated against the token it
/// was submitted with, not whatever token currently owns the key.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: Job,
    pub sequence: u64,
    pub token: CancellationToken,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.job.priority.cmp(&other.job.priority) {
            // BinaryHeap is a max heap: the smaller sequence must compare greater
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            other => other,
        }
    }
}

/// Priority queue of jobs
///
/// Not synchronized; the scheduler guards it together with the
/// active-key registry.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<QueuedJob>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, queued: QueuedJob) {
        self.heap.push(queued);
    }

    pub fn pop(&mut self) -> Option<QueuedJob> {
        self.heap.pop()
    }

    pub fn peek(&self) -> Option<&QueuedJob> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
