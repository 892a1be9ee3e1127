//! Errors surfaced to callers of the content manager

use crate::config::ConfigError;
use pageview_scheduler::JobError;
use std::io;
use std::time::Duration;

/// Errors returned by `open`, `goto` and `thumbnail`.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    /// The request was superseded or its container closed while it waited
    #[error("request cancelled")]
    Cancelled,
    #[error("entry not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(String),
    /// The job behind a request did not finish within the navigation timeout
    #[error("{key} not ready after {}ms", .waited.as_millis())]
    Timeout { key: String, waited: Duration },
    #[error("corrupt content: {0}")]
    Corrupt(String),
    #[error("no container is open")]
    NoContainer,
    #[error("page {index} out of range ({total} pages)")]
    PageOutOfRange { index: usize, total: usize },
    #[error("content manager has shut down")]
    ShutDown,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to start worker threads: {0}")]
    Startup(#[source] io::Error),
}

impl From<JobError> for ContentError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Cancelled => ContentError::Cancelled,
            JobError::NotFound(entry) => ContentError::NotFound(entry),
            JobError::Io(message) => ContentError::Io(message),
            JobError::Corrupt(message) => ContentError::Corrupt(message),
        }
    }
}

/// Result type for content manager operations
pub type ContentResult<T> = Result<T, ContentError>;
