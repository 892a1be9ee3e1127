//! Pageview Core Library
//!
//! Background content loading for paged media: opens a container, serves
//! pages from a bounded in-memory pool and preloads the neighbours of the
//! current page on a banded worker pool.

pub mod config;
pub mod error;
pub mod extract;
pub mod manager;
pub mod notify;
pub mod session;

pub use config::{ConfigError, EngineConfig};
pub use error::{ContentError, ContentResult};
pub use extract::{detect_mime_type, DirectoryExtractor, Extractor, ExtractorExecutor};
pub use manager::{ContainerInfo, ContentManager, ContentStats, PageContent};
pub use notify::Notification;
pub use session::{PageEntry, Session};
