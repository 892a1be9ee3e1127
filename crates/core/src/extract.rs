//! Byte extraction from page containers
//!
//! The engine never reads containers itself. An [`Extractor`] lists the
//! pages of a container and returns the raw bytes of one page; the
//! [`ExtractorExecutor`] adapts it to the worker pool by dispatching on the
//! job payload.

use pageview_scheduler::{CancellationToken, Job, JobError, JobExecutor, JobKind, JobOutput, JobResult};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

/// File extensions recognised as pages
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "avif", "jxl", "bmp"];

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Reads pages out of a container.
///
/// Implementations run on worker threads. They should poll the token
/// between chunks of work and return `JobError::Cancelled` once it is set;
/// an implementation that never polls still works but cannot be cut short.
pub trait Extractor: Send + Sync + 'static {
    /// Inner paths of every page, in reading order
    fn scan(&self, container: &str, token: &CancellationToken) -> Result<Vec<String>, JobError>;

    /// Raw bytes of one page
    fn extract(
        &self,
        container: &str,
        inner_path: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, JobError>;

    /// Thumbnail bytes of one page; the full page unless overridden
    fn thumbnail(
        &self,
        container: &str,
        inner_path: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, JobError> {
        self.extract(container, inner_path, token)
    }
}

/// Treats a directory as a container and its image files as pages.
#[derive(Debug, Clone)]
pub struct DirectoryExtractor {
    chunk_size: usize,
}

impl Default for DirectoryExtractor {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl DirectoryExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read size between cancellation checks.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

impl Extractor for DirectoryExtractor {
    fn scan(&self, container: &str, token: &CancellationToken) -> Result<Vec<String>, JobError> {
        let entries = std::fs::read_dir(container).map_err(|err| io_error(container, err))?;

        let mut pages = Vec::new();
        for entry in entries {
            if token.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let entry = entry.map_err(|err| io_error(container, err))?;
            let path = entry.path();
            if path.is_file() && is_image(&path) {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    pages.push(name.to_string());
                }
            }
        }
        pages.sort();
        Ok(pages)
    }

    fn extract(
        &self,
        container: &str,
        inner_path: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, JobError> {
        let path = Path::new(container).join(inner_path);
        let mut file = File::open(&path).map_err(|err| io_error(inner_path, err))?;

        let mut data = Vec::new();
        let mut chunk = vec![0u8; self.chunk_size];
        loop {
            if token.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let read = match file.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(io_error(inner_path, err)),
            };
            data.extend_from_slice(&chunk[..read]);
        }

        if data.is_empty() {
            return Err(JobError::Corrupt(format!("{} is empty", inner_path)));
        }
        Ok(data)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn io_error(what: &str, err: io::Error) -> JobError {
    if err.kind() == io::ErrorKind::NotFound {
        JobError::NotFound(what.to_string())
    } else {
        JobError::Io(format!("{}: {}", what, err))
    }
}

/// MIME type guessed from a page's extension
pub fn detect_mime_type(inner_path: &str) -> &'static str {
    let ext = Path::new(inner_path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        Some("jxl") => "image/jxl",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Runs scheduler jobs against an [`Extractor`].
pub struct ExtractorExecutor<X> {
    extractor: Arc<X>,
}

impl<X: Extractor> ExtractorExecutor<X> {
    pub fn new(extractor: Arc<X>) -> Self {
        Self { extractor }
    }
}

impl<X: Extractor> JobExecutor for ExtractorExecutor<X> {
    fn execute(&self, job: &Job, token: &CancellationToken) -> JobResult {
        if token.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        match job.kind() {
            JobKind::PageContent {
                container,
                page_index,
                inner_path,
            } => {
                let data = self.extractor.extract(container, inner_path, token)?;
                Ok(JobOutput::PageLoaded {
                    container: container.clone(),
                    page_index: *page_index,
                    data,
                })
            }
            JobKind::Thumbnail {
                container,
                page_index,
                inner_path,
            } => {
                let data = self.extractor.thumbnail(container, inner_path, token)?;
                Ok(JobOutput::ThumbnailLoaded {
                    container: container.clone(),
                    page_index: *page_index,
                    data,
                })
            }
            JobKind::ContainerScan { container } => {
                let entries = self.extractor.scan(container, token)?;
                Ok(JobOutput::ContainerScanned {
                    container: container.clone(),
                    entries,
                })
            }
        }
    }
}
