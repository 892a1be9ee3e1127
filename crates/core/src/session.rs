//! Reading session state
//!
//! One `Session` exists per open container. It is built from a container
//! scan and replaced wholesale when another container is opened.

use pageview_cache::{Direction, PageKey};
use serde::Serialize;
use std::path::Path;

/// One page of a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageEntry {
    pub index: usize,
    /// Path of the page inside the container
    pub inner_path: String,
    /// File name shown to the reader
    pub name: String,
}

/// Position of the reader within one container
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    container: String,
    pages: Vec<PageEntry>,
    current_index: usize,
    direction: Direction,
}

impl Session {
    /// Session positioned on the first page, reading forward
    pub fn new(container: impl Into<String>, inner_paths: Vec<String>) -> Self {
        let pages = inner_paths
            .into_iter()
            .enumerate()
            .map(|(index, inner_path)| {
                let name = Path::new(&inner_path)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(&inner_path)
                    .to_string();
                PageEntry {
                    index,
                    inner_path,
                    name,
                }
            })
            .collect();

        Self {
            container: container.into(),
            pages,
            current_index: 0,
            direction: Direction::Forward,
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn total_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn page(&self, index: usize) -> Option<&PageEntry> {
        self.pages.get(index)
    }

    pub fn pages(&self) -> &[PageEntry] {
        &self.pages
    }

    pub fn page_key(&self, index: usize) -> PageKey {
        PageKey::new(self.container.clone(), index)
    }

    /// Move to `index`, updating the reading direction.
    ///
    /// Staying on the same page keeps the previous direction. Returns false
    /// and leaves the session untouched when `index` is out of range.
    pub fn goto(&mut self, index: usize) -> bool {
        if index >= self.pages.len() {
            return false;
        }
        if let Some(direction) = Direction::from_delta(index as i64 - self.current_index as i64) {
            self.direction = direction;
        }
        self.current_index = index;
        true
    }

    /// Step forward one page. Returns false on the last page.
    pub fn next(&mut self) -> bool {
        let next = self.current_index + 1;
        next < self.pages.len() && self.goto(next)
    }

    /// Step back one page. Returns false on the first page.
    pub fn prev(&mut self) -> bool {
        match self.current_index.checked_sub(1) {
            Some(prev) => self.goto(prev),
            None => false,
        }
    }

    pub fn is_first_page(&self) -> bool {
        self.current_index == 0
    }

    pub fn is_last_page(&self) -> bool {
        self.current_index + 1 >= self.pages.len()
    }

    /// Neighbours worth preloading: up to `window` pages after the current
    /// one (nearest first), then up to `window` pages before it.
    pub fn preload_range(&self, window: usize) -> Vec<usize> {
        let total = self.pages.len();
        let current = self.current_index;

        let ahead = (1..=window)
            .map(|offset| current.saturating_add(offset))
            .take_while(|index| *index < total);
        let behind = (1..=window.min(current)).map(|offset| current - offset);

        ahead.chain(behind).collect()
    }
}
