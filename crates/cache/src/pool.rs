//! Page memory pool with direction-aware eviction
//!
//! Keeps recently relevant pages in memory under a byte budget. When space
//! is needed the pool evicts the unpinned page the reader is least likely
//! to look at next: pages already passed in the current reading direction
//! go first, then pages ahead, farthest first.
//!
//! The budget is soft. Pinned pages are never evicted, so a pool whose
//! entries are all pinned accepts inserts past `max_size`.

use crate::pressure::{utilization, MemoryPressure, PressureTracker};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::debug;

/// Bonus added to pages behind the reader, making them evicted first
pub const PASSED_PAGE_BONUS: i64 = 1 << 32;

/// Default utilization at which a pressure crossing is reported
pub const DEFAULT_PRESSURE_THRESHOLD: f64 = 0.85;

/// Reading direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// Direction of travel for a signed index delta; `None` when not moving
    pub fn from_delta(delta: i64) -> Option<Self> {
        match delta.signum() {
            1 => Some(Direction::Forward),
            -1 => Some(Direction::Backward),
            _ => None,
        }
    }

    /// +1 or -1
    pub fn sign(&self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Forward
    }
}

/// Eviction score of a page; higher is evicted first
///
/// With `diff = page_index - current_index`, reading forward scores passed
/// pages (`diff < 0`) at `PASSED_PAGE_BONUS - diff` and pages ahead at
/// `diff`, so the nearest page ahead survives longest. Reading backward is
/// the mirror image.
pub fn eviction_score(page_index: usize, current_index: usize, direction: Direction) -> i64 {
    let diff = page_index as i64 - current_index as i64;
    let behind = diff * -direction.sign();
    if behind > 0 {
        PASSED_PAGE_BONUS + behind
    } else {
        -behind
    }
}

/// Identifies one page of one container
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageKey {
    pub container: String,
    pub page_index: usize,
}

impl PageKey {
    pub fn new(container: impl Into<String>, page_index: usize) -> Self {
        Self {
            container: container.into(),
            page_index,
        }
    }
}

/// A cached page
///
/// The payload is shared; cloning an entry does not copy the bytes.
#[derive(Debug, Clone)]
pub struct CachedPage {
    pub data: Arc<[u8]>,
    pub page_index: usize,
    pub size: usize,
    pub last_accessed: Instant,
    pub pinned: bool,
}

/// Pool configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryPoolConfig {
    /// Byte budget
    pub max_size: usize,
    /// Utilization (0.0 to 1.0) at which a pressure crossing is reported
    pub pressure_threshold: f64,
}

impl Default for MemoryPoolConfig {
    fn default() -> Self {
        Self {
            max_size: 512 * 1024 * 1024,
            pressure_threshold: DEFAULT_PRESSURE_THRESHOLD,
        }
    }
}

impl MemoryPoolConfig {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            ..Default::default()
        }
    }

    /// Budget of `megabytes` MiB, saturating at `usize::MAX` bytes
    pub fn with_mb_limit(megabytes: usize) -> Self {
        Self::new(megabytes.saturating_mul(1024 * 1024))
    }

    pub fn with_pressure_threshold(mut self, threshold: f64) -> Self {
        self.pressure_threshold = threshold;
        self
    }
}

/// What an insert did besides storing the page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Pages evicted to make room, in eviction order
    pub evicted: Vec<PageKey>,
    /// Utilization moved from below to at/above the pressure threshold
    pub pressure_crossed: bool,
}

/// What a bulk removal freed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearOutcome {
    pub removed: usize,
    pub freed: usize,
}

/// Memory pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryPoolStats {
    pub entry_count: usize,
    pub total_size: usize,
    pub max_size: usize,
    pub usage_percent: u8,
    pub locked_count: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub pressure: MemoryPressure,
}

impl MemoryPoolStats {
    /// Cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct PoolState {
    entries: HashMap<PageKey, CachedPage>,
    total_size: usize,
    max_size: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    pressure: PressureTracker,
}

impl PoolState {
    /// Unpinned entry with the highest eviction score
    ///
    /// Entries of other containers than the one being filled are stale and
    /// go before anything else. Ties go to the least recently used entry.
    fn select_victim(
        &self,
        container: &str,
        current_index: usize,
        direction: Direction,
    ) -> Option<PageKey> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.pinned)
            .max_by_key(|(key, entry)| {
                let score = if key.container == container {
                    eviction_score(entry.page_index, current_index, direction)
                } else {
                    i64::MAX
                };
                (score, Reverse(entry.last_accessed))
            })
            .map(|(key, _)| key.clone())
    }

    fn remove_entry(&mut self, key: &PageKey) -> Option<CachedPage> {
        let entry = self.entries.remove(key)?;
        self.total_size -= entry.size;
        Some(entry)
    }
}

/// Bounded page cache shared by the loader and the workers
///
/// One mutex guards every operation, lookups included: eviction can race
/// with a lookup and must never expose a half-updated map.
///
/// # Example
///
/// ```
/// use pageview_cache::{Direction, MemoryPool, MemoryPoolConfig, PageKey};
///
/// let pool = MemoryPool::new(MemoryPoolConfig::new(100));
///
/// pool.insert(PageKey::new("book", 1), vec![0u8; 40], 3, Direction::Forward);
/// pool.insert(PageKey::new("book", 2), vec![0u8; 40], 3, Direction::Forward);
/// let outcome = pool.insert(PageKey::new("book", 3), vec![0u8; 40], 3, Direction::Forward);
///
/// // Page 1 is farthest behind the reader
/// assert_eq!(outcome.evicted, vec![PageKey::new("book", 1)]);
/// assert_eq!(pool.stats().total_size, 80);
/// ```
pub struct MemoryPool {
    state: Mutex<PoolState>,
}

impl MemoryPool {
    pub fn new(config: MemoryPoolConfig) -> Self {
        Self {
            state: Mutex::new(PoolState {
                entries: HashMap::new(),
                total_size: 0,
                max_size: config.max_size,
                hits: 0,
                misses: 0,
                evictions: 0,
                pressure: PressureTracker::new(config.pressure_threshold),
            }),
        }
    }

    /// Pool with a byte budget given in megabytes
    pub fn with_mb_limit(megabytes: usize) -> Self {
        Self::new(MemoryPoolConfig::with_mb_limit(megabytes))
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a page, refreshing its access time
    ///
    /// A miss is not an error.
    pub fn get(&self, key: &PageKey) -> Option<CachedPage> {
        let mut state = self.lock_state();
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_accessed = Instant::now();
                let entry = entry.clone();
                state.hits += 1;
                Some(entry)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Check for a page without touching its access time or the hit counters
    pub fn contains(&self, key: &PageKey) -> bool {
        self.lock_state().entries.contains_key(key)
    }

    /// Store a page, evicting as needed
    ///
    /// While the new page does not fit, the unpinned page with the highest
    /// eviction score relative to `current_index` and `direction` is
    /// removed. If only pinned pages remain the page is stored anyway.
    /// Re-inserting an existing key replaces it and keeps its pin.
    pub fn insert(
        &self,
        key: PageKey,
        data: impl Into<Arc<[u8]>>,
        current_index: usize,
        direction: Direction,
    ) -> InsertOutcome {
        let data = data.into();
        let size = data.len();
        let mut state = self.lock_state();

        let pinned = state
            .remove_entry(&key)
            .map(|old| old.pinned)
            .unwrap_or(false);

        let mut evicted = Vec::new();
        while state.total_size + size > state.max_size {
            let Some(victim) = state.select_victim(&key.container, current_index, direction)
            else {
                debug!(
                    total = state.total_size,
                    max = state.max_size,
                    "only pinned pages left, inserting over budget"
                );
                break;
            };
            if let Some(entry) = state.remove_entry(&victim) {
                debug!(
                    container = %victim.container,
                    page = entry.page_index,
                    size = entry.size,
                    "evict"
                );
                state.evictions += 1;
                evicted.push(victim);
            }
        }

        state.entries.insert(
            key.clone(),
            CachedPage {
                data,
                page_index: key.page_index,
                size,
                last_accessed: Instant::now(),
                pinned,
            },
        );
        state.total_size += size;

        let (total, max) = (state.total_size, state.max_size);
        let pressure_crossed = state.pressure.observe(total, max);

        debug!(
            container = %key.container,
            page = key.page_index,
            size,
            total,
            max,
            evicted = evicted.len(),
            "insert"
        );

        InsertOutcome {
            evicted,
            pressure_crossed,
        }
    }

    /// Remove one page
    pub fn remove(&self, key: &PageKey) -> Option<CachedPage> {
        let mut state = self.lock_state();
        let entry = state.remove_entry(key)?;
        let (total, max) = (state.total_size, state.max_size);
        state.pressure.observe(total, max);
        Some(entry)
    }

    /// Pin a page so it is never evicted; returns false if absent
    pub fn lock(&self, key: &PageKey) -> bool {
        self.set_pinned(key, true)
    }

    /// Unpin a page; returns false if absent
    pub fn unlock(&self, key: &PageKey) -> bool {
        self.set_pinned(key, false)
    }

    fn set_pinned(&self, key: &PageKey, pinned: bool) -> bool {
        match self.lock_state().entries.get_mut(key) {
            Some(entry) => {
                entry.pinned = pinned;
                true
            }
            None => false,
        }
    }

    /// Pin every cached page of `container` with index in `start..=end`
    pub fn lock_range(&self, container: &str, start: usize, end: usize) -> usize {
        let mut state = self.lock_state();
        let mut pinned = 0;
        for (key, entry) in state.entries.iter_mut() {
            if key.container == container && (start..=end).contains(&key.page_index) {
                entry.pinned = true;
                pinned += 1;
            }
        }
        pinned
    }

    /// Unpin every page
    pub fn unlock_all(&self) {
        for entry in self.lock_state().entries.values_mut() {
            entry.pinned = false;
        }
    }

    /// Remove every page of `container`, pinned or not
    pub fn clear(&self, container: &str) -> ClearOutcome {
        let mut state = self.lock_state();
        let mut outcome = ClearOutcome::default();

        state.entries.retain(|key, entry| {
            if key.container == container {
                outcome.removed += 1;
                outcome.freed += entry.size;
                false
            } else {
                true
            }
        });
        state.total_size -= outcome.freed;
        let (total, max) = (state.total_size, state.max_size);
        state.pressure.observe(total, max);

        if outcome.removed > 0 {
            debug!(container, removed = outcome.removed, freed = outcome.freed, "clear");
        }
        outcome
    }

    /// Remove every page
    pub fn clear_all(&self) -> ClearOutcome {
        let mut state = self.lock_state();
        let outcome = ClearOutcome {
            removed: state.entries.len(),
            freed: state.total_size,
        };
        state.entries.clear();
        state.total_size = 0;
        let max = state.max_size;
        state.pressure.observe(0, max);
        outcome
    }

    /// Sorted page indices cached for `container`
    pub fn cached_pages(&self, container: &str) -> Vec<usize> {
        let mut pages: Vec<usize> = self
            .lock_state()
            .entries
            .keys()
            .filter(|key| key.container == container)
            .map(|key| key.page_index)
            .collect();
        pages.sort_unstable();
        pages
    }

    /// Get current pool statistics
    pub fn stats(&self) -> MemoryPoolStats {
        let state = self.lock_state();
        let ratio = utilization(state.total_size, state.max_size);
        MemoryPoolStats {
            entry_count: state.entries.len(),
            total_size: state.total_size,
            max_size: state.max_size,
            usage_percent: (ratio * 100.0).min(255.0) as u8,
            locked_count: state.entries.values().filter(|e| e.pinned).count(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            pressure: MemoryPressure::from_utilization(ratio),
        }
    }
}

impl Default for MemoryPool {
    /// Pool with a 512MB budget
    fn default() -> Self {
        Self::new(MemoryPoolConfig::default())
    }
}
