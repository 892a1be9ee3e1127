//! Page Cache Library
//!
//! Bounded in-memory page pool with direction-aware eviction, pinning and
//! memory pressure reporting.

pub mod pool;
pub mod pressure;

pub use pool::{
    eviction_score, CachedPage, ClearOutcome, Direction, InsertOutcome, MemoryPool,
    MemoryPoolConfig, MemoryPoolStats, PageKey, DEFAULT_PRESSURE_THRESHOLD, PASSED_PAGE_BONUS,
};
pub use pressure::{utilization, MemoryPressure, PressureTracker};
