//! Memory pressure levels and threshold crossing detection

use serde::Serialize;

/// Memory pressure level indicating pool health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum MemoryPressure {
    /// Memory usage is low (< 50% utilization)
    Low,
    /// Memory usage is moderate (50-75% utilization)
    Moderate,
    /// Memory usage is high (75-90% utilization)
    High,
    /// Memory usage is critical (>= 90% utilization, or over budget)
    Critical,
}

impl MemoryPressure {
    /// Get the memory pressure level from a utilization ratio (0.0 to 1.0)
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization < 0.5 {
            MemoryPressure::Low
        } else if utilization < 0.75 {
            MemoryPressure::Moderate
        } else if utilization < 0.90 {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }

    /// Returns true for High or Critical
    pub fn is_elevated(&self) -> bool {
        matches!(self, MemoryPressure::High | MemoryPressure::Critical)
    }
}

/// Remembers which side of a utilization threshold the pool was last on
///
/// Reports a crossing only on the transition from below to at/above the
/// threshold, so a pool sitting at 95% does not fire on every insert.
#[derive(Debug, Clone, Copy)]
pub struct PressureTracker {
    threshold: f64,
    above: bool,
}

impl PressureTracker {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            above: false,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Record the current usage; returns true if the threshold was just crossed upward
    pub fn observe(&mut self, used: usize, limit: usize) -> bool {
        let utilization = utilization(used, limit);
        let above = utilization >= self.threshold;
        let crossed = above && !self.above;
        self.above = above;
        crossed
    }
}

/// Utilization ratio; an empty budget counts as fully used once anything is stored
pub fn utilization(used: usize, limit: usize) -> f64 {
    if limit == 0 {
        if used == 0 {
            0.0
        } else {
            1.0
        }
    } else {
        used as f64 / limit as f64
    }
}
