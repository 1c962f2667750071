//! Target window classification.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Target timestamp with a symmetric tolerance, both in seconds.
///
/// A sample `t` is inside the window iff `|t - target| <= tolerance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetWindow {
    target: u64,
    tolerance: u64,
}

/// Where a sample falls relative to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPosition {
    /// Inside the window; `offset = t - target`.
    InWindow { offset: i64 },
    /// Before the window; seconds until the target.
    Ahead { remaining: u64 },
    /// After the window; seconds since the target.
    Passed { late_by: u64 },
}

impl TargetWindow {
    /// Validate and build a window.
    pub fn new(target: i64, tolerance: i64) -> Result<Self> {
        if target <= 0 {
            return Err(EngineError::InvalidWindow(format!(
                "target timestamp must be positive, got {}",
                target
            )));
        }
        if tolerance < 0 {
            return Err(EngineError::InvalidWindow(format!(
                "tolerance must not be negative, got {}",
                tolerance
            )));
        }
        Ok(Self {
            target: target as u64,
            tolerance: tolerance as u64,
        })
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn tolerance(&self) -> u64 {
        self.tolerance
    }

    /// Classify a sampled timestamp.
    pub fn classify(&self, timestamp: u64) -> WindowPosition {
        let diff = timestamp as i128 - self.target as i128;
        if diff.unsigned_abs() <= self.tolerance as u128 {
            let offset = diff.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
            return WindowPosition::InWindow { offset };
        }
        if diff < 0 {
            WindowPosition::Ahead {
                remaining: diff.unsigned_abs() as u64,
            }
        } else {
            WindowPosition::Passed {
                late_by: diff as u64,
            }
        }
    }

    pub fn contains(&self, timestamp: u64) -> bool {
        matches!(self.classify(timestamp), WindowPosition::InWindow { .. })
    }
}
