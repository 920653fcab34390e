//! Tunables for the visibility pipeline.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::types::{Result, Vec3};
use crate::core::Error;
use crate::math::Aabb;

/// Default leaf-to-position distance that counts as visible.
pub const DEFAULT_THRESHOLD: f32 = 128.0;

/// Default edge length of one index cell.
pub const DEFAULT_CELL_SIZE: f32 = 256.0;

/// Default cap on leaves consumed by a single index build.
pub const DEFAULT_MAX_LEAVES: usize = 4096;

/// Extent of the default "unculled" render bounds.
pub const DEFAULT_LARGE_EXTENT: f32 = 32768.0;

/// Configuration for snapshot building and batch classification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    /// Distance from a leaf within which a position is visible.
    pub threshold: f32,
    /// Edge length of one index cell. Queries have no false negatives only
    /// while `threshold <= cell_size`.
    pub cell_size: f32,
    /// Padding added around the leaves' bounds when an index is built.
    pub bounds_margin: f32,
    /// Maximum leaves consumed per build; extra leaves are ignored.
    pub max_leaves: usize,
    /// Builder thread poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Entries classified per `tick`.
    pub batch_size: usize,
    /// Wall-clock budget per `tick` in milliseconds.
    pub budget_ms: u64,
    /// Render bounds applied to visible entities (min corner).
    pub large_mins: [f32; 3],
    /// Render bounds applied to visible entities (max corner).
    pub large_maxs: [f32; 3],
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            cell_size: DEFAULT_CELL_SIZE,
            bounds_margin: DEFAULT_THRESHOLD,
            max_leaves: DEFAULT_MAX_LEAVES,
            poll_interval_ms: 10,
            batch_size: 256,
            budget_ms: 2,
            large_mins: [-DEFAULT_LARGE_EXTENT; 3],
            large_maxs: [DEFAULT_LARGE_EXTENT; 3],
        }
    }
}

impl VisibilityConfig {
    /// Large render bounds as an AABB
    pub fn large_bounds(&self) -> Aabb {
        Aabb::new(Vec3::from_array(self.large_mins), Vec3::from_array(self.large_maxs))
    }

    /// Builder poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold.is_finite() && self.threshold >= 0.0) {
            return Err(Error::Config(format!("threshold must be finite and >= 0, got {}", self.threshold)));
        }
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(Error::Config(format!("cell_size must be finite and > 0, got {}", self.cell_size)));
        }
        if !(self.bounds_margin.is_finite() && self.bounds_margin >= 0.0) {
            return Err(Error::Config(format!("bounds_margin must be finite and >= 0, got {}", self.bounds_margin)));
        }
        if self.max_leaves == 0 {
            return Err(Error::Config("max_leaves must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be > 0".to_string()));
        }
        let large = self.large_bounds();
        if large.min.cmpgt(large.max).any() {
            return Err(Error::Config("large_mins must not exceed large_maxs".to_string()));
        }
        if self.threshold > self.cell_size {
            log::warn!(
                "threshold {} exceeds cell_size {}; index queries may miss leaves near cell edges",
                self.threshold, self.cell_size
            );
        }
        Ok(())
    }

    /// Save to file (sync)
    pub fn save_sync(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from file (sync); missing fields take their defaults.
    pub fn load_sync(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }
}
