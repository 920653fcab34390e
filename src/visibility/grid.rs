//! Sparse cell-occupancy index over PVS leaf positions.
//!
//! Each leaf marks the cell it falls in. A query looks at the 3x3x3 block of
//! cells around the queried position, so a lookup costs 27 hash probes no
//! matter how many leaves were inserted. The price is precision: any
//! position sharing a neighbourhood with an occupied cell is reported
//! visible, and a `threshold` larger than the cell size can miss leaves that
//! sit just past the neighbourhood edge.

use std::collections::HashSet;
use std::time::Instant;

use crate::core::types::{IVec3, Result, Vec3};
use crate::core::Error;
use crate::math::Aabb;

/// Built, read-only spatial index of potentially visible sample points.
#[derive(Clone, Debug)]
pub struct SpatialVisibilityIndex {
    /// World position of cell (0, 0, 0)'s min corner
    origin: Vec3,
    /// Edge length of one cell
    cell_size: f32,
    /// Region leaves are accepted from
    bounds: Aabb,
    /// Occupied cell coordinates
    cells: HashSet<IVec3>,
    /// Viewpoint the leaves were computed from
    pivot: Vec3,
    /// Leaves accepted into the index
    leaf_count: usize,
    /// Leaves rejected as out of bounds or non-finite
    dropped_leaves: usize,
    /// When the build started
    built_at: Instant,
}

impl SpatialVisibilityIndex {
    /// Set up an empty index covering `bounds`.
    ///
    /// The origin is the bounds' min corner.
    pub fn new(bounds: Aabb, cell_size: f32) -> Self {
        Self {
            origin: bounds.min,
            cell_size,
            bounds,
            cells: HashSet::new(),
            pivot: bounds.center(),
            leaf_count: 0,
            dropped_leaves: 0,
            built_at: Instant::now(),
        }
    }

    /// Set up an empty index with room for `capacity` occupied cells.
    ///
    /// Allocation failure is reported instead of aborting.
    pub fn with_capacity(bounds: Aabb, cell_size: f32, capacity: usize) -> Result<Self> {
        let mut index = Self::new(bounds, cell_size);
        index.cells.try_reserve(capacity).map_err(|e| {
            Error::Resource(format!("reserving {} index cells: {}", capacity, e))
        })?;
        Ok(index)
    }

    /// Build an index from a leaf set in one pass.
    pub fn build(leaves: &[Vec3], pivot: Vec3, bounds: Aabb, cell_size: f32) -> Result<Self> {
        let mut index = Self::with_capacity(bounds, cell_size, leaves.len())?;
        index.pivot = pivot;
        for &leaf in leaves {
            index.add_leaf(leaf);
        }
        Ok(index)
    }

    /// Record the viewpoint the leaves belong to
    pub fn set_pivot(&mut self, pivot: Vec3) {
        self.pivot = pivot;
    }

    /// Cell coordinate containing `pos`, or `None` for non-finite input
    pub fn cell_of(&self, pos: Vec3) -> Option<IVec3> {
        if !pos.is_finite() {
            return None;
        }
        // `as` conversion saturates, so far-away positions clamp to the i32 range
        Some(((pos - self.origin) / self.cell_size).floor().as_ivec3())
    }

    /// Mark the cell owning `pos` as occupied.
    ///
    /// Returns false (and counts the leaf as dropped) when `pos` lies outside
    /// the index bounds or is not finite.
    pub fn add_leaf(&mut self, pos: Vec3) -> bool {
        if !self.bounds.contains_point(pos) {
            self.dropped_leaves += 1;
            return false;
        }
        match self.cell_of(pos) {
            Some(cell) => {
                self.cells.insert(cell);
                self.leaf_count += 1;
                true
            }
            None => {
                self.dropped_leaves += 1;
                false
            }
        }
    }

    /// Approximate visibility test.
    ///
    /// True when any of the 27 cells around `pos` holds a leaf. Positions
    /// farther than `threshold` outside the index bounds are rejected before
    /// any cell lookup.
    pub fn test_position(&self, pos: Vec3, threshold: f32) -> bool {
        if !self.bounds.inflated(threshold.max(0.0)).contains_point(pos) {
            return false;
        }
        let Some(center) = self.cell_of(pos) else {
            return false;
        };

        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let cell = center.saturating_add(IVec3::new(dx, dy, dz));
                    if self.cells.contains(&cell) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Whether a specific cell is occupied
    pub fn contains_cell(&self, cell: IVec3) -> bool {
        self.cells.contains(&cell)
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn pivot(&self) -> Vec3 {
        self.pivot
    }

    /// Number of distinct occupied cells
    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    /// Leaves accepted into the index
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Leaves rejected during the build
    pub fn dropped_leaves(&self) -> usize {
        self.dropped_leaves
    }

    pub fn built_at(&self) -> Instant {
        self.built_at
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
