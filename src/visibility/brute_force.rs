//! Exact distance tests against a raw leaf list.
//!
//! These skip the spatial index entirely. They cost O(positions × leaves)
//! and suit small one-off datasets, tools, and ground-truth checks.

use rayon::prelude::*;

use crate::core::types::Vec3;
use crate::math::Aabb;

/// Leaf count above which an AABB prefilter rejects far positions first.
pub const PREFILTER_MIN_LEAVES: usize = 100;

/// Position count at which the batch is split across the rayon pool.
const PARALLEL_MIN_POSITIONS: usize = 1024;

/// Per-position visibility from [`test_batch`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchVisibility {
    /// One flag per input position, in input order
    pub visible: Vec<bool>,
    /// Number of `true` entries in `visible`
    pub visible_count: usize,
}

/// Test every position against every leaf.
///
/// A position is visible when some leaf lies within `threshold`
/// (inclusive). With no leaves at all, everything is treated as visible so
/// content is never hidden before visibility data exists.
pub fn test_batch(positions: &[Vec3], leaves: &[Vec3], threshold: f32) -> BatchVisibility {
    if leaves.is_empty() {
        return BatchVisibility {
            visible: vec![true; positions.len()],
            visible_count: positions.len(),
        };
    }

    let threshold_sq = threshold * threshold;
    let prefilter = if leaves.len() > PREFILTER_MIN_LEAVES {
        Aabb::from_points(leaves).map(|aabb| aabb.inflated(threshold))
    } else {
        None
    };

    let test = |pos: &Vec3| {
        prefilter.is_none_or(|aabb| aabb.contains_point(*pos))
            && near_any_leaf(*pos, leaves, threshold_sq)
    };

    let visible: Vec<bool> = if positions.len() >= PARALLEL_MIN_POSITIONS {
        positions.par_iter().map(test).collect()
    } else {
        positions.iter().map(test).collect()
    };
    let visible_count = visible.iter().filter(|&&v| v).count();

    BatchVisibility { visible, visible_count }
}

/// Whether any leaf lies within `threshold` of `pos`.
///
/// Unlike [`test_batch`], an empty leaf list yields `false`: this is a plain
/// geometric query.
pub fn is_position_visible(pos: Vec3, leaves: &[Vec3], threshold: f32) -> bool {
    near_any_leaf(pos, leaves, threshold * threshold)
}

/// Indices of positions within `max_distance` of `origin` (inclusive).
pub fn filter_by_distance(positions: &[Vec3], origin: Vec3, max_distance: f32) -> Vec<usize> {
    let max_sq = max_distance * max_distance;
    positions
        .iter()
        .enumerate()
        .filter(|(_, p)| p.distance_squared(origin) <= max_sq)
        .map(|(i, _)| i)
        .collect()
}

/// Whether `viewer` lies inside the bounds of `vertices` grown by
/// `threshold`. Used to skip detailed work for regions the viewer is nowhere
/// near. Empty regions are never near.
pub fn viewer_near_region(vertices: &[Vec3], viewer: Vec3, threshold: f32) -> bool {
    Aabb::from_points(vertices)
        .is_some_and(|aabb| aabb.inflated(threshold).contains_point(viewer))
}

fn near_any_leaf(pos: Vec3, leaves: &[Vec3], threshold_sq: f32) -> bool {
    leaves.iter().any(|leaf| pos.distance_squared(*leaf) <= threshold_sq)
}
