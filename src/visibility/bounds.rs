//! Per-entity render bounds overrides.
//!
//! Visible entities get large "unculled" bounds so the renderer never drops
//! them; hidden ones get their original bounds back. Originals are recorded
//! the first time an entity is seen and kept until the owner clears the
//! table (level unload).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::types::Vec3;
use crate::math::Aabb;

/// Stable handle for an entity, issued by the owning scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// Receiver of bounds updates (the renderer side).
pub trait BoundsSink {
    /// Set the render bounds of `id`.
    fn set_bounds(&mut self, id: EntityId, mins: Vec3, maxs: Vec3);
}

impl BoundsSink for HashMap<EntityId, Aabb> {
    fn set_bounds(&mut self, id: EntityId, mins: Vec3, maxs: Vec3) {
        self.insert(id, Aabb::new(mins, maxs));
    }
}

impl<S: BoundsSink + ?Sized> BoundsSink for &mut S {
    fn set_bounds(&mut self, id: EntityId, mins: Vec3, maxs: Vec3) {
        (**self).set_bounds(id, mins, maxs);
    }
}

/// Adapts a closure into a [`BoundsSink`].
pub struct FnSink<F>(pub F);

impl<F: FnMut(EntityId, Vec3, Vec3)> BoundsSink for FnSink<F> {
    fn set_bounds(&mut self, id: EntityId, mins: Vec3, maxs: Vec3) {
        (self.0)(id, mins, maxs);
    }
}

/// Bounds an entity had before any override.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntityBoundsRecord {
    pub original_mins: Vec3,
    pub original_maxs: Vec3,
}

impl EntityBoundsRecord {
    pub fn aabb(&self) -> Aabb {
        Aabb::new(self.original_mins, self.original_maxs)
    }
}

/// Original-bounds table plus the logic that swaps bounds in and out.
pub struct EntityBoundsController<S: BoundsSink> {
    sink: S,
    records: HashMap<EntityId, EntityBoundsRecord>,
    /// Entities that always receive large bounds regardless of visibility
    always_expand: HashSet<EntityId>,
}

impl<S: BoundsSink> EntityBoundsController<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            records: HashMap::new(),
            always_expand: HashSet::new(),
        }
    }

    /// Record `id`'s original bounds unless a record already exists.
    ///
    /// Returns true when a new record was created.
    pub fn store_original(&mut self, id: EntityId, mins: Vec3, maxs: Vec3) -> bool {
        if self.records.contains_key(&id) {
            return false;
        }
        self.records.insert(id, EntityBoundsRecord {
            original_mins: mins,
            original_maxs: maxs,
        });
        true
    }

    /// Push bounds for one classification result.
    ///
    /// Visible (or always-expand) entities get the large bounds; others get
    /// their recorded original, or nothing if no record exists.
    pub fn apply(&mut self, id: EntityId, visible: bool, large_mins: Vec3, large_maxs: Vec3) {
        if visible || self.always_expand.contains(&id) {
            self.sink.set_bounds(id, large_mins, large_maxs);
        } else {
            self.restore_original(id);
        }
    }

    /// Push `id`'s original bounds. Returns false if no record exists.
    pub fn restore_original(&mut self, id: EntityId) -> bool {
        match self.records.get(&id) {
            Some(record) => {
                self.sink.set_bounds(id, record.original_mins, record.original_maxs);
                true
            }
            None => false,
        }
    }

    /// Record `current` as the original if this is the first sighting, then
    /// apply the classification result.
    pub fn observe(&mut self, id: EntityId, current: Aabb, visible: bool, large: Aabb) {
        self.store_original(id, current.min, current.max);
        self.apply(id, visible, large.min, large.max);
    }

    /// Give every entity whose position lies inside `region` the large
    /// bounds. Returns how many were expanded.
    pub fn apply_in_region(&mut self, entities: &[(EntityId, Vec3)], region: Aabb, large: Aabb) -> usize {
        let mut expanded = 0;
        for &(id, position) in entities {
            if region.contains_point(position) {
                self.sink.set_bounds(id, large.min, large.max);
                expanded += 1;
            }
        }
        expanded
    }

    /// Restore every recorded entity (mode toggle or teardown).
    pub fn restore_all(&mut self) -> usize {
        for (&id, record) in &self.records {
            self.sink.set_bounds(id, record.original_mins, record.original_maxs);
        }
        self.records.len()
    }

    /// Mark or unmark `id` as always receiving large bounds
    pub fn set_always_expand(&mut self, id: EntityId, always: bool) {
        if always {
            self.always_expand.insert(id);
        } else {
            self.always_expand.remove(&id);
        }
    }

    pub fn is_always_expand(&self, id: EntityId) -> bool {
        self.always_expand.contains(&id)
    }

    pub fn record(&self, id: EntityId) -> Option<&EntityBoundsRecord> {
        self.records.get(&id)
    }

    /// Number of recorded entities
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forget all records and exemptions without touching the sink.
    pub fn clear(&mut self) {
        self.records.clear();
        self.always_expand.clear();
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
