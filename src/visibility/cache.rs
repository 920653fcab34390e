//! Latest PVS leaf snapshot handed from the engine to the index builder.
//!
//! The engine replaces the snapshot wholesale whenever it recomputes
//! visibility. The builder reads it through a [`ConsumeGuard`]; while a guard
//! is alive, new stores are refused so the caller retries on a later tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::core::types::Vec3;

/// Immutable set of leaf positions captured from one viewpoint.
#[derive(Clone, Debug)]
pub struct VisibilitySnapshot {
    /// Sample points of the potentially visible set
    pub leaf_positions: Vec<Vec3>,
    /// Viewpoint the leaves were computed from
    pub pivot: Vec3,
    /// When the snapshot was stored
    pub captured_at: Instant,
    /// False once the cache has been invalidated
    pub valid: bool,
}

impl VisibilitySnapshot {
    /// Age of the snapshot in seconds
    pub fn age_secs(&self) -> f32 {
        self.captured_at.elapsed().as_secs_f32()
    }
}

/// Holder for the most recent [`VisibilitySnapshot`].
pub struct LeafCache {
    /// Current snapshot, replaced as a whole on every store
    current: Mutex<Option<Arc<VisibilitySnapshot>>>,
    /// Set while a rebuild is reading the snapshot
    consuming: AtomicBool,
}

impl LeafCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            consuming: AtomicBool::new(false),
        }
    }

    /// Replace the cached leaves.
    ///
    /// Returns false without touching the cache while a rebuild is consuming
    /// it.
    pub fn store(&self, leaf_positions: Vec<Vec3>, pivot: Vec3) -> bool {
        if self.consuming.load(Ordering::Acquire) {
            log::debug!("LeafCache: store of {} leaves refused, rebuild in progress", leaf_positions.len());
            return false;
        }

        let snapshot = Arc::new(VisibilitySnapshot {
            leaf_positions,
            pivot,
            captured_at: Instant::now(),
            valid: true,
        });

        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        // A rebuild may have started between the flag check and the lock
        if self.consuming.load(Ordering::Acquire) {
            return false;
        }
        *current = Some(snapshot);
        true
    }

    /// Drop the cached leaves (level unload, teleport).
    ///
    /// The pivot and capture time are kept so callers can still tell when
    /// visibility was last computed.
    pub fn invalidate(&self) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let Some((pivot, captured_at)) = current.as_ref().map(|s| (s.pivot, s.captured_at)) else {
            return;
        };
        *current = Some(Arc::new(VisibilitySnapshot {
            leaf_positions: Vec::new(),
            pivot,
            captured_at,
            valid: false,
        }));
    }

    /// Current snapshot handle, if any
    pub fn snapshot(&self) -> Option<Arc<VisibilitySnapshot>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Whether a valid snapshot has been stored
    pub fn has_data(&self) -> bool {
        self.snapshot().is_some_and(|s| s.valid)
    }

    /// Whether a rebuild currently holds the cache
    pub fn is_consuming(&self) -> bool {
        self.consuming.load(Ordering::Acquire)
    }

    /// Mark the cache as being consumed by a rebuild.
    ///
    /// Returns `None` if another consumer already holds it.
    pub fn begin_consume(&self) -> Option<ConsumeGuard<'_>> {
        self.consuming
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ConsumeGuard { cache: self })
    }
}

impl Default for LeafCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Read access for a rebuild; stores are refused until it is dropped.
pub struct ConsumeGuard<'a> {
    cache: &'a LeafCache,
}

impl ConsumeGuard<'_> {
    /// Snapshot being consumed
    pub fn snapshot(&self) -> Option<Arc<VisibilitySnapshot>> {
        self.cache.snapshot()
    }
}

impl Drop for ConsumeGuard<'_> {
    fn drop(&mut self) {
        self.cache.consuming.store(false, Ordering::Release);
    }
}
