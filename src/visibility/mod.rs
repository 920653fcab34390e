//! PVS-driven render culling.
//!
//! The engine periodically computes a potentially visible set as a list of
//! leaf sample points. Those are cached ([`LeafCache`]), turned into a
//! cell-occupancy index on a background thread ([`AsyncSnapshotBuilder`]),
//! and queried in time-boxed batches ([`BatchClassificationJob`]) to decide
//! which entities get large render bounds ([`EntityBoundsController`]).

pub mod bounds;
pub mod brute_force;
pub mod builder;
pub mod cache;
pub mod config;
pub mod grid;
pub mod job;
pub mod system;

use std::sync::Arc;

pub use bounds::{BoundsSink, EntityBoundsController, EntityBoundsRecord, EntityId, FnSink};
pub use brute_force::{BatchVisibility, test_batch};
pub use builder::{AsyncSnapshotBuilder, BuilderStats};
pub use cache::{LeafCache, VisibilitySnapshot};
pub use config::VisibilityConfig;
pub use grid::SpatialVisibilityIndex;
pub use job::{BatchClassificationJob, BatchOutput};
pub use system::{SceneEntity, TickReport, VisibilitySystem};

/// Anything that can hand out the current spatial index.
pub trait IndexSource {
    /// Index to query right now, if one has been built
    fn current(&self) -> Option<Arc<SpatialVisibilityIndex>>;

    /// Whether visibility data of any kind exists yet
    fn has_data(&self) -> bool {
        self.current().is_some()
    }
}

impl IndexSource for Arc<SpatialVisibilityIndex> {
    fn current(&self) -> Option<Arc<SpatialVisibilityIndex>> {
        Some(Arc::clone(self))
    }
}
