//! Background rebuild of the spatial visibility index.
//!
//! One worker thread polls for rebuild requests at a fixed interval. A
//! rebuild copies the cached leaves (capped at `max_leaves`), builds a fresh
//! [`SpatialVisibilityIndex`] off the main thread, then swaps the published
//! `Arc` handle. The publish lock is held only for that swap and for readers
//! cloning the handle out, so queries never wait on a build and a build never
//! waits on queries.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::core::types::{Result, Vec3};
use crate::core::Error;
use crate::math::Aabb;
use crate::visibility::cache::LeafCache;
use crate::visibility::config::VisibilityConfig;
use crate::visibility::grid::SpatialVisibilityIndex;
use crate::visibility::IndexSource;

/// Name given to the worker thread.
pub const BUILDER_THREAD_NAME: &str = "pvs-snapshot-builder";

/// Counters describing builder activity.
#[derive(Clone, Debug, Default)]
pub struct BuilderStats {
    /// Indices built and published
    pub builds_completed: u64,
    /// Builds aborted by an error
    pub builds_failed: u64,
    /// Leaves ignored because a snapshot exceeded `max_leaves`
    pub leaves_truncated: u64,
    /// Wall time of the most recent successful build (ms)
    pub last_build_ms: f32,
    /// Leaves in the most recently published index
    pub last_leaf_count: usize,
}

/// Latest requested pivot plus request bookkeeping.
///
/// `requested` increments on every request; `completed` is set to the
/// request number a finished rebuild started from. A rebuild is pending
/// while `requested > completed`, so requests arriving mid-build survive.
#[derive(Debug, Default)]
struct PendingRequest {
    pivot: Vec3,
    requested: u64,
    completed: u64,
}

/// State shared between the owning handle and the worker thread.
struct Shared {
    cache: Arc<LeafCache>,
    config: VisibilityConfig,
    published: Mutex<Option<Arc<SpatialVisibilityIndex>>>,
    request: Mutex<PendingRequest>,
    generation: AtomicU64,
    shutdown: AtomicBool,
    stats: Mutex<BuilderStats>,
}

impl Shared {
    /// Pivot and request number of the outstanding request, if any
    fn pending(&self) -> Option<(Vec3, u64)> {
        let request = self.request.lock().unwrap_or_else(PoisonError::into_inner);
        (request.requested > request.completed).then_some((request.pivot, request.requested))
    }

    fn complete(&self, request_number: u64) {
        let mut request = self.request.lock().unwrap_or_else(PoisonError::into_inner);
        request.completed = request.completed.max(request_number);
    }

    /// Swap in a freshly built index. The previous index is released after
    /// the lock is dropped.
    fn publish(&self, index: SpatialVisibilityIndex) -> u64 {
        let index = Arc::new(index);
        let previous = {
            let mut published = self.published.lock().unwrap_or_else(PoisonError::into_inner);
            published.replace(index)
        };
        drop(previous);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Copy the cached leaves and build an index from them.
    ///
    /// `Ok(None)` means there was nothing to build from and the request
    /// should stay pending.
    fn build(&self, pivot: Vec3) -> Result<Option<SpatialVisibilityIndex>> {
        let max_leaves = self.config.max_leaves;

        let (leaves, total) = {
            let Some(guard) = self.cache.begin_consume() else {
                return Ok(None);
            };
            let Some(snapshot) = guard.snapshot().filter(|s| s.valid) else {
                return Ok(None);
            };

            let total = snapshot.leaf_positions.len();
            let mut leaves = Vec::new();
            leaves.try_reserve_exact(total.min(max_leaves)).map_err(|e| {
                Error::Resource(format!("copying {} leaves: {}", total.min(max_leaves), e))
            })?;
            leaves.extend(
                snapshot.leaf_positions
                    .iter()
                    .take(max_leaves)
                    .filter(|p| p.is_finite())
                    .copied(),
            );
            (leaves, total)
        };

        if total > max_leaves {
            let truncated = total - max_leaves;
            log::debug!("Snapshot builder: ignoring {} leaves over the {} cap", truncated, max_leaves);
            self.stats.lock().unwrap_or_else(PoisonError::into_inner).leaves_truncated += truncated as u64;
        }

        let Some(bounds) = Aabb::from_points(&leaves) else {
            return Ok(None);
        };
        let bounds = bounds.inflated(self.config.bounds_margin);

        SpatialVisibilityIndex::build(&leaves, pivot, bounds, self.config.cell_size).map(Some)
    }

    /// Handle one pending request, if there is one.
    fn process_pending(&self) {
        let Some((pivot, request_number)) = self.pending() else {
            return;
        };

        let start = Instant::now();
        match self.build(pivot) {
            Ok(Some(index)) => {
                let leaf_count = index.leaf_count();
                let cells = index.occupied_cells();
                let generation = self.publish(index);
                self.complete(request_number);

                let build_ms = start.elapsed().as_secs_f32() * 1000.0;
                {
                    let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
                    stats.builds_completed += 1;
                    stats.last_build_ms = build_ms;
                    stats.last_leaf_count = leaf_count;
                }
                log::debug!(
                    "Published visibility index #{}: {} leaves in {} cells ({:.2} ms)",
                    generation, leaf_count, cells, build_ms
                );
            }
            Ok(None) => {
                log::trace!("Snapshot builder: no leaf data yet, request stays pending");
            }
            Err(e) => {
                // Keep the previous index; a later request retries
                self.complete(request_number);
                self.stats.lock().unwrap_or_else(PoisonError::into_inner).builds_failed += 1;
                log::error!("Visibility index build failed, keeping previous index: {}", e);
            }
        }
    }
}

/// Rebuilds and publishes the visibility index on a background thread.
pub struct AsyncSnapshotBuilder {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncSnapshotBuilder {
    /// Create a builder reading from `cache`. The worker starts on the
    /// first [`request_update`](Self::request_update).
    pub fn new(cache: Arc<LeafCache>, config: VisibilityConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                cache,
                config,
                published: Mutex::new(None),
                request: Mutex::new(PendingRequest::default()),
                generation: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
                stats: Mutex::new(BuilderStats::default()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Leaf cache the builder consumes
    pub fn cache(&self) -> &Arc<LeafCache> {
        &self.shared.cache
    }

    pub fn config(&self) -> &VisibilityConfig {
        &self.shared.config
    }

    /// Ask for a rebuild around `pivot`. Never blocks on a build.
    pub fn request_update(&self, pivot: Vec3) {
        if self.shared.shutdown.load(Ordering::Acquire) {
            log::warn!("Snapshot builder: update requested after shutdown, ignoring");
            return;
        }

        {
            let mut request = self.shared.request.lock().unwrap_or_else(PoisonError::into_inner);
            request.pivot = pivot;
            request.requested += 1;
        }

        self.ensure_worker();
    }

    fn ensure_worker(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name(BUILDER_THREAD_NAME.to_string())
            .spawn(move || worker_loop(shared));

        match spawned {
            Ok(handle) => {
                log::info!(
                    "Snapshot builder started (poll {} ms, cell size {}, max {} leaves)",
                    self.shared.config.poll_interval_ms,
                    self.shared.config.cell_size,
                    self.shared.config.max_leaves
                );
                *worker = Some(handle);
            }
            Err(e) => {
                log::error!("Failed to start snapshot builder thread, will retry on next request: {}", e);
            }
        }
    }

    /// Whether a requested rebuild has not been published yet
    pub fn is_update_pending(&self) -> bool {
        self.shared.pending().is_some()
    }

    /// Currently published index. The handle stays valid however many
    /// rebuilds happen while the caller holds it.
    pub fn current_index(&self) -> Option<Arc<SpatialVisibilityIndex>> {
        self.shared.published.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of indices published so far
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> BuilderStats {
        self.shared.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Whether the worker thread is alive
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait until at least `generation` indices have been published, up to
    /// `timeout`. Returns whether the generation was reached.
    pub fn wait_for_generation(&self, generation: u64, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.generation() >= generation {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Stop the worker and join it. A build in flight completes first.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);

        let handle = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Snapshot builder thread panicked");
            } else {
                log::info!("Snapshot builder stopped after {} publications", self.generation());
            }
        }
    }
}

impl IndexSource for AsyncSnapshotBuilder {
    fn current(&self) -> Option<Arc<SpatialVisibilityIndex>> {
        self.current_index()
    }

    fn has_data(&self) -> bool {
        self.generation() > 0 || self.shared.cache.has_data()
    }
}

impl Drop for AsyncSnapshotBuilder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let interval = shared.config.poll_interval();
    while !shared.shutdown.load(Ordering::Acquire) {
        shared.process_pending();
        std::thread::sleep(interval);
    }
    log::debug!("Snapshot builder loop exiting");
}
