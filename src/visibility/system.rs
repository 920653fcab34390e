//! Top-level wiring of the visibility pipeline.
//!
//! [`VisibilitySystem`] owns the leaf cache, the background builder, the
//! classification job and the bounds controller, and exposes the handful of
//! calls a game loop makes: hand over freshly computed leaves, start a pass
//! over the scene, tick it each frame, and tear down on level unload.

use std::sync::Arc;
use std::time::Instant;

use crate::core::types::{Result, Vec3};
use crate::math::Aabb;
use crate::visibility::bounds::{BoundsSink, EntityBoundsController, EntityId};
use crate::visibility::builder::AsyncSnapshotBuilder;
use crate::visibility::cache::LeafCache;
use crate::visibility::config::VisibilityConfig;
use crate::visibility::grid::SpatialVisibilityIndex;
use crate::visibility::job::BatchClassificationJob;
use crate::visibility::IndexSource;

/// One entity taking part in a classification pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneEntity {
    pub id: EntityId,
    pub position: Vec3,
    /// Render bounds the entity currently has
    pub bounds: Aabb,
}

/// Outcome of a single [`VisibilitySystem::tick`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TickReport {
    /// Entries classified this tick
    pub processed: usize,
    /// Of those, how many were visible
    pub visible: usize,
    /// True when no pass is running after this tick
    pub done: bool,
    pub progress: f32,
}

/// Running totals across passes.
#[derive(Clone, Debug, Default)]
pub struct PassStats {
    pub passes_started: u64,
    pub passes_completed: u64,
    pub entities_classified: u64,
    /// Visible entities in the last completed pass
    pub last_visible: usize,
    /// Wall time from `begin_pass` to the final tick of the last pass (ms)
    pub last_pass_ms: f32,
}

/// Leaf cache, index builder, classification job and bounds controller
/// driven together.
pub struct VisibilitySystem<S: BoundsSink> {
    config: VisibilityConfig,
    builder: AsyncSnapshotBuilder,
    job: BatchClassificationJob,
    bounds: EntityBoundsController<S>,
    stats: PassStats,
    pass_started: Option<Instant>,
    pass_visible: usize,
}

impl<S: BoundsSink> VisibilitySystem<S> {
    /// Create a system pushing bounds into `sink`. The config is validated.
    pub fn new(config: VisibilityConfig, sink: S) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(LeafCache::new());
        let builder = AsyncSnapshotBuilder::new(cache, config.clone());
        let job = BatchClassificationJob::new(config.threshold);

        Ok(Self {
            config,
            builder,
            job,
            bounds: EntityBoundsController::new(sink),
            stats: PassStats::default(),
            pass_started: None,
            pass_visible: 0,
        })
    }

    /// Hand over a freshly computed leaf set and request an index rebuild.
    ///
    /// Returns false if the cache is busy; the caller should offer the
    /// leaves again on a later frame.
    pub fn on_visibility_recomputed(&self, pivot: Vec3, leaves: Vec<Vec3>) -> bool {
        if !self.builder.cache().store(leaves, pivot) {
            return false;
        }
        self.builder.request_update(pivot);
        true
    }

    /// Start classifying `entities`.
    ///
    /// Entities seen for the first time have their current bounds recorded
    /// as originals.
    pub fn begin_pass(&mut self, entities: &[SceneEntity]) -> Result<()> {
        let ids = entities.iter().map(|e| e.id).collect();
        let positions = entities.iter().map(|e| e.position).collect();
        self.job.begin(
            &self.builder,
            ids,
            positions,
            self.config.large_bounds(),
            self.config.budget_ms,
        )?;

        for entity in entities {
            self.bounds.store_original(entity.id, entity.bounds.min, entity.bounds.max);
        }

        self.stats.passes_started += 1;
        self.pass_started = Some(Instant::now());
        self.pass_visible = 0;
        if !self.job.is_in_progress() {
            self.finish_pass();
        }
        Ok(())
    }

    /// Advance the running pass by one batch and push the resulting bounds.
    pub fn tick(&mut self) -> TickReport {
        if !self.job.is_in_progress() {
            return TickReport {
                done: true,
                progress: 1.0,
                ..Default::default()
            };
        }

        let out = self.job.process_next_batch(&self.builder, self.config.batch_size);
        let large = self.job.large_bounds();
        let ids = &self.job.ids()[out.range()];
        for (&id, &visible) in ids.iter().zip(&out.results) {
            self.bounds.apply(id, visible, large.min, large.max);
        }

        let visible = out.visible_count();
        self.pass_visible += visible;
        self.stats.entities_classified += out.results.len() as u64;
        if out.done {
            self.finish_pass();
        }

        TickReport {
            processed: out.results.len(),
            visible,
            done: out.done,
            progress: self.job.progress(),
        }
    }

    fn finish_pass(&mut self) {
        let elapsed_ms = self
            .pass_started
            .take()
            .map_or(0.0, |start| start.elapsed().as_secs_f32() * 1000.0);
        self.stats.passes_completed += 1;
        self.stats.last_visible = self.pass_visible;
        self.stats.last_pass_ms = elapsed_ms;
        log::debug!(
            "Visibility pass complete: {}/{} visible in {:.2} ms",
            self.pass_visible,
            self.job.len(),
            elapsed_ms
        );
    }

    /// Stop any pass and put every recorded entity back to its original
    /// bounds (culling switched off).
    pub fn restore_all(&mut self) -> usize {
        self.job.abort();
        self.pass_started = None;
        self.bounds.restore_all()
    }

    /// Level teardown: abort the pass, restore bounds, forget every record
    /// and drop the cached leaves. The last published index stays until the
    /// next rebuild replaces it.
    pub fn on_level_unload(&mut self) {
        let restored = self.restore_all();
        self.bounds.clear();
        self.builder.cache().invalidate();
        log::info!("Visibility state cleared on level unload ({} entities restored)", restored);
    }

    /// Always give `id` the large bounds, regardless of visibility
    pub fn set_always_expand(&mut self, id: EntityId, always: bool) {
        self.bounds.set_always_expand(id, always);
    }

    /// Stop the builder thread.
    pub fn shutdown(&mut self) {
        self.job.abort();
        self.builder.shutdown();
    }

    // --- Accessors ---

    pub fn config(&self) -> &VisibilityConfig {
        &self.config
    }

    pub fn builder(&self) -> &AsyncSnapshotBuilder {
        &self.builder
    }

    pub fn job(&self) -> &BatchClassificationJob {
        &self.job
    }

    pub fn bounds(&self) -> &EntityBoundsController<S> {
        &self.bounds
    }

    pub fn bounds_mut(&mut self) -> &mut EntityBoundsController<S> {
        &mut self.bounds
    }

    pub fn stats(&self) -> &PassStats {
        &self.stats
    }

    pub fn current_index(&self) -> Option<Arc<SpatialVisibilityIndex>> {
        self.builder.current()
    }

    /// Whether any visibility data (cached leaves or a built index) exists
    pub fn has_data(&self) -> bool {
        self.builder.has_data()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::core::Error;

    type Sink = HashMap<EntityId, Aabb>;

    fn small_box(center: Vec3) -> Aabb {
        Aabb::new(center - Vec3::ONE, center + Vec3::ONE)
    }

    fn entity(id: u64, position: Vec3) -> SceneEntity {
        SceneEntity {
            id: EntityId(id),
            position,
            bounds: small_box(position),
        }
    }

    fn system() -> VisibilitySystem<Sink> {
        let config = VisibilityConfig {
            poll_interval_ms: 1,
            batch_size: 2,
            budget_ms: 1000,
            ..Default::default()
        };
        VisibilitySystem::new(config, HashMap::new()).unwrap()
    }

    fn run_pass(sys: &mut VisibilitySystem<Sink>) -> usize {
        let mut ticks = 0;
        while !sys.tick().done {
            ticks += 1;
            assert!(ticks < 1000);
        }
        ticks
    }

    #[test]
    fn test_pass_before_data_is_rejected() {
        let mut sys = system();
        let err = sys.begin_pass(&[entity(1, Vec3::ZERO)]).unwrap_err();
        assert!(matches!(err, Error::NoVisibilityData));
        assert!(sys.bounds().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = VisibilityConfig { cell_size: 0.0, ..Default::default() };
        assert!(VisibilitySystem::new(config, Sink::new()).is_err());
    }

    #[test]
    fn test_full_pass_applies_bounds() {
        let mut sys = system();
        assert!(sys.on_visibility_recomputed(Vec3::ZERO, vec![Vec3::ZERO, Vec3::new(5000.0, 0.0, 0.0)]));
        assert!(sys.builder().wait_for_generation(1, Duration::from_secs(5)));

        let near = entity(1, Vec3::new(10.0, 0.0, 0.0));
        let far = entity(2, Vec3::new(2500.0, 0.0, 0.0));
        let other = entity(3, Vec3::new(4990.0, 0.0, 0.0));
        sys.begin_pass(&[near, far, other]).unwrap();
        run_pass(&mut sys);

        let large = sys.config().large_bounds();
        let sink = sys.bounds().sink();
        assert_eq!(sink[&EntityId(1)], large);
        assert_eq!(sink[&EntityId(2)], far.bounds);
        assert_eq!(sink[&EntityId(3)], large);

        let stats = sys.stats();
        assert_eq!(stats.passes_completed, 1);
        assert_eq!(stats.entities_classified, 3);
        assert_eq!(stats.last_visible, 2);
    }

    #[test]
    fn test_always_expand_and_restore_all() {
        let mut sys = system();
        sys.on_visibility_recomputed(Vec3::ZERO, vec![Vec3::ZERO]);
        assert!(sys.builder().wait_for_generation(1, Duration::from_secs(5)));

        let far = entity(7, Vec3::new(9000.0, 0.0, 0.0));
        sys.set_always_expand(far.id, true);
        sys.begin_pass(&[far]).unwrap();
        run_pass(&mut sys);
        assert_eq!(sys.bounds().sink()[&far.id], sys.config().large_bounds());

        assert_eq!(sys.restore_all(), 1);
        assert_eq!(sys.bounds().sink()[&far.id], far.bounds);
    }

    #[test]
    fn test_level_unload_clears_state() {
        let mut sys = system();
        sys.on_visibility_recomputed(Vec3::ZERO, vec![Vec3::ZERO]);
        assert!(sys.builder().wait_for_generation(1, Duration::from_secs(5)));

        let near = entity(1, Vec3::ZERO);
        let entities: Vec<SceneEntity> = (0..6).map(|i| entity(i, Vec3::ZERO)).collect();
        sys.begin_pass(&entities).unwrap();
        sys.tick();
        assert!(sys.job().is_in_progress());

        sys.on_level_unload();
        assert!(!sys.job().is_in_progress());
        assert!(sys.bounds().is_empty());
        assert!(!sys.builder().cache().has_data());
        assert_eq!(sys.bounds().sink()[&near.id], near.bounds);
    }

    #[test]
    fn test_empty_pass_completes() {
        let mut sys = system();
        sys.on_visibility_recomputed(Vec3::ZERO, vec![Vec3::ZERO]);
        assert!(sys.has_data());

        sys.begin_pass(&[]).unwrap();
        assert!(sys.tick().done);
        assert_eq!(sys.stats().passes_completed, 1);
    }
}
