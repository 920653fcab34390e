//! Incremental, time-boxed classification of many entities.
//!
//! A job walks a fixed list of `(id, position)` entries a batch at a time so
//! classifying thousands of entities never stalls a frame. Each call to
//! [`BatchClassificationJob::process_next_batch`] stops at the batch size or
//! when the wall-clock budget runs out, whichever comes first, and always
//! makes progress on at least one entry.

use std::ops::Range;
use std::time::Duration;

use crate::core::time::FrameBudget;
use crate::core::types::{Result, Vec3};
use crate::core::Error;
use crate::math::Aabb;
use crate::visibility::bounds::EntityId;
use crate::visibility::IndexSource;

/// Results produced by one [`BatchClassificationJob::process_next_batch`] call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOutput {
    /// Index of the first entry classified by this call
    pub start: usize,
    /// Visibility of entries `start..start + results.len()`
    pub results: Vec<bool>,
    /// True once every entry of the job has been classified
    pub done: bool,
}

impl BatchOutput {
    /// Entry indices covered by this batch
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.results.len()
    }

    pub fn visible_count(&self) -> usize {
        self.results.iter().filter(|&&v| v).count()
    }
}

/// A resumable pass over a list of entities.
///
/// Entries are classified in input order. While a job is in progress,
/// `cursor <= len` and `results` holds exactly `cursor` values.
pub struct BatchClassificationJob {
    threshold: f32,
    ids: Vec<EntityId>,
    positions: Vec<Vec3>,
    /// Next entry to classify
    cursor: usize,
    results: Vec<bool>,
    in_progress: bool,
    large_bounds: Aabb,
    budget: Duration,
    /// Entries classified without an index (treated as visible)
    fail_open_count: usize,
}

impl BatchClassificationJob {
    /// Create an idle job.
    ///
    /// # Arguments
    /// * `threshold` - Visibility distance handed to index queries
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            ids: Vec::new(),
            positions: Vec::new(),
            cursor: 0,
            results: Vec::new(),
            in_progress: false,
            large_bounds: Aabb::new(Vec3::ZERO, Vec3::ZERO),
            budget: Duration::ZERO,
            fail_open_count: 0,
        }
    }

    // --- Lifecycle ---

    /// Start classifying `ids` at `positions`.
    ///
    /// Fails if the arrays differ in length, a job is already running, or
    /// `source` has no visibility data yet; the current state is left
    /// untouched in every failure case. An empty entity list completes
    /// immediately.
    ///
    /// # Arguments
    /// * `source` - Where the spatial index comes from
    /// * `ids` - Entity handles, parallel to `positions`
    /// * `positions` - Entity world positions
    /// * `large_bounds` - Bounds the caller applies to visible entities
    /// * `budget_ms` - Wall-clock budget per batch
    pub fn begin(
        &mut self,
        source: &impl IndexSource,
        ids: Vec<EntityId>,
        positions: Vec<Vec3>,
        large_bounds: Aabb,
        budget_ms: u64,
    ) -> Result<()> {
        if ids.len() != positions.len() {
            return Err(Error::LengthMismatch {
                ids: ids.len(),
                positions: positions.len(),
            });
        }
        if self.in_progress {
            return Err(Error::JobInProgress);
        }
        if !source.has_data() {
            return Err(Error::NoVisibilityData);
        }

        let mut results = Vec::new();
        results.try_reserve_exact(ids.len()).map_err(|e| {
            Error::Resource(format!("reserving {} job results: {}", ids.len(), e))
        })?;

        self.in_progress = !ids.is_empty();
        log::debug!("Classification job started: {} entities, {} ms budget", ids.len(), budget_ms);

        self.ids = ids;
        self.positions = positions;
        self.cursor = 0;
        self.results = results;
        self.large_bounds = large_bounds;
        self.budget = Duration::from_millis(budget_ms);
        self.fail_open_count = 0;
        Ok(())
    }

    /// Classify up to `batch_size` further entries.
    ///
    /// Stops early once the budget is exceeded, but never before one entry
    /// has been processed. The index handle is fetched once per call; without
    /// an index every entry is reported visible. Called on an idle job this
    /// returns an empty, finished batch.
    pub fn process_next_batch(&mut self, source: &impl IndexSource, batch_size: usize) -> BatchOutput {
        let start = self.cursor;
        if !self.in_progress {
            return BatchOutput { start, results: Vec::new(), done: true };
        }

        let budget = FrameBudget::start(self.budget);
        let index = source.current();
        let end = start.saturating_add(batch_size).min(self.positions.len());

        while self.cursor < end {
            if self.cursor > start && budget.exceeded() {
                break;
            }
            let pos = self.positions[self.cursor];
            let visible = match &index {
                Some(index) => index.test_position(pos, self.threshold),
                None => {
                    self.fail_open_count += 1;
                    true
                }
            };
            self.results.push(visible);
            self.cursor += 1;
        }

        let done = self.cursor == self.positions.len();
        if done {
            self.in_progress = false;
            let visible = self.results.iter().filter(|&&v| v).count();
            log::debug!(
                "Classification job finished: {}/{} visible{}",
                visible,
                self.results.len(),
                if self.fail_open_count > 0 { " (no index, failed open)" } else { "" }
            );
        } else {
            log::trace!(
                "Classification batch {}..{} in {:.3} ms",
                start, self.cursor, budget.elapsed_ms()
            );
        }

        BatchOutput {
            start,
            results: self.results[start..self.cursor].to_vec(),
            done,
        }
    }

    /// Stop the current job. Results gathered so far stay readable.
    pub fn abort(&mut self) {
        if self.in_progress {
            log::debug!("Classification job aborted at {}/{}", self.cursor, self.ids.len());
        }
        self.in_progress = false;
    }

    // --- Query methods ---

    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    /// Fraction of entries classified, in `[0, 1)` while running and
    /// exactly 1 when idle.
    pub fn progress(&self) -> f32 {
        if !self.in_progress || self.ids.is_empty() {
            return 1.0;
        }
        let fraction = (self.cursor as f64 / self.ids.len() as f64) as f32;
        // Large jobs can round up to 1.0 one entry before the end
        fraction.min(1.0 - f32::EPSILON)
    }

    /// Next entry to classify
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of entries in the current (or last) job
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[EntityId] {
        &self.ids
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// Results for entries `0..cursor`
    pub fn results(&self) -> &[bool] {
        &self.results
    }

    /// Classified entries paired with their ids
    pub fn classified(&self) -> impl Iterator<Item = (EntityId, bool)> + '_ {
        self.ids.iter().copied().zip(self.results.iter().copied())
    }

    pub fn large_bounds(&self) -> Aabb {
        self.large_bounds
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Change the query threshold; takes effect from the next batch.
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    /// Entries reported visible because no index was published
    pub fn fail_open_count(&self) -> usize {
        self.fail_open_count
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::visibility::brute_force::test_batch;
    use crate::visibility::cache::LeafCache;
    use crate::visibility::config::VisibilityConfig;
    use crate::visibility::grid::SpatialVisibilityIndex;
    use crate::visibility::AsyncSnapshotBuilder;

    const LARGE: Aabb = Aabb {
        min: Vec3::splat(-32768.0),
        max: Vec3::splat(32768.0),
    };

    fn index(leaves: &[Vec3]) -> Arc<SpatialVisibilityIndex> {
        let bounds = Aabb::from_points(leaves).unwrap().inflated(128.0);
        Arc::new(SpatialVisibilityIndex::build(leaves, Vec3::ZERO, bounds, 256.0).unwrap())
    }

    fn entities(positions: &[Vec3]) -> (Vec<EntityId>, Vec<Vec3>) {
        let ids = (0..positions.len() as u64).map(EntityId).collect();
        (ids, positions.to_vec())
    }

    #[test]
    fn test_idle_job() {
        let mut job = BatchClassificationJob::new(128.0);
        let source = index(&[Vec3::ZERO]);

        assert!(!job.is_in_progress());
        assert_eq!(job.progress(), 1.0);

        let out = job.process_next_batch(&source, 10);
        assert!(out.done);
        assert!(out.results.is_empty());
    }

    #[test]
    fn test_full_run_matches_brute_force() {
        // Near points sit within threshold of a leaf; far points are more
        // than three cells from every leaf, so index and brute force agree.
        let leaves = [Vec3::ZERO, Vec3::new(5000.0, 0.0, 0.0)];
        let positions: Vec<Vec3> = (0..40)
            .map(|i| match i % 4 {
                0 => Vec3::new(10.0 + i as f32, 0.0, 0.0),
                1 => Vec3::new(4950.0, i as f32, 0.0),
                2 => Vec3::new(2500.0, 0.0, 0.0),
                _ => Vec3::new(0.0, 2000.0, i as f32),
            })
            .collect();
        let expected = test_batch(&positions, &leaves, 128.0);

        let source = index(&leaves);
        let mut job = BatchClassificationJob::new(128.0);
        let (ids, positions) = entities(&positions);
        job.begin(&source, ids, positions, LARGE, 1000).unwrap();

        let mut collected = Vec::new();
        let mut last_progress = job.progress();
        loop {
            let out = job.process_next_batch(&source, 7);
            assert_eq!(out.start, collected.len());
            collected.extend_from_slice(&out.results);
            assert_eq!(job.results().len(), job.cursor());
            if out.done {
                break;
            }
            assert!(job.progress() >= last_progress);
            assert!(job.progress() < 1.0);
            last_progress = job.progress();
        }

        assert_eq!(collected, expected.visible);
        assert_eq!(job.progress(), 1.0);
        assert!(!job.is_in_progress());
        assert_eq!(job.classified().count(), 40);
    }

    #[test]
    fn test_zero_budget_still_progresses() {
        let source = index(&[Vec3::ZERO]);
        let mut job = BatchClassificationJob::new(128.0);
        let (ids, positions) = entities(&[Vec3::ZERO, Vec3::ONE, Vec3::splat(2.0)]);
        job.begin(&source, ids, positions, LARGE, 0).unwrap();

        let out = job.process_next_batch(&source, 100);
        assert!(!out.results.is_empty());
        assert!(job.cursor() >= 1);

        let mut calls = 1;
        while job.is_in_progress() {
            job.process_next_batch(&source, 100);
            calls += 1;
            assert!(calls <= 3);
        }
        assert_eq!(job.results(), &[true, true, true]);
    }

    #[test]
    fn test_batch_size_limits_work() {
        let source = index(&[Vec3::ZERO]);
        let mut job = BatchClassificationJob::new(128.0);
        let (ids, positions) = entities(&[Vec3::ZERO; 10]);
        job.begin(&source, ids, positions, LARGE, 1000).unwrap();

        let out = job.process_next_batch(&source, 4);
        assert_eq!(out.range(), 0..4);
        assert!(!out.done);
        let out = job.process_next_batch(&source, 4);
        assert_eq!(out.range(), 4..8);
        let out = job.process_next_batch(&source, 4);
        assert_eq!(out.range(), 8..10);
        assert!(out.done);
        assert_eq!(out.visible_count(), 2);
    }

    #[test]
    fn test_begin_rejected_while_running() {
        let source = index(&[Vec3::ZERO]);
        let mut job = BatchClassificationJob::new(128.0);
        let (ids, positions) = entities(&[Vec3::ZERO; 5]);
        job.begin(&source, ids, positions, LARGE, 1000).unwrap();
        job.process_next_batch(&source, 2);

        let (ids, positions) = entities(&[Vec3::ONE; 3]);
        let err = job.begin(&source, ids, positions, LARGE, 1000).unwrap_err();
        assert!(matches!(err, Error::JobInProgress));
        assert_eq!(job.cursor(), 2);
        assert_eq!(job.len(), 5);
        assert_eq!(job.results().len(), 2);
    }

    #[test]
    fn test_length_mismatch() {
        let source = index(&[Vec3::ZERO]);
        let mut job = BatchClassificationJob::new(128.0);
        let err = job
            .begin(&source, vec![EntityId(1), EntityId(2)], vec![Vec3::ZERO], LARGE, 1)
            .unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { ids: 2, positions: 1 }));
        assert!(!job.is_in_progress());
    }

    #[test]
    fn test_requires_visibility_data() {
        let builder = AsyncSnapshotBuilder::new(Arc::new(LeafCache::new()), VisibilityConfig::default());
        let mut job = BatchClassificationJob::new(128.0);
        let err = job.begin(&builder, vec![EntityId(1)], vec![Vec3::ZERO], LARGE, 1).unwrap_err();
        assert!(matches!(err, Error::NoVisibilityData));
    }

    #[test]
    fn test_fails_open_without_index() {
        // Cached leaves but no published index yet
        let cache = Arc::new(LeafCache::new());
        cache.store(vec![Vec3::ZERO], Vec3::ZERO);
        let builder = AsyncSnapshotBuilder::new(cache, VisibilityConfig::default());

        let mut job = BatchClassificationJob::new(128.0);
        let (ids, positions) = entities(&[Vec3::splat(1.0e5), Vec3::splat(-1.0e5)]);
        job.begin(&builder, ids, positions, LARGE, 1000).unwrap();

        let out = job.process_next_batch(&builder, 10);
        assert!(out.done);
        assert_eq!(out.results, vec![true, true]);
        assert_eq!(job.fail_open_count(), 2);
    }

    #[test]
    fn test_empty_input_completes_immediately() {
        let source = index(&[Vec3::ZERO]);
        let mut job = BatchClassificationJob::new(128.0);
        job.begin(&source, Vec::new(), Vec::new(), LARGE, 1).unwrap();

        assert!(!job.is_in_progress());
        assert_eq!(job.progress(), 1.0);
        assert!(job.process_next_batch(&source, 10).done);
    }

    #[test]
    fn test_abort_allows_restart() {
        let source = index(&[Vec3::ZERO]);
        let mut job = BatchClassificationJob::new(128.0);
        let (ids, positions) = entities(&[Vec3::ZERO; 4]);
        job.begin(&source, ids, positions, LARGE, 1000).unwrap();
        job.process_next_batch(&source, 1);

        job.abort();
        assert!(!job.is_in_progress());
        assert_eq!(job.results().len(), 1);

        let (ids, positions) = entities(&[Vec3::splat(9000.0)]);
        job.begin(&source, ids, positions, LARGE, 1000).unwrap();
        assert_eq!(job.cursor(), 0);
        let out = job.process_next_batch(&source, 10);
        assert_eq!(out.results, vec![false]);
    }
}
