use criterion::{criterion_group, criterion_main, Criterion, black_box};

use pvscull::math::Aabb;
use pvscull::visibility::SpatialVisibilityIndex;
use pvscull::visibility::brute_force::test_batch;

use glam::Vec3;

/// Leaves on a jittered grid in the XZ plane
fn grid_leaves(side: i32, spacing: f32) -> Vec<Vec3> {
    let mut leaves = Vec::with_capacity((side * side) as usize);
    for x in 0..side {
        for z in 0..side {
            let jitter = ((x * 7 + z * 13) % 17) as f32;
            leaves.push(Vec3::new(x as f32 * spacing + jitter, 0.0, z as f32 * spacing - jitter));
        }
    }
    leaves
}

fn probe_positions(count: usize, extent: f32) -> Vec<Vec3> {
    (0..count)
        .map(|i| {
            let t = i as f32 / count as f32;
            Vec3::new(t * extent, (i % 5) as f32 * 10.0, (1.0 - t) * extent)
        })
        .collect()
}

fn bench_index_build_4096(c: &mut Criterion) {
    let leaves = grid_leaves(64, 200.0);
    let bounds = Aabb::from_points(&leaves).map_or(Aabb::default(), |b| b.inflated(128.0));

    c.bench_function("index_build_4096", |b| {
        b.iter(|| {
            SpatialVisibilityIndex::build(black_box(&leaves), Vec3::ZERO, bounds, 256.0)
        });
    });
}

fn bench_index_query_10k(c: &mut Criterion) {
    let leaves = grid_leaves(64, 200.0);
    let bounds = Aabb::from_points(&leaves).map_or(Aabb::default(), |b| b.inflated(128.0));
    let Ok(index) = SpatialVisibilityIndex::build(&leaves, Vec3::ZERO, bounds, 256.0) else {
        return;
    };
    let positions = probe_positions(10_000, 64.0 * 200.0);

    c.bench_function("index_query_10k", |b| {
        b.iter(|| {
            positions
                .iter()
                .filter(|p| index.test_position(black_box(**p), 128.0))
                .count()
        });
    });
}

fn bench_brute_force_small(c: &mut Criterion) {
    let leaves = grid_leaves(8, 200.0);
    let positions = probe_positions(1_000, 8.0 * 200.0);

    c.bench_function("brute_force_64x1k", |b| {
        b.iter(|| test_batch(black_box(&positions), black_box(&leaves), 128.0));
    });
}

fn bench_brute_force_prefiltered(c: &mut Criterion) {
    let leaves = grid_leaves(32, 200.0);
    let positions = probe_positions(4_000, 64.0 * 200.0);

    c.bench_function("brute_force_1024x4k_prefiltered", |b| {
        b.iter(|| test_batch(black_box(&positions), black_box(&leaves), 128.0));
    });
}

criterion_group!(
    benches,
    bench_index_build_4096,
    bench_index_query_10k,
    bench_brute_force_small,
    bench_brute_force_prefiltered,
);
criterion_main!(benches);
