//! Replays a captured scene through the visibility pipeline.
//!
//! Usage: cargo run --release --bin pvs_replay -- --scene <FILE> [OPTIONS]
//!
//! Options:
//!   --scene <FILE>    Scene JSON: pivot, leaves and entities (required)
//!   --config <FILE>   Visibility config JSON (default: built-in defaults)
//!   --timeout <MS>    Max wait for the index build (default: 5000)
//!
//! Scene format:
//!   {
//!     "pivot": [x, y, z],
//!     "leaves": [[x, y, z], ...],
//!     "entities": [{ "id": 1, "position": [..], "mins": [..], "maxs": [..] }]
//!   }
//!
//! Prints a JSON summary to stdout; per-entity index results are compared
//! against the exact brute-force test.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use glam::Vec3;
use serde::Deserialize;
use serde_json::json;

use pvscull::math::Aabb;
use pvscull::visibility::{EntityId, SceneEntity, VisibilityConfig, VisibilitySystem, test_batch};

#[derive(Debug, Deserialize)]
struct Scene {
    #[serde(default)]
    pivot: [f32; 3],
    leaves: Vec<[f32; 3]>,
    entities: Vec<SceneEntityDesc>,
}

#[derive(Debug, Deserialize)]
struct SceneEntityDesc {
    id: u64,
    position: [f32; 3],
    mins: [f32; 3],
    maxs: [f32; 3],
    #[serde(default)]
    always_expand: bool,
}

fn main() {
    pvscull::core::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let Some(scene_path) = parse_str_arg(&args, "--scene").map(PathBuf::from) else {
        eprintln!("Usage: pvs_replay --scene <FILE> [--config <FILE>] [--timeout <MS>]");
        std::process::exit(2);
    };
    let config_path = parse_str_arg(&args, "--config").map(PathBuf::from);
    let timeout_ms = parse_u64_arg(&args, "--timeout").unwrap_or(5000);

    if let Err(e) = run(&scene_path, config_path.as_deref(), Duration::from_millis(timeout_ms)) {
        eprintln!("pvs_replay: {}", e);
        std::process::exit(1);
    }
}

fn run(scene_path: &Path, config_path: Option<&Path>, timeout: Duration) -> Result<(), String> {
    let config = match config_path {
        Some(path) => VisibilityConfig::load_sync(path).map_err(|e| format!("{}: {}", path.display(), e))?,
        None => VisibilityConfig::default(),
    };

    let text = std::fs::read_to_string(scene_path)
        .map_err(|e| format!("{}: {}", scene_path.display(), e))?;
    let scene: Scene = serde_json::from_str(&text)
        .map_err(|e| format!("{}: {}", scene_path.display(), e))?;

    let pivot = Vec3::from_array(scene.pivot);
    let leaves: Vec<Vec3> = scene.leaves.iter().map(|l| Vec3::from_array(*l)).collect();
    let entities: Vec<SceneEntity> = scene
        .entities
        .iter()
        .map(|e| SceneEntity {
            id: EntityId(e.id),
            position: Vec3::from_array(e.position),
            bounds: Aabb::new(Vec3::from_array(e.mins), Vec3::from_array(e.maxs)),
        })
        .collect();
    log::info!("Loaded scene: {} leaves, {} entities", leaves.len(), entities.len());

    let mut system = VisibilitySystem::new(config.clone(), HashMap::<EntityId, Aabb>::new())
        .map_err(|e| e.to_string())?;
    for desc in scene.entities.iter().filter(|e| e.always_expand) {
        system.set_always_expand(EntityId(desc.id), true);
    }

    let build_start = Instant::now();
    if !system.on_visibility_recomputed(pivot, leaves.clone()) {
        return Err("leaf cache refused the snapshot".to_string());
    }
    if !system.builder().wait_for_generation(1, timeout) {
        return Err(format!("index not built within {} ms", timeout.as_millis()));
    }
    let build_ms = build_start.elapsed().as_secs_f32() * 1000.0;

    system.begin_pass(&entities).map_err(|e| e.to_string())?;
    let mut ticks = 0u64;
    loop {
        ticks += 1;
        if system.tick().done {
            break;
        }
    }

    let positions: Vec<Vec3> = entities.iter().map(|e| e.position).collect();
    let exact = test_batch(&positions, &leaves, config.threshold);
    let index_results = system.job().results();
    let mismatches: Vec<u64> = entities
        .iter()
        .zip(index_results.iter().zip(&exact.visible))
        .filter(|(_, (a, b))| a != b)
        .map(|(e, _)| e.id.0)
        .collect();

    let large = config.large_bounds();
    let expanded = system
        .bounds()
        .sink()
        .values()
        .filter(|aabb| **aabb == large)
        .count();

    let stats = system.stats().clone();
    let builder_stats = system.builder().stats();
    let index = system.current_index();
    system.shutdown();

    let summary = json!({
        "leaves": leaves.len(),
        "entities": entities.len(),
        "index": {
            "cells": index.as_ref().map_or(0, |i| i.occupied_cells()),
            "leaf_count": index.as_ref().map_or(0, |i| i.leaf_count()),
            "dropped_leaves": index.as_ref().map_or(0, |i| i.dropped_leaves()),
            "build_ms": build_ms,
            "leaves_truncated": builder_stats.leaves_truncated,
        },
        "pass": {
            "ticks": ticks,
            "visible": stats.last_visible,
            "expanded": expanded,
            "pass_ms": stats.last_pass_ms,
        },
        "exact": {
            "visible": exact.visible_count,
            "mismatched_ids": mismatches,
        },
    });

    let out = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    println!("{}", out);
    Ok(())
}

fn parse_u64_arg(args: &[String], flag: &str) -> Option<u64> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
