//! Locomotion benchmarks.
//!
//! Run with: `cargo bench -p loco_core`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::Vec3;
use loco_core::prelude::*;

fn crowded_world() -> (Simulation, LinePathService) {
    let mut sim = Simulation::new(
        TerrainMap::flat(128, 128, 10.0),
        vec![MoveDef::default()],
        ModOptions::default(),
        MapParams::default(),
        0xBEEF,
    );
    let mut paths = LinePathService::new();

    // an 8x8 block of units all converging on the same point
    for row in 0..8 {
        for col in 0..8 {
            let unit = sim
                .spawn_unit(UnitSpawnParams {
                    pos: Vec3::new(200.0 + col as f32 * 14.0, 0.0, 200.0 + row as f32 * 14.0),
                    ..UnitSpawnParams::default()
                })
                .unwrap();
            sim.start_moving(&mut paths, unit, Vec3::new(700.0, 0.0, 700.0), 8.0)
                .unwrap();
        }
    }

    (sim, paths)
}

pub fn tick_benchmark(c: &mut Criterion) {
    c.bench_function("tick_64_units_converging", |b| {
        let (mut sim, mut paths) = crowded_world();
        b.iter(|| {
            black_box(sim.tick(&mut paths));
        })
    });

    c.bench_function("state_hash_64_units", |b| {
        let (sim, _paths) = crowded_world();
        b.iter(|| black_box(sim.state_hash()))
    });
}

criterion_group!(benches, tick_benchmark);
criterion_main!(benches);
