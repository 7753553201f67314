//! Scenario fixtures: canned worlds and units for locomotion tests.

use glam::Vec3;
use loco_core::prelude::*;

/// Default arrival tolerance used by the fixtures.
pub const GOAL_RADIUS: f32 = 8.0;

/// A flat 64×64-square map with one default tracked move class.
#[must_use]
pub fn flat_sim(seed: u64) -> Simulation {
    Simulation::new(
        TerrainMap::flat(64, 64, 10.0),
        vec![MoveDef::default()],
        ModOptions::default(),
        MapParams::default(),
        seed,
    )
}

/// A larger flat map for long drives.
#[must_use]
pub fn flat_sim_large(seed: u64) -> Simulation {
    Simulation::new(
        TerrainMap::flat(128, 128, 10.0),
        vec![MoveDef::default()],
        ModOptions::default(),
        MapParams::default(),
        seed,
    )
}

/// Spawn a standard tank-like unit at `pos` facing +z.
pub fn spawn_tank(sim: &mut Simulation, pos: Vec3) -> UnitId {
    sim.spawn_unit(UnitSpawnParams {
        pos,
        stats: UnitStats {
            max_speed: 3.0,
            acc_rate: 0.15,
            dec_rate: 0.3,
            turn_rate: 600.0,
            ..UnitStats::default()
        },
        ..UnitSpawnParams::default()
    })
    .expect("fixture spawn must succeed")
}

/// Spawn a tank that can also drive backwards.
pub fn spawn_reversible_tank(sim: &mut Simulation, pos: Vec3) -> UnitId {
    sim.spawn_unit(UnitSpawnParams {
        pos,
        stats: UnitStats {
            max_speed: 3.0,
            max_reverse_speed: 3.0,
            acc_rate: 0.15,
            dec_rate: 0.15,
            turn_rate: 600.0,
            ..UnitStats::default()
        },
        ..UnitSpawnParams::default()
    })
    .expect("fixture spawn must succeed")
}

/// Two identical units facing each other along x, each ordered past the
/// other. Returns `(left, right)`.
pub fn head_on_pair(sim: &mut Simulation, paths: &mut dyn PathService) -> (UnitId, UnitId) {
    let left = sim
        .spawn_unit(UnitSpawnParams {
            pos: Vec3::new(246.0, 0.0, 256.0),
            heading: heading_from_vector(1.0, 0.0),
            ..UnitSpawnParams::default()
        })
        .expect("fixture spawn must succeed");
    let right = sim
        .spawn_unit(UnitSpawnParams {
            pos: Vec3::new(266.0, 0.0, 256.0),
            heading: heading_from_vector(-1.0, 0.0),
            ..UnitSpawnParams::default()
        })
        .expect("fixture spawn must succeed");

    sim.start_moving(paths, left, Vec3::new(400.0, 0.0, 256.0), GOAL_RADIUS)
        .expect("order must be accepted");
    sim.start_moving(paths, right, Vec3::new(100.0, 0.0, 256.0), GOAL_RADIUS)
        .expect("order must be accepted");

    (left, right)
}

/// Drive `unit` until its mover leaves the Active state or `max_ticks`
/// elapse. Returns the number of ticks consumed.
pub fn run_until_settled(
    sim: &mut Simulation,
    paths: &mut dyn PathService,
    unit: UnitId,
    max_ticks: u32,
) -> u32 {
    for tick in 0..max_ticks {
        sim.tick(paths);
        let done = sim
            .unit(unit)
            .and_then(|u| u.mover.as_ref())
            .map_or(true, |m| m.progress_state != ProgressState::Active);
        if done {
            return tick + 1;
        }
    }
    max_ticks
}

/// Squared 2D distance from a unit to a point.
#[must_use]
pub fn goal_dist_sq(sim: &Simulation, unit: UnitId, goal: Vec3) -> f32 {
    let pos = sim.unit(unit).map_or(Vec3::ZERO, |u| u.pos);
    let dx = pos.x - goal.x;
    let dz = pos.z - goal.z;
    dx * dx + dz * dz
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tank_reaches_goal_and_settles() {
        let mut sim = flat_sim(5);
        let mut paths = LinePathService::new();
        let unit = spawn_tank(&mut sim, Vec3::new(128.0, 0.0, 128.0));
        let goal = Vec3::new(128.0, 0.0, 256.0);

        sim.start_moving(&mut paths, unit, goal, GOAL_RADIUS).unwrap();
        let ticks = run_until_settled(&mut sim, &mut paths, unit, 400);

        assert!(ticks < 400, "unit never settled");
        let mover = sim.unit(unit).unwrap().mover.as_ref().unwrap();
        assert_eq!(mover.progress_state, ProgressState::Done);
        assert!(goal_dist_sq(&sim, unit, goal) <= GOAL_RADIUS * GOAL_RADIUS * 4.0);
    }

    #[test]
    fn test_reversible_tank_fixture_can_reverse() {
        let mut sim = flat_sim(6);
        let unit = spawn_reversible_tank(&mut sim, Vec3::new(128.0, 0.0, 128.0));
        assert!(sim.unit(unit).unwrap().stats.can_reverse());
    }

    #[test]
    fn test_head_on_pair_eventually_separates() {
        let mut sim = flat_sim_large(9);
        let mut paths = LinePathService::new();
        let (left, right) = head_on_pair(&mut sim, &mut paths);

        for _ in 0..240 {
            sim.tick(&mut paths);
        }

        // both should have made it past each other's spawn point
        let lx = sim.unit(left).unwrap().pos.x;
        let rx = sim.unit(right).unwrap().pos.x;
        assert!(lx > 266.0, "left unit stuck at x = {lx}");
        assert!(rx < 246.0, "right unit stuck at x = {rx}");
    }
}
