//! End-to-end locomotion scenarios: straight drives, U-turns, head-on
//! meetings, factory exits, impulse skids, and stall handling.

use glam::Vec3;
use loco_core::prelude::*;

const GOAL_RADIUS: f32 = 4.0;

fn flat_sim(seed: u64) -> Simulation {
    Simulation::new(
        TerrainMap::flat(64, 64, 10.0),
        vec![MoveDef::default()],
        ModOptions::default(),
        MapParams::default(),
        seed,
    )
}

fn fast_stats() -> UnitStats {
    UnitStats {
        max_speed: 5.0,
        acc_rate: 1.0,
        dec_rate: 0.5,
        turn_rate: 1000.0,
        ..UnitStats::default()
    }
}

/// A service that never finishes computing: every waypoint it serves is
/// temporary (y = −1). Used to verify the controller loiters in place.
struct StallingPathService {
    next_id: PathId,
}

impl PathService for StallingPathService {
    fn request_path(
        &mut self,
        _env: &PathEnv<'_>,
        _unit: &Unit,
        _start: Vec3,
        _goal: Vec3,
        _radius: f32,
    ) -> PathId {
        self.next_id += 1;
        self.next_id
    }

    fn next_waypoint(
        &mut self,
        _env: &PathEnv<'_>,
        _unit: &Unit,
        _path_id: PathId,
        from: Vec3,
        _step: f32,
    ) -> Vec3 {
        Vec3::new(from.x, -1.0, from.z)
    }

    fn delete_path(&mut self, _path_id: PathId) {}
}

// ============================================================================
// S1: straight drive
// ============================================================================

#[test]
fn straight_drive_arrives_within_budget() {
    let mut sim = flat_sim(1);
    let mut paths = LinePathService::new();

    let start = Vec3::new(200.0, 0.0, 150.0);
    let goal = Vec3::new(200.0, 0.0, 250.0);
    let unit = sim
        .spawn_unit(UnitSpawnParams {
            pos: start,
            heading: 0, // facing +z, straight at the goal
            stats: fast_stats(),
            ..UnitSpawnParams::default()
        })
        .unwrap();

    sim.start_moving(&mut paths, unit, goal, GOAL_RADIUS).unwrap();

    let mut arrived_at = None;
    for tick in 0..40 {
        sim.tick(&mut paths);
        let m = sim.unit(unit).unwrap().mover.as_ref().unwrap();
        if m.progress_state == ProgressState::Done {
            arrived_at = Some(tick);
            break;
        }
    }

    let ticks = arrived_at.expect("unit should arrive within 40 ticks");
    assert!(ticks <= 35, "straight 100-elmo drive took {ticks} ticks");

    let pos = sim.unit(unit).unwrap().pos;
    let dist = ((pos.x - goal.x).powi(2) + (pos.z - goal.z).powi(2)).sqrt();
    assert!(dist <= GOAL_RADIUS + 1.0, "stopped {dist} from goal");
}

// ============================================================================
// S2: U-turn
// ============================================================================

#[test]
fn u_turn_sweeps_heading_then_advances() {
    let mut sim = flat_sim(2);
    let mut paths = LinePathService::new();

    let start = Vec3::new(256.0, 0.0, 300.0);
    let goal = Vec3::new(256.0, 0.0, 200.0); // directly behind
    let unit = sim
        .spawn_unit(UnitSpawnParams {
            pos: start,
            heading: 0,
            stats: UnitStats {
                max_speed: 5.0,
                max_reverse_speed: 0.0, // cannot reverse: must turn around
                acc_rate: 1.0,
                dec_rate: 0.5,
                turn_rate: 400.0,
                ..UnitStats::default()
            },
            ..UnitSpawnParams::default()
        })
        .unwrap();

    sim.start_moving(&mut paths, unit, goal, GOAL_RADIUS).unwrap();

    // the wanted heading must swing to roughly 180 degrees early on
    let mut max_wanted = 0i32;
    for _ in 0..20 {
        sim.tick(&mut paths);
        let m = sim.unit(unit).unwrap().mover.as_ref().unwrap();
        max_wanted = max_wanted.max(i32::from(m.wanted_heading).abs());
    }
    assert!(
        max_wanted > 30_000,
        "wanted heading only swung to {max_wanted}"
    );

    // and the unit then actually makes progress toward the goal
    for _ in 0..280 {
        sim.tick(&mut paths);
    }
    let pos = sim.unit(unit).unwrap().pos;
    assert!(pos.z < 240.0, "unit never came back around, z = {}", pos.z);
}

// ============================================================================
// S3: head-on meeting
// ============================================================================

#[test]
fn head_on_units_pass_and_separate() {
    let mut sim = Simulation::new(
        TerrainMap::flat(128, 128, 10.0),
        vec![MoveDef::default()],
        ModOptions::default(),
        MapParams::default(),
        3,
    );
    let mut paths = LinePathService::new();

    let left = sim
        .spawn_unit(UnitSpawnParams {
            pos: Vec3::new(246.0, 0.0, 256.0),
            heading: heading_from_vector(1.0, 0.0),
            stats: fast_stats(),
            ..UnitSpawnParams::default()
        })
        .unwrap();
    let right = sim
        .spawn_unit(UnitSpawnParams {
            pos: Vec3::new(266.0, 0.0, 256.0),
            heading: heading_from_vector(-1.0, 0.0),
            stats: fast_stats(),
            ..UnitSpawnParams::default()
        })
        .unwrap();

    sim.start_moving(&mut paths, left, Vec3::new(420.0, 0.0, 256.0), 8.0)
        .unwrap();
    sim.start_moving(&mut paths, right, Vec3::new(100.0, 0.0, 256.0), 8.0)
        .unwrap();

    for _ in 0..300 {
        sim.tick(&mut paths);
    }

    let lp = sim.unit(left).unwrap().pos;
    let rp = sim.unit(right).unwrap().pos;

    // both made it past the other's starting point
    assert!(lp.x > 266.0, "left unit stuck at {}", lp.x);
    assert!(rp.x < 246.0, "right unit stuck at {}", rp.x);

    // and they are clear of each other
    let dist_sq = (lp.x - rp.x).powi(2) + (lp.z - rp.z).powi(2);
    let radius_sum = 2.0 * sim.unit(left).unwrap().footprint_radius(0.75);
    assert!(
        dist_sq >= radius_sum * radius_sum,
        "units still overlap: {} < {}",
        dist_sq.sqrt(),
        radius_sum
    );
}

// ============================================================================
// S4: factory exit
// ============================================================================

#[test]
fn factory_exit_suppresses_parting_shove() {
    let mut sim = flat_sim(4);
    let mut paths = LinePathService::new();

    // closed factory occupying a 4x4 footprint
    let _factory = sim
        .spawn_unit(UnitSpawnParams {
            pos: Vec3::new(256.0, 0.0, 256.0),
            move_class: None,
            is_factory: true,
            xsize: 4,
            zsize: 4,
            radius: 18.0,
            mass: 100_000.0,
            ..UnitSpawnParams::default()
        })
        .unwrap();

    // fresh unit still inside the yardmap rectangle, pointed out the door
    let unit = sim
        .spawn_unit(UnitSpawnParams {
            pos: Vec3::new(276.0, 0.0, 256.0),
            heading: heading_from_vector(1.0, 0.0),
            stats: fast_stats(),
            ..UnitSpawnParams::default()
        })
        .unwrap();

    sim.start_moving(&mut paths, unit, Vec3::new(360.0, 0.0, 256.0), 8.0)
        .unwrap();

    let mut min_x = f32::MAX;
    for _ in 0..120 {
        sim.tick(&mut paths);
        min_x = min_x.min(sim.unit(unit).unwrap().pos.x);
    }

    let pos = sim.unit(unit).unwrap().pos;
    // escaped the yardmap rectangle (half-extent 3 squares + margin)
    assert!(pos.x > 256.0 + 3.0 * SQUARE_SIZE + 8.0, "still inside at x = {}", pos.x);
    // the exit compensation means it was never shoved backwards
    assert!(
        min_x >= 276.0 - 1.0,
        "unit was pushed back into the factory to x = {min_x}"
    );
}

// ============================================================================
// S5 + P7: impulse skid
// ============================================================================

#[test]
fn impulse_skid_flies_lands_and_settles() {
    let mut sim = flat_sim(5);
    let mut paths = LinePathService::new();

    let unit = sim
        .spawn_unit(UnitSpawnParams {
            pos: Vec3::new(256.0, 0.0, 256.0),
            stats: UnitStats {
                min_collision_speed: 0.5,
                ..UnitStats::default()
            },
            ..UnitSpawnParams::default()
        })
        .unwrap();

    let health_before = sim.unit(unit).unwrap().health;
    let entered = sim.apply_impulse(unit, Vec3::new(12.0, 6.0, 0.0)).unwrap();
    assert!(entered, "impulse above threshold must start a skid");

    {
        let m = sim.unit(unit).unwrap().mover.as_ref().unwrap();
        assert!(m.skidding, "skidding must latch immediately");
        assert!(m.flying, "upward impulse must put the unit airborne");
        assert!(!m.use_heading, "skid owns the orientation basis");
    }
    assert_eq!(sim.unit(unit).unwrap().phys_state, PhysState::Flying);

    // gravity is -0.1: the unit must come back down within a couple of
    // hundred frames and take ground-impact damage
    let mut landed = false;
    for _ in 0..300 {
        sim.tick(&mut paths);
        let m = sim.unit(unit).unwrap().mover.as_ref().unwrap();
        if !m.flying {
            landed = true;
            break;
        }
    }
    assert!(landed, "skidder never hit the ground");
    assert!(
        sim.unit(unit).unwrap().health < health_before,
        "ground impact should deal collision damage"
    );

    // and the skid itself winds down deterministically
    let mut settled = false;
    for _ in 0..600 {
        sim.tick(&mut paths);
        let m = sim.unit(unit).unwrap().mover.as_ref().unwrap();
        if !m.skidding {
            settled = true;
            break;
        }
    }
    assert!(settled, "skid never ended");

    let unit_ref = sim.unit(unit).unwrap();
    let m = unit_ref.mover.as_ref().unwrap();
    assert!(!m.skidding && !m.flying);
    assert!(m.use_heading, "heading control must come back");
    assert_eq!(unit_ref.phys_state, PhysState::OnGround);
}

// ============================================================================
// S6: stall, bounded repaths, then failure
// ============================================================================

#[test]
fn stalled_unit_repaths_then_fails_once() {
    let mut sim = flat_sim(6);
    let mut paths = LinePathService::new();

    // immobilized but orderable: the path is valid, progress is impossible
    let unit = sim
        .spawn_unit(UnitSpawnParams {
            pos: Vec3::new(256.0, 0.0, 256.0),
            stats: UnitStats {
                max_speed: 0.0,
                turn_rate: 400.0,
                ..UnitStats::default()
            },
            ..UnitSpawnParams::default()
        })
        .unwrap();

    sim.start_moving(&mut paths, unit, Vec3::new(400.0, 0.0, 256.0), 8.0)
        .unwrap();

    let mut failures = 0;
    for _ in 0..500 {
        let events = sim.tick(&mut paths);
        failures += events.count_matching(|e| matches!(e, MoveEvent::UnitMoveFailed { .. }));
    }

    let m = sim.unit(unit).unwrap().mover.as_ref().unwrap();
    assert_eq!(m.progress_state, ProgressState::Failed);
    assert_eq!(failures, 1, "exactly one move-failed event expected");
}

// ============================================================================
// P2: temporary-waypoint quiescence
// ============================================================================

#[test]
fn temporary_waypoints_hold_the_unit_in_place() {
    let mut sim = flat_sim(7);
    let mut paths = StallingPathService { next_id: 0 };

    let unit = sim
        .spawn_unit(UnitSpawnParams {
            pos: Vec3::new(256.0, 0.0, 256.0),
            stats: fast_stats(),
            ..UnitSpawnParams::default()
        })
        .unwrap();
    let start = sim.unit(unit).unwrap().pos;

    sim.start_moving(&mut paths, unit, Vec3::new(400.0, 0.0, 256.0), 8.0)
        .unwrap();

    for _ in 0..50 {
        sim.tick(&mut paths);
        let u = sim.unit(unit).unwrap();
        let m = u.mover.as_ref().unwrap();
        assert_eq!(
            m.progress_state,
            ProgressState::Active,
            "waiting on the pathfinder is not failure"
        );
        assert!(
            (u.pos.x - start.x).abs() < 0.5 && (u.pos.z - start.z).abs() < 0.5,
            "unit crept away while its waypoints were temporary"
        );
    }
}

// ============================================================================
// P4: reversibility round trip
// ============================================================================

#[test]
fn reversible_unit_completes_both_legs() {
    let mut sim = flat_sim(8);
    let mut paths = LinePathService::new();

    let origin = Vec3::new(256.0, 0.0, 256.0);
    let behind = Vec3::new(256.0, 0.0, 180.0);
    let unit = sim
        .spawn_unit(UnitSpawnParams {
            pos: origin,
            heading: 0,
            stats: UnitStats {
                max_speed: 3.0,
                max_reverse_speed: 3.0,
                acc_rate: 0.2,
                dec_rate: 0.2,
                turn_rate: 600.0,
                ..UnitStats::default()
            },
            ..UnitSpawnParams::default()
        })
        .unwrap();

    let drive = |sim: &mut Simulation, paths: &mut LinePathService, goal: Vec3| -> bool {
        sim.start_moving(paths, unit, goal, 8.0).unwrap();
        for _ in 0..400 {
            sim.tick(paths);
            let m = sim.unit(unit).unwrap().mover.as_ref().unwrap();
            if m.progress_state == ProgressState::Done {
                return true;
            }
            if m.progress_state == ProgressState::Failed {
                return false;
            }
        }
        false
    };

    assert!(drive(&mut sim, &mut paths, behind), "leg to rear failed");
    assert!(drive(&mut sim, &mut paths, origin), "return leg failed");
}

// ============================================================================
// P5: eventual collision non-overlap
// ============================================================================

#[test]
fn overlapping_idle_units_get_pushed_apart() {
    let mut sim = flat_sim(9);
    let mut paths = LinePathService::new();

    let a = sim
        .spawn_unit(UnitSpawnParams {
            pos: Vec3::new(256.0, 0.0, 256.0),
            ..UnitSpawnParams::default()
        })
        .unwrap();
    let b = sim
        .spawn_unit(UnitSpawnParams {
            pos: Vec3::new(260.0, 0.0, 257.0),
            ..UnitSpawnParams::default()
        })
        .unwrap();

    for _ in 0..120 {
        sim.tick(&mut paths);
    }

    let pa = sim.unit(a).unwrap().pos;
    let pb = sim.unit(b).unwrap().pos;
    let dist_sq = (pa.x - pb.x).powi(2) + (pa.z - pb.z).powi(2);
    let radius_sum = sim.unit(a).unwrap().footprint_radius(0.75)
        + sim.unit(b).unwrap().footprint_radius(0.75);

    assert!(
        dist_sq >= radius_sum * radius_sum * 0.95,
        "units still overlapping: {} < {}",
        dist_sq.sqrt(),
        radius_sum
    );
}

// ============================================================================
// Direct control
// ============================================================================

#[test]
fn direct_control_drives_and_turns() {
    let mut sim = flat_sim(11);
    let mut paths = LinePathService::new();

    let unit = sim
        .spawn_unit(UnitSpawnParams {
            pos: Vec3::new(256.0, 0.0, 256.0),
            heading: 0,
            stats: fast_stats(),
            ..UnitSpawnParams::default()
        })
        .unwrap();

    sim.set_direct_control(
        unit,
        Some(DirectControlState {
            forward: true,
            ..DirectControlState::default()
        }),
    )
    .unwrap();

    for _ in 0..30 {
        sim.tick(&mut paths);
    }
    let pos = sim.unit(unit).unwrap().pos;
    assert!(pos.z > 300.0, "forward key should drive the unit, z = {}", pos.z);

    // now hold left as well: the heading must wind counter to the right key
    sim.set_direct_control(
        unit,
        Some(DirectControlState {
            forward: true,
            left: true,
            ..DirectControlState::default()
        }),
    )
    .unwrap();

    let heading_before = sim.unit(unit).unwrap().heading;
    for _ in 0..5 {
        sim.tick(&mut paths);
    }
    let heading_after = sim.unit(unit).unwrap().heading;
    assert_ne!(heading_before, heading_after, "left key should turn the unit");
}

// ============================================================================
// Controlled drop
// ============================================================================

#[test]
fn dropped_unit_falls_and_lands() {
    let mut sim = flat_sim(12);
    let mut paths = LinePathService::new();

    let unit = sim
        .spawn_unit(UnitSpawnParams {
            pos: Vec3::new(256.0, 0.0, 256.0),
            ..UnitSpawnParams::default()
        })
        .unwrap();

    sim.drop_unit(unit, 80.0).unwrap();
    assert!(sim.unit(unit).unwrap().falling);

    let mut landed = false;
    for _ in 0..200 {
        let events = sim.tick(&mut paths);
        if events
            .events
            .iter()
            .any(|e| matches!(e, MoveEvent::Landed { unit: u } if *u == unit))
        {
            landed = true;
            break;
        }
        // no upward drift while falling
        assert!(sim.unit(unit).unwrap().speed.y <= 0.0);
    }

    assert!(landed, "dropped unit never touched down");
    let u = sim.unit(unit).unwrap();
    assert!(!u.falling);
    assert!((u.pos.y - 10.0).abs() < 1e-3, "should rest on the ground");
}

// ============================================================================
// Main-heading alignment
// ============================================================================

#[test]
fn idle_unit_turns_toward_main_heading_target() {
    let mut sim = flat_sim(13);
    let mut paths = LinePathService::new();

    let unit = sim
        .spawn_unit(UnitSpawnParams {
            pos: Vec3::new(256.0, 0.0, 256.0),
            heading: 0, // facing +z
            ..UnitSpawnParams::default()
        })
        .unwrap();

    // aim east
    sim.keep_pointing_to(unit, Vec3::new(400.0, 0.0, 256.0), true)
        .unwrap();

    for _ in 0..120 {
        sim.tick(&mut paths);
    }

    let heading = sim.unit(unit).unwrap().heading;
    let expected = heading_from_vector(1.0, 0.0);
    assert!(
        (i32::from(heading) - i32::from(expected)).abs() < 800,
        "heading {heading} should settle near {expected}"
    );
}

// ============================================================================
// P8: in-place path refresh
// ============================================================================

#[test]
fn path_update_refreshes_waypoints_without_delete() {
    let mut sim = flat_sim(10);
    let mut paths = GridPathService::new();

    let unit = sim
        .spawn_unit(UnitSpawnParams {
            pos: Vec3::new(128.0, 0.0, 128.0),
            stats: fast_stats(),
            ..UnitSpawnParams::default()
        })
        .unwrap();

    sim.start_moving(&mut paths, unit, Vec3::new(400.0, 0.0, 400.0), 8.0)
        .unwrap();

    // drive a while so the follower is mid-path
    for _ in 0..30 {
        sim.tick(&mut paths);
    }

    let (path_before, cwp_before) = {
        let m = sim.unit(unit).unwrap().mover.as_ref().unwrap();
        (m.path_id, m.curr_waypoint)
    };
    assert_ne!(path_before, NO_PATH);

    // the geometry "changes" under the follower, same id
    paths.mark_updated(path_before);
    sim.tick(&mut paths);

    let m = sim.unit(unit).unwrap().mover.as_ref().unwrap();
    assert_eq!(m.path_id, path_before, "refresh must not replace the path");
    assert_eq!(
        m.progress_state,
        ProgressState::Active,
        "refresh must not abort the move"
    );
    assert_ne!(
        m.curr_waypoint, cwp_before,
        "both waypoints should be refetched after an in-place update"
    );
}
