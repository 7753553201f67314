//! The ground mover: per-unit locomotion state and the per-tick pipeline.
//!
//! Each tick the dispatcher decides which mode the unit is in
//! (transported, skidding, falling, direct-controlled, or path-following),
//! runs the matching branch, then integrates, clamps to the waterline,
//! resolves collisions, and finally samples the idling detector. The
//! coarser [`slow_update`] manages path liveness: stall detection with
//! bounded repath retries, re-requests when a path is missing, and the
//! out-of-map clamp.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::config::{MapParams, ModOptions, SLOW_UPDATE_RATE};
use crate::events::{MoveEvent, TickEvents};
use crate::kinematics::{self, braking_distance};
use crate::math::{
    dir_sign, distance_2d, flatten, heading_from_vector, sq_length_2d, LineTable, SyncedRng,
    CIRCLE_DIVS, SHORT_MAX,
};
use crate::moves::{square_of, square_speed_mod, BlockingMap, MoveDef, BLOCK_STRUCTURE};
use crate::path::{
    is_fail_waypoint, is_temp_waypoint, DefaultPathController, PathController, PathEnv, PathId,
    PathService, NO_PATH, WAYPOINT_RADIUS,
};
use crate::quadfield::QuadField;
use crate::terrain::{TerrainMap, SQUARE_SIZE};
use crate::unit::{FeatureStorage, PhysState, SolidRef, UnitId, UnitStorage};
use crate::{collision, skid, steering};

/// How many stall-triggered repaths are attempted before giving up.
pub const MAX_IDLING_SLOW_UPDATES: i32 = 16;

/// Progress of the current movement order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProgressState {
    /// No order in progress.
    #[default]
    Done,
    /// Actively working toward a goal.
    Active,
    /// The last order could not be completed.
    Failed,
}

/// Per-unit ground locomotion state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundMover {
    /// Progress of the current order.
    pub progress_state: ProgressState,
    /// Active path handle; [`NO_PATH`] while none is held.
    pub path_id: PathId,
    /// Destination (y is always zero).
    pub goal_pos: Vec3,
    /// Arrival tolerance; inflated by stall hysteresis for move orders.
    pub goal_radius: f32,
    /// Latched once the goal test passes.
    pub at_goal: bool,
    /// Latched once the current waypoint is the goal.
    pub at_end_of_path: bool,
    /// Waypoint being steered at (y = −1 marks a temporary waypoint).
    pub curr_waypoint: Vec3,
    /// One-deeper lookahead waypoint.
    pub next_waypoint: Vec3,
    /// Distance to `curr_waypoint` this tick.
    pub curr_wp_dist: f32,
    /// Distance to `curr_waypoint` last tick (idling detection).
    pub prev_wp_dist: f32,
    /// Host-requested speed cap for this order.
    pub wanted_speed: f32,
    /// Realized longitudinal speed.
    pub current_speed: f32,
    /// Acceleration step selected for this tick.
    pub delta_speed: f32,
    /// Heading the controller is turning toward.
    pub wanted_heading: i16,
    /// Front dir with y zeroed, unit length.
    pub flat_front_dir: Vec3,
    /// Direction to `curr_waypoint`, y zeroed, unit length.
    pub waypoint_dir: Vec3,
    /// Cached avoidance output from the previous frame.
    pub last_avoidance_dir: Vec3,
    /// Point the idle unit keeps its primary weapon aimed at.
    pub main_heading_pos: Vec3,
    /// Whether main-heading alignment is engaged.
    pub use_main_heading: bool,
    /// Whether heading updates run at all; false while skid spin owns the
    /// orientation basis.
    pub use_heading: bool,
    /// Ballistic skid mode.
    pub skidding: bool,
    /// Airborne skid sub-mode; implies `skidding`.
    pub flying: bool,
    /// Driving backwards; derived each tick from the realized velocity.
    pub reversing: bool,
    /// Stall detector output for this tick.
    pub idling: bool,
    /// Skid tumble axis.
    pub skid_rot_vector: Vec3,
    /// Skid spin rate, degrees per frame.
    pub skid_rot_speed: f32,
    /// Skid spin acceleration.
    pub skid_rot_accel: f32,
    /// Physical state to restore when the skid ends.
    pub old_phys_state: PhysState,
    /// Position at the last displacement sample.
    pub old_pos: Vec3,
    /// Fast stall hysteresis counter (per tick, saturating).
    pub num_idling_updates: i32,
    /// Slow stall hysteresis counter (per slow tick, saturating).
    pub num_idling_slow_updates: i32,
    /// Earliest frame at which a new path may be requested.
    pub path_request_delay: u32,
    /// Next frame at which avoidance recomputes.
    pub next_avoidance_update: u32,
    /// Speed/heading clipping policy.
    pub controller: DefaultPathController,
}

impl GroundMover {
    /// Fresh mover for a unit spawned at `pos`.
    #[must_use]
    pub fn new(pos: Vec3) -> Self {
        Self {
            progress_state: ProgressState::Done,
            path_id: NO_PATH,
            goal_pos: Vec3::ZERO,
            goal_radius: 0.0,
            at_goal: false,
            at_end_of_path: false,
            curr_waypoint: Vec3::ZERO,
            next_waypoint: Vec3::ZERO,
            curr_wp_dist: 0.0,
            prev_wp_dist: 0.0,
            wanted_speed: 0.0,
            current_speed: 0.0,
            delta_speed: 0.0,
            wanted_heading: 0,
            flat_front_dir: Vec3::Z,
            waypoint_dir: Vec3::ZERO,
            last_avoidance_dir: Vec3::ZERO,
            main_heading_pos: Vec3::ZERO,
            use_main_heading: false,
            use_heading: true,
            skidding: false,
            flying: false,
            reversing: false,
            idling: false,
            skid_rot_vector: Vec3::Y,
            skid_rot_speed: 0.0,
            skid_rot_accel: 0.0,
            old_phys_state: PhysState::OnGround,
            old_pos: pos,
            num_idling_updates: 0,
            num_idling_slow_updates: 0,
            path_request_delay: 0,
            next_avoidance_update: 0,
            controller: DefaultPathController::default(),
        }
    }
}

/// Shared per-tick state threaded through every locomotion pass. Splitting
/// the simulation's fields apart here is what lets a pass hold `&mut` unit
/// borrows while still reaching the terrain, events, and spatial index.
pub(crate) struct MoveContext<'a> {
    pub frame: u32,
    pub config: &'a ModOptions,
    pub map: &'a MapParams,
    pub terrain: &'a TerrainMap,
    pub move_defs: &'a [MoveDef],
    pub line_table: &'a LineTable,
    pub blocking: &'a mut BlockingMap,
    pub quad: &'a mut QuadField,
    pub events: &'a mut TickEvents,
    pub rng: &'a mut SyncedRng,
}

impl MoveContext<'_> {
    pub(crate) fn path_env(&self) -> PathEnv<'_> {
        PathEnv {
            terrain: self.terrain,
            blocking: &*self.blocking,
            move_defs: self.move_defs,
        }
    }

    pub(crate) fn move_def(&self, class: Option<usize>) -> Option<&MoveDef> {
        class.and_then(|i| self.move_defs.get(i))
    }
}

// ============================================================================
// Tick dispatcher
// ============================================================================

/// Run one locomotion tick for a unit. Returns whether it moved.
pub(crate) fn update(
    ctx: &mut MoveContext<'_>,
    units: &mut UnitStorage,
    features: &mut FeatureStorage,
    paths: &mut dyn PathService,
    id: UnitId,
) -> bool {
    // mode selection
    {
        let Some(unit) = units.get_mut(id) else {
            return false;
        };
        if unit.mover.is_none() {
            return false;
        }
        unit.residual_impulse *= 0.9;
        if unit.transporter.is_some() {
            return false;
        }

        if kinematics::on_slope(ctx, unit, 1.0) {
            if let Some(mover) = unit.mover.as_mut() {
                mover.skidding = true;
            }
        }
    }

    if units
        .get(id)
        .and_then(|u| u.mover.as_ref())
        .is_some_and(|m| m.skidding)
    {
        skid::update_skid(ctx, units, features, paths, id);
        return false;
    }

    if units.get(id).is_some_and(|u| u.falling) {
        skid::update_controlled_drop(ctx, units, id);
        return false;
    }

    let heading_before = units.get(id).map_or(0, |u| u.heading);
    let mut _want_reverse = false;

    if units.get(id).is_some_and(|u| u.stunned || u.being_built) {
        if let Some(unit) = units.get_mut(id) {
            if unit.is_moving {
                ctx.events.push(MoveEvent::StoppedMoving { unit: id });
            }
            unit.is_moving = false;
            kinematics::change_speed(ctx, unit, 0.0, false, false);
        }
    } else if units.get(id).is_some_and(|u| u.direct_control.is_some()) {
        if let Some(unit) = units.get_mut(id) {
            _want_reverse = update_direct_control(ctx, unit);
        }
    } else {
        _want_reverse = follow_path(ctx, units, features, paths, id);
    }

    // run even while stunned, so restoring terrain cannot bury units
    if let Some(unit) = units.get_mut(id) {
        kinematics::update_owner_pos(ctx, unit);
        kinematics::adjust_pos_to_waterline(ctx, unit);
    }
    collision::handle_object_collisions(ctx, units, features, paths, id);

    // displacement sampling and the idling detector
    let mut has_moved = false;
    if let Some(unit) = units.get_mut(id) {
        let pos = unit.pos;
        let heading = unit.heading;
        let turn_rate = unit.stats.turn_rate;

        if let Some(mover) = unit.mover.as_mut() {
            let pos_dif = pos - mover.old_pos;
            // tighter tolerance on y: all-terrain units are slowed a lot on
            // cliffs and we must not read that as displacement
            const CMP_EPS: f32 = 1e-4;
            let eps_y = CMP_EPS * 1e-2;

            if pos_dif.x.abs() < CMP_EPS && pos_dif.y.abs() < eps_y && pos_dif.z.abs() < CMP_EPS {
                // an epsilon speed vector would still extrapolate the draw
                // position; nullify it to stop visual micro-stutter
                unit.speed = Vec3::ZERO;

                // temporary waypoints (y = -1) mean the pathfinder is still
                // working; holding position for it is not idling, and a
                // multi-frame in-place turn is not idling either
                let mut idling = true;
                idling &= !is_temp_waypoint(mover.curr_waypoint)
                    && !is_temp_waypoint(mover.next_waypoint);
                idling &=
                    i32::from(heading.wrapping_sub(heading_before)).abs() < turn_rate as i32;
                mover.idling = idling;
            } else {
                mover.old_pos = pos;

                let ffd = mover.flat_front_dir * pos_dif.length_squared() * 0.5;
                let wpd = mover.waypoint_dir * dir_sign(!mover.reversing);
                let dist_delta = mover.curr_wp_dist - mover.prev_wp_dist;

                // the check can only pass while oriented toward the
                // waypoint, compensating for how slowly the distance drops
                // when moving orthogonal to it
                let mut idling = true;
                idling &= pos_dif.y.abs() < (eps_y * pos.y).abs();
                idling &= (dist_delta * dist_delta) < ffd.dot(wpd);
                mover.idling = idling;
                has_moved = true;
            }
        }
    }

    has_moved
}

/// Coarse path-liveness update, run once per [`SLOW_UPDATE_RATE`] frames.
pub(crate) fn slow_update(
    ctx: &mut MoveContext<'_>,
    units: &mut UnitStorage,
    paths: &mut dyn PathService,
    id: UnitId,
) {
    let (transported, progress, path_id, path_request_delay) = {
        let Some(unit) = units.get(id) else {
            return;
        };
        let Some(mover) = unit.mover.as_ref() else {
            return;
        };
        (
            unit.transporter.is_some(),
            mover.progress_state,
            mover.path_id,
            mover.path_request_delay,
        )
    };

    if transported {
        if progress == ProgressState::Active {
            stop_engine(ctx, units, paths, id);
        }
        return;
    }

    if progress == ProgressState::Active {
        if path_id != NO_PATH {
            if let Some(mover) = units.get_mut(id).and_then(|u| u.mover.as_mut()) {
                if mover.idling {
                    mover.num_idling_slow_updates =
                        (mover.num_idling_slow_updates + 1).min(MAX_IDLING_SLOW_UPDATES);
                } else {
                    mover.num_idling_slow_updates = (mover.num_idling_slow_updates - 1).max(0);
                }
            }

            let (idling_updates, idling_slow_updates, turn_rate) = {
                let Some(u) = units.get(id) else { return };
                let Some(m) = u.mover.as_ref() else { return };
                (
                    m.num_idling_updates,
                    m.num_idling_slow_updates,
                    u.stats.turn_rate,
                )
            };

            if idling_updates as f32 > SHORT_MAX as f32 / turn_rate.max(0.001) {
                // we have a path but are not moving
                tracing::debug!(
                    unit = id,
                    path = path_id,
                    failures = idling_updates,
                    "slow update: unit has a path but makes no progress"
                );

                if idling_slow_updates < MAX_IDLING_SLOW_UPDATES {
                    stop_engine(ctx, units, paths, id);
                    start_engine(ctx, units, paths, id);
                } else {
                    // unit probably ended up on a non-traversable square,
                    // or is stuck in a non-moving crowd
                    fail(ctx, units, paths, id);
                }
            }
        } else if ctx.frame > path_request_delay {
            // we want to be moving but have no path
            tracing::debug!(unit = id, "slow update: active without a path");
            stop_engine(ctx, units, paths, id);
            start_engine(ctx, units, paths, id);
        }
    }

    // move non-flying units back onto the map; also reset <old_pos> so the
    // next displacement sample does not explode
    let flying = units
        .get(id)
        .and_then(|u| u.mover.as_ref())
        .is_some_and(|m| m.flying);
    if !flying {
        if let Some(unit) = units.get_mut(id) {
            if !ctx.terrain.is_in_bounds(unit.pos) {
                unit.pos = ctx.terrain.clamp_in_bounds(unit.pos);
                let pos = unit.pos;
                if let Some(mover) = unit.mover.as_mut() {
                    mover.old_pos = pos;
                }
            }
        }
    }
}

// ============================================================================
// Order entry points
// ============================================================================

/// Start moving toward `goal`. `initial_speed` of zero suppresses
/// re-acceleration for the request tick (used after obstacle pushes).
pub(crate) fn start_moving(
    ctx: &mut MoveContext<'_>,
    units: &mut UnitStorage,
    paths: &mut dyn PathService,
    id: UnitId,
    goal: Vec3,
    goal_radius: f32,
    initial_speed: Option<f32>,
) {
    let active = units
        .get(id)
        .and_then(|u| u.mover.as_ref())
        .is_some_and(|m| m.progress_state == ProgressState::Active);
    if active {
        stop_engine(ctx, units, paths, id);
    }

    {
        let Some(unit) = units.get_mut(id) else {
            return;
        };
        let max_speed = unit.stats.max_speed;
        let Some(mover) = unit.mover.as_mut() else {
            return;
        };

        mover.goal_pos = Vec3::new(goal.x, 0.0, goal.z);
        mover.goal_radius = goal_radius;
        mover.at_goal = false;
        mover.use_main_heading = false;
        mover.progress_state = ProgressState::Active;
        mover.num_idling_updates = 0;
        mover.num_idling_slow_updates = 0;
        mover.curr_wp_dist = 0.0;
        mover.prev_wp_dist = 0.0;
        mover.wanted_speed = initial_speed.unwrap_or(max_speed);
    }

    tracing::debug!(unit = id, ?goal, "start moving: starting engine");
    start_engine(ctx, units, paths, id);
}

/// Cancel the current movement order.
pub(crate) fn stop_moving(
    ctx: &mut MoveContext<'_>,
    units: &mut UnitStorage,
    paths: &mut dyn PathService,
    id: UnitId,
) {
    tracing::debug!(unit = id, "stop moving: stopping engine");
    stop_engine(ctx, units, paths, id);

    if let Some(mover) = units.get_mut(id).and_then(|u| u.mover.as_mut()) {
        mover.use_main_heading = false;
        mover.progress_state = ProgressState::Done;
    }
}

// ============================================================================
// Path following
// ============================================================================

fn follow_path(
    ctx: &mut MoveContext<'_>,
    units: &mut UnitStorage,
    features: &mut FeatureStorage,
    paths: &mut dyn PathService,
    id: UnitId,
) -> bool {
    let mut want_reverse = false;

    let path_id = match units.get(id).and_then(|u| u.mover.as_ref()) {
        Some(m) => m.path_id,
        None => return false,
    };

    if path_id == NO_PATH {
        if let Some(unit) = units.get_mut(id) {
            kinematics::change_speed(ctx, unit, 0.0, false, false);
        }
        set_main_heading(ctx, units, id);
    } else {
        // distance samples, the goal test, and fast idling hysteresis
        {
            let Some(unit) = units.get_mut(id) else {
                return false;
            };
            let pos = unit.pos;
            let leading_move = unit.commands.leading_is_move();
            let Some(mover) = unit.mover.as_mut() else {
                return false;
            };

            mover.prev_wp_dist = mover.curr_wp_dist;
            mover.curr_wp_dist = distance_2d(pos, mover.curr_waypoint);

            // build orders keep their exact radius (it is the build range);
            // only plain move orders get the stall-hysteresis inflation
            let cur_goal_dist_sq = sq_length_2d(pos - mover.goal_pos);
            let radius_scale = if leading_move {
                (mover.num_idling_slow_updates + 1) as f32
            } else {
                1.0
            };
            let min_goal_dist = mover.goal_radius * radius_scale;
            if cur_goal_dist_sq < min_goal_dist * min_goal_dist {
                mover.at_goal = true;
            }

            if !mover.at_goal {
                if mover.idling {
                    mover.num_idling_updates = (mover.num_idling_updates + 1).min(SHORT_MAX);
                } else {
                    mover.num_idling_updates = (mover.num_idling_updates - 1).max(0);
                }
            }
        }

        let (at_end, at_goal) = match units.get(id).and_then(|u| u.mover.as_ref()) {
            Some(m) => (m.at_end_of_path, m.at_goal),
            None => return false,
        };
        if !at_end {
            get_next_waypoint(ctx, units, paths, id);
        } else if at_goal {
            arrived(ctx, units, paths, id);
        }

        // set the steering direction AFTER waypoint maintenance
        {
            let Some(unit) = units.get_mut(id) else {
                return false;
            };
            let pos = unit.pos;
            if let Some(mover) = unit.mover.as_mut() {
                mover.waypoint_dir = flatten(mover.curr_waypoint - pos).normalize_or_zero();
            }
        }

        let raw_wanted_dir = {
            let Some(unit) = units.get(id) else {
                return false;
            };
            let Some(mover) = unit.mover.as_ref() else {
                return false;
            };
            if mover.waypoint_dir.dot(mover.flat_front_dir) < 0.0 {
                want_reverse = steering::want_reverse(unit, mover.waypoint_dir);
            }
            mover.waypoint_dir * dir_sign(!want_reverse)
        };

        let mod_wanted_dir =
            steering::obstacle_avoidance_dir(ctx, units, features, id, raw_wanted_dir);

        if let Some(unit) = units.get_mut(id) {
            kinematics::change_heading(
                ctx,
                unit,
                heading_from_vector(mod_wanted_dir.x, mod_wanted_dir.z),
            );
            let wanted = if unit.commands.leading_is_move() {
                unit.stats.max_speed
            } else {
                unit.mover.as_ref().map_or(0.0, |m| m.wanted_speed)
            };
            kinematics::change_speed(ctx, unit, wanted, want_reverse, false);
            unit.is_moving = true;
        }
    }

    let live_path = units
        .get(id)
        .and_then(|u| u.mover.as_ref())
        .map_or(NO_PATH, |m| m.path_id);
    if live_path != NO_PATH {
        if let Some(unit) = units.get(id) {
            paths.update_path(unit, live_path);
        }
    }

    want_reverse
}

/// Whether the straight run from `pos` to `wp` crosses a blocked or
/// unwalkable square. Short runs use the precomputed line table; longer
/// ones fall back to a bounding-rectangle scan.
fn waypoint_obscured(
    ctx: &MoveContext<'_>,
    def: &MoveDef,
    exclude: Option<SolidRef>,
    pos: Vec3,
    wp: Vec3,
) -> bool {
    let blocked = |x: i32, z: i32| -> bool {
        if ctx.blocking.square_blocked(x, z, exclude) & BLOCK_STRUCTURE != 0 {
            return true;
        }
        square_speed_mod(def, ctx.terrain, x, z) <= 0.01
    };

    let (px, pz) = square_of(pos);
    let (wx, wz) = square_of(wp);

    if LineTable::covers(wx - px, wz - pz) {
        return ctx
            .line_table
            .line(wx - px, wz - pz)
            .iter()
            .any(|&(ox, oz)| blocked(px + ox, pz + oz));
    }

    for z in (pz.min(wz) - 1)..=(pz.max(wz) + 1) {
        for x in (px.min(wx) - 1)..=(px.max(wx) + 1) {
            if blocked(x, z) {
                return true;
            }
        }
    }
    false
}

fn get_next_waypoint(
    ctx: &mut MoveContext<'_>,
    units: &mut UnitStorage,
    paths: &mut dyn PathService,
    id: UnitId,
) {
    let mut refreshed: Option<(Vec3, Vec3)> = None;
    let mut clamp_to_goal = false;
    let mut advance: Option<(Vec3, Vec3)> = None;

    // ---- decision phase (unit read-only; service may be queried)
    {
        let Some(unit) = units.get(id) else {
            return;
        };
        let Some(mover) = unit.mover.as_ref() else {
            return;
        };
        if mover.path_id == NO_PATH {
            return;
        }

        let mut cwp = mover.curr_waypoint;
        let mut nwp = mover.next_waypoint;
        let pos = unit.pos;

        let mut can_advance = mover
            .controller
            .allow_set_temp_goal_position(mover.path_id, nwp);

        if can_advance && !is_temp_waypoint(cwp) && !is_temp_waypoint(nwp) {
            if paths.path_updated(mover.path_id) {
                // path changed under us (terrain deformation) but kept its
                // id; refresh both waypoints inline instead of repathing
                let env = ctx.path_env();
                cwp = paths.next_waypoint(&env, unit, mover.path_id, pos, WAYPOINT_RADIUS);
                nwp = paths.next_waypoint(&env, unit, mover.path_id, cwp, WAYPOINT_RADIUS);
                refreshed = Some((cwp, nwp));
            }

            // turn-radius check, against the DIAMETER of the turning
            // circle: skipping a waypoint outside it causes sine-like
            // snaking on long segments
            let turn_frames = CIRCLE_DIVS / unit.stats.turn_rate.max(0.001);
            let turn_radius =
                (unit.speed.length() * turn_frames) / (2.0 * std::f32::consts::PI);
            let waypoint_dot = mover
                .waypoint_dir
                .dot(mover.flat_front_dir * dir_sign(!mover.reversing))
                .clamp(-1.0, 1.0);

            if mover.curr_wp_dist > turn_radius * 2.0 {
                can_advance = false;
            }
            if can_advance && mover.curr_wp_dist > SQUARE_SIZE && waypoint_dot >= 0.995 {
                can_advance = false;
            }

            // an obstacle appeared between us and the waypoint
            if can_advance {
                if let Some(def) = ctx.move_def(unit.move_class) {
                    if sq_length_2d(pos - cwp) > SQUARE_SIZE * SQUARE_SIZE
                        && waypoint_obscured(ctx, def, Some(SolidRef::Unit(id)), pos, cwp)
                    {
                        can_advance = false;
                    }
                }
            }

            if can_advance {
                let cur_goal_dist_sq = sq_length_2d(cwp - mover.goal_pos);
                let radius_scale = if unit.commands.leading_is_move() {
                    (mover.num_idling_slow_updates + 1) as f32
                } else {
                    1.0
                };
                let min_goal_dist = mover.goal_radius * radius_scale;

                // trigger arrival on the next update (only ever reached
                // with non-temporary waypoints)
                if cur_goal_dist_sq < min_goal_dist * min_goal_dist {
                    clamp_to_goal = true;
                    can_advance = false;
                }
            }
        }

        if can_advance {
            let env = ctx.path_env();
            let new_next = paths.next_waypoint(&env, unit, mover.path_id, nwp, WAYPOINT_RADIUS);
            advance = Some((nwp, new_next));
        }
    }

    // ---- mutation phase
    {
        let Some(mover) = units.get_mut(id).and_then(|u| u.mover.as_mut()) else {
            return;
        };
        if let Some((cwp, nwp)) = refreshed {
            mover.curr_waypoint = cwp;
            mover.next_waypoint = nwp;
        }
        if clamp_to_goal {
            mover.at_end_of_path = true;
            mover.curr_waypoint = mover.goal_pos;
            mover.next_waypoint = mover.goal_pos;
        }
        if let Some((new_curr, new_next)) = advance {
            let path_id = mover.path_id;
            mover.controller.set_temp_goal_position(path_id, new_curr);
            mover.curr_waypoint = new_curr;
            mover.next_waypoint = new_next;
        }
    }

    // ---- post-checks on the (possibly new) waypoints
    let verdict = {
        let Some(unit) = units.get(id) else { return };
        let Some(mover) = unit.mover.as_ref() else {
            return;
        };

        if is_fail_waypoint(mover.next_waypoint) {
            Some(true)
        } else {
            let exclude = Some(SolidRef::Unit(id));
            let (cx, cz) = square_of(mover.curr_waypoint);
            let (nx, nz) = square_of(mover.next_waypoint);
            let blocked = ctx.blocking.square_blocked(cx, cz, exclude) & BLOCK_STRUCTURE != 0
                || ctx.blocking.square_blocked(nx, nz, exclude) & BLOCK_STRUCTURE != 0;
            blocked.then_some(false)
        }
    };

    match verdict {
        Some(true) => fail(ctx, units, paths, id),
        Some(false) => {
            // a waypoint square got built over (a crushed feature may have
            // spawned a blocking wreck there): replan
            stop_engine(ctx, units, paths, id);
            start_engine(ctx, units, paths, id);
        }
        None => {}
    }
}

// ============================================================================
// Engine control, arrival, failure
// ============================================================================

pub(crate) fn start_engine(
    ctx: &mut MoveContext<'_>,
    units: &mut UnitStorage,
    paths: &mut dyn PathService,
    id: UnitId,
) {
    let wants_path = units
        .get(id)
        .and_then(|u| u.mover.as_ref())
        .is_some_and(|m| m.path_id == NO_PATH && !m.at_goal);

    if wants_path {
        let request = {
            let Some(unit) = units.get(id) else { return };
            let Some(mover) = unit.mover.as_ref() else {
                return;
            };
            let env = ctx.path_env();
            let path_id =
                paths.request_path(&env, unit, unit.pos, mover.goal_pos, mover.goal_radius);

            if path_id != NO_PATH {
                let cwp = paths.next_waypoint(&env, unit, path_id, unit.pos, WAYPOINT_RADIUS);
                let nwp = paths.next_waypoint(&env, unit, path_id, cwp, WAYPOINT_RADIUS);
                Some((path_id, cwp, nwp))
            } else {
                None
            }
        };

        match request {
            Some((path_id, cwp, nwp)) => {
                let Some(unit) = units.get_mut(id) else {
                    return;
                };
                if let Some(mover) = unit.mover.as_mut() {
                    mover.path_id = path_id;
                    mover.at_goal = false;
                    mover.at_end_of_path = false;
                    mover.curr_waypoint = cwp;
                    mover.next_waypoint = nwp;
                    let goal = mover.goal_pos;
                    mover.controller.set_real_goal_position(path_id, goal);
                    mover.controller.set_temp_goal_position(path_id, cwp);
                }
                unit.is_moving = true;
                ctx.events.push(MoveEvent::StartedMoving { unit: id });
                paths.update_path(&*unit, path_id);
                tracing::debug!(unit = id, path = path_id, "engine started");
            }
            None => fail(ctx, units, paths, id),
        }

        // limit the frequency of slow-update path re-requests
        if let Some(mover) = units.get_mut(id).and_then(|u| u.mover.as_mut()) {
            mover.path_request_delay = ctx.frame + (SLOW_UPDATE_RATE << 1);
        }
    }

    if let Some(mover) = units.get_mut(id).and_then(|u| u.mover.as_mut()) {
        mover.next_avoidance_update = ctx.frame;
    }
}

pub(crate) fn stop_engine(
    ctx: &mut MoveContext<'_>,
    units: &mut UnitStorage,
    paths: &mut dyn PathService,
    id: UnitId,
) {
    let Some(unit) = units.get_mut(id) else {
        return;
    };
    let stats = unit.stats;
    let pos = unit.pos;

    if let Some(mover) = unit.mover.as_mut() {
        if mover.path_id != NO_PATH {
            paths.delete_path(mover.path_id);
            mover.path_id = NO_PATH;

            if !mover.at_goal {
                // steer at the natural braking stop position while the
                // engine winds down
                let dist = braking_distance(&stats, mover.reversing, mover.current_speed);
                mover.curr_waypoint =
                    flatten(pos) + mover.flat_front_dir * dist * dir_sign(!mover.reversing);
            }

            ctx.events.push(MoveEvent::StoppedMoving { unit: id });
            tracing::debug!(unit = id, "engine stopped");
        }

        mover.wanted_speed = 0.0;
    }

    unit.is_moving = false;
}

/// The unit reached its goal: wind down and report.
pub(crate) fn arrived(
    ctx: &mut MoveContext<'_>,
    units: &mut UnitStorage,
    paths: &mut dyn PathService,
    id: UnitId,
) {
    let active = units
        .get(id)
        .and_then(|u| u.mover.as_ref())
        .is_some_and(|m| m.progress_state == ProgressState::Active);
    if !active {
        return;
    }

    stop_engine(ctx, units, paths, id);

    let Some(unit) = units.get_mut(id) else {
        return;
    };
    if let Some(mover) = unit.mover.as_mut() {
        mover.progress_state = ProgressState::Done;
    }
    if !unit.commands.has_more_move_orders() {
        // we may have arrived indirectly (a collision with a unit sharing
        // our goal); reflect where we actually stopped in the front order
        let pos = unit.pos;
        unit.commands.set_front_move_pos(pos);
    }

    ctx.events.push(MoveEvent::UnitArrived { unit: id });
    tracing::debug!(unit = id, "arrived");
}

/// Give up on the current goal. No retries until a new order arrives.
pub(crate) fn fail(
    ctx: &mut MoveContext<'_>,
    units: &mut UnitStorage,
    paths: &mut dyn PathService,
    id: UnitId,
) {
    tracing::debug!(unit = id, "move failed");

    stop_engine(ctx, units, paths, id);

    if let Some(mover) = units.get_mut(id).and_then(|u| u.mover.as_mut()) {
        mover.progress_state = ProgressState::Failed;
    }
    ctx.events.push(MoveEvent::UnitMoveFailed { unit: id });
}

// ============================================================================
// Direct control & main heading
// ============================================================================

/// Player-piloted tick: synthesize a waypoint ahead (or behind) of the
/// unit and translate key state into speed and heading changes.
fn update_direct_control(ctx: &mut MoveContext<'_>, unit: &mut crate::unit::Unit) -> bool {
    let Some(con) = unit.direct_control else {
        return false;
    };
    let want_reverse = con.back && !con.forward;
    let stats = unit.stats;
    let pos = unit.pos;
    let front = unit.front;

    if let Some(mover) = unit.mover.as_mut() {
        // the sign applies to the distance, then scales the front dir
        let probe = pos + front * (dir_sign(!want_reverse) * 100.0);
        let probe = ctx.terrain.clamp_in_bounds(probe);
        mover.curr_waypoint.x = probe.x;
        mover.curr_waypoint.z = probe.z;
    }

    if con.forward {
        kinematics::change_speed(ctx, unit, stats.max_speed, want_reverse, true);
        if !unit.is_moving {
            ctx.events.push(MoveEvent::StartedMoving { unit: unit.id });
        }
        unit.is_moving = true;
    } else if con.back {
        kinematics::change_speed(ctx, unit, stats.max_reverse_speed, want_reverse, true);
        if !unit.is_moving {
            ctx.events.push(MoveEvent::StartedMoving { unit: unit.id });
        }
        unit.is_moving = true;
    } else {
        kinematics::change_speed(ctx, unit, 0.0, false, true);
        if unit.is_moving {
            ctx.events.push(MoveEvent::StoppedMoving { unit: unit.id });
        }
        unit.is_moving = false;
    }

    let turn = stats.turn_rate.min(SHORT_MAX as f32) as i16;
    if con.left {
        let h = unit.heading.wrapping_add(turn);
        kinematics::change_heading(ctx, unit, h);
    }
    if con.right {
        let h = unit.heading.wrapping_sub(turn);
        kinematics::change_heading(ctx, unit, h);
    }

    want_reverse
}

/// Turn an idle unit so its primary weapon points at `main_heading_pos`.
fn set_main_heading(ctx: &mut MoveContext<'_>, units: &mut UnitStorage, id: UnitId) {
    let decision = {
        let Some(unit) = units.get(id) else { return };
        let Some(mover) = unit.mover.as_ref() else {
            return;
        };
        if !mover.use_main_heading {
            return;
        }

        let dir = flatten(mover.main_heading_pos - unit.pos).normalize_or_zero();
        if dir == Vec3::ZERO {
            return;
        }
        let new_heading = heading_from_vector(dir.x, dir.z);
        (new_heading, unit.heading, mover.progress_state)
    };
    let (new_heading, heading, progress) = decision;

    if progress == ProgressState::Active {
        if heading == new_heading {
            // aligned: stop turning
            ctx.events.push(MoveEvent::StoppedMoving { unit: id });
            if let Some(mover) = units.get_mut(id).and_then(|u| u.mover.as_mut()) {
                mover.progress_state = ProgressState::Done;
            }
        } else if let Some(unit) = units.get_mut(id) {
            kinematics::change_heading(ctx, unit, new_heading);
        }
    } else if heading != new_heading {
        ctx.events.push(MoveEvent::StartedMoving { unit: id });
        if let Some(unit) = units.get_mut(id) {
            if let Some(mover) = unit.mover.as_mut() {
                mover.progress_state = ProgressState::Active;
            }
            kinematics::change_heading(ctx, unit, new_heading);
        }
    }
}

/// Engage main-heading alignment toward `pos`.
pub(crate) fn keep_pointing_to(units: &mut UnitStorage, id: UnitId, pos: Vec3, aggressive: bool) {
    if let Some(mover) = units.get_mut(id).and_then(|u| u.mover.as_mut()) {
        mover.main_heading_pos = pos;
        mover.use_main_heading = aggressive;
    }
}
