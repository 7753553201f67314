//! Speed and heading control plus position integration.
//!
//! The per-tick order is: the path follower picks a wanted speed and
//! heading ([`change_speed`], [`change_heading`]), then integration builds
//! a terrain-tangent speed vector and moves the unit
//! ([`update_owner_pos`]), and finally the waterline clamp pins the unit
//! back onto the surface it belongs on.

use glam::Vec3;

use crate::math::{
    dir_sign, flatten, heading_from_vector, sq_length_2d, turn_angle_deg, CIRCLE_DIVS,
};
use crate::mover::MoveContext;
use crate::moves::{pos_speed_mod_dir, test_move_square, MoveFamily};
use crate::path::{is_temp_waypoint, PathController};
use crate::events::MoveEvent;
use crate::unit::{SolidRef, Unit, UnitStats};

/// Distance covered before stopping from `speed` under maximum braking.
#[must_use]
pub fn braking_distance(stats: &UnitStats, reversing: bool, speed: f32) -> f32 {
    let rate = if reversing {
        stats.acc_rate
    } else {
        stats.dec_rate
    };
    let time = speed / rate.max(0.001);
    0.5 * rate * time * time
}

/// Ground height under a unit, honoring flotation: floating units ride the
/// water surface at their waterline, everyone else follows the seabed.
pub(crate) fn ground_height(ctx: &MoveContext<'_>, unit: &Unit, pos: Vec3) -> f32 {
    if unit.stats.floats_on_water {
        let h = ctx.terrain.height_above_water(pos.x, pos.z);
        if h <= 0.0 {
            -unit.stats.waterline
        } else {
            h
        }
    } else {
        ctx.terrain.height_real(pos.x, pos.z)
    }
}

/// Ground normal under a unit; floating units see a flat water surface.
pub(crate) fn ground_normal(ctx: &MoveContext<'_>, unit: &Unit, pos: Vec3) -> Vec3 {
    if unit.stats.floats_on_water && pos.y < 0.0 {
        Vec3::Y
    } else {
        ctx.terrain.normal(pos.x, pos.z)
    }
}

/// Whether the unit stands on a square too steep for it to hold.
///
/// With `min_slide_tolerance <= 0` the raw move-class slope limit is used;
/// otherwise the limit is scaled by the unit's slide tolerance (so a unit
/// never starts sliding on ground it could legally path over).
pub(crate) fn on_slope(ctx: &MoveContext<'_>, unit: &Unit, min_slide_tolerance: f32) -> bool {
    let Some(def) = unit.move_class.and_then(|i| ctx.move_defs.get(i)) else {
        return false;
    };

    if unit.stats.slide_tolerance < min_slide_tolerance {
        return false;
    }
    if unit.stats.floats_on_water && unit.pos.y < 0.0 {
        return false;
    }
    if !ctx.terrain.is_in_bounds(unit.pos) {
        return false;
    }

    let g_slope = ctx.terrain.slope(unit.pos.x, unit.pos.z);
    let u_slope = def.max_slope
        * if min_slide_tolerance <= 0.0 {
            1.0
        } else {
            unit.stats.slide_tolerance
        };

    g_slope > u_slope
}

/// Select the wanted speed for this tick and derive the acceleration step.
///
/// `fps_mode` (direct control) skips the automatic turn slowdown.
pub(crate) fn change_speed(
    ctx: &mut MoveContext<'_>,
    unit: &mut Unit,
    new_wanted_speed: f32,
    want_reverse: bool,
    fps_mode: bool,
) {
    let stats = unit.stats;
    let command_count = unit.commands.len();
    let heading = unit.heading;
    let pos = unit.pos;
    let move_class = unit.move_class;

    let Some(mover) = unit.mover.as_mut() else {
        return;
    };

    mover.wanted_speed = new_wanted_speed;

    // round low speeds to zero
    if mover.wanted_speed <= 0.0 && mover.current_speed < 0.01 {
        mover.current_speed = 0.0;
        mover.delta_speed = 0.0;
        return;
    }

    // start from the unrestricted top speed
    let mut target_speed = if want_reverse {
        stats.max_reverse_speed
    } else {
        stats.max_speed
    };

    if is_temp_waypoint(mover.curr_waypoint) && is_temp_waypoint(mover.next_waypoint) {
        // don't move until we have an actual path; driving blind into
        // obstacles is worse than hiding the pathfinder's queueing lag
        target_speed = 0.0;
    } else if mover.wanted_speed > 0.0 {
        let ground_speed_mod = match move_class.and_then(|i| ctx.move_defs.get(i)) {
            // the pathfinders only check the center square for terrain,
            // so mirror that here
            Some(def) => pos_speed_mod_dir(def, ctx.terrain, pos, mover.flat_front_dir),
            None => 1.0,
        };

        let cur_goal_dist_sq = sq_length_2d(pos - mover.goal_pos);
        let braking_dist = braking_distance(&stats, mover.reversing, mover.current_speed);
        let min_goal_dist_sq = braking_dist * braking_dist;

        let waypoint_dif = if mover.reversing {
            -mover.waypoint_dir
        } else {
            mover.waypoint_dir
        };
        let turn_delta_heading =
            heading.wrapping_sub(heading_from_vector(waypoint_dif.x, waypoint_dif.z));

        // every queued move order carries a trailing speed order
        let start_braking = command_count <= 2 && cur_goal_dist_sq <= min_goal_dist_sq;

        if !fps_mode && turn_delta_heading != 0 {
            let req_turn_angle = turn_angle_deg(heading, mover.wanted_heading);
            let max_turn_angle = (stats.turn_rate / CIRCLE_DIVS) * 360.0;

            let mut turn_speed = if mover.reversing {
                stats.max_reverse_speed
            } else {
                stats.max_speed
            };
            if req_turn_angle != 0.0 {
                turn_speed *= (max_turn_angle / req_turn_angle).min(1.0);
            }

            if sq_length_2d(mover.waypoint_dir) > 0.1 {
                if !stats.turn_in_place {
                    target_speed = stats.turn_in_place_speed_limit.max(turn_speed);
                } else if req_turn_angle > stats.turn_in_place_angle_limit {
                    target_speed = turn_speed;
                }
            }

            if mover.at_end_of_path {
                // waypoints are no longer advanced from here on; cap speed
                // so the unit cannot enter an endless orbit of the goal
                let orbit_cap =
                    (mover.curr_wp_dist * std::f32::consts::PI) / (CIRCLE_DIVS / stats.turn_rate);
                target_speed = target_speed.min(orbit_cap);
            }
        }

        // raise wantedSpeed only for bonuses so units keep their terrain
        // speedups, never as a penalty
        mover.wanted_speed *= ground_speed_mod.max(1.0);
        target_speed *= ground_speed_mod;
        if start_braking {
            target_speed = 0.0;
        }
        target_speed = target_speed.min(mover.wanted_speed);
    } else {
        target_speed = 0.0;
    }

    mover.delta_speed = mover.controller.delta_speed(
        mover.path_id,
        target_speed,
        mover.current_speed,
        stats.acc_rate,
        stats.dec_rate,
        want_reverse,
        mover.reversing,
    );
}

/// Turn toward `new_heading`, limited by the turn-rate budget, and refresh
/// the orientation basis. Skidding/flying and transported movers skip
/// heading updates entirely.
pub(crate) fn change_heading(ctx: &mut MoveContext<'_>, unit: &mut Unit, new_heading: i16) {
    if unit.transporter.is_some() {
        return;
    }

    let heading = unit.heading;
    let stats = unit.stats;
    let delta;
    {
        let Some(mover) = unit.mover.as_mut() else {
            return;
        };
        if mover.flying {
            return;
        }
        mover.wanted_heading = new_heading;
        delta = mover
            .controller
            .delta_heading(mover.path_id, new_heading, heading, stats.turn_rate);
    }

    unit.heading = unit.heading.wrapping_add(delta);

    let align_to_ground = !stats.upright && stats.max_speed > 0.0;
    let normal = if align_to_ground {
        Some(ctx.terrain.normal(unit.pos.x, unit.pos.z))
    } else {
        None
    };
    unit.update_dir_vectors(normal);

    let flat_front = flatten(unit.front).normalize_or_zero();
    if let Some(mover) = unit.mover.as_mut() {
        mover.flat_front_dir = flat_front;
    }
}

/// Build the new speed vector from this tick's acceleration.
///
/// With ground-unit gravity on, horizontal acceleration is applied along
/// the terrain-tangent vector (which, unlike the front dir, does not care
/// whether the model is upright) and the vertical component snaps to
/// tangent velocity on the ground or gravity in the air. Hover movers
/// additionally keep a slipping sideways component.
pub(crate) fn new_speed_vector(
    ctx: &MoveContext<'_>,
    unit: &mut Unit,
    h_acc: f32,
    v_acc: f32,
) -> Vec3 {
    let (reversing, flat_front) = match unit.mover.as_ref() {
        Some(m) => (m.reversing, m.flat_front_dir),
        None => (false, flatten(unit.front).normalize_or_zero()),
    };

    if !ctx.config.allow_ground_unit_gravity {
        let speed_scale = unit.speed.length() * dir_sign(!reversing) + h_acc;
        return unit.front * speed_scale;
    }

    let ground_ahead = ground_height(ctx, unit, unit.pos + unit.speed);
    let apply_gravity = (unit.pos.y + unit.speed.y) >= ground_ahead;
    let in_air = unit.pos.y - ground_height(ctx, unit, unit.pos) > 1.0;

    // the drag terms guarantee the vector decays when wanted and delta
    // speed are both zero
    let drag_coeff = if in_air { 0.9999 } else { 0.99 };
    let slip_coeff = if in_air { 0.9999 } else { 0.95 };

    let gnd_norm = ground_normal(ctx, unit, unit.pos);
    let gnd_tang = gnd_norm.cross(unit.right);
    let flat_speed = flatten(unit.speed);

    // never drop below terrain
    unit.speed.y = if apply_gravity {
        unit.speed.y
    } else {
        gnd_tang.y * unit.speed.dot(gnd_tang)
    };

    let is_strafing_hover = ctx.config.allow_hover_unit_strafing
        && unit
            .move_class
            .and_then(|i| ctx.move_defs.get(i))
            .is_some_and(|def| def.family == MoveFamily::Hover);

    if !is_strafing_hover {
        let accel_vec = gnd_tang * h_acc + Vec3::Y * v_acc;
        let speed_vec = unit.speed + accel_vec;

        flat_front * speed_vec.dot(flat_front) * drag_coeff + Vec3::Y * speed_vec.y
    } else {
        let tang_speed = unit.speed.dot(gnd_tang);
        gnd_tang * (tang_speed + h_acc).max(0.0) * drag_coeff
            + (flat_speed - gnd_tang * tang_speed) * slip_coeff
            + Vec3::Y * (unit.speed + Vec3::Y * v_acc).y
    }
}

/// Integrate this tick's motion: apply the speed vector, undo the move if
/// it would cross impassable terrain, and derive `reversing` and
/// `current_speed` from the realized velocity.
pub(crate) fn update_owner_pos(ctx: &mut MoveContext<'_>, unit: &mut Unit) {
    let delta_speed = unit.mover.as_ref().map_or(0.0, |m| m.delta_speed);
    let speed_vector = new_speed_vector(ctx, unit, delta_speed, ctx.map.gravity);

    // nanoframes cannot move; without this they would jitter from gravity
    if unit.being_built {
        return;
    }

    if speed_vector != Vec3::ZERO {
        unit.speed = speed_vector;
        unit.pos += speed_vector;

        // structure blockage is the collision resolver's job; impassable
        // terrain entered by integration is undone right here
        let passable = match unit.move_class.and_then(|i| ctx.move_defs.get(i)) {
            Some(def) => test_move_square(
                def,
                ctx.terrain,
                ctx.blocking,
                Some(SolidRef::Unit(unit.id)),
                unit.pos,
            ),
            None => true,
        };

        if passable {
            ctx.events.push(MoveEvent::UnitMoved { unit: unit.id });
        } else {
            unit.pos -= speed_vector;
        }
    }

    if let Some(mover) = unit.mover.as_mut() {
        mover.reversing = speed_vector.dot(mover.flat_front_dir) < 0.0;
        mover.current_speed = speed_vector.dot(mover.flat_front_dir).abs();
        mover.delta_speed = 0.0;
    }
}

/// Clamp the unit back onto the surface it rides: floating units to their
/// waterline, everyone else onto (or above, under gravity) the ground.
pub(crate) fn adjust_pos_to_waterline(ctx: &MoveContext<'_>, unit: &mut Unit) {
    if unit.falling {
        return;
    }
    if unit.mover.as_ref().is_some_and(|m| m.flying) {
        return;
    }

    if ctx.config.allow_ground_unit_gravity {
        let ground = ctx.terrain.height_real(unit.pos.x, unit.pos.z);
        unit.pos.y = if unit.stats.floats_on_water {
            ground.max(-unit.stats.waterline)
        } else {
            ground.max(unit.pos.y)
        };
    } else {
        unit.pos.y = ground_height(ctx, unit, unit.pos);
    }
}
