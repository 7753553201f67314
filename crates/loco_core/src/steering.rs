//! Steering: obstacle avoidance and the reverse-ETA heuristic.
//!
//! Avoidance blends the desired waypoint direction with a repulsion field
//! accumulated from nearby solids, then low-passes against the previous
//! frame so the heading cannot oscillate. It recomputes at most once per
//! frame; within the same frame the cached direction is returned.

use glam::Vec3;

use crate::config::GAME_SPEED;
use crate::math::{dir_sign, flatten, footprint_radius, sq_length_2d, CIRCLE_DIVS, SHORT_MAX};
use crate::mover::MoveContext;
use crate::moves::{crush_resistant, is_non_blocking, SolidView};
use crate::path::NO_PATH;
use crate::unit::{FeatureStorage, PhysState, SolidRef, Unit, UnitId, UnitStorage};

const AVOIDER_DIR_WEIGHT: f32 = 1.0;
const DESIRED_DIR_WEIGHT: f32 = 0.5;
const LAST_DIR_MIX_ALPHA: f32 = 0.7;

/// Decide whether driving backwards reaches the goal sooner than turning
/// around, from full forward and reverse ETA estimates (turn time plus
/// acceleration and braking phases).
pub(crate) fn want_reverse(unit: &Unit, waypoint_dir2d: Vec3) -> bool {
    let stats = &unit.stats;
    let Some(mover) = unit.mover.as_ref() else {
        return false;
    };

    if !stats.can_reverse() {
        return false;
    }
    // zeroed rates would divide below
    if stats.max_speed <= 0.0 {
        return true;
    }
    if stats.acc_rate <= 0.0 || stats.dec_rate <= 0.0 || stats.turn_rate <= 0.0 {
        return false;
    }

    // use the final goal for the ETA, not the next waypoint
    let goal_dif = flatten(mover.goal_pos - unit.pos);
    let goal_dist = goal_dif.length();
    let fwd_dist_eta = goal_dist / stats.max_speed;
    let rev_dist_eta = goal_dist / stats.max_reverse_speed;

    let waypoint_dot = waypoint_dir2d.dot(unit.front).clamp(-1.0, 1.0);
    let turn_angle_deg = waypoint_dot.acos().to_degrees();
    let turn_angle_spr = (turn_angle_deg / 360.0) * CIRCLE_DIVS;
    let rev_angle_spr = SHORT_MAX as f32 - turn_angle_spr;

    // units begin accelerating before the turn completes
    let turn_time_mod = 5.0;
    let turn_angle_time = ((turn_angle_spr / stats.turn_rate) - turn_time_mod).max(0.0);
    let rev_angle_time = ((rev_angle_spr / stats.turn_rate) - turn_time_mod).max(0.0);

    let apx_fwd_spd = (mover.current_speed - 0.125 * (turn_angle_time * stats.dec_rate)).max(0.0);
    let apx_rev_spd = (mover.current_speed - 0.125 * (rev_angle_time * stats.dec_rate)).max(0.0);

    let rev = mover.reversing;
    let dec_time = if rev { apx_fwd_spd } else { 0.0 } / stats.dec_rate;
    let rev_dec_time = if rev { 0.0 } else { apx_rev_spd } / stats.dec_rate;
    let acc_time = (stats.max_speed - if rev { 0.0 } else { apx_fwd_spd }) / stats.acc_rate;
    let rev_acc_time =
        (stats.max_reverse_speed - if rev { apx_rev_spd } else { 0.0 }) / stats.acc_rate;

    let fwd_eta = fwd_dist_eta + turn_angle_time + acc_time + dec_time;
    let rev_eta = rev_dist_eta + rev_angle_time + rev_dec_time + rev_acc_time;

    fwd_eta > rev_eta
}

/// Everything the repulsion loop reads from one obstacle.
struct ObstacleView {
    pos: Vec3,
    speed: Vec3,
    front: Vec3,
    right: Vec3,
    mass: f32,
    radius: f32,
    mobile: bool,
    movable: bool,
    is_moving: bool,
    ally_team: u8,
    crushable: bool,
    crush_resistance: f32,
    solid: SolidView,
}

/// Blend the desired direction with the obstacle repulsion field.
///
/// Returns the modulated steering direction; the zero vector when there is
/// no path. When the desired direction is anti-parallel to the unit's
/// front, the previous direction is returned unchanged (actively avoiding
/// would fight waypoint steering).
pub(crate) fn obstacle_avoidance_dir(
    ctx: &mut MoveContext<'_>,
    units: &mut UnitStorage,
    features: &FeatureStorage,
    id: UnitId,
    desired_dir: Vec3,
) -> Vec3 {
    struct Avoider {
        pos: Vec3,
        speed: Vec3,
        front: Vec3,
        right: Vec3,
        obj_radius: f32,
        footprint: f32,
        current_speed: f32,
        mass: f32,
        goal_pos: Vec3,
        ally_team: u8,
        move_class: usize,
        view: SolidView,
    }

    // ---- cached / early-out phase (mutable)
    let avoider = {
        let Some(unit) = units.get_mut(id) else {
            return Vec3::ZERO;
        };
        let view = SolidView::from(&*unit);
        let (pos, speed, front, right, radius, mass, ally_team, move_class) = (
            unit.pos,
            unit.speed,
            unit.front,
            unit.right,
            unit.radius,
            unit.mass,
            unit.ally_team,
            unit.move_class,
        );
        let Some(mover) = unit.mover.as_mut() else {
            return Vec3::ZERO;
        };

        // only needed while the unit wants to move
        if mover.path_id == NO_PATH {
            return Vec3::ZERO;
        }
        if ctx.frame < mover.next_avoidance_update {
            return mover.last_avoidance_dir;
        }

        mover.last_avoidance_dir = desired_dir;
        mover.next_avoidance_update = ctx.frame + 1;

        // facing anti-parallel to the desired direction: leave steering to
        // the waypoint logic
        if front.dot(desired_dir) < 0.0 {
            return mover.last_avoidance_dir;
        }

        let Some(move_class) = move_class else {
            return mover.last_avoidance_dir;
        };
        let footprint = ctx
            .move_defs
            .get(move_class)
            .map_or(radius, |d| footprint_radius(d.xsize, d.zsize, 1.0));

        Avoider {
            pos,
            speed,
            front,
            right,
            obj_radius: radius,
            footprint,
            current_speed: mover.current_speed,
            mass,
            goal_pos: mover.goal_pos,
            ally_team,
            move_class,
            view,
        }
    };

    let Some(def) = ctx.move_defs.get(avoider.move_class) else {
        return desired_dir;
    };
    let max_avoidee_cosine = (120.0f32).to_radians().cos();

    // ---- repulsion accumulation (read-only over the unit set)
    let avoidance_radius = avoider.current_speed.max(1.0) * (avoider.obj_radius * 2.0);
    let solids = ctx
        .quad
        .solids_exact(units, features, avoider.pos, avoidance_radius);

    let mut avoidance_vec = Vec3::ZERO;

    for solid in solids {
        if solid == SolidRef::Unit(id) {
            continue;
        }

        let o = match solid {
            SolidRef::Unit(uid) => {
                let Some(u) = units.get(uid) else { continue };
                if matches!(u.phys_state, PhysState::Hovering | PhysState::Flying) {
                    continue;
                }
                let mobile = u.move_class.is_some();
                let radius = match u.move_class.and_then(|i| ctx.move_defs.get(i)) {
                    Some(d) => footprint_radius(d.xsize, d.zsize, 1.0),
                    None => footprint_radius(u.xsize, u.zsize, 1.0),
                };
                ObstacleView {
                    pos: u.pos,
                    speed: u.speed,
                    front: u.front,
                    right: u.right,
                    mass: u.mass,
                    radius,
                    mobile,
                    movable: mobile && !u.stats.push_resistant,
                    is_moving: u.is_moving,
                    ally_team: u.ally_team,
                    crushable: u.stats.crushable,
                    crush_resistance: u.stats.crush_resistance,
                    solid: SolidView::from(u),
                }
            }
            SolidRef::Feature(fid) => {
                let Some(f) = features.get(fid) else { continue };
                let front = Vec3::Z;
                ObstacleView {
                    pos: f.pos,
                    speed: f.speed,
                    front,
                    right: front.cross(Vec3::Y),
                    mass: f.mass,
                    radius: footprint_radius(f.xsize, f.zsize, 1.0),
                    mobile: false,
                    movable: false,
                    is_moving: f.is_moving,
                    ally_team: u8::MAX,
                    crushable: f.crushable,
                    crush_resistance: f.crush_resistance,
                    solid: SolidView::from(f),
                }
            }
        };

        if is_non_blocking(def, &o.solid, &avoider.view) {
            continue;
        }
        // obstacles we can simply crush are not steered around
        if !crush_resistant(def, o.crushable, o.crush_resistance) {
            continue;
        }

        // idling mobile allies get pushed aside by collision handling
        if o.mobile && o.movable {
            if !def.avoid_mobiles_on_path || (!o.is_moving && o.ally_team == avoider.ally_team) {
                continue;
            }
        }

        let avoidee_vector = (avoider.pos + avoider.speed) - (o.pos + o.speed);
        let avoidee_dist_sq = avoidee_vector.length_squared();
        let avoidee_dist = avoidee_dist_sq.sqrt() + 0.01;
        let radius_sum = avoider.footprint + o.radius;

        // too far off-center from our front: a tighter cone makes this gate
        // flap between frames as the avoider turns, which stalls
        // turn-in-place units to a crawl
        if avoider.front.dot(-(avoidee_vector / avoidee_dist)) < max_avoidee_cosine {
            continue;
        }
        // beyond what we can reach within a second of driving
        let horizon = avoider.current_speed.max(1.0) * GAME_SPEED + radius_sum;
        if avoidee_dist_sq >= horizon * horizon {
            continue;
        }
        // farther than the goal itself
        if avoidee_dist_sq >= sq_length_2d(avoider.pos - avoider.goal_pos) {
            continue;
        }

        let mut avoider_turn_sign = -dir_sign(
            o.pos.dot(avoider.right) - avoider.pos.dot(avoider.right) > 0.0,
        );
        let avoidee_turn_sign =
            -dir_sign(avoider.pos.dot(o.right) - o.pos.dot(o.right) > 0.0);

        // response peaks when the parties drive head-on into each other
        let avoidance_cos_angle = avoider.front.dot(o.front).clamp(-1.0, 1.0);
        let mobile_scale = if o.mobile { 1.0 } else { 0.0 };
        let avoidance_response = (1.0 - avoidance_cos_angle * mobile_scale) + 0.1;
        let avoidance_falloff = 1.0 - (avoidee_dist / (5.0 * radius_sum)).min(1.0);
        let avoidee_mass_scale = if o.mobile {
            o.mass / (avoider.mass + o.mass)
        } else {
            1.0
        };

        // anti-parallel parties deadlock unless both favor the same
        // rotational direction
        if avoidance_cos_angle < 0.0 {
            avoider_turn_sign = avoider_turn_sign.max(avoidee_turn_sign);
        }

        let avoidance_dir = avoider.right * AVOIDER_DIR_WEIGHT * avoider_turn_sign;
        avoidance_vec +=
            avoidance_dir * avoidance_response * avoidance_falloff * avoidee_mass_scale;
    }

    // ---- blend and low-pass (mutable again)
    let avoidance_dir =
        (desired_dir * DESIRED_DIR_WEIGHT + avoidance_vec).normalize_or_zero();

    let Some(mover) = units.get_mut(id).and_then(|u| u.mover.as_mut()) else {
        return avoidance_dir;
    };
    let mixed =
        mover.last_avoidance_dir * LAST_DIR_MIX_ALPHA + avoidance_dir * (1.0 - LAST_DIR_MIX_ALPHA);
    mover.last_avoidance_dir = mixed;
    mixed
}
