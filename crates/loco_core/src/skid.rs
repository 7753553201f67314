//! Skid physics: ballistic motion after external impulses, over-slope
//! sliding, airborne tumbling, and controlled falls after transport drops.
//!
//! A skidding unit bypasses steering entirely: its own integrator moves
//! it, [`calc_skid_rot`] spins the orientation basis around the skid axis,
//! and a dedicated collision pass damages whatever it hits. Heading
//! updates stay suppressed until the skid winds down.

use glam::Vec3;

use crate::collision;
use crate::config::GAME_SPEED;
use crate::events::MoveEvent;
use crate::kinematics::{self, ground_height};
use crate::math::{flatten, sq_length_2d, MAX_UNIT_SPEED};
use crate::mover::MoveContext;
use crate::path::PathService;
use crate::unit::{FeatureStorage, PhysState, Unit, UnitId, UnitStorage};

/// Reduces damage from collisions between very heavy and very light
/// objects to something playable.
const COLLISION_DAMAGE_MULT: f32 = 0.02;

/// Per-frame speed loss while skidding on flat ground.
const SKID_SPEED_REDUCTION: f32 = 0.35;

fn collision_damage_allowed(ctx: &MoveContext<'_>, unit: &Unit, impact_speed: f32) -> bool {
    ctx.config.allow_unit_collision_damage
        && impact_speed > unit.stats.min_collision_speed
        && unit.stats.min_collision_speed >= 0.0
}

/// Feed an external impulse into the unit. Returns whether it entered
/// skid mode (impulses below the reaction threshold only accumulate).
pub(crate) fn apply_impulse(
    terrain: &crate::terrain::TerrainMap,
    rng: &mut crate::math::SyncedRng,
    units: &mut UnitStorage,
    id: UnitId,
    impulse: Vec3,
) -> bool {
    let Some(unit) = units.get_mut(id) else {
        return false;
    };
    if unit.mover.is_none() || unit.being_built || unit.transporter.is_some() {
        return false;
    }

    unit.residual_impulse += impulse;

    if impulse.length_squared() <= 0.01 {
        return false;
    }
    if unit.residual_impulse.length_squared() <= 9.0 {
        return false;
    }

    let new_speed = unit.speed + unit.residual_impulse;
    let skid_dir = if sq_length_2d(new_speed) >= 0.01 {
        flatten(new_speed).normalize_or_zero()
    } else {
        unit.front
    };

    let normal = terrain.normal(unit.pos.x, unit.pos.z);
    let went_airborne = new_speed.dot(normal) > 0.2;
    let rot_accel = if went_airborne {
        (rng.rand_float() - 0.5) * 0.04
    } else {
        0.0
    };

    unit.speed += impulse;
    let old_phys_state = unit.phys_state;
    unit.phys_state = PhysState::Flying;

    if let Some(mover) = unit.mover.as_mut() {
        // skidding/flying are observed jointly; assign them together
        mover.skidding = true;
        mover.flying = went_airborne;
        mover.use_heading = false;
        mover.skid_rot_speed = 0.0;
        mover.skid_rot_accel = rot_accel;
        mover.skid_rot_vector = skid_dir.cross(Vec3::Y);
        mover.old_phys_state = old_phys_state;
    }

    true
}

/// One tick of skid integration, spin, and skid collision handling.
pub(crate) fn update_skid(
    ctx: &mut MoveContext<'_>,
    units: &mut UnitStorage,
    features: &mut FeatureStorage,
    paths: &mut dyn PathService,
    id: UnitId,
) {
    let mut stopped_skidding = false;

    // ---- velocity integration
    {
        let Some(unit) = units.get_mut(id) else {
            return;
        };
        let pos = unit.pos;
        let stats = unit.stats;
        let mass = unit.mass;
        let gravity = ctx.map.gravity;
        let ground = ground_height(ctx, unit, pos);
        let on_slope = kinematics::on_slope(ctx, unit, -1.0);
        let in_bounds = ctx.terrain.is_in_bounds(pos);
        let terrain_normal = if in_bounds {
            ctx.terrain.normal(pos.x, pos.z)
        } else {
            Vec3::Y
        };

        let mut speed = unit.speed;
        let mut damage = 0.0;

        let Some(mover) = unit.mover.as_mut() else {
            return;
        };

        if mover.flying {
            // water drag
            if pos.y < 0.0 {
                speed *= 0.95;
            }

            let impact_speed = -speed.dot(terrain_normal);
            let impact_damage = impact_speed * mass * COLLISION_DAMAGE_MULT;

            if ground > pos.y {
                // ground impact, stop flying
                mover.flying = false;
                unit.pos.y = ground;

                if ctx.config.allow_unit_collision_damage
                    && impact_speed > stats.min_collision_speed
                    && stats.min_collision_speed >= 0.0
                {
                    damage += impact_damage;
                }

                mover.skid_rot_speed = 0.0;
            } else {
                speed.y += gravity;
            }
        } else {
            let mut speedf = speed.length();

            if speedf < SKID_SPEED_REDUCTION && !on_slope {
                // wind the skid down
                speed = Vec3::ZERO;

                mover.skidding = false;
                mover.use_heading = true;
                unit.phys_state = mover.old_phys_state;

                // snap the spin to an integer rate so the model settles at
                // a stable orientation
                let snapped = (mover.skid_rot_speed + mover.skid_rot_accel + 0.5).floor();
                mover.skid_rot_accel =
                    (snapped - mover.skid_rot_speed) * 0.5 * (std::f32::consts::PI / 180.0);

                stopped_skidding = true;
            } else {
                if on_slope {
                    // slide along the slope tangent, with lateral grip
                    // proportional to how flat the ground still is
                    let normal_force =
                        terrain_normal * terrain_normal.dot(Vec3::Y * gravity);
                    let slope_force = Vec3::Y * gravity - normal_force;

                    speed += slope_force;
                    speedf = speed.length();
                    speed *= 1.0 - (0.1 * terrain_normal.y);
                } else {
                    speed *= 1.0 - (SKID_SPEED_REDUCTION / speedf).min(1.0);
                }

                // frames until the spin should reach a whole rate again
                let rem_time = (speedf / SKID_SPEED_REDUCTION).max(1.0);
                let predicted = (mover.skid_rot_speed
                    + mover.skid_rot_accel * (rem_time - 1.0)
                    + 0.5)
                    .floor();
                mover.skid_rot_accel =
                    ((predicted - mover.skid_rot_speed) / rem_time) * (std::f32::consts::PI / 180.0);

                if mover.skid_rot_speed.floor()
                    != (mover.skid_rot_speed + mover.skid_rot_accel).floor()
                {
                    mover.skid_rot_speed = 0.0;
                    mover.skid_rot_accel = 0.0;
                }
            }

            if (ground - pos.y) < (speed.y + gravity) {
                // dropping off an edge: back to airborne skidding
                speed.y += gravity;
                mover.flying = true;
                mover.skidding = true;
                mover.use_heading = false;
            } else if (ground - pos.y) > speed.y {
                // bounce off the terrain
                let dot = speed.dot(terrain_normal);
                if dot > 0.0 {
                    speed *= 0.95;
                } else {
                    speed += terrain_normal * (dot.abs() + 0.1) * 1.9;
                    speed *= 0.8;
                }
            }
        }

        unit.speed = speed;
        if damage > 0.0 {
            unit.health -= damage;
        }
    }

    if stopped_skidding {
        // re-enable heading control at the current facing
        if let Some(unit) = units.get_mut(id) {
            let heading = unit.heading;
            kinematics::change_heading(ctx, unit, heading);
        }
    }

    // ---- translate, then match the terrain normal; this always runs
    // last so a tick that ends a skid still leaves a ground-matched basis
    // even for upright unit types
    {
        let Some(unit) = units.get_mut(id) else {
            return;
        };
        unit.pos += unit.speed;
        let normal = ctx.terrain.normal(unit.pos.x, unit.pos.z);
        unit.update_dir_vectors(Some(normal));
        if unit.speed != Vec3::ZERO {
            ctx.events.push(MoveEvent::UnitMoved { unit: id });
        }
    }

    let still_skidding = units
        .get(id)
        .and_then(|u| u.mover.as_ref())
        .is_some_and(|m| m.skidding);

    if still_skidding {
        calc_skid_rot(units, id);
        check_collision_skid(ctx, units, features, id);
    } else {
        // the regular resolver still owes this tick its collision pass
        collision::handle_object_collisions(ctx, units, features, paths, id);
    }

    // keep <old_pos> current so the displacement sample cannot explode
    // when the unit transitions back to driving
    if let Some(unit) = units.get_mut(id) {
        let pos = unit.pos;
        if let Some(mover) = unit.mover.as_mut() {
            mover.old_pos = pos;
        }
    }
}

/// Controlled fall after being released by a transport.
pub(crate) fn update_controlled_drop(
    ctx: &mut MoveContext<'_>,
    units: &mut UnitStorage,
    id: UnitId,
) {
    let Some(unit) = units.get_mut(id) else {
        return;
    };
    if !unit.falling {
        return;
    }

    unit.speed.y += ctx.map.gravity * unit.stats.fall_speed;
    unit.speed.y = unit.speed.y.min(0.0);
    unit.pos += unit.speed;

    // water drag
    if unit.pos.y < 0.0 {
        unit.speed *= 0.9;
    }

    let ground = ground_height(ctx, unit, unit.pos);
    if ground > unit.pos.y {
        unit.pos.y = ground;
        unit.falling = false;
        // stop the parachute animation
        ctx.events.push(MoveEvent::Landed { unit: id });
    }
}

/// Collision pass for skidding units: both parties take damage and the
/// impulse exchange is mass-weighted (halved overall, so packed groups do
/// not blow up from the injected energy).
fn check_collision_skid(
    ctx: &mut MoveContext<'_>,
    units: &mut UnitStorage,
    features: &mut FeatureStorage,
    id: UnitId,
) {
    let Some((pos, radius)) = units.get(id).map(|u| (u.pos, u.radius)) else {
        return;
    };

    let near_units = ctx.quad.units_exact(units, pos, radius);
    for collidee_id in near_units {
        if collidee_id == id {
            continue;
        }
        let Some((collider, collidee)) = units.pair_mut(id, collidee_id) else {
            continue;
        };

        let sq_dist = (collider.pos - collidee.pos).length_squared();
        let tot_rad = collider.radius + collidee.radius;
        if sq_dist >= tot_rad * tot_rad || sq_dist <= 0.01 {
            continue;
        }

        let dif = (collider.pos - collidee.pos).normalize_or_zero();

        if collidee.move_class.is_none() {
            // static collidee: the skidder alone absorbs the rebound
            let impact_speed = -collider.speed.dot(dif);
            let impact_damage =
                (impact_speed * collider.mass * COLLISION_DAMAGE_MULT).min(MAX_UNIT_SPEED);

            if impact_speed <= 0.0 {
                continue;
            }

            collider.pos += dif * impact_speed;
            collider.speed += dif * impact_speed * 1.8;

            if collision_damage_allowed(ctx, collider, impact_speed) {
                collider.health -= impact_damage;
            }
            if collision_damage_allowed(ctx, collidee, impact_speed) {
                collidee.health -= impact_damage;
            }
        } else {
            let impact_speed = (collidee.speed - collider.speed).dot(dif) * 0.5;
            let collider_rel_mass = collider.mass / (collider.mass + collidee.mass);
            let collider_rel_impact = impact_speed * (1.0 - collider_rel_mass);
            let collidee_rel_impact = impact_speed * collider_rel_mass;

            if impact_speed <= 0.0 {
                continue;
            }

            let collider_damage =
                (collider_rel_impact * collider.mass * COLLISION_DAMAGE_MULT).min(MAX_UNIT_SPEED);
            let collidee_damage =
                (collidee_rel_impact * collider.mass * COLLISION_DAMAGE_MULT).min(MAX_UNIT_SPEED);

            collider.pos += dif * collider_rel_impact;
            collidee.pos -= dif * collidee_rel_impact;

            if collision_damage_allowed(ctx, collider, impact_speed) {
                collider.health -= collider_damage;
            }
            if collision_damage_allowed(ctx, collidee, impact_speed) {
                collidee.health -= collidee_damage;
            }

            collider.speed += dif * collider_rel_impact;
            collidee.speed -= dif * collidee_rel_impact;
        }
    }

    let near_features = ctx.quad.features_exact(features, pos, radius);
    for fid in near_features {
        let Some(collider) = units.get_mut(id) else {
            return;
        };
        let Some(feature) = features.get_mut(fid) else {
            continue;
        };
        if !feature.blocking {
            continue;
        }

        let sq_dist = (collider.pos - feature.pos).length_squared();
        let tot_rad = collider.radius + feature.radius;
        if sq_dist >= tot_rad * tot_rad || sq_dist <= 0.01 {
            continue;
        }

        let dif = (collider.pos - feature.pos).normalize_or_zero();
        let impact_speed = -collider.speed.dot(dif);
        let impact_damage =
            (impact_speed * collider.mass * COLLISION_DAMAGE_MULT).min(MAX_UNIT_SPEED);
        let impact_impulse = dif * impact_speed;

        if impact_speed <= 0.0 {
            continue;
        }

        collider.pos += impact_impulse;
        collider.speed += impact_impulse * 1.8;

        if collision_damage_allowed(ctx, collider, impact_speed) {
            collider.health -= impact_damage;
        }

        // the feature takes damage scaled by the collider's mass and
        // receives the mirrored impulse
        feature.health -= impact_damage;
        feature.speed -= impact_impulse;
        if feature.health <= 0.0 {
            ctx.events.push(MoveEvent::FeatureCrushed {
                victim: fid,
                crusher: id,
            });
        }
    }
}

/// Spin the orientation basis around the skid axis by this frame's angle.
///
/// Each basis vector is split into its axis-parallel and perpendicular
/// components and only the perpendicular part rotates.
fn calc_skid_rot(units: &mut UnitStorage, id: UnitId) {
    let Some(unit) = units.get_mut(id) else {
        return;
    };
    let Some(mover) = unit.mover.as_mut() else {
        return;
    };

    mover.skid_rot_speed += mover.skid_rot_accel;
    mover.skid_rot_speed *= 0.999;
    mover.skid_rot_accel *= 0.95;

    let angle = (mover.skid_rot_speed / GAME_SPEED) * std::f32::consts::TAU;
    let cosp = angle.cos();
    let sinp = angle.sin();
    let axis = mover.skid_rot_vector;

    let rotate = |v: Vec3| {
        let parallel = axis * axis.dot(v);
        let perpendicular = v - parallel;
        parallel + perpendicular * cosp + perpendicular.cross(axis) * sinp
    };

    unit.front = rotate(unit.front);
    unit.right = rotate(unit.right);
    unit.up = rotate(unit.up);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rodrigues_preserves_axis_component() {
        // rotating the axis itself is a no-op
        let axis = Vec3::X;
        let v = Vec3::X;
        let parallel = axis * axis.dot(v);
        let perpendicular = v - parallel;
        let rotated = parallel + perpendicular * 0.5 + perpendicular.cross(axis) * 0.86;
        assert!((rotated - v).length() < 1e-6);
    }
}
