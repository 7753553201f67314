//! Collision resolution: unit↔unit, unit↔feature, and unit↔static.
//!
//! Runs after integration, every tick, for each moving collider. Overlaps
//! are resolved with planar position nudges and momentum-weighted pushes;
//! structures and push-resistant pairs degrade to static handling, and a
//! heavy-enough collider simply crushes what it rolls over. A static
//! collision that actually displaced the collider triggers a repath.

use glam::Vec3;

use crate::events::MoveEvent;
use crate::math::{dir_sign, flatten, footprint_radius, sq_length_2d};
use crate::mover::{self, MoveContext, ProgressState};
use crate::moves::{
    crush_resistant, is_non_blocking, square_center, test_move_square, MoveDef, SolidView,
    BLOCK_STRUCTURE,
};
use crate::path::{PathController, PathService};
use crate::terrain::SQUARE_SIZE;
use crate::unit::{FeatureStorage, SolidRef, Unit, UnitId, UnitStorage};

/// Run all three collision phases for one collider, then issue at most one
/// repath if a static collision displaced it.
pub(crate) fn handle_object_collisions(
    ctx: &mut MoveContext<'_>,
    units: &mut UnitStorage,
    features: &mut FeatureStorage,
    paths: &mut dyn PathService,
    id: UnitId,
) {
    let Some((collider_speed, collider_radius)) = units.get(id).and_then(|u| {
        if u.mover.is_none() {
            return None;
        }
        // the mobile collider always uses its move-class footprint; 0.75
        // gives the circle maximally bounded by it, not minimally bounding
        let def = ctx.move_def(u.move_class)?;
        Some((
            u.speed.length(),
            footprint_radius(def.xsize, def.zsize, 0.75),
        ))
    }) else {
        return;
    };

    let mut want_repath = false;
    want_repath |= handle_unit_collisions(ctx, units, id, collider_speed, collider_radius);
    want_repath |= handle_feature_collisions(ctx, units, features, id, collider_speed, collider_radius);

    // the collider's own footprint against impassable terrain
    if let Some(unit) = units.get_mut(id) {
        if let Some(def) = ctx.move_def(unit.move_class).cloned() {
            let own_footprint = StaticCollidee {
                pos: unit.pos,
                xsize: unit.xsize,
                zsize: unit.zsize,
                radius: 0.0,
            };
            want_repath |= handle_static_collision(
                ctx,
                unit,
                &def,
                collider_radius,
                own_footprint,
                Vec3::ZERO,
                false,
                true,
            );
        }
    }

    if want_repath {
        let Some((goal, radius, leading_move)) = units.get(id).and_then(|u| {
            let m = u.mover.as_ref()?;
            Some((m.goal_pos, m.goal_radius, u.commands.leading_is_move()))
        }) else {
            return;
        };
        // an initial speed of zero stops us ramming straight back into the
        // obstacle, but only move orders get their speed restored later
        let initial_speed = if leading_move { Some(0.0) } else { None };
        mover::start_moving(ctx, units, paths, id, goal, radius, initial_speed);
    }
}

// ============================================================================
// Unit vs unit
// ============================================================================

fn handle_unit_collisions(
    ctx: &mut MoveContext<'_>,
    units: &mut UnitStorage,
    id: UnitId,
    collider_speed: f32,
    collider_radius: f32,
) -> bool {
    let Some(pos) = units.get(id).map(|u| u.pos) else {
        return false;
    };
    let search_radius = collider_speed.max(1.0) * collider_radius;
    let near_units = ctx.quad.units_exact(units, pos, search_radius);

    let mut want_repath = false;

    for collidee_id in near_units {
        if collidee_id == id {
            continue;
        }
        let Some((collider, collidee)) = units.pair_mut(id, collidee_id) else {
            continue;
        };
        let Some(collider_def) = ctx.move_def(collider.move_class).cloned() else {
            return want_repath;
        };

        let collidee_mobile = collidee.move_class.is_some();
        let collidee_def = ctx.move_def(collidee.move_class).cloned();
        let collidee_speed = collidee.speed.length();
        let collidee_radius = match &collidee_def {
            Some(def) => footprint_radius(def.xsize, def.zsize, 0.75),
            None => footprint_radius(collidee.xsize, collidee.zsize, 0.75),
        };

        let separation_vector = collider.pos - collidee.pos;
        let radius_sum = collider_radius + collidee_radius;
        if separation_vector.length_squared() - radius_sum * radius_sum > 0.01 {
            continue;
        }

        if collidee
            .mover
            .as_ref()
            .is_some_and(|m| m.skidding || m.flying)
        {
            continue;
        }
        // transport traffic never collides with its own cargo
        if collider.transporter == Some(collidee_id) {
            continue;
        }
        if collidee.transporter.is_some() {
            continue;
        }
        if collider.loading_transport == Some(collidee_id) {
            continue;
        }
        if collidee.loading_transport == Some(id) {
            continue;
        }

        let allied_collision = collider.ally_team == collidee.ally_team;
        let collidee_yields = collider.is_moving && !collidee.is_moving;
        let ignore_collidee = collidee_yields && allied_collision;

        let mut push_collider = true;
        let mut push_collidee = collidee_mobile;
        push_collider &= allied_collision
            || ctx.config.allow_pushing_enemy_units
            || !collider.stats.block_enemy_pushing;
        push_collidee &= allied_collision
            || ctx.config.allow_pushing_enemy_units
            || !collidee.stats.block_enemy_pushing;
        push_collider &= !collider.being_built && !collider.stats.push_resistant;
        push_collidee &= !collidee.being_built && !collidee.stats.push_resistant;

        let mut crush_collidee = !allied_collision || ctx.config.allow_crushing_allied_units;
        crush_collidee &= (collider_speed * collider.mass) > (collidee_speed * collidee.mass);

        let collider_view = SolidView::from(&*collider);
        let collidee_view = SolidView::from(&*collidee);
        if is_non_blocking(&collider_def, &collidee_view, &collider_view) {
            continue;
        }
        if let Some(def) = &collidee_def {
            if is_non_blocking(def, &collider_view, &collidee_view) {
                continue;
            }
        }

        let reversing = collider.mover.as_ref().is_some_and(|m| m.reversing);
        if crush_collidee
            && !crush_resistant(
                &collider_def,
                collidee.stats.crushable,
                collidee.stats.crush_resistance,
            )
        {
            let crush_impulse = collider.speed * collider.mass * dir_sign(!reversing);
            collidee.health = 0.0;
            ctx.events.push(MoveEvent::UnitCrushed {
                victim: collidee_id,
                crusher: id,
                impulse: crush_impulse,
            });
        }

        if collider
            .mover
            .as_ref()
            .is_some_and(|m| m.controller.ignore_collision(id, collidee_id))
        {
            continue;
        }

        ctx.events.push(MoveEvent::UnitUnitCollision {
            collider: id,
            collidee: collidee_id,
        });

        if !collidee_mobile || (!push_collider && !push_collidee) {
            // structure, or a semi-static push-resistant pair: make each
            // party respond to the other as a static obstacle
            let can_request = collider
                .mover
                .as_ref()
                .is_some_and(|m| ctx.frame > m.path_request_delay);
            let displaced = handle_static_collision(
                ctx,
                collider,
                &collider_def,
                collider_radius,
                StaticCollidee {
                    pos: collidee.pos,
                    xsize: collidee.xsize,
                    zsize: collidee.zsize,
                    radius: collidee_radius,
                },
                separation_vector,
                collidee.is_factory,
                false,
            );
            want_repath |= displaced && can_request;
            continue;
        }

        // if the collidee shares our goal and already finished there, an
        // endless pushing contest would follow; declare arrival instead
        if let (Some(cm), Some(dm)) = (collider.mover.as_mut(), collidee.mover.as_ref()) {
            if sq_length_2d(cm.goal_pos - dm.goal_pos) < 2.0
                && collider.is_moving
                && cm.progress_state == ProgressState::Active
                && !collidee.is_moving
                && dm.progress_state == ProgressState::Done
                && collidee.commands.is_empty()
            {
                cm.at_end_of_path = true;
                cm.at_goal = true;
            }
        }

        let collider_rel_radius = collider_radius / radius_sum;
        let collidee_rel_radius = collidee_radius / radius_sum;
        let collision_radius_sum = if ctx.config.allow_unit_collision_overlap {
            collider_radius * collider_rel_radius + collidee_radius * collidee_rel_radius
        } else {
            radius_sum
        };

        let sep_distance = separation_vector.length() + 0.1;
        let pen_distance = (collision_radius_sum - sep_distance).max(1.0);
        let sep_response = (SQUARE_SIZE * 2.0).min(pen_distance * 0.5);

        let sep_direction = separation_vector / sep_distance;
        let col_response_vec = flatten(sep_direction) * sep_response;

        // momentum-like scores; head-on geometry is weighted up so the
        // party driving into the other yields more ground
        let m1 = collider.mass;
        let m2 = collidee.mass;
        let v1 = collider_speed.max(1.0);
        let v2 = collidee_speed.max(1.0);
        let c1 = 1.0 + (1.0 - collider.front.dot(-sep_direction).abs()) * 5.0;
        let c2 = 1.0 + (1.0 - collidee.front.dot(sep_direction).abs()) * 5.0;
        let s1 = m1 * v1 * c1;
        let s2 = m2 * v2 * c2;
        let r1 = s1 / (s1 + s2 + 1.0);
        let r2 = s2 / (s1 + s2 + 1.0);

        let overlap_scale = |rel: f32| {
            if ctx.config.allow_unit_collision_overlap {
                1.0 / rel
            } else {
                1.0
            }
        };
        let collider_mass_scale = (1.0 - r1).clamp(0.01, 0.99) * overlap_scale(collider_rel_radius);
        let collidee_mass_scale = (1.0 - r2).clamp(0.01, 0.99) * overlap_scale(collidee_rel_radius);

        let collider_slide_sign = dir_sign(separation_vector.dot(collider.right) >= 0.0);
        let collidee_slide_sign = dir_sign(-separation_vector.dot(collidee.right) >= 0.0);

        let ignore_scale = if ignore_collidee { 0.0 } else { 1.0 };
        let collider_push_vec = col_response_vec * collider_mass_scale * ignore_scale;
        let collidee_push_vec = -col_response_vec * collidee_mass_scale;
        let collider_slide_vec =
            collider.right * collider_slide_sign * (1.0 / pen_distance) * r2;
        let collidee_slide_vec =
            collidee.right * collidee_slide_sign * (1.0 / pen_distance) * r1;

        // never push a party onto a non-traversable square, but also never
        // reset a position outright (that would undo legitimate pushes
        // applied earlier this frame)
        if push_collider || !push_collidee {
            let exclude = Some(SolidRef::Unit(id));
            if test_move_square(
                &collider_def,
                ctx.terrain,
                ctx.blocking,
                exclude,
                collider.pos + collider_push_vec,
            ) {
                collider.pos += collider_push_vec;
            }
            if test_move_square(
                &collider_def,
                ctx.terrain,
                ctx.blocking,
                exclude,
                collider.pos + collider_slide_vec,
            ) {
                collider.pos += collider_slide_vec;
            }
        }

        if (push_collidee || !push_collider) && collidee_mobile {
            if let Some(def) = &collidee_def {
                let exclude = Some(SolidRef::Unit(collidee_id));
                if test_move_square(
                    def,
                    ctx.terrain,
                    ctx.blocking,
                    exclude,
                    collidee.pos + collidee_push_vec,
                ) {
                    collidee.pos += collidee_push_vec;
                }
                if test_move_square(
                    def,
                    ctx.terrain,
                    ctx.blocking,
                    exclude,
                    collidee.pos + collidee_slide_vec,
                ) {
                    collidee.pos += collidee_slide_vec;
                }
            }
        }
    }

    want_repath
}

// ============================================================================
// Unit vs feature
// ============================================================================

fn handle_feature_collisions(
    ctx: &mut MoveContext<'_>,
    units: &mut UnitStorage,
    features: &mut FeatureStorage,
    id: UnitId,
    collider_speed: f32,
    collider_radius: f32,
) -> bool {
    let Some(pos) = units.get(id).map(|u| u.pos) else {
        return false;
    };
    let search_radius = collider_speed.max(1.0) * collider_radius;
    let near_features = ctx.quad.features_exact(features, pos, search_radius);

    let mut want_repath = false;

    for fid in near_features {
        let Some(collider) = units.get_mut(id) else {
            return want_repath;
        };
        let Some(feature) = features.get_mut(fid) else {
            continue;
        };
        let Some(collider_def) = ctx.move_def(collider.move_class).cloned() else {
            return want_repath;
        };

        let collidee_radius = footprint_radius(feature.xsize, feature.zsize, 0.75);
        let radius_sum = collider_radius + collidee_radius;

        let separation_vector = collider.pos - feature.pos;
        if separation_vector.length_squared() - radius_sum * radius_sum > 0.01 {
            continue;
        }

        let collider_view = SolidView::from(&*collider);
        let collidee_view = SolidView::from(&*feature);
        if is_non_blocking(&collider_def, &collidee_view, &collider_view) {
            continue;
        }

        if !crush_resistant(&collider_def, feature.crushable, feature.crush_resistance) {
            feature.health = 0.0;
            ctx.events.push(MoveEvent::FeatureCrushed {
                victim: fid,
                crusher: id,
            });
        }

        ctx.events.push(MoveEvent::UnitFeatureCollision {
            collider: id,
            collidee: fid,
        });

        if feature.is_moving {
            let can_request = collider
                .mover
                .as_ref()
                .is_some_and(|m| ctx.frame > m.path_request_delay);
            let displaced = handle_static_collision(
                ctx,
                collider,
                &collider_def,
                collider_radius,
                StaticCollidee {
                    pos: feature.pos,
                    xsize: feature.xsize,
                    zsize: feature.zsize,
                    radius: collidee_radius,
                },
                separation_vector,
                false,
                false,
            );
            want_repath |= displaced && can_request;
            continue;
        }

        let sep_distance = separation_vector.length() + 0.1;
        let pen_distance = (radius_sum - sep_distance).max(1.0);
        let sep_response = (SQUARE_SIZE * 2.0).min(pen_distance * 0.5);

        let sep_direction = separation_vector / sep_distance;
        let col_response_vec = flatten(sep_direction) * sep_response;

        // the feature's effective mass is scaled way up so heavy wrecks do
        // not bounce light units around like pinballs
        let m1 = collider.mass;
        let m2 = feature.mass * 10000.0;
        let v1 = collider_speed.max(1.0);
        let v2 = 1.0;
        let c1 = (1.0 - collider.front.dot(-sep_direction).abs()) * 5.0;
        let c2 = (1.0 - (-collider.front).dot(sep_direction).abs()) * 5.0;
        let s1 = m1 * v1 * c1;
        let s2 = m2 * v2 * c2;
        let r1 = s1 / (s1 + s2 + 1.0);
        let r2 = s2 / (s1 + s2 + 1.0);

        let collider_mass_scale = (1.0 - r1).clamp(0.01, 0.99);
        let collidee_mass_scale = (1.0 - r2).clamp(0.01, 0.99);

        // keep the spatial index consistent across the feature's move
        let old_pos = feature.pos;
        ctx.quad.remove_feature(fid, old_pos);
        if feature.blocking {
            ctx.blocking
                .unblock(SolidRef::Feature(fid), old_pos, feature.xsize, feature.zsize);
        }

        collider.pos += col_response_vec * collider_mass_scale;
        feature.pos += -col_response_vec * collidee_mass_scale;

        ctx.quad.add_feature(fid, feature.pos);
        if feature.blocking {
            ctx.blocking.block(
                SolidRef::Feature(fid),
                feature.pos,
                feature.xsize,
                feature.zsize,
            );
        }
    }

    want_repath
}

// ============================================================================
// Unit vs static
// ============================================================================

/// The slice of a static collidee the handler needs.
pub(crate) struct StaticCollidee {
    pub pos: Vec3,
    pub xsize: i32,
    pub zsize: i32,
    pub radius: f32,
}

/// Resolve a collision against a structure, a yardmap, or (with
/// `check_terrain`) the impassable squares under the collider itself.
/// Returns whether the collider was displaced and should replan.
pub(crate) fn handle_static_collision(
    ctx: &mut MoveContext<'_>,
    collider: &mut Unit,
    collider_def: &MoveDef,
    collider_radius: f32,
    collidee: StaticCollidee,
    separation_vector: Vec3,
    check_yardmap: bool,
    check_terrain: bool,
) -> bool {
    let current_speed = collider.mover.as_ref().map_or(0.0, |m| m.current_speed);

    if check_terrain {
        let in_air =
            collider.pos.y - ctx.terrain.height_real(collider.pos.x, collider.pos.z) > 1.0;
        if !collider.is_moving || in_air {
            return false;
        }
    }

    // extend the footprint by our own half-size so the inside test agrees
    // with what the pathfinder considers blocked; units then also may move
    // through idle open factories
    let xext = (collidee.xsize >> 1) + collider_def.xsizeh().max(1);
    let zext = (collidee.zsize >> 1) + collider_def.zsizeh().max(1);

    // moving away from the collidee means we are likely exiting its yard
    let exiting_yardmap = collider.front.dot(separation_vector) > 0.0
        && collider.speed.dot(separation_vector) > 0.0;
    let inside_yardmap = collider.pos.x >= collidee.pos.x - xext as f32 * SQUARE_SIZE
        && collider.pos.x <= collidee.pos.x + xext as f32 * SQUARE_SIZE
        && collider.pos.z >= collidee.pos.z - zext as f32 * SQUARE_SIZE
        && collider.pos.z <= collidee.pos.z + zext as f32 * SQUARE_SIZE;

    let exclude = Some(SolidRef::Unit(collider.id));

    if (check_yardmap && inside_yardmap) || check_terrain {
        // interpret every blocked square under the footprint as a small
        // collidee and sum up the separation responses
        let xmid = ((collider.pos.x + collider.speed.x) / SQUARE_SIZE) as i32;
        let zmid = ((collider.pos.z + collider.speed.z) / SQUARE_SIZE) as i32;

        let xmin = (-1).min(-collider_def.xsizeh());
        let xmax = 1.max(collider_def.xsizeh());
        let zmin = (-1).min(-collider_def.zsizeh());
        let zmax = 1.max(collider_def.zsizeh());

        let mut bounce_vec = Vec3::ZERO;
        let mut sq_center_sum = Vec3::ZERO;
        let mut sq_pen_distance_sum = 0.0;
        let mut sq_pen_distance_ctr = 0.0;

        for z in zmin..=zmax {
            for x in xmin..=xmax {
                let xabs = xmid + x;
                let zabs = zmid + z;

                if check_terrain {
                    if crate::moves::square_speed_mod(collider_def, ctx.terrain, xabs, zabs) > 0.01
                    {
                        continue;
                    }
                } else if ctx.blocking.square_blocked(xabs, zabs, exclude) & BLOCK_STRUCTURE == 0 {
                    continue;
                }

                let square_pos = square_center(xabs, zabs);
                let square_vec = flatten(collider.pos) - square_pos;

                // only squares ahead of our velocity matter
                if square_vec.dot(flatten(collider.speed)) > 0.0 {
                    continue;
                }

                // treat the square as a collidee with the radius of its
                // own bounding circle
                let sq_radius_sum =
                    collider_radius + SQUARE_SIZE * std::f32::consts::FRAC_1_SQRT_2;
                let sq_sep_distance = square_vec.length() + 0.1;
                let sq_pen_distance = (sq_sep_distance - sq_radius_sum).min(0.0);

                bounce_vec += square_vec / sq_sep_distance;
                sq_pen_distance_sum += sq_pen_distance;
                sq_pen_distance_ctr += 1.0;
                sq_center_sum += square_pos;
            }
        }

        if sq_pen_distance_ctr > 0.0 {
            let sq_center = sq_center_sum / sq_pen_distance_ctr;
            let mean_pen = sq_pen_distance_sum / sq_pen_distance_ctr;

            let strafe_sign = dir_sign(
                sq_center.dot(collider.right) - collider.pos.dot(collider.right) < 0.0,
            );
            let strafe_scale = current_speed.min((-mean_pen * 0.5).max(0.0));
            let bounce_scale = (-mean_pen).max(0.0);

            let strafe_dir = flatten(collider.right * strafe_sign).normalize_or_zero();
            let bounce_dir = flatten(bounce_vec).normalize_or_zero();

            if test_move_square(
                collider_def,
                ctx.terrain,
                ctx.blocking,
                exclude,
                collider.pos + strafe_dir * strafe_scale,
            ) {
                collider.pos += strafe_dir * strafe_scale;
            }
            if test_move_square(
                collider_def,
                ctx.terrain,
                ctx.blocking,
                exclude,
                collider.pos + bounce_dir * bounce_scale,
            ) {
                collider.pos += bounce_dir * bounce_scale;
            }

            return strafe_dir + bounce_dir != Vec3::ZERO;
        }

        false
    } else {
        let radius_sum = collider_radius + collidee.radius;
        let sep_distance = separation_vector.length() + 0.1;
        let pen_distance = (sep_distance - radius_sum).min(0.0);
        let slide_sign = dir_sign(
            collidee.pos.dot(collider.right) - collider.pos.dot(collider.right) <= 0.0,
        );

        // insideYardMap flips off slightly before the overlap ends when
        // leaving a lab; suppress the parting shove
        let exit_strafe = if exiting_yardmap { 0.0 } else { 1.0 };
        let exit_bounce = if check_yardmap && exiting_yardmap {
            0.0
        } else {
            1.0
        };

        let strafe_scale = current_speed.min((-pen_distance * 0.5).max(0.0)) * exit_strafe;
        let bounce_scale = (-pen_distance).max(0.0) * exit_bounce;

        collider.pos += collider.right * slide_sign * strafe_scale;
        collider.pos += (separation_vector / sep_distance) * bounce_scale;

        pen_distance < 0.0
    }
}
