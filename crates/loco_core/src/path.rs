//! Path service and path controller seams.
//!
//! The core is parametric over the path capability set: request, serve
//! next waypoint, incremental update, updated-notification, delete. Two
//! natural implementations exist — an incremental service that serves
//! *temporary* waypoints (y = −1) while still computing, and an eager one
//! whose waypoints are always real (see [`crate::pathing::GridPathService`]
//! and [`LinePathService`]). The temporary-waypoint sentinel is part of the
//! contract: the controller refuses to move while either of its two
//! lookahead waypoints is temporary.

use std::collections::HashMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::math::{dir_sign, flatten};
use crate::moves::{BlockingMap, MoveDef};
use crate::terrain::{TerrainMap, SQUARE_SIZE};
use crate::unit::{Unit, UnitId};

/// Opaque path handle. Zero means "no path".
pub type PathId = u32;

/// The null path handle.
pub const NO_PATH: PathId = 0;

/// Waypoint lookahead step used when pulling waypoints from a service.
pub const WAYPOINT_RADIUS: f32 = 1.25 * SQUARE_SIZE;

/// y-coordinate marking a waypoint the service is still computing.
pub const TEMP_WAYPOINT_Y: f32 = -1.0;

/// Whether a served waypoint is still temporary.
#[must_use]
pub fn is_temp_waypoint(wp: Vec3) -> bool {
    wp.y == TEMP_WAYPOINT_Y
}

/// Whether a served waypoint signals terminal path failure.
#[must_use]
pub fn is_fail_waypoint(wp: Vec3) -> bool {
    wp.x == -1.0 && wp.z == -1.0
}

/// The terminal-failure waypoint.
#[must_use]
pub fn fail_waypoint() -> Vec3 {
    Vec3::new(-1.0, 0.0, -1.0)
}

/// Read-only world view handed to path services. The service is external
/// to the simulation but needs map visibility to plan.
pub struct PathEnv<'a> {
    /// Terrain heights/slopes.
    pub terrain: &'a TerrainMap,
    /// Static blockage registry.
    pub blocking: &'a BlockingMap,
    /// Move-class table.
    pub move_defs: &'a [MoveDef],
}

impl PathEnv<'_> {
    /// The move class of a unit, if it has one.
    #[must_use]
    pub fn move_def_of(&self, unit: &Unit) -> Option<&MoveDef> {
        unit.move_class.and_then(|i| self.move_defs.get(i))
    }
}

/// The path-planning collaborator.
pub trait PathService {
    /// Request a path from `start` to within `radius` of `goal`.
    /// Returns [`NO_PATH`] on refusal.
    fn request_path(
        &mut self,
        env: &PathEnv<'_>,
        unit: &Unit,
        start: Vec3,
        goal: Vec3,
        radius: f32,
    ) -> PathId;

    /// Serve the next waypoint at least `step` beyond `from`. May return a
    /// temporary waypoint (y = −1) while still computing, and the terminal
    /// (−1, ·, −1) sentinel to signal failure.
    fn next_waypoint(
        &mut self,
        env: &PathEnv<'_>,
        unit: &Unit,
        path_id: PathId,
        from: Vec3,
        step: f32,
    ) -> Vec3;

    /// Opportunity to progress incremental work on a path. Called once per
    /// tick per following unit.
    fn update_path(&mut self, _unit: &Unit, _path_id: PathId) {}

    /// Whether the path geometry changed under the follower (same id, new
    /// waypoints) since the last check.
    fn path_updated(&mut self, _path_id: PathId) -> bool {
        false
    }

    /// Release a path handle.
    fn delete_path(&mut self, path_id: PathId);
}

// ============================================================================
// Path controller
// ============================================================================

/// Per-unit policy plug-in that clips speed and heading changes.
pub trait PathController {
    /// Signed speed change toward `target_speed`, limited by `acc_rate`
    /// (speeding up) or `dec_rate` (slowing down).
    fn delta_speed(
        &self,
        path_id: PathId,
        target_speed: f32,
        current_speed: f32,
        acc_rate: f32,
        dec_rate: f32,
        want_reverse: bool,
        reversing: bool,
    ) -> f32;

    /// Heading change toward `wanted`, clipped to the turn-rate budget.
    /// The subtraction wraps through two's-complement, selecting the
    /// shorter turn direction.
    fn delta_heading(&self, path_id: PathId, wanted: i16, current: i16, turn_rate: f32) -> i16;

    /// Record the unit's final goal.
    fn set_real_goal_position(&mut self, path_id: PathId, pos: Vec3);

    /// Record the current steering target (waypoint).
    fn set_temp_goal_position(&mut self, path_id: PathId, pos: Vec3);

    /// Whether the follower may advance to this waypoint now.
    fn allow_set_temp_goal_position(&self, _path_id: PathId, _pos: Vec3) -> bool {
        true
    }

    /// Whether collisions between these two units should be skipped.
    fn ignore_collision(&self, _collider: UnitId, _collidee: UnitId) -> bool {
        false
    }
}

/// Default controller: straight clipping, no overrides.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DefaultPathController {
    real_goal: Vec3,
    temp_goal: Vec3,
}

impl PathController for DefaultPathController {
    fn delta_speed(
        &self,
        _path_id: PathId,
        target_speed: f32,
        current_speed: f32,
        acc_rate: f32,
        dec_rate: f32,
        want_reverse: bool,
        reversing: bool,
    ) -> f32 {
        // work on signed scalar speeds: positive forward, negative reverse
        let raw_diff =
            target_speed * dir_sign(!want_reverse) - current_speed * dir_sign(!reversing);
        let abs_diff = raw_diff.abs();

        if raw_diff < 0.0 {
            -abs_diff.min(dec_rate)
        } else {
            abs_diff.min(acc_rate)
        }
    }

    fn delta_heading(&self, _path_id: PathId, wanted: i16, current: i16, turn_rate: f32) -> i16 {
        let raw = i32::from(wanted.wrapping_sub(current));
        let max = turn_rate.max(0.0) as i32;
        raw.clamp(-max, max) as i16
    }

    fn set_real_goal_position(&mut self, _path_id: PathId, pos: Vec3) {
        self.real_goal = pos;
    }

    fn set_temp_goal_position(&mut self, _path_id: PathId, pos: Vec3) {
        self.temp_goal = pos;
    }
}

// ============================================================================
// Straight-line service
// ============================================================================

/// Idealized eager service: serves evenly spaced waypoints along the
/// straight line to the goal. Always-real waypoints, never fails.
///
/// Useful as the reference implementation for goal-convergence testing and
/// for maps with no obstacles worth planning around.
#[derive(Debug, Clone, Default)]
pub struct LinePathService {
    next_id: PathId,
    goals: HashMap<PathId, Vec3>,
}

/// Spacing of the synthesized waypoints.
const SEGMENT_LENGTH: f32 = 8.0 * SQUARE_SIZE;

impl LinePathService {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: NO_PATH,
            goals: HashMap::new(),
        }
    }
}

impl PathService for LinePathService {
    fn request_path(
        &mut self,
        _env: &PathEnv<'_>,
        _unit: &Unit,
        _start: Vec3,
        goal: Vec3,
        _radius: f32,
    ) -> PathId {
        self.next_id += 1;
        self.goals.insert(self.next_id, flatten(goal));
        self.next_id
    }

    fn next_waypoint(
        &mut self,
        _env: &PathEnv<'_>,
        _unit: &Unit,
        path_id: PathId,
        from: Vec3,
        step: f32,
    ) -> Vec3 {
        let Some(&goal) = self.goals.get(&path_id) else {
            return fail_waypoint();
        };

        let to_goal = flatten(goal - from);
        if to_goal.length() <= SEGMENT_LENGTH + step {
            return goal;
        }
        flatten(from) + to_goal.normalize_or_zero() * SEGMENT_LENGTH
    }

    fn delete_path(&mut self, path_id: PathId) {
        self.goals.remove(&path_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTRL: DefaultPathController = DefaultPathController {
        real_goal: Vec3::ZERO,
        temp_goal: Vec3::ZERO,
    };

    #[test]
    fn test_delta_speed_accelerates_toward_target() {
        let d = CTRL.delta_speed(1, 5.0, 0.0, 0.1, 0.5, false, false);
        assert!((d - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_delta_speed_brakes_with_dec_rate() {
        let d = CTRL.delta_speed(1, 0.0, 5.0, 0.1, 0.5, false, false);
        assert!((d + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_delta_speed_never_overshoots() {
        // close to target: the step is the remaining difference
        let d = CTRL.delta_speed(1, 1.0, 0.95, 0.3, 0.3, false, false);
        assert!((d - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_delta_speed_reverse_target_goes_negative() {
        let d = CTRL.delta_speed(1, 3.0, 0.0, 0.1, 0.2, true, false);
        assert!(d < 0.0);
    }

    #[test]
    fn test_delta_heading_clips_to_turn_rate() {
        let d = CTRL.delta_heading(1, 10000, 0, 400.0);
        assert_eq!(d, 400);
        let d = CTRL.delta_heading(1, -10000, 0, 400.0);
        assert_eq!(d, -400);
    }

    #[test]
    fn test_delta_heading_wraps_through_back() {
        // from +170° to -170°: shorter turn is +20°, not -340°
        let from = (170.0 / 180.0 * 32768.0) as i16;
        let to = (-170.0 / 180.0 * 32768.0) as i16;
        let d = CTRL.delta_heading(1, to, from, 30000.0);
        assert!(d > 0);
        assert!(i32::from(d) < 4000);
    }

    #[test]
    fn test_temp_waypoint_sentinels() {
        assert!(is_temp_waypoint(Vec3::new(10.0, TEMP_WAYPOINT_Y, 20.0)));
        assert!(!is_temp_waypoint(Vec3::new(10.0, 0.0, 20.0)));
        assert!(is_fail_waypoint(fail_waypoint()));
    }
}
