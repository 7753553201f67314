//! Grid-based path planning using the A* algorithm.
//!
//! [`GridPathService`] is the eager [`PathService`] implementation: paths
//! are planned in full at request time over the terrain grid, so served
//! waypoints are always real (never the y = −1 sentinel). Passability is
//! judged by the same move-semantics predicates the controller uses, which
//! keeps planner and collision detection from disagreeing.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use glam::Vec3;

use crate::moves::{square_center, square_of, square_speed_mod, MoveDef, BLOCK_STRUCTURE};
use crate::path::{fail_waypoint, PathEnv, PathId, PathService, NO_PATH};
use crate::terrain::SQUARE_SIZE;
use crate::unit::{SolidRef, Unit};

/// Upper bound on A* node expansions per request.
const MAX_EXPANSIONS: usize = 1 << 16;

/// A node in the A* open set.
#[derive(Debug, Clone, Copy)]
struct AStarNode {
    x: i32,
    z: i32,
    f_score: f32,
    /// Deterministic tie-breaker: lower coordinates win when f-scores are
    /// equal, so equal-cost paths resolve identically on every host.
    tie_breaker: u64,
}

impl PartialEq for AStarNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AStarNode {}

impl Ord for AStarNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse for min-heap behavior
        match other.f_score.total_cmp(&self.f_score) {
            Ordering::Equal => other.tie_breaker.cmp(&self.tie_breaker),
            ord => ord,
        }
    }
}

impl PartialOrd for AStarNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Direction offsets for 8-directional movement.
const DIRECTIONS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

#[inline]
fn tie_breaker(x: i32, z: i32) -> u64 {
    ((z as u32 as u64) << 32) | (x as u32 as u64)
}

#[inline]
fn chebyshev(x1: i32, z1: i32, x2: i32, z2: i32) -> f32 {
    (x1.abs_diff(x2).max(z1.abs_diff(z2))) as f32 * SQUARE_SIZE
}

struct GridPath {
    waypoints: Vec<Vec3>,
    cursor: usize,
    updated: bool,
}

/// Eager A* path service over the terrain + blocking grid.
#[derive(Default)]
pub struct GridPathService {
    next_id: PathId,
    paths: HashMap<PathId, GridPath>,
}

impl GridPathService {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: NO_PATH,
            paths: HashMap::new(),
        }
    }

    /// Flag a path as updated-in-place; the follower refetches both of its
    /// lookahead waypoints on the next tick without deleting the path.
    /// Exposed for terrain-deformation handling and tests.
    pub fn mark_updated(&mut self, path_id: PathId) {
        if let Some(path) = self.paths.get_mut(&path_id) {
            path.updated = true;
            path.cursor = 0;
        }
    }

    fn passable(env: &PathEnv<'_>, def: &MoveDef, exclude: Option<SolidRef>, x: i32, z: i32) -> bool {
        if x < 0 || z < 0 || x >= env.terrain.xsquares() || z >= env.terrain.zsquares() {
            return false;
        }
        if env.blocking.square_blocked(x, z, exclude) & BLOCK_STRUCTURE != 0 {
            return false;
        }
        square_speed_mod(def, env.terrain, x, z) > 0.01
    }

    /// Pick the goal square: the requested one if passable, otherwise the
    /// nearest passable square within the goal radius.
    fn resolve_goal(
        env: &PathEnv<'_>,
        def: &MoveDef,
        exclude: Option<SolidRef>,
        goal: Vec3,
        radius: f32,
    ) -> Option<(i32, i32)> {
        let (gx, gz) = square_of(goal);
        if Self::passable(env, def, exclude, gx, gz) {
            return Some((gx, gz));
        }

        let rings = (radius / SQUARE_SIZE).ceil() as i32;
        let mut best: Option<(i32, (i32, i32))> = None;
        for dz in -rings..=rings {
            for dx in -rings..=rings {
                let d = dx * dx + dz * dz;
                if d > rings * rings {
                    continue;
                }
                if !Self::passable(env, def, exclude, gx + dx, gz + dz) {
                    continue;
                }
                let candidate = (d, (gx + dx, gz + dz));
                match best {
                    None => best = Some(candidate),
                    Some((bd, bsq)) if (d, (gz + dz, gx + dx)) < (bd, (bsq.1, bsq.0)) => {
                        best = Some(candidate);
                    }
                    _ => {}
                }
            }
        }
        best.map(|(_, sq)| sq)
    }

    fn find_path(
        env: &PathEnv<'_>,
        def: &MoveDef,
        exclude: Option<SolidRef>,
        start: (i32, i32),
        goal: (i32, i32),
    ) -> Option<Vec<(i32, i32)>> {
        let mut open: BinaryHeap<AStarNode> = BinaryHeap::new();
        let mut came_from: HashMap<(i32, i32), (i32, i32)> = HashMap::new();
        let mut g_score: HashMap<(i32, i32), f32> = HashMap::new();

        g_score.insert(start, 0.0);
        open.push(AStarNode {
            x: start.0,
            z: start.1,
            f_score: chebyshev(start.0, start.1, goal.0, goal.1),
            tie_breaker: tie_breaker(start.0, start.1),
        });

        let mut expansions = 0;

        while let Some(current) = open.pop() {
            if (current.x, current.z) == goal {
                return Some(Self::reconstruct(&came_from, goal));
            }

            expansions += 1;
            if expansions > MAX_EXPANSIONS {
                return None;
            }

            let current_g = g_score
                .get(&(current.x, current.z))
                .copied()
                .unwrap_or(f32::MAX);

            for &(dx, dz) in &DIRECTIONS {
                let nx = current.x + dx;
                let nz = current.z + dz;

                // the start square is traversable by definition (the unit
                // is standing on it), every other square must pass
                if !Self::passable(env, def, exclude, nx, nz) {
                    continue;
                }

                // no cutting corners through blocked cells on diagonals
                if dx != 0 && dz != 0 {
                    let adj1 = Self::passable(env, def, exclude, nx, current.z);
                    let adj2 = Self::passable(env, def, exclude, current.x, nz);
                    if !adj1 || !adj2 {
                        continue;
                    }
                }

                let speed_mod = square_speed_mod(def, env.terrain, nx, nz).max(0.01);
                let step = if dx != 0 && dz != 0 {
                    SQUARE_SIZE * std::f32::consts::SQRT_2
                } else {
                    SQUARE_SIZE
                };
                let tentative_g = current_g + step / speed_mod;

                let neighbor_g = g_score.get(&(nx, nz)).copied().unwrap_or(f32::MAX);
                if tentative_g < neighbor_g {
                    came_from.insert((nx, nz), (current.x, current.z));
                    g_score.insert((nx, nz), tentative_g);
                    open.push(AStarNode {
                        x: nx,
                        z: nz,
                        f_score: tentative_g + chebyshev(nx, nz, goal.0, goal.1),
                        tie_breaker: tie_breaker(nx, nz),
                    });
                }
            }
        }

        None
    }

    fn reconstruct(
        came_from: &HashMap<(i32, i32), (i32, i32)>,
        goal: (i32, i32),
    ) -> Vec<(i32, i32)> {
        let mut path = vec![goal];
        let mut current = goal;
        while let Some(&prev) = came_from.get(&current) {
            path.push(prev);
            current = prev;
        }
        path.reverse();
        path
    }

    /// Drop intermediate squares that a straight line can skip without
    /// crossing impassable cells.
    fn smooth(
        env: &PathEnv<'_>,
        def: &MoveDef,
        exclude: Option<SolidRef>,
        path: Vec<(i32, i32)>,
    ) -> Vec<(i32, i32)> {
        if path.len() <= 2 {
            return path;
        }

        let mut smoothed = Vec::with_capacity(path.len());
        smoothed.push(path[0]);
        let mut current = 0;

        while current < path.len() - 1 {
            let mut furthest = current + 1;
            for check in (current + 2)..path.len() {
                if Self::line_of_sight(env, def, exclude, path[current], path[check]) {
                    furthest = check;
                }
            }
            smoothed.push(path[furthest]);
            current = furthest;
        }

        smoothed
    }

    /// Bresenham walk between two squares, rejecting blocked cells and
    /// corner cuts.
    fn line_of_sight(
        env: &PathEnv<'_>,
        def: &MoveDef,
        exclude: Option<SolidRef>,
        from: (i32, i32),
        to: (i32, i32),
    ) -> bool {
        let dx = (to.0 - from.0).abs();
        let dz = (to.1 - from.1).abs();
        let sx = if from.0 < to.0 { 1 } else { -1 };
        let sz = if from.1 < to.1 { 1 } else { -1 };
        let mut err = dx - dz;

        let (mut x, mut z) = from;

        loop {
            if !Self::passable(env, def, exclude, x, z) {
                return false;
            }
            if (x, z) == to {
                break;
            }

            let e2 = 2 * err;
            if e2 > -dz && e2 < dx {
                // diagonal step: both adjacent cardinals must be passable
                if !Self::passable(env, def, exclude, x + sx, z)
                    || !Self::passable(env, def, exclude, x, z + sz)
                {
                    return false;
                }
            }
            if e2 > -dz {
                err -= dz;
                x += sx;
            }
            if e2 < dx {
                err += dx;
                z += sz;
            }
        }

        true
    }
}

impl PathService for GridPathService {
    fn request_path(
        &mut self,
        env: &PathEnv<'_>,
        unit: &Unit,
        start: Vec3,
        goal: Vec3,
        radius: f32,
    ) -> PathId {
        let Some(def) = env.move_def_of(unit) else {
            return NO_PATH;
        };
        let exclude = Some(SolidRef::Unit(unit.id));

        let start_sq = square_of(start);
        let Some(goal_sq) = Self::resolve_goal(env, def, exclude, goal, radius.max(SQUARE_SIZE))
        else {
            return NO_PATH;
        };

        let Some(squares) = Self::find_path(env, def, exclude, start_sq, goal_sq) else {
            return NO_PATH;
        };
        let squares = Self::smooth(env, def, exclude, squares);

        let mut waypoints: Vec<Vec3> = squares
            .into_iter()
            .map(|(x, z)| square_center(x, z))
            .collect();
        // land exactly on the requested goal if its own square was usable
        if square_of(goal) == goal_sq {
            waypoints.push(Vec3::new(goal.x, 0.0, goal.z));
        }

        self.next_id += 1;
        self.paths.insert(
            self.next_id,
            GridPath {
                waypoints,
                cursor: 0,
                updated: false,
            },
        );
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
        let Some(path) = self.paths.get_mut(&path_id) else {
            return fail_waypoint();
        };

        let mut i = path.cursor;
        while i + 1 < path.waypoints.len() {
            let wp = path.waypoints[i];
            let d2 = (wp.x - from.x) * (wp.x - from.x) + (wp.z - from.z) * (wp.z - from.z);
            if d2 >= step * step {
                break;
            }
            i += 1;
        }
        path.cursor = i;
        path.waypoints[i]
    }

    fn path_updated(&mut self, path_id: PathId) -> bool {
        match self.paths.get_mut(&path_id) {
            Some(path) => std::mem::take(&mut path.updated),
            None => false,
        }
    }

    fn delete_path(&mut self, path_id: PathId) {
        self.paths.remove(&path_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moves::BlockingMap;
    use crate::terrain::TerrainMap;
    use crate::unit::{CommandQueue, PhysState, UnitStats, UnitStorage};

    fn test_unit(units: &mut UnitStorage, pos: Vec3) -> crate::unit::Unit {
        let id = units.insert(crate::unit::Unit {
            id: 0,
            pos,
            front: Vec3::Z,
            right: Vec3::NEG_X,
            up: Vec3::Y,
            heading: 0,
            speed: Vec3::ZERO,
            residual_impulse: Vec3::ZERO,
            phys_state: PhysState::OnGround,
            is_moving: false,
            mass: 100.0,
            health: 100.0,
            radius: 6.0,
            height: 10.0,
            team: 0,
            ally_team: 0,
            xsize: 2,
            zsize: 2,
            move_class: Some(0),
            is_factory: false,
            stats: UnitStats::default(),
            commands: CommandQueue::new(),
            being_built: false,
            stunned: false,
            transporter: None,
            loading_transport: None,
            direct_control: None,
            falling: false,
            mover: None,
        });
        units.get(id).unwrap().clone()
    }

    fn env<'a>(
        terrain: &'a TerrainMap,
        blocking: &'a BlockingMap,
        defs: &'a [MoveDef],
    ) -> PathEnv<'a> {
        PathEnv {
            terrain,
            blocking,
            move_defs: defs,
        }
    }

    #[test]
    fn test_straight_path_reaches_goal() {
        let terrain = TerrainMap::flat(32, 32, 10.0);
        let blocking = BlockingMap::new(32, 32);
        let defs = vec![MoveDef::default()];
        let mut units = UnitStorage::new();
        let unit = test_unit(&mut units, Vec3::new(20.0, 10.0, 20.0));

        let mut svc = GridPathService::new();
        let e = env(&terrain, &blocking, &defs);
        let id = svc.request_path(&e, &unit, unit.pos, Vec3::new(200.0, 0.0, 200.0), 8.0);
        assert_ne!(id, NO_PATH);

        let wp = svc.next_waypoint(&e, &unit, id, unit.pos, 10.0);
        assert!(!crate::path::is_temp_waypoint(wp));
        assert!(!crate::path::is_fail_waypoint(wp));
    }

    #[test]
    fn test_path_routes_around_wall() {
        let terrain = TerrainMap::flat(32, 32, 10.0);
        let mut blocking = BlockingMap::new(32, 32);
        // vertical wall at x = 16, with a gap at z = 28..32
        for z in 0..28 {
            blocking.block(SolidRef::Unit(99), square_center(16, z), 1, 1);
        }
        let defs = vec![MoveDef::default()];
        let mut units = UnitStorage::new();
        let unit = test_unit(&mut units, square_center(8, 8));

        let mut svc = GridPathService::new();
        let e = env(&terrain, &blocking, &defs);
        let id = svc.request_path(&e, &unit, unit.pos, square_center(24, 8), 8.0);
        assert_ne!(id, NO_PATH);

        // walk the waypoints; none may sit on the wall column below the gap
        let mut from = unit.pos;
        for _ in 0..64 {
            let wp = svc.next_waypoint(&e, &unit, id, from, 10.0);
            let (x, z) = square_of(wp);
            assert!(
                !(x == 16 && z < 28),
                "waypoint on blocked square ({x}, {z})"
            );
            if (wp - from).length() < 1.0 {
                break;
            }
            from = wp;
        }
    }

    #[test]
    fn test_fully_walled_goal_fails() {
        let terrain = TerrainMap::flat(32, 32, 10.0);
        let mut blocking = BlockingMap::new(32, 32);
        for z in 0..32 {
            blocking.block(SolidRef::Unit(99), square_center(16, z), 1, 1);
        }
        let defs = vec![MoveDef::default()];
        let mut units = UnitStorage::new();
        let unit = test_unit(&mut units, square_center(8, 8));

        let mut svc = GridPathService::new();
        let e = env(&terrain, &blocking, &defs);
        let id = svc.request_path(&e, &unit, unit.pos, square_center(24, 8), 8.0);
        assert_eq!(id, NO_PATH);
    }

    #[test]
    fn test_requests_are_deterministic() {
        let terrain = TerrainMap::flat(32, 32, 10.0);
        let mut blocking = BlockingMap::new(32, 32);
        for z in 10..20 {
            blocking.block(SolidRef::Unit(99), square_center(12, z), 1, 1);
        }
        let defs = vec![MoveDef::default()];
        let mut units = UnitStorage::new();
        let unit = test_unit(&mut units, square_center(4, 15));

        let e = env(&terrain, &blocking, &defs);
        let collect = || {
            let mut svc = GridPathService::new();
            let id = svc.request_path(&e, &unit, unit.pos, square_center(28, 15), 8.0);
            let mut pts = Vec::new();
            let mut from = unit.pos;
            for _ in 0..64 {
                let wp = svc.next_waypoint(&e, &unit, id, from, 10.0);
                pts.push((wp.x.to_bits(), wp.z.to_bits()));
                if (wp - from).length() < 1.0 {
                    break;
                }
                from = wp;
            }
            pts
        };

        assert_eq!(collect(), collect());
    }

    #[test]
    fn test_path_updated_is_one_shot() {
        let terrain = TerrainMap::flat(8, 8, 10.0);
        let blocking = BlockingMap::new(8, 8);
        let defs = vec![MoveDef::default()];
        let mut units = UnitStorage::new();
        let unit = test_unit(&mut units, square_center(1, 1));

        let mut svc = GridPathService::new();
        let e = env(&terrain, &blocking, &defs);
        let id = svc.request_path(&e, &unit, unit.pos, square_center(6, 6), 8.0);

        assert!(!svc.path_updated(id));
        svc.mark_updated(id);
        assert!(svc.path_updated(id));
        assert!(!svc.path_updated(id));
    }
}
