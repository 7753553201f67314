//! Move semantics: move classes, terrain speed modifiers, square blockage,
//! and the crush / non-blocking predicates.
//!
//! A move class (`MoveDef`) bundles the terrain-passability parameters of a
//! family of units. The pathfinders and the controller both consult the
//! same predicates here so they cannot disagree about what is passable.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::terrain::{TerrainMap, SQUARE_SIZE};
use crate::unit::{Feature, SolidRef, Unit};

/// Square is blocked by a structure or blocking feature. The only bit the
/// blocking map can populate: mobile units never register squares here,
/// their interference is the collision resolver's job.
pub const BLOCK_STRUCTURE: u8 = 4;

/// Ground move family; hovers skim water and get the strafe slip term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveFamily {
    /// Tracked vehicles.
    Tracked,
    /// Wheeled vehicles.
    Wheeled,
    /// Hovercraft.
    Hover,
}

/// A named bundle of terrain-passability parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveDef {
    /// Display name.
    pub name: String,
    /// Movement family.
    pub family: MoveFamily,
    /// Footprint width in grid squares.
    pub xsize: i32,
    /// Footprint depth in grid squares.
    pub zsize: i32,
    /// Maximum water depth, in elmos.
    pub depth: f32,
    /// Maximum traversable slope (`1 - normal.y`).
    pub max_slope: f32,
    /// Speed penalty factor per unit of slope.
    pub slope_mod: f32,
    /// Speed penalty factor per elmo of water depth.
    pub depth_mod: f32,
    /// Crush strength: objects with lower crush resistance get flattened.
    pub crush_strength: f32,
    /// Steer around mobile obstacles instead of relying on pushes alone.
    pub avoid_mobiles_on_path: bool,
}

impl MoveDef {
    /// Half the footprint width, rounded down.
    #[must_use]
    pub const fn xsizeh(&self) -> i32 {
        self.xsize / 2
    }

    /// Half the footprint depth, rounded down.
    #[must_use]
    pub const fn zsizeh(&self) -> i32 {
        self.zsize / 2
    }
}

impl Default for MoveDef {
    fn default() -> Self {
        Self {
            name: "tank".to_string(),
            family: MoveFamily::Tracked,
            xsize: 2,
            zsize: 2,
            depth: 8.0,
            max_slope: 0.3,
            slope_mod: 4.0,
            depth_mod: 0.05,
            crush_strength: 20.0,
            avoid_mobiles_on_path: true,
        }
    }
}

/// World-space center of grid square (x, z).
#[must_use]
pub fn square_center(x: i32, z: i32) -> Vec3 {
    Vec3::new(
        x as f32 * SQUARE_SIZE + SQUARE_SIZE * 0.5,
        0.0,
        z as f32 * SQUARE_SIZE + SQUARE_SIZE * 0.5,
    )
}

/// Grid square containing world position `pos`.
#[must_use]
pub fn square_of(pos: Vec3) -> (i32, i32) {
    (
        (pos.x / SQUARE_SIZE).floor() as i32,
        (pos.z / SQUARE_SIZE).floor() as i32,
    )
}

fn footprint_range(center: i32, size: i32) -> std::ops::RangeInclusive<i32> {
    (center - size / 2)..=(center + (size - 1) / 2)
}

// ============================================================================
// Speed modifiers
// ============================================================================

fn speed_mod_impl(def: &MoveDef, height: f32, slope: f32, dir_slope_scale: f32) -> f32 {
    let eff_slope = slope * dir_slope_scale;
    if eff_slope > def.max_slope {
        return 0.0;
    }

    let mut modifier = 1.0 / (1.0 + eff_slope.max(0.0) * def.slope_mod);

    if def.family != MoveFamily::Hover {
        if height < -def.depth {
            return 0.0;
        }
        let depth = (-height).max(0.0);
        modifier /= 1.0 + depth * def.depth_mod;
    }

    modifier
}

/// Per-terrain speed coefficient at a world position, ignoring direction.
#[must_use]
pub fn pos_speed_mod(def: &MoveDef, terrain: &TerrainMap, pos: Vec3) -> f32 {
    let height = terrain.height_real(pos.x, pos.z);
    let slope = terrain.slope(pos.x, pos.z);
    speed_mod_impl(def, height, slope, 1.0)
}

/// Directional speed coefficient: climbing against the slope is penalized,
/// descending is not.
#[must_use]
pub fn pos_speed_mod_dir(def: &MoveDef, terrain: &TerrainMap, pos: Vec3, dir: Vec3) -> f32 {
    let height = terrain.height_real(pos.x, pos.z);
    let slope = terrain.slope(pos.x, pos.z);

    let normal = terrain.normal(pos.x, pos.z);
    let flat_normal = Vec3::new(normal.x, 0.0, normal.z).normalize_or_zero();
    // positive when moving uphill (against the downhill-pointing flat normal)
    let dir_slope_scale = (-dir.dot(flat_normal)).max(0.0);

    speed_mod_impl(def, height, slope, dir_slope_scale)
}

/// Speed coefficient at the center of grid square (x, z).
#[must_use]
pub fn square_speed_mod(def: &MoveDef, terrain: &TerrainMap, x: i32, z: i32) -> f32 {
    pos_speed_mod(def, terrain, square_center(x, z))
}

// ============================================================================
// Blocking map
// ============================================================================

/// Grid registry of static blockers (structures and blocking features).
///
/// Each cell lists the objects whose footprint covers it. Mobile units are
/// not registered; their interference is resolved by the collision system,
/// not by square blockage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockingMap {
    xsquares: i32,
    zsquares: i32,
    cells: Vec<Vec<SolidRef>>,
}

impl BlockingMap {
    /// Create an empty map covering `xsquares` × `zsquares` cells.
    #[must_use]
    pub fn new(xsquares: i32, zsquares: i32) -> Self {
        Self {
            xsquares,
            zsquares,
            cells: vec![Vec::new(); (xsquares * zsquares) as usize],
        }
    }

    fn cell_index(&self, x: i32, z: i32) -> Option<usize> {
        if x < 0 || z < 0 || x >= self.xsquares || z >= self.zsquares {
            return None;
        }
        Some((z * self.xsquares + x) as usize)
    }

    /// Register an object footprint centered on `pos`.
    pub fn block(&mut self, obj: SolidRef, pos: Vec3, xsize: i32, zsize: i32) {
        let (cx, cz) = square_of(pos);
        for z in footprint_range(cz, zsize) {
            for x in footprint_range(cx, xsize) {
                if let Some(idx) = self.cell_index(x, z) {
                    if !self.cells[idx].contains(&obj) {
                        self.cells[idx].push(obj);
                    }
                }
            }
        }
    }

    /// Remove an object footprint centered on `pos`.
    pub fn unblock(&mut self, obj: SolidRef, pos: Vec3, xsize: i32, zsize: i32) {
        let (cx, cz) = square_of(pos);
        for z in footprint_range(cz, zsize) {
            for x in footprint_range(cx, xsize) {
                if let Some(idx) = self.cell_index(x, z) {
                    self.cells[idx].retain(|r| *r != obj);
                }
            }
        }
    }

    /// Blockage bitmask of grid square (x, z), ignoring `exclude`.
    #[must_use]
    pub fn square_blocked(&self, x: i32, z: i32, exclude: Option<SolidRef>) -> u8 {
        let Some(idx) = self.cell_index(x, z) else {
            return 0;
        };
        let blocked = self.cells[idx]
            .iter()
            .any(|r| Some(*r) != exclude);
        if blocked {
            BLOCK_STRUCTURE
        } else {
            0
        }
    }
}

// ============================================================================
// Blocking / crush predicates
// ============================================================================

/// The slice of a solid object the blocking predicates care about.
#[derive(Debug, Clone, Copy)]
pub struct SolidView {
    /// World position.
    pub pos: Vec3,
    /// Model height.
    pub height: f32,
    /// Whether the object blocks movement at all.
    pub blocking: bool,
    /// Airborne objects never block ground movers.
    pub airborne: bool,
}

impl From<&Unit> for SolidView {
    fn from(u: &Unit) -> Self {
        Self {
            pos: u.pos,
            height: u.height,
            blocking: true,
            airborne: matches!(
                u.phys_state,
                crate::unit::PhysState::Flying | crate::unit::PhysState::Hovering
            ),
        }
    }
}

impl From<&Feature> for SolidView {
    fn from(f: &Feature) -> Self {
        Self {
            pos: f.pos,
            height: f.height,
            blocking: f.blocking,
            airborne: false,
        }
    }
}

/// Whether `collidee` does not block `collider` for this move class
/// (non-blocking objects are driven through, never pushed or crushed).
#[must_use]
pub fn is_non_blocking(_def: &MoveDef, collidee: &SolidView, collider: &SolidView) -> bool {
    if !collidee.blocking {
        return true;
    }
    if collidee.airborne {
        return true;
    }
    // vertically separated objects pass over / under each other
    if (collider.pos.y + collider.height) < collidee.pos.y {
        return true;
    }
    if (collidee.pos.y + collidee.height) < collider.pos.y {
        return true;
    }
    false
}

/// Whether an object withstands being crushed by this move class.
#[must_use]
pub fn crush_resistant(def: &MoveDef, crushable: bool, crush_resistance: f32) -> bool {
    !crushable || crush_resistance > def.crush_strength
}

/// Whether the unit could stand at `pos`: passable terrain under the center
/// square and no structure blockage anywhere in the footprint.
#[must_use]
pub fn test_move_square(
    def: &MoveDef,
    terrain: &TerrainMap,
    blocking: &BlockingMap,
    exclude: Option<SolidRef>,
    pos: Vec3,
) -> bool {
    if pos_speed_mod(def, terrain, pos) <= 0.01 {
        return false;
    }

    let (cx, cz) = square_of(pos);
    for z in footprint_range(cz, def.zsize) {
        for x in footprint_range(cx, def.xsize) {
            if blocking.square_blocked(x, z, exclude) & BLOCK_STRUCTURE != 0 {
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_mod_flat_ground() {
        let def = MoveDef::default();
        let terrain = TerrainMap::flat(16, 16, 10.0);
        let m = pos_speed_mod(&def, &terrain, Vec3::new(60.0, 0.0, 60.0));
        assert!((m - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_speed_mod_deep_water_blocks() {
        let def = MoveDef::default();
        let terrain = TerrainMap::flat(16, 16, -50.0);
        assert_eq!(pos_speed_mod(&def, &terrain, Vec3::new(60.0, 0.0, 60.0)), 0.0);

        // hovers skim right over it
        let hover = MoveDef {
            family: MoveFamily::Hover,
            ..MoveDef::default()
        };
        assert!(pos_speed_mod(&hover, &terrain, Vec3::new(60.0, 0.0, 60.0)) > 0.9);
    }

    #[test]
    fn test_directional_speed_mod_penalizes_climbing_only() {
        let def = MoveDef {
            max_slope: 0.9,
            ..MoveDef::default()
        };
        let mut terrain = TerrainMap::flat(16, 16, 0.0);
        for cz in 0..=16 {
            for cx in 0..=16 {
                terrain.set_corner_height(cx, cz, cx as f32 * 3.0);
            }
        }
        let pos = Vec3::new(64.0, 0.0, 64.0);
        let up = pos_speed_mod_dir(&def, &terrain, pos, Vec3::X);
        let down = pos_speed_mod_dir(&def, &terrain, pos, Vec3::NEG_X);
        assert!(up < down, "climbing {up} should be slower than descending {down}");
    }

    #[test]
    fn test_blocking_map_round_trip() {
        let mut map = BlockingMap::new(16, 16);
        let obj = SolidRef::Unit(3);
        let pos = square_center(8, 8);

        map.block(obj, pos, 2, 2);
        assert_eq!(map.square_blocked(8, 8, None), BLOCK_STRUCTURE);
        assert_eq!(map.square_blocked(8, 8, Some(obj)), 0);
        assert_eq!(map.square_blocked(12, 12, None), 0);

        map.unblock(obj, pos, 2, 2);
        assert_eq!(map.square_blocked(8, 8, None), 0);
    }

    #[test]
    fn test_test_move_square_rejects_structures() {
        let def = MoveDef::default();
        let terrain = TerrainMap::flat(16, 16, 5.0);
        let mut blocking = BlockingMap::new(16, 16);

        let pos = square_center(8, 8);
        assert!(test_move_square(&def, &terrain, &blocking, None, pos));

        blocking.block(SolidRef::Unit(9), pos, 4, 4);
        assert!(!test_move_square(&def, &terrain, &blocking, None, pos));
        // but the blocked unit itself is excluded
        assert!(test_move_square(
            &def,
            &terrain,
            &blocking,
            Some(SolidRef::Unit(9)),
            pos
        ));
    }

    #[test]
    fn test_non_blocking_vertical_separation() {
        let def = MoveDef::default();
        let low = SolidView {
            pos: Vec3::new(0.0, 0.0, 0.0),
            height: 5.0,
            blocking: true,
            airborne: false,
        };
        let high = SolidView {
            pos: Vec3::new(0.0, 50.0, 0.0),
            height: 5.0,
            blocking: true,
            airborne: false,
        };
        assert!(is_non_blocking(&def, &high, &low));
        assert!(!is_non_blocking(&def, &low, &low));
    }

    #[test]
    fn test_crush_resistant() {
        let def = MoveDef::default(); // crush_strength 20
        assert!(crush_resistant(&def, false, 0.0));
        assert!(crush_resistant(&def, true, 30.0));
        assert!(!crush_resistant(&def, true, 10.0));
    }
}
