//! Terrain service: heightfield queries for the locomotion core.
//!
//! The map is a regular grid of square cells (`SQUARE_SIZE` elmos on a
//! side) with heights stored at cell corners and sampled bilinearly.
//! Water is everything below y = 0.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Edge length of one terrain grid cell, in world units (elmos).
pub const SQUARE_SIZE: f32 = 8.0;

/// Regular-grid heightfield backing all terrain queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainMap {
    xsquares: i32,
    zsquares: i32,
    /// Corner heights, row-major, `(xsquares + 1) * (zsquares + 1)` entries.
    corners: Vec<f32>,
}

impl TerrainMap {
    /// Create a flat map of `xsquares` × `zsquares` cells at uniform height.
    ///
    /// # Panics
    ///
    /// Panics if either dimension is zero.
    #[must_use]
    pub fn flat(xsquares: i32, zsquares: i32, height: f32) -> Self {
        assert!(xsquares > 0 && zsquares > 0, "terrain must be non-empty");
        let count = ((xsquares + 1) * (zsquares + 1)) as usize;
        Self {
            xsquares,
            zsquares,
            corners: vec![height; count],
        }
    }

    /// Map width in world units.
    #[must_use]
    pub fn width(&self) -> f32 {
        self.xsquares as f32 * SQUARE_SIZE
    }

    /// Map depth in world units.
    #[must_use]
    pub fn depth(&self) -> f32 {
        self.zsquares as f32 * SQUARE_SIZE
    }

    /// Number of squares along x.
    #[must_use]
    pub const fn xsquares(&self) -> i32 {
        self.xsquares
    }

    /// Number of squares along z.
    #[must_use]
    pub const fn zsquares(&self) -> i32 {
        self.zsquares
    }

    /// Overwrite the height of a single grid corner.
    ///
    /// Out-of-range corners are ignored.
    pub fn set_corner_height(&mut self, cx: i32, cz: i32, height: f32) {
        if cx < 0 || cx > self.xsquares || cz < 0 || cz > self.zsquares {
            return;
        }
        let idx = (cz * (self.xsquares + 1) + cx) as usize;
        self.corners[idx] = height;
    }

    #[inline]
    fn corner(&self, cx: i32, cz: i32) -> f32 {
        let cx = cx.clamp(0, self.xsquares);
        let cz = cz.clamp(0, self.zsquares);
        self.corners[(cz * (self.xsquares + 1) + cx) as usize]
    }

    /// Real ground height at world (x, z), bilinearly interpolated.
    /// May be negative (below the waterline).
    #[must_use]
    pub fn height_real(&self, x: f32, z: f32) -> f32 {
        let fx = (x / SQUARE_SIZE).clamp(0.0, self.xsquares as f32 - 1e-4);
        let fz = (z / SQUARE_SIZE).clamp(0.0, self.zsquares as f32 - 1e-4);
        let x0 = fx.floor() as i32;
        let z0 = fz.floor() as i32;
        let tx = fx - x0 as f32;
        let tz = fz - z0 as f32;

        let h00 = self.corner(x0, z0);
        let h10 = self.corner(x0 + 1, z0);
        let h01 = self.corner(x0, z0 + 1);
        let h11 = self.corner(x0 + 1, z0 + 1);

        let a = h00 * (1.0 - tx) + h10 * tx;
        let b = h01 * (1.0 - tx) + h11 * tx;
        a * (1.0 - tz) + b * tz
    }

    /// Ground height clamped to the water surface (never below 0).
    #[must_use]
    pub fn height_above_water(&self, x: f32, z: f32) -> f32 {
        self.height_real(x, z).max(0.0)
    }

    /// Unit surface normal at world (x, z), from central differences.
    #[must_use]
    pub fn normal(&self, x: f32, z: f32) -> Vec3 {
        let hx0 = self.height_real(x - SQUARE_SIZE, z);
        let hx1 = self.height_real(x + SQUARE_SIZE, z);
        let hz0 = self.height_real(x, z - SQUARE_SIZE);
        let hz1 = self.height_real(x, z + SQUARE_SIZE);

        let ddx = (hx1 - hx0) / (2.0 * SQUARE_SIZE);
        let ddz = (hz1 - hz0) / (2.0 * SQUARE_SIZE);

        let n = Vec3::new(-ddx, 1.0, -ddz).normalize_or_zero();
        if n == Vec3::ZERO {
            Vec3::Y
        } else {
            n
        }
    }

    /// Terrain slope at world (x, z): `1 - normal.y`, 0 on flat ground.
    #[must_use]
    pub fn slope(&self, x: f32, z: f32) -> f32 {
        1.0 - self.normal(x, z).y
    }

    /// Whether the (x, z) projection of `pos` lies on the map.
    #[must_use]
    pub fn is_in_bounds(&self, pos: Vec3) -> bool {
        pos.x >= 0.0 && pos.z >= 0.0 && pos.x <= self.width() && pos.z <= self.depth()
    }

    /// Clamp the (x, z) projection of `pos` onto the map.
    #[must_use]
    pub fn clamp_in_bounds(&self, pos: Vec3) -> Vec3 {
        Vec3::new(
            pos.x.clamp(0.0, self.width()),
            pos.y,
            pos.z.clamp(0.0, self.depth()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_map_height() {
        let map = TerrainMap::flat(16, 16, 5.0);
        assert_eq!(map.height_real(0.0, 0.0), 5.0);
        assert_eq!(map.height_real(60.0, 60.0), 5.0);
        assert_eq!(map.normal(40.0, 40.0), Vec3::Y);
        assert_eq!(map.slope(40.0, 40.0), 0.0);
    }

    #[test]
    fn test_height_above_water_clamps() {
        let map = TerrainMap::flat(8, 8, -10.0);
        assert_eq!(map.height_real(10.0, 10.0), -10.0);
        assert_eq!(map.height_above_water(10.0, 10.0), 0.0);
    }

    #[test]
    fn test_ramp_normal_tilts_downhill() {
        let mut map = TerrainMap::flat(8, 8, 0.0);
        // raise the east edge: height increases with x
        for cz in 0..=8 {
            for cx in 0..=8 {
                map.set_corner_height(cx, cz, cx as f32 * 4.0);
            }
        }
        let n = map.normal(32.0, 32.0);
        assert!(n.x < 0.0, "normal leans away from the rise, got {n:?}");
        assert!(n.y > 0.0);
        assert!(map.slope(32.0, 32.0) > 0.0);
    }

    #[test]
    fn test_bilinear_interpolation_midpoint() {
        let mut map = TerrainMap::flat(2, 2, 0.0);
        map.set_corner_height(1, 1, 8.0);
        // halfway between a 0-corner and the 8-corner
        let h = map.height_real(SQUARE_SIZE * 0.5, SQUARE_SIZE);
        assert!((h - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_clamp_in_bounds() {
        let map = TerrainMap::flat(4, 4, 0.0);
        let p = map.clamp_in_bounds(Vec3::new(-5.0, 3.0, 100.0));
        assert_eq!(p, Vec3::new(0.0, 3.0, 32.0));
        assert!(map.is_in_bounds(p));
    }
}
