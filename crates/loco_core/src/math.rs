//! Heading math, deterministic RNG, and the line table.
//!
//! Headings are 16-bit signed fixed-point angles where the full circle is
//! 65536 units (so ±32768 = ±180°). Differences must wrap through
//! two's-complement so that a subtraction always selects the shorter turn
//! direction; every heading delta in the crate goes through
//! [`heading_delta`] or `wrapping_sub` for exactly that reason.

use glam::Vec3;

use crate::terrain::SQUARE_SIZE;

/// Number of heading units in a full circle.
pub const CIRCLE_DIVS: f32 = 65536.0;

/// Largest positive heading value (+180° exclusive).
pub const SHORT_MAX: i32 = 32767;

/// Speeds above this are insane and get clamped out of damage formulas.
pub const MAX_UNIT_SPEED: f32 = 1e3;

const RAD_TO_HEADING: f32 = 32768.0 / std::f32::consts::PI;
const HEADING_TO_RAD: f32 = std::f32::consts::PI / 32768.0;

/// Convert an (x, z) direction into a short-int heading.
///
/// Heading 0 points along +z; +16384 points along +x.
#[must_use]
pub fn heading_from_vector(x: f32, z: f32) -> i16 {
    (x.atan2(z) * RAD_TO_HEADING) as i32 as i16
}

/// Convert a short-int heading back into a flat unit direction vector.
#[must_use]
pub fn vector_from_heading(heading: i16) -> Vec3 {
    let ang = f32::from(heading) * HEADING_TO_RAD;
    Vec3::new(ang.sin(), 0.0, ang.cos())
}

/// Shortest signed turn from `from` to `to`, in heading units.
#[must_use]
pub fn heading_delta(to: i16, from: i16) -> i16 {
    to.wrapping_sub(from)
}

/// Magnitude of the turn from `from` to `to`, in degrees.
#[must_use]
pub fn turn_angle_deg(to: i16, from: i16) -> f32 {
    (180.0 * f32::from(heading_delta(to, from)) / SHORT_MAX as f32).abs()
}

/// Zero the y-component of a vector.
#[must_use]
pub fn flatten(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

/// Squared length of the (x, z) projection.
#[must_use]
pub fn sq_length_2d(v: Vec3) -> f32 {
    v.x * v.x + v.z * v.z
}

/// Distance between two points in the (x, z) plane.
#[must_use]
pub fn distance_2d(a: Vec3, b: Vec3) -> f32 {
    sq_length_2d(a - b).sqrt()
}

/// Radius of the circle maximally bounded by an `xsize` × `zsize` square
/// footprint (`scale` ≈ 0.75) or minimally bounding it (`scale` = 1).
#[must_use]
pub fn footprint_radius(xsize: i32, zsize: i32, scale: f32) -> f32 {
    ((xsize * xsize + zsize * zsize) as f32).sqrt() * 0.5 * SQUARE_SIZE * scale
}

/// `+1` when the flag is set, `-1` otherwise. Used for forward/reverse
/// direction signs throughout the controller.
#[must_use]
pub fn dir_sign(forward: bool) -> f32 {
    if forward {
        1.0
    } else {
        -1.0
    }
}

// ============================================================================
// Synced RNG
// ============================================================================

/// Deterministic xorshift PRNG shared by the whole simulation.
///
/// All randomness consumed by the core (the skid spin seed) must come from
/// here so that every participating host draws the same sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SyncedRng {
    state: u64,
}

impl SyncedRng {
    /// Create a new generator from a non-zero seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { state: seed | 1 }
    }

    /// Next raw 32-bit draw.
    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        (x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 32) as u32
    }

    /// Uniform draw in `[0, 1)`.
    pub fn rand_float(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }
}

// ============================================================================
// Line table
// ============================================================================

/// Side length of the line table, in cells. Target offsets range over
/// `[-(L/2), +(L/2)]` in both axes.
pub const LINETABLE_SIZE: i32 = 11;

/// Precomputed grid DDA: for every (dx, dz) cell offset within range, the
/// ordered list of intermediate cell offsets crossed by the straight line
/// from the center cell to the target cell.
///
/// Immutable after construction; used as a fast square-blockage probe along
/// short path segments before falling back to a full rectangle scan.
#[derive(Debug, Clone)]
pub struct LineTable {
    lines: Vec<Vec<(i32, i32)>>,
}

impl LineTable {
    /// Build the full table.
    #[must_use]
    pub fn new() -> Self {
        let half = LINETABLE_SIZE / 2;
        let mut lines = Vec::with_capacity((LINETABLE_SIZE * LINETABLE_SIZE) as usize);

        for zt in 0..LINETABLE_SIZE {
            for xt in 0..LINETABLE_SIZE {
                lines.push(Self::trace(xt - half, zt - half));
            }
        }

        Self { lines }
    }

    /// Sample points along the line from the center cell to the cell at
    /// offset `(dx, dz)`, both clamped to the table range.
    #[must_use]
    pub fn line(&self, dx: i32, dz: i32) -> &[(i32, i32)] {
        let half = LINETABLE_SIZE / 2;
        let xt = (dx.clamp(-half, half) + half) as usize;
        let zt = (dz.clamp(-half, half) + half) as usize;
        &self.lines[zt * LINETABLE_SIZE as usize + xt]
    }

    /// Whether `(dx, dz)` is representable without clamping.
    #[must_use]
    pub fn covers(dx: i32, dz: i32) -> bool {
        let half = LINETABLE_SIZE / 2;
        dx.abs() <= half && dz.abs() <= half
    }

    fn trace(dx_cell: i32, dz_cell: i32) -> Vec<(i32, i32)> {
        let mut pts = Vec::new();

        // center-points of the grid-center cell and the target cell
        let start = (0.5f32, 0.5f32);
        let to = (dx_cell as f32 + 0.5, dz_cell as f32 + 0.5);

        let dx = to.0 - start.0;
        let dz = to.1 - start.1;

        if to.0.floor() == start.0.floor() {
            // vertical line
            let steps = to.1.floor() as i32;
            if dz > 0.0 {
                for a in 1..=steps {
                    pts.push((0, a));
                }
            } else {
                for a in (steps..=-1).rev() {
                    pts.push((0, a));
                }
            }
        } else if to.1.floor() == start.1.floor() {
            // horizontal line
            let steps = to.0.floor() as i32;
            if dx > 0.0 {
                for a in 1..=steps {
                    pts.push((a, 0));
                }
            } else {
                for a in (steps..=-1).rev() {
                    pts.push((a, 0));
                }
            }
        } else {
            let mut xp = start.0;
            let mut zp = start.1;
            let half = LINETABLE_SIZE / 2;
            let mut keep_going = true;

            while keep_going {
                let xn = if dx > 0.0 {
                    (xp.floor() + 1.0 - xp) / dx
                } else {
                    (xp.floor() - xp) / dx
                };
                let zn = if dz > 0.0 {
                    (zp.floor() + 1.0 - zp) / dz
                } else {
                    (zp.floor() - zp) / dz
                };

                let t = if xn < zn { xn } else { zn } + 0.0001;
                xp += t * dx;
                zp += t * dz;

                // the crossing that steps past the target is still sampled
                keep_going = (xp - start.0).abs() <= (to.0 - start.0).abs()
                    && (zp - start.1).abs() <= (to.1 - start.1).abs();

                let pt = (xp.floor() as i32, zp.floor() as i32);
                if pt.0 < -half || pt.0 > half || pt.1 < -half || pt.1 > half {
                    continue;
                }
                pts.push(pt);
            }
        }

        pts
    }
}

impl Default for LineTable {
    fn default() -> Self {
        Self::new()
    }
}
