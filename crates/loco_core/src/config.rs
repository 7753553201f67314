//! Process-wide simulation configuration.
//!
//! Mod options are read-only during a game; they are threaded into the
//! [`Simulation`](crate::simulation::Simulation) once at construction as a
//! single immutable struct.

use serde::{Deserialize, Serialize};

/// Simulation frames per second.
pub const GAME_SPEED: f32 = 30.0;

/// The coarse update fires once per this many frames.
pub const SLOW_UPDATE_RATE: u32 = 16;

/// Mod-level behavior switches consumed by the locomotion core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModOptions {
    /// Apply gravity to ground units (enables terrain-tangent integration).
    pub allow_ground_unit_gravity: bool,
    /// Deal damage on high-speed unit collisions and ground impacts.
    pub allow_unit_collision_damage: bool,
    /// Let colliding units overlap proportionally to their footprints.
    pub allow_unit_collision_overlap: bool,
    /// Allow pushing enemy units aside during collision resolution.
    pub allow_pushing_enemy_units: bool,
    /// Allow a heavy mover to crush allied units, not just enemies.
    pub allow_crushing_allied_units: bool,
    /// Give hover-class movers a sideways slip term on slopes.
    pub allow_hover_unit_strafing: bool,
}

impl Default for ModOptions {
    fn default() -> Self {
        Self {
            allow_ground_unit_gravity: true,
            allow_unit_collision_damage: true,
            allow_unit_collision_overlap: false,
            allow_pushing_enemy_units: false,
            allow_crushing_allied_units: false,
            allow_hover_unit_strafing: true,
        }
    }
}

/// Fixed per-map physical parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapParams {
    /// Gravity in elmos per frame squared. Negative (points down).
    pub gravity: f32,
}

impl Default for MapParams {
    fn default() -> Self {
        Self { gravity: -0.1 }
    }
}
