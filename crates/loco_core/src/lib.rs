//! # loco_core
//!
//! Deterministic ground-unit locomotion for a real-time strategy
//! simulation: the per-tick controller that drives every wheeled, tracked,
//! or hovering unit toward its goal while following paths, steering around
//! obstacles, resolving collisions, and handling skid and fall physics.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO
//! - No system randomness (one seeded PRNG, owned by the simulation)
//! - Fixed evaluation order everywhere (sorted unit ids, ordered events)
//!
//! This separation enables:
//! - Lockstep multiplayer (identical simulation across hosts)
//! - Headless server builds
//! - Replay systems
//! - Determinism testing
//!
//! ## Crate structure
//!
//! - [`simulation`] - owner type and the fixed-rate tick loop
//! - [`mover`] - per-unit state machine and path following
//! - [`steering`] - obstacle avoidance (internal)
//! - [`kinematics`] - speed/heading control and integration (internal)
//! - [`collision`] - unit/feature/static collision resolution (internal)
//! - [`skid`] - impulse, skid, and controlled-fall physics (internal)
//! - [`path`] / [`pathing`] - path service seam and the A* implementation
//! - [`terrain`], [`moves`], [`quadfield`] - world queries
//!
//! ## Example
//!
//! ```
//! use glam::Vec3;
//! use loco_core::prelude::*;
//!
//! let mut sim = Simulation::new(
//!     TerrainMap::flat(64, 64, 10.0),
//!     vec![MoveDef::default()],
//!     ModOptions::default(),
//!     MapParams::default(),
//!     0xC0FFEE,
//! );
//! let mut paths = LinePathService::new();
//!
//! let unit = sim.spawn_unit(UnitSpawnParams {
//!     pos: Vec3::new(100.0, 0.0, 100.0),
//!     ..Default::default()
//! }).unwrap();
//!
//! sim.start_moving(&mut paths, unit, Vec3::new(300.0, 0.0, 300.0), 8.0).unwrap();
//! let events = sim.tick(&mut paths);
//! assert!(!events.events.is_empty());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod events;
pub mod math;
pub mod mover;
pub mod moves;
pub mod path;
pub mod pathing;
pub mod quadfield;
pub mod simulation;
pub mod terrain;
pub mod unit;

mod collision;
mod kinematics;
mod skid;
mod steering;

pub use kinematics::braking_distance;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::config::{MapParams, ModOptions, GAME_SPEED, SLOW_UPDATE_RATE};
    pub use crate::error::{MoveError, Result};
    pub use crate::events::{MoveEvent, TickEvents};
    pub use crate::math::{heading_from_vector, vector_from_heading, SyncedRng};
    pub use crate::mover::{GroundMover, ProgressState, MAX_IDLING_SLOW_UPDATES};
    pub use crate::moves::{MoveDef, MoveFamily};
    pub use crate::path::{
        DefaultPathController, LinePathService, PathController, PathEnv, PathId, PathService,
        NO_PATH,
    };
    pub use crate::pathing::GridPathService;
    pub use crate::simulation::{FeatureSpawnParams, Simulation, UnitSpawnParams};
    pub use crate::terrain::{TerrainMap, SQUARE_SIZE};
    pub use crate::unit::{
        DirectControlState, Feature, FeatureId, Order, PhysState, Unit, UnitId, UnitStats,
    };
}
