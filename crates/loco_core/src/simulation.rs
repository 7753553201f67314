//! The simulation owner type and the fixed-rate tick loop.
//!
//! [`Simulation`] owns every unit, feature, and map structure, and drives
//! the locomotion pipeline at a fixed rate. Determinism rests on three
//! mechanisms: iteration always runs in ascending unit-id order, every
//! random draw comes from the owned seeded PRNG, and all cross-unit
//! mutation happens through the ordered collision passes. [`state_hash`]
//! exists so hosts can compare their post-tick states bit for bit.
//!
//! The path service is an external collaborator: it is passed into
//! [`tick`](Simulation::tick) rather than owned, and path handles are
//! re-requested when a snapshot is restored.
//!
//! [`state_hash`]: Simulation::state_hash

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::config::{MapParams, ModOptions, SLOW_UPDATE_RATE};
use crate::error::{MoveError, Result};
use crate::events::TickEvents;
use crate::math::{LineTable, SyncedRng};
use crate::mover::{self, GroundMover, MoveContext};
use crate::moves::{BlockingMap, MoveDef};
use crate::path::{PathService, NO_PATH};
use crate::quadfield::QuadField;
use crate::skid;
use crate::terrain::TerrainMap;
use crate::unit::{
    DirectControlState, Feature, FeatureId, FeatureStorage, PhysState, SolidRef, Unit, UnitId,
    UnitStats, UnitStorage,
};

/// Parameters for spawning a unit.
///
/// `move_class: Some(_)` produces a mobile ground unit with an attached
/// mover; `None` produces a structure that only participates in blocking
/// and collisions.
#[derive(Debug, Clone)]
pub struct UnitSpawnParams {
    /// Spawn position; y snaps to the terrain.
    pub pos: Vec3,
    /// Initial facing.
    pub heading: i16,
    /// Owning team.
    pub team: u8,
    /// Alliance group.
    pub ally_team: u8,
    /// Mass for push/crush contests.
    pub mass: f32,
    /// Hit points.
    pub health: f32,
    /// Collision radius.
    pub radius: f32,
    /// Model height.
    pub height: f32,
    /// Footprint width in squares.
    pub xsize: i32,
    /// Footprint depth in squares.
    pub zsize: i32,
    /// Move-class index, or `None` for a structure.
    pub move_class: Option<usize>,
    /// Structure exposes a factory yardmap.
    pub is_factory: bool,
    /// Locomotion limits.
    pub stats: UnitStats,
}

impl Default for UnitSpawnParams {
    fn default() -> Self {
        Self {
            pos: Vec3::ZERO,
            heading: 0,
            team: 0,
            ally_team: 0,
            mass: 100.0,
            health: 100.0,
            radius: 6.0,
            height: 12.0,
            xsize: 2,
            zsize: 2,
            move_class: Some(0),
            is_factory: false,
            stats: UnitStats::default(),
        }
    }
}

/// Parameters for spawning a feature.
#[derive(Debug, Clone)]
pub struct FeatureSpawnParams {
    /// Spawn position; y snaps to the terrain.
    pub pos: Vec3,
    /// Collision radius.
    pub radius: f32,
    /// Model height.
    pub height: f32,
    /// Mass (scaled way up in push contests).
    pub mass: f32,
    /// Hit points.
    pub health: f32,
    /// Footprint width in squares.
    pub xsize: i32,
    /// Footprint depth in squares.
    pub zsize: i32,
    /// Whether the feature blocks movement.
    pub blocking: bool,
    /// Whether anything can crush it.
    pub crushable: bool,
    /// Crush strength needed to flatten it.
    pub crush_resistance: f32,
}

impl Default for FeatureSpawnParams {
    fn default() -> Self {
        Self {
            pos: Vec3::ZERO,
            radius: 5.0,
            height: 8.0,
            mass: 500.0,
            health: 50.0,
            xsize: 2,
            zsize: 2,
            blocking: true,
            crushable: true,
            crush_resistance: 10.0,
        }
    }
}

/// The ground-locomotion simulation.
#[derive(Serialize, Deserialize)]
pub struct Simulation {
    frame: u32,
    config: ModOptions,
    map: MapParams,
    terrain: TerrainMap,
    move_defs: Vec<MoveDef>,
    units: UnitStorage,
    features: FeatureStorage,
    blocking: BlockingMap,
    rng: SyncedRng,
    #[serde(skip)]
    quad: QuadField,
    #[serde(skip)]
    line_table: LineTable,
}

impl Simulation {
    /// Create a simulation over the given map.
    #[must_use]
    pub fn new(
        terrain: TerrainMap,
        move_defs: Vec<MoveDef>,
        config: ModOptions,
        map: MapParams,
        seed: u64,
    ) -> Self {
        let quad = QuadField::new(terrain.width(), terrain.depth());
        let blocking = BlockingMap::new(terrain.xsquares(), terrain.zsquares());
        Self {
            frame: 0,
            config,
            map,
            terrain,
            move_defs,
            units: UnitStorage::new(),
            features: FeatureStorage::new(),
            blocking,
            rng: SyncedRng::new(seed),
            quad,
            line_table: LineTable::new(),
        }
    }

    /// Current frame number.
    #[must_use]
    pub const fn frame(&self) -> u32 {
        self.frame
    }

    /// The terrain map.
    #[must_use]
    pub fn terrain(&self) -> &TerrainMap {
        &self.terrain
    }

    /// The move-class table.
    #[must_use]
    pub fn move_defs(&self) -> &[MoveDef] {
        &self.move_defs
    }

    /// Look up a unit.
    #[must_use]
    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(id)
    }

    /// Look up a unit mutably (host-side state changes: orders, stun,
    /// transport flags).
    pub fn unit_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        self.units.get_mut(id)
    }

    /// Look up a feature.
    #[must_use]
    pub fn feature(&self, id: FeatureId) -> Option<&Feature> {
        self.features.get(id)
    }

    /// Ids of all live units, ascending.
    #[must_use]
    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.units.sorted_ids()
    }

    // ========================================================================
    // Spawning
    // ========================================================================

    /// Spawn a unit (or structure, when `move_class` is `None`).
    ///
    /// # Errors
    ///
    /// Returns [`MoveError::InvalidMoveClass`] for an out-of-range class.
    pub fn spawn_unit(&mut self, params: UnitSpawnParams) -> Result<UnitId> {
        if let Some(class) = params.move_class {
            if class >= self.move_defs.len() {
                return Err(MoveError::InvalidMoveClass(class));
            }
        }

        let mut pos = params.pos;
        let ground = self.terrain.height_real(pos.x, pos.z);
        pos.y = if params.stats.floats_on_water {
            ground.max(-params.stats.waterline)
        } else {
            ground
        };

        let mut unit = Unit {
            id: 0,
            pos,
            front: Vec3::Z,
            right: Vec3::NEG_X,
            up: Vec3::Y,
            heading: params.heading,
            speed: Vec3::ZERO,
            residual_impulse: Vec3::ZERO,
            phys_state: PhysState::OnGround,
            is_moving: false,
            mass: params.mass,
            health: params.health,
            radius: params.radius,
            height: params.height,
            team: params.team,
            ally_team: params.ally_team,
            xsize: params.xsize,
            zsize: params.zsize,
            move_class: params.move_class,
            is_factory: params.is_factory,
            stats: params.stats,
            commands: crate::unit::CommandQueue::new(),
            being_built: false,
            stunned: false,
            transporter: None,
            loading_transport: None,
            direct_control: None,
            falling: false,
            mover: params.move_class.map(|_| GroundMover::new(pos)),
        };
        unit.update_dir_vectors(None);

        let id = self.units.insert(unit);

        // structures are static blockers; mobile units are handled by the
        // collision system instead
        if params.move_class.is_none() {
            self.blocking
                .block(SolidRef::Unit(id), pos, params.xsize, params.zsize);
        }

        Ok(id)
    }

    /// Spawn a feature.
    pub fn spawn_feature(&mut self, params: FeatureSpawnParams) -> FeatureId {
        let mut pos = params.pos;
        pos.y = self.terrain.height_real(pos.x, pos.z);

        let id = self.features.insert(Feature {
            id: 0,
            pos,
            radius: params.radius,
            height: params.height,
            mass: params.mass,
            health: params.health,
            xsize: params.xsize,
            zsize: params.zsize,
            blocking: params.blocking,
            is_moving: false,
            crushable: params.crushable,
            crush_resistance: params.crush_resistance,
            speed: Vec3::ZERO,
        });

        self.quad.add_feature(id, pos);
        if params.blocking {
            self.blocking
                .block(SolidRef::Feature(id), pos, params.xsize, params.zsize);
        }

        id
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// Order a unit to move to `goal`, arriving within `goal_radius`.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit does not exist or has no mover.
    pub fn start_moving(
        &mut self,
        paths: &mut dyn PathService,
        id: UnitId,
        goal: Vec3,
        goal_radius: f32,
    ) -> Result<()> {
        self.check_mover(id)?;
        let mut events = TickEvents::default();
        let mut ctx = MoveContext {
            frame: self.frame,
            config: &self.config,
            map: &self.map,
            terrain: &self.terrain,
            move_defs: &self.move_defs,
            line_table: &self.line_table,
            blocking: &mut self.blocking,
            quad: &mut self.quad,
            events: &mut events,
            rng: &mut self.rng,
        };
        mover::start_moving(&mut ctx, &mut self.units, paths, id, goal, goal_radius, None);
        Ok(())
    }

    /// Cancel a unit's movement order.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit does not exist or has no mover.
    pub fn stop_moving(&mut self, paths: &mut dyn PathService, id: UnitId) -> Result<()> {
        self.check_mover(id)?;
        let mut events = TickEvents::default();
        let mut ctx = MoveContext {
            frame: self.frame,
            config: &self.config,
            map: &self.map,
            terrain: &self.terrain,
            move_defs: &self.move_defs,
            line_table: &self.line_table,
            blocking: &mut self.blocking,
            quad: &mut self.quad,
            events: &mut events,
            rng: &mut self.rng,
        };
        mover::stop_moving(&mut ctx, &mut self.units, paths, id);
        Ok(())
    }

    /// Apply an external impulse (weapon knockback, explosion). Returns
    /// whether the unit entered skid mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit does not exist or has no mover.
    pub fn apply_impulse(&mut self, id: UnitId, impulse: Vec3) -> Result<bool> {
        self.check_mover(id)?;
        Ok(skid::apply_impulse(
            &self.terrain,
            &mut self.rng,
            &mut self.units,
            id,
            impulse,
        ))
    }

    /// Put a unit into a controlled fall (transport drop).
    ///
    /// # Errors
    ///
    /// Returns an error if the unit does not exist.
    pub fn drop_unit(&mut self, id: UnitId, from_height: f32) -> Result<()> {
        let unit = self.units.get_mut(id).ok_or(MoveError::UnitNotFound(id))?;
        unit.pos.y += from_height;
        unit.falling = true;
        unit.speed.y = 0.0;
        Ok(())
    }

    /// Attach or release player piloting for a unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit does not exist or has no mover.
    pub fn set_direct_control(
        &mut self,
        id: UnitId,
        control: Option<DirectControlState>,
    ) -> Result<()> {
        self.check_mover(id)?;
        if let Some(unit) = self.units.get_mut(id) {
            unit.direct_control = control;
        }
        Ok(())
    }

    /// Keep an idle unit's primary weapon pointed at `pos`.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit does not exist or has no mover.
    pub fn keep_pointing_to(&mut self, id: UnitId, pos: Vec3, aggressive: bool) -> Result<()> {
        self.check_mover(id)?;
        mover::keep_pointing_to(&mut self.units, id, pos, aggressive);
        Ok(())
    }

    fn check_mover(&self, id: UnitId) -> Result<()> {
        let unit = self.units.get(id).ok_or(MoveError::UnitNotFound(id))?;
        if unit.mover.is_none() {
            return Err(MoveError::NotAMover(id));
        }
        Ok(())
    }

    // ========================================================================
    // The tick
    // ========================================================================

    /// Advance the simulation by one tick.
    ///
    /// Updates every mover in ascending id order (dispatch → follow path →
    /// steer → integrate → collide per unit), runs the coarse slow update
    /// every [`SLOW_UPDATE_RATE`] frames, removes units and features that
    /// died this tick, and returns the ordered event queue for the host to
    /// drain.
    pub fn tick(&mut self, paths: &mut dyn PathService) -> TickEvents {
        let mut events = TickEvents::default();

        self.quad.rebuild_units(&self.units);
        self.quad.rebuild_features(&self.features);

        let ids = self.units.sorted_ids();
        let slow_frame = self.frame % SLOW_UPDATE_RATE == 0;

        {
            let mut ctx = MoveContext {
                frame: self.frame,
                config: &self.config,
                map: &self.map,
                terrain: &self.terrain,
                move_defs: &self.move_defs,
                line_table: &self.line_table,
                blocking: &mut self.blocking,
                quad: &mut self.quad,
                events: &mut events,
                rng: &mut self.rng,
            };

            for &id in &ids {
                mover::update(&mut ctx, &mut self.units, &mut self.features, paths, id);
            }

            if slow_frame {
                for &id in &ids {
                    mover::slow_update(&mut ctx, &mut self.units, paths, id);
                }
            }
        }

        // deaths from crushes and collision damage, applied in id order
        // after all updates so iteration never sees a half-removed unit
        for &id in &ids {
            if self.units.get(id).is_some_and(|u| u.health <= 0.0) {
                events.deaths.push(id);
            }
        }
        for &id in &events.deaths.clone() {
            if let Some(unit) = self.units.remove(id) {
                if let Some(m) = unit.mover {
                    if m.path_id != NO_PATH {
                        paths.delete_path(m.path_id);
                    }
                }
                if unit.move_class.is_none() {
                    self.blocking
                        .unblock(SolidRef::Unit(id), unit.pos, unit.xsize, unit.zsize);
                }
            }
        }

        for fid in self.features.sorted_ids() {
            if self.features.get(fid).is_some_and(|f| f.health <= 0.0) {
                events.feature_deaths.push(fid);
            }
        }
        for &fid in &events.feature_deaths.clone() {
            if let Some(feature) = self.features.remove(fid) {
                self.quad.remove_feature(fid, feature.pos);
                if feature.blocking {
                    self.blocking.unblock(
                        SolidRef::Feature(fid),
                        feature.pos,
                        feature.xsize,
                        feature.zsize,
                    );
                }
            }
        }

        self.frame += 1;

        #[cfg(debug_assertions)]
        {
            let hash = self.state_hash();
            tracing::debug!(frame = self.frame, state_hash = hash, "simulation state hash");
        }

        events
    }

    // ========================================================================
    // Determinism and persistence
    // ========================================================================

    /// Hash the full locomotion state. Two hosts that executed the same
    /// ticks must produce identical hashes; used for desync detection.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        self.frame.hash(&mut hasher);

        let ids = self.units.sorted_ids();
        ids.len().hash(&mut hasher);

        let hash_vec3 = |hasher: &mut DefaultHasher, v: Vec3| {
            v.x.to_bits().hash(hasher);
            v.y.to_bits().hash(hasher);
            v.z.to_bits().hash(hasher);
        };

        for id in ids {
            let Some(unit) = self.units.get(id) else {
                continue;
            };
            id.hash(&mut hasher);
            hash_vec3(&mut hasher, unit.pos);
            hash_vec3(&mut hasher, unit.speed);
            unit.heading.hash(&mut hasher);
            unit.health.to_bits().hash(&mut hasher);

            if let Some(m) = &unit.mover {
                (m.progress_state as u8).hash(&mut hasher);
                m.path_id.hash(&mut hasher);
                hash_vec3(&mut hasher, m.curr_waypoint);
                hash_vec3(&mut hasher, m.next_waypoint);
                m.current_speed.to_bits().hash(&mut hasher);
                m.wanted_heading.hash(&mut hasher);
                [m.skidding, m.flying, m.reversing, m.idling].hash(&mut hasher);
                m.num_idling_updates.hash(&mut hasher);
                m.num_idling_slow_updates.hash(&mut hasher);
            }
        }

        for fid in self.features.sorted_ids() {
            if let Some(f) = self.features.get(fid) {
                fid.hash(&mut hasher);
                hash_vec3(&mut hasher, f.pos);
                f.health.to_bits().hash(&mut hasher);
            }
        }

        hasher.finish()
    }

    /// Serialize the full simulation state.
    ///
    /// # Errors
    ///
    /// Returns [`MoveError::Snapshot`] if encoding fails.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| MoveError::Snapshot(e.to_string()))
    }

    /// Restore a simulation from a snapshot. Movers that held a path
    /// re-request one from the service immediately for their saved goal.
    ///
    /// # Errors
    ///
    /// Returns [`MoveError::Snapshot`] if decoding fails.
    pub fn deserialize(data: &[u8], paths: &mut dyn PathService) -> Result<Self> {
        let mut sim: Simulation =
            bincode::deserialize(data).map_err(|e| MoveError::Snapshot(e.to_string()))?;
        sim.post_load(paths);
        Ok(sim)
    }

    fn post_load(&mut self, paths: &mut dyn PathService) {
        self.quad = QuadField::new(self.terrain.width(), self.terrain.depth());
        self.quad.rebuild_units(&self.units);
        self.quad.rebuild_features(&self.features);
        self.line_table = LineTable::new();

        // saved path handles are meaningless to the live service
        for id in self.units.sorted_ids() {
            let request = self.units.get(id).and_then(|u| {
                let m = u.mover.as_ref()?;
                (m.path_id != NO_PATH).then_some((m.goal_pos, m.goal_radius))
            });

            if let Some((goal, radius)) = request {
                let new_id = {
                    let env = crate::path::PathEnv {
                        terrain: &self.terrain,
                        blocking: &self.blocking,
                        move_defs: &self.move_defs,
                    };
                    match self.units.get(id) {
                        Some(unit) => paths.request_path(&env, unit, unit.pos, goal, radius),
                        None => NO_PATH,
                    }
                };
                if let Some(m) = self.units.get_mut(id).and_then(|u| u.mover.as_mut()) {
                    m.path_id = new_id;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::LinePathService;

    fn flat_sim() -> Simulation {
        Simulation::new(
            TerrainMap::flat(64, 64, 10.0),
            vec![MoveDef::default()],
            ModOptions::default(),
            MapParams::default(),
            1234,
        )
    }

    #[test]
    fn test_spawn_and_frame() {
        let mut sim = flat_sim();
        let id = sim.spawn_unit(UnitSpawnParams::default()).unwrap();
        assert_eq!(id, 0);
        assert_eq!(sim.frame(), 0);

        let mut paths = LinePathService::new();
        sim.tick(&mut paths);
        assert_eq!(sim.frame(), 1);
        // units rest on the terrain
        assert!((sim.unit(id).unwrap().pos.y - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_spawn_rejects_bad_move_class() {
        let mut sim = flat_sim();
        let err = sim.spawn_unit(UnitSpawnParams {
            move_class: Some(7),
            ..UnitSpawnParams::default()
        });
        assert!(matches!(err, Err(MoveError::InvalidMoveClass(7))));
    }

    #[test]
    fn test_start_moving_requires_mover() {
        let mut sim = flat_sim();
        let structure = sim
            .spawn_unit(UnitSpawnParams {
                move_class: None,
                pos: Vec3::new(100.0, 0.0, 100.0),
                ..UnitSpawnParams::default()
            })
            .unwrap();

        let mut paths = LinePathService::new();
        let err = sim.start_moving(&mut paths, structure, Vec3::new(200.0, 0.0, 200.0), 8.0);
        assert!(matches!(err, Err(MoveError::NotAMover(_))));
    }

    #[test]
    fn test_unit_moves_toward_goal() {
        let mut sim = flat_sim();
        let id = sim
            .spawn_unit(UnitSpawnParams {
                pos: Vec3::new(100.0, 0.0, 100.0),
                ..UnitSpawnParams::default()
            })
            .unwrap();

        let mut paths = LinePathService::new();
        sim.start_moving(&mut paths, id, Vec3::new(100.0, 0.0, 300.0), 8.0)
            .unwrap();

        let start_z = sim.unit(id).unwrap().pos.z;
        for _ in 0..60 {
            sim.tick(&mut paths);
        }
        let end_z = sim.unit(id).unwrap().pos.z;
        assert!(
            end_z > start_z + 10.0,
            "unit should have advanced, moved {}",
            end_z - start_z
        );
    }

    #[test]
    fn test_tick_is_deterministic() {
        let run = || {
            let mut sim = flat_sim();
            let a = sim
                .spawn_unit(UnitSpawnParams {
                    pos: Vec3::new(100.0, 0.0, 100.0),
                    ..UnitSpawnParams::default()
                })
                .unwrap();
            let b = sim
                .spawn_unit(UnitSpawnParams {
                    pos: Vec3::new(140.0, 0.0, 100.0),
                    ..UnitSpawnParams::default()
                })
                .unwrap();

            let mut paths = LinePathService::new();
            sim.start_moving(&mut paths, a, Vec3::new(300.0, 0.0, 300.0), 8.0)
                .unwrap();
            sim.start_moving(&mut paths, b, Vec3::new(100.0, 0.0, 300.0), 8.0)
                .unwrap();

            for _ in 0..120 {
                sim.tick(&mut paths);
            }
            sim.state_hash()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn test_serialization_round_trip_preserves_hash() {
        let mut sim = flat_sim();
        let id = sim
            .spawn_unit(UnitSpawnParams {
                pos: Vec3::new(120.0, 0.0, 120.0),
                ..UnitSpawnParams::default()
            })
            .unwrap();

        let mut paths = LinePathService::new();
        sim.start_moving(&mut paths, id, Vec3::new(400.0, 0.0, 400.0), 8.0)
            .unwrap();
        for _ in 0..10 {
            sim.tick(&mut paths);
        }

        let bytes = sim.serialize().unwrap();
        let restored = Simulation::deserialize(&bytes, &mut paths).unwrap();

        // the restored path handle differs (freshly requested), so compare
        // physical state instead of the full hash
        let a = sim.unit(id).unwrap();
        let b = restored.unit(id).unwrap();
        assert_eq!(a.pos, b.pos);
        assert_eq!(a.heading, b.heading);
        assert_eq!(sim.frame(), restored.frame());
        // and the re-request actually happened
        assert_ne!(
            restored.unit(id).unwrap().mover.as_ref().unwrap().path_id,
            NO_PATH
        );
    }

    #[test]
    fn test_crushed_unit_is_removed() {
        let mut sim = flat_sim();
        let heavy = sim
            .spawn_unit(UnitSpawnParams {
                pos: Vec3::new(100.0, 0.0, 100.0),
                mass: 10_000.0,
                stats: UnitStats {
                    max_speed: 4.0,
                    ..UnitStats::default()
                },
                ..UnitSpawnParams::default()
            })
            .unwrap();
        let light = sim
            .spawn_unit(UnitSpawnParams {
                pos: Vec3::new(100.0, 0.0, 112.0),
                mass: 1.0,
                team: 1,
                ally_team: 1,
                stats: UnitStats {
                    crushable: true,
                    crush_resistance: 1.0,
                    ..UnitStats::default()
                },
                ..UnitSpawnParams::default()
            })
            .unwrap();

        let mut paths = LinePathService::new();
        sim.start_moving(&mut paths, heavy, Vec3::new(100.0, 0.0, 300.0), 8.0)
            .unwrap();

        let mut crushed = false;
        for _ in 0..90 {
            let events = sim.tick(&mut paths);
            if events.deaths.contains(&light) {
                crushed = true;
                break;
            }
        }
        assert!(crushed, "light enemy unit should be crushed and removed");
        assert!(sim.unit(light).is_none());
    }
}
