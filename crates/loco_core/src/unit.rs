//! Unit and feature records plus their arena storage.
//!
//! Units live in an arena of `Option` slots with stable integer handles.
//! Collision resolution mutates *two* units at once (the collider pushes
//! the collidee), so the arena exposes an index-based split borrow
//! ([`UnitStorage::pair_mut`]) instead of handing out overlapping `&mut`s.

use std::collections::VecDeque;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::math::{footprint_radius, vector_from_heading};
use crate::mover::GroundMover;

/// Unique identifier for units.
pub type UnitId = u32;

/// Unique identifier for map features (rocks, wrecks, trees).
pub type FeatureId = u32;

/// A handle to either kind of solid object in the spatial index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SolidRef {
    /// A unit (mobile or structure).
    Unit(UnitId),
    /// A map feature.
    Feature(FeatureId),
}

/// Physical state of a unit, driving gravity and collision filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PhysState {
    /// Standing on (or following) the terrain.
    #[default]
    OnGround,
    /// Hovering slightly above the terrain.
    Hovering,
    /// Airborne; skidding units fly while tumbling.
    Flying,
}

/// Per-unit-type locomotion limits and flags.
///
/// Speeds are in elmos per frame, accelerations in elmos per frame², and
/// the turn rate in heading units per frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitStats {
    /// Forward top speed.
    pub max_speed: f32,
    /// Reverse top speed; zero disables reversing.
    pub max_reverse_speed: f32,
    /// Acceleration limit.
    pub acc_rate: f32,
    /// Braking limit.
    pub dec_rate: f32,
    /// Turn rate in heading units per frame.
    pub turn_rate: f32,
    /// Whether the unit stops to rotate on large heading errors.
    pub turn_in_place: bool,
    /// Minimum crawl speed while rotating when `turn_in_place` is off.
    pub turn_in_place_speed_limit: f32,
    /// Heading error (degrees) above which a turn-in-place unit slows.
    pub turn_in_place_angle_limit: f32,
    /// Over-slope skid tolerance multiplier; < 1 disables slope skidding.
    pub slide_tolerance: f32,
    /// Whether the unit floats instead of driving on the seabed.
    pub floats_on_water: bool,
    /// How deep a floating unit sits in the water.
    pub waterline: f32,
    /// Controlled-fall gravity multiplier after a transport drop.
    pub fall_speed: f32,
    /// Minimum impact speed before collisions damage this unit type;
    /// negative disables collision damage entirely.
    pub min_collision_speed: f32,
    /// The unit refuses to be pushed aside by collisions.
    pub push_resistant: bool,
    /// The unit refuses pushes from enemy units specifically.
    pub block_enemy_pushing: bool,
    /// Whether anything can crush this unit at all.
    pub crushable: bool,
    /// Crush strength required to flatten this unit.
    pub crush_resistance: f32,
    /// Keep the model upright instead of aligning to the terrain.
    pub upright: bool,
}

impl UnitStats {
    /// Whether this unit type can drive backwards.
    #[must_use]
    pub fn can_reverse(&self) -> bool {
        self.max_reverse_speed > 0.0
    }
}

impl Default for UnitStats {
    fn default() -> Self {
        Self {
            max_speed: 2.0,
            max_reverse_speed: 0.0,
            acc_rate: 0.05,
            dec_rate: 0.1,
            turn_rate: 400.0,
            turn_in_place: true,
            turn_in_place_speed_limit: 0.2,
            turn_in_place_angle_limit: 10.0,
            slide_tolerance: 1.2,
            floats_on_water: false,
            waterline: 0.0,
            fall_speed: 0.2,
            min_collision_speed: 1.0,
            push_resistant: false,
            block_enemy_pushing: false,
            crushable: true,
            crush_resistance: 10.0,
            upright: false,
        }
    }
}

/// Keyboard-like state for a player piloting a unit directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirectControlState {
    /// Drive forward.
    pub forward: bool,
    /// Drive backward.
    pub back: bool,
    /// Turn left.
    pub left: bool,
    /// Turn right.
    pub right: bool,
}

// ============================================================================
// Orders
// ============================================================================

/// A queued order, as far as locomotion cares about it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Order {
    /// Move to a position.
    Move(Vec3),
    /// Build at a position (goal radius is the build range).
    Build(Vec3),
    /// Guard a unit.
    Guard(UnitId),
    /// Hold everything.
    Stop,
}

/// Order queue attached to a unit. The locomotion core inspects it (leading
/// order kind, queue length) and mutates it only through the narrow arrival
/// sequence in [`set_front_move_pos`](CommandQueue::set_front_move_pos).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandQueue {
    orders: VecDeque<Order>,
}

impl CommandQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            orders: VecDeque::new(),
        }
    }

    /// Append an order.
    pub fn push(&mut self, order: Order) {
        self.orders.push_back(order);
    }

    /// Replace the queue with a single order.
    pub fn set(&mut self, order: Order) {
        self.orders.clear();
        self.orders.push_back(order);
    }

    /// The order currently being executed.
    #[must_use]
    pub fn current(&self) -> Option<&Order> {
        self.orders.front()
    }

    /// Remove and return the current order.
    pub fn pop(&mut self) -> Option<Order> {
        self.orders.pop_front()
    }

    /// Drop all orders.
    pub fn clear(&mut self) {
        self.orders.clear();
    }

    /// Number of queued orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// True when the leading order is a move order (or the queue is empty).
    /// Build orders must keep their exact goal radius, so several tolerance
    /// inflations only apply when this holds.
    #[must_use]
    pub fn leading_is_move(&self) -> bool {
        matches!(self.orders.front(), None | Some(Order::Move(_)))
    }

    /// Whether any order beyond the front is another move order.
    #[must_use]
    pub fn has_more_move_orders(&self) -> bool {
        self.orders.iter().skip(1).any(|o| matches!(o, Order::Move(_)))
    }

    /// Update the front move order's target. Used on indirect arrival
    /// (e.g. goal-sharing collisions) so the order reflects where the unit
    /// actually stopped.
    pub fn set_front_move_pos(&mut self, pos: Vec3) {
        if let Some(Order::Move(p)) = self.orders.front_mut() {
            *p = pos;
        }
    }
}

// ============================================================================
// Unit record
// ============================================================================

/// A solid object owned by the simulation: a mobile ground unit when
/// `mover` is set, otherwise a structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Stable handle.
    pub id: UnitId,
    /// World position (y follows the terrain unless airborne).
    pub pos: Vec3,
    /// Forward basis vector.
    pub front: Vec3,
    /// Rightward basis vector.
    pub right: Vec3,
    /// Upward basis vector.
    pub up: Vec3,
    /// Facing as a short-int angle.
    pub heading: i16,
    /// Velocity in elmos per frame.
    pub speed: Vec3,
    /// Accumulated external impulse not yet converted into a skid.
    pub residual_impulse: Vec3,
    /// Ground / hovering / flying.
    pub phys_state: PhysState,
    /// Whether the engine is running (drives animation hooks).
    pub is_moving: bool,
    /// Mass in arbitrary units; drives push and crush contests.
    pub mass: f32,
    /// Hit points; collision and crush damage subtract from this.
    pub health: f32,
    /// Collision radius.
    pub radius: f32,
    /// Model height, for vertical collision filtering.
    pub height: f32,
    /// Owning team.
    pub team: u8,
    /// Alliance group; same value means allied.
    pub ally_team: u8,
    /// Footprint width in grid squares.
    pub xsize: i32,
    /// Footprint depth in grid squares.
    pub zsize: i32,
    /// Index into the move-class table; `None` marks a structure.
    pub move_class: Option<usize>,
    /// Structure with an exit yardmap (factories); collisions against it
    /// run in yardmap mode so units inside can drive out.
    pub is_factory: bool,
    /// Per-type locomotion limits.
    pub stats: UnitStats,
    /// Order queue.
    pub commands: CommandQueue,
    /// Still a nanoframe under construction.
    pub being_built: bool,
    /// Temporarily paralyzed.
    pub stunned: bool,
    /// Transport currently carrying this unit.
    pub transporter: Option<UnitId>,
    /// Transport this unit is walking into (collisions suspended).
    pub loading_transport: Option<UnitId>,
    /// Player-piloting state; `Some` routes the tick to direct control.
    pub direct_control: Option<DirectControlState>,
    /// Controlled-fall state after a transport drop.
    pub falling: bool,
    /// Ground locomotion state; `None` for structures.
    pub mover: Option<GroundMover>,
}

impl Unit {
    /// Whether the unit has a move class (is not a structure).
    #[must_use]
    pub fn is_mobile(&self) -> bool {
        self.move_class.is_some()
    }

    /// Footprint-derived radius with the given bounding scale.
    #[must_use]
    pub fn footprint_radius(&self, scale: f32) -> f32 {
        footprint_radius(self.xsize, self.zsize, scale)
    }

    /// Recompute the orientation basis from `heading`.
    ///
    /// With `Some(normal)` the basis is tilted onto the terrain surface
    /// (non-upright units); with `None` it stays world-upright.
    pub fn update_dir_vectors(&mut self, ground_normal: Option<Vec3>) {
        let wanted = vector_from_heading(self.heading);

        match ground_normal {
            Some(n) => {
                self.up = n;
                let front = wanted - n * wanted.dot(n);
                self.front = front.normalize_or_zero();
                if self.front == Vec3::ZERO {
                    self.front = wanted;
                }
            }
            None => {
                self.up = Vec3::Y;
                self.front = wanted;
            }
        }

        self.right = self.front.cross(self.up).normalize_or_zero();
    }
}

// ============================================================================
// Feature record
// ============================================================================

/// A map feature: wreck, rock, tree. Blocking features participate in
/// collision resolution and the blocking map; all features can be crushed
/// or shoved by skidding units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Stable handle.
    pub id: FeatureId,
    /// World position.
    pub pos: Vec3,
    /// Collision radius.
    pub radius: f32,
    /// Model height.
    pub height: f32,
    /// Mass; scaled way up in push contests so features barely move.
    pub mass: f32,
    /// Hit points.
    pub health: f32,
    /// Footprint width in grid squares.
    pub xsize: i32,
    /// Footprint depth in grid squares.
    pub zsize: i32,
    /// Whether the feature blocks movement at all.
    pub blocking: bool,
    /// Whether the feature is itself in motion (treated as static terrain
    /// by the regular resolver).
    pub is_moving: bool,
    /// Whether anything can crush this feature.
    pub crushable: bool,
    /// Crush strength required to flatten it.
    pub crush_resistance: f32,
    /// Residual velocity from skid impacts.
    pub speed: Vec3,
}

// ============================================================================
// Storage
// ============================================================================

/// Arena of unit slots with stable ids and deterministic iteration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitStorage {
    slots: Vec<Option<Unit>>,
}

impl UnitStorage {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Insert a unit, assigning and returning its id.
    pub fn insert(&mut self, mut unit: Unit) -> UnitId {
        let id = self.slots.len() as UnitId;
        unit.id = id;
        self.slots.push(Some(unit));
        id
    }

    /// Remove a unit by id.
    pub fn remove(&mut self, id: UnitId) -> Option<Unit> {
        self.slots.get_mut(id as usize).and_then(Option::take)
    }

    /// Get a unit by id.
    #[must_use]
    pub fn get(&self, id: UnitId) -> Option<&Unit> {
        self.slots.get(id as usize).and_then(Option::as_ref)
    }

    /// Get a unit mutably by id.
    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        self.slots.get_mut(id as usize).and_then(Option::as_mut)
    }

    /// Split-borrow two distinct units at once.
    ///
    /// Returns `None` if `a == b` or either slot is vacant.
    pub fn pair_mut(&mut self, a: UnitId, b: UnitId) -> Option<(&mut Unit, &mut Unit)> {
        if a == b {
            return None;
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        if hi as usize >= self.slots.len() {
            return None;
        }

        let (left, right) = self.slots.split_at_mut(hi as usize);
        let lo_unit = left[lo as usize].as_mut()?;
        let hi_unit = right[0].as_mut()?;

        if a < b {
            Some((lo_unit, hi_unit))
        } else {
            Some((hi_unit, lo_unit))
        }
    }

    /// Ids of all live units, ascending. The deterministic iteration order
    /// for every per-tick pass.
    #[must_use]
    pub fn sorted_ids(&self) -> Vec<UnitId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| i as UnitId))
            .collect()
    }

    /// Iterate over live units in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Number of live units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether the storage holds no units.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Arena of feature slots, mirroring [`UnitStorage`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureStorage {
    slots: Vec<Option<Feature>>,
}

impl FeatureStorage {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Insert a feature, assigning and returning its id.
    pub fn insert(&mut self, mut feature: Feature) -> FeatureId {
        let id = self.slots.len() as FeatureId;
        feature.id = id;
        self.slots.push(Some(feature));
        id
    }

    /// Remove a feature by id.
    pub fn remove(&mut self, id: FeatureId) -> Option<Feature> {
        self.slots.get_mut(id as usize).and_then(Option::take)
    }

    /// Get a feature by id.
    #[must_use]
    pub fn get(&self, id: FeatureId) -> Option<&Feature> {
        self.slots.get(id as usize).and_then(Option::as_ref)
    }

    /// Get a feature mutably by id.
    pub fn get_mut(&mut self, id: FeatureId) -> Option<&mut Feature> {
        self.slots.get_mut(id as usize).and_then(Option::as_mut)
    }

    /// Ids of all live features, ascending.
    #[must_use]
    pub fn sorted_ids(&self) -> Vec<FeatureId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| i as FeatureId))
            .collect()
    }

    /// Iterate over live features in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.slots.iter().filter_map(Option::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_unit() -> Unit {
        Unit {
            id: 0,
            pos: Vec3::ZERO,
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
        }
    }

    #[test]
    fn test_storage_ids_are_stable() {
        let mut units = UnitStorage::new();
        let a = units.insert(stub_unit());
        let b = units.insert(stub_unit());
        assert_eq!((a, b), (0, 1));

        units.remove(a);
        assert!(units.get(a).is_none());
        assert!(units.get(b).is_some());
        assert_eq!(units.sorted_ids(), vec![b]);
    }

    #[test]
    fn test_pair_mut_split_borrow() {
        let mut units = UnitStorage::new();
        let a = units.insert(stub_unit());
        let b = units.insert(stub_unit());

        let (ua, ub) = units.pair_mut(a, b).unwrap();
        ua.pos.x = 1.0;
        ub.pos.x = 2.0;
        assert_eq!(units.get(a).unwrap().pos.x, 1.0);
        assert_eq!(units.get(b).unwrap().pos.x, 2.0);

        // order-preserving in both directions
        let (ub, ua) = units.pair_mut(b, a).unwrap();
        assert_eq!(ub.pos.x, 2.0);
        assert_eq!(ua.pos.x, 1.0);

        assert!(units.pair_mut(a, a).is_none());
    }

    #[test]
    fn test_update_dir_vectors_flat() {
        let mut unit = stub_unit();
        unit.heading = 16384; // +x
        unit.update_dir_vectors(None);
        assert!((unit.front.x - 1.0).abs() < 1e-3);
        assert!(unit.front.z.abs() < 1e-3);
        assert_eq!(unit.up, Vec3::Y);
    }

    #[test]
    fn test_update_dir_vectors_on_slope_keeps_orthogonality() {
        let mut unit = stub_unit();
        unit.heading = 0;
        let normal = Vec3::new(0.3, 1.0, 0.0).normalize();
        unit.update_dir_vectors(Some(normal));

        assert!(unit.front.dot(unit.up).abs() < 1e-5);
        assert!(unit.front.dot(unit.right).abs() < 1e-5);
        assert!((unit.front.length() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_command_queue_leading_order() {
        let mut q = CommandQueue::new();
        assert!(q.leading_is_move());

        q.push(Order::Build(Vec3::ZERO));
        assert!(!q.leading_is_move());

        q.set(Order::Move(Vec3::new(10.0, 0.0, 0.0)));
        q.push(Order::Move(Vec3::new(20.0, 0.0, 0.0)));
        assert!(q.leading_is_move());
        assert!(q.has_more_move_orders());

        q.set_front_move_pos(Vec3::new(5.0, 0.0, 5.0));
        assert_eq!(q.current(), Some(&Order::Move(Vec3::new(5.0, 0.0, 5.0))));
    }
}
