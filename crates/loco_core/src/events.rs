//! Per-tick event queue.
//!
//! The core never dispatches callbacks mid-update. Everything observable
//! (collisions, arrivals, failures, script hooks) is appended here in
//! deterministic order and drained by the host after
//! [`Simulation::tick`](crate::simulation::Simulation::tick) returns.

use glam::Vec3;

use crate::unit::{FeatureId, UnitId};

/// Something the locomotion core wants subscribers to know about.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveEvent {
    /// The unit's position changed this tick.
    UnitMoved {
        /// Unit that moved.
        unit: UnitId,
    },
    /// The unit reached its movement goal.
    UnitArrived {
        /// Unit that arrived.
        unit: UnitId,
    },
    /// The unit gave up on its movement goal.
    UnitMoveFailed {
        /// Unit that failed.
        unit: UnitId,
    },
    /// Two units collided (before any push response was applied).
    UnitUnitCollision {
        /// The moving unit being resolved.
        collider: UnitId,
        /// The unit it ran into.
        collidee: UnitId,
    },
    /// A unit collided with a feature.
    UnitFeatureCollision {
        /// The moving unit being resolved.
        collider: UnitId,
        /// The feature it ran into.
        collidee: FeatureId,
    },
    /// A unit was crushed by a heavier mover.
    UnitCrushed {
        /// The flattened unit.
        victim: UnitId,
        /// The unit that drove over it.
        crusher: UnitId,
        /// Impulse carried into the kill.
        impulse: Vec3,
    },
    /// A feature was crushed.
    FeatureCrushed {
        /// The flattened feature.
        victim: FeatureId,
        /// The unit that drove over it.
        crusher: UnitId,
    },
    /// Script hook: the engine started (play walk/drive animation).
    StartedMoving {
        /// Unit whose engine started.
        unit: UnitId,
    },
    /// Script hook: the engine stopped.
    StoppedMoving {
        /// Unit whose engine stopped.
        unit: UnitId,
    },
    /// Script hook: a dropped unit touched down (stop parachute animation).
    Landed {
        /// Unit that landed.
        unit: UnitId,
    },
}

/// Events generated during one simulation tick, in emission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickEvents {
    /// Ordered event stream.
    pub events: Vec<MoveEvent>,
    /// Units that died this tick (crush kills, collision damage).
    pub deaths: Vec<UnitId>,
    /// Features destroyed this tick.
    pub feature_deaths: Vec<FeatureId>,
}

impl TickEvents {
    /// Append an event.
    pub fn push(&mut self, event: MoveEvent) {
        self.events.push(event);
    }

    /// Whether nothing at all happened.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.deaths.is_empty() && self.feature_deaths.is_empty()
    }

    /// Count events matching a predicate.
    #[must_use]
    pub fn count_matching(&self, pred: impl Fn(&MoveEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}
