//! Error types for the locomotion core.

use thiserror::Error;

use crate::unit::{FeatureId, UnitId};

/// Result type alias using [`MoveError`].
pub type Result<T> = std::result::Result<T, MoveError>;

/// Top-level error type for all locomotion-core errors.
///
/// These cover API misuse and IO-boundary failures only. Locomotion
/// failures (no path, stall, terminal waypoint) are progress-state
/// transitions published on the event queue, never `Err` values.
#[derive(Debug, Error)]
pub enum MoveError {
    /// Unknown unit handle.
    #[error("unit not found: {0}")]
    UnitNotFound(UnitId),

    /// Unknown feature handle.
    #[error("feature not found: {0}")]
    FeatureNotFound(FeatureId),

    /// The unit exists but has no ground mover attached.
    #[error("unit {0} has no ground mover")]
    NotAMover(UnitId),

    /// Unknown move-class index in a spawn request.
    #[error("invalid move class: {0}")]
    InvalidMoveClass(usize),

    /// Snapshot encode/decode failure.
    #[error("snapshot error: {0}")]
    Snapshot(String),
}
