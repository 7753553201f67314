//! Spatial index over units and features.
//!
//! A coarse bucket grid. Unit buckets are rebuilt at the start of every
//! tick (insertion in ascending id keeps the contents deterministic);
//! feature buckets are maintained incrementally with an explicit
//! remove-before-move / add-after-move protocol, because the collision
//! resolver relocates features mid-query.
//!
//! All `*_exact` queries re-check live positions against the requested
//! radius, so intra-tick position nudges cannot produce false positives.

use glam::Vec3;

use crate::math::sq_length_2d;
use crate::unit::{FeatureId, FeatureStorage, SolidRef, UnitId, UnitStorage};

/// Bucket edge length in elmos. Far larger than any per-tick displacement.
const CELL_SIZE: f32 = 128.0;

/// Bucket-grid spatial index.
#[derive(Debug, Clone)]
pub struct QuadField {
    xcells: i32,
    zcells: i32,
    unit_cells: Vec<Vec<UnitId>>,
    feature_cells: Vec<Vec<FeatureId>>,
}

impl Default for QuadField {
    /// Single-cell placeholder; replaced by a properly sized index on
    /// construction and after deserialization.
    fn default() -> Self {
        Self::new(CELL_SIZE, CELL_SIZE)
    }
}

impl QuadField {
    /// Create an index covering a map of the given world size.
    #[must_use]
    pub fn new(width: f32, depth: f32) -> Self {
        let xcells = ((width / CELL_SIZE).ceil() as i32).max(1);
        let zcells = ((depth / CELL_SIZE).ceil() as i32).max(1);
        Self {
            xcells,
            zcells,
            unit_cells: vec![Vec::new(); (xcells * zcells) as usize],
            feature_cells: vec![Vec::new(); (xcells * zcells) as usize],
        }
    }

    fn cell_of(&self, pos: Vec3) -> usize {
        let cx = ((pos.x / CELL_SIZE) as i32).clamp(0, self.xcells - 1);
        let cz = ((pos.z / CELL_SIZE) as i32).clamp(0, self.zcells - 1);
        (cz * self.xcells + cx) as usize
    }

    /// Drop and re-insert every unit. Called once per tick before updates.
    pub fn rebuild_units(&mut self, units: &UnitStorage) {
        for cell in &mut self.unit_cells {
            cell.clear();
        }
        for unit in units.iter() {
            let idx = self.cell_of(unit.pos);
            self.unit_cells[idx].push(unit.id);
        }
    }

    /// Drop and re-insert every feature. Used after deserialization.
    pub fn rebuild_features(&mut self, features: &FeatureStorage) {
        for cell in &mut self.feature_cells {
            cell.clear();
        }
        for feature in features.iter() {
            let idx = self.cell_of(feature.pos);
            self.feature_cells[idx].push(feature.id);
        }
    }

    /// Register a feature at `pos`.
    pub fn add_feature(&mut self, id: FeatureId, pos: Vec3) {
        let idx = self.cell_of(pos);
        if !self.feature_cells[idx].contains(&id) {
            self.feature_cells[idx].push(id);
        }
    }

    /// Unregister a feature currently at `pos`.
    pub fn remove_feature(&mut self, id: FeatureId, pos: Vec3) {
        let idx = self.cell_of(pos);
        self.feature_cells[idx].retain(|f| *f != id);
    }

    fn cell_range(&self, center: Vec3, radius: f32) -> (i32, i32, i32, i32) {
        // one extra cell of slack absorbs intra-tick drift
        let pad = radius + CELL_SIZE;
        let x0 = (((center.x - pad) / CELL_SIZE) as i32).clamp(0, self.xcells - 1);
        let x1 = (((center.x + pad) / CELL_SIZE) as i32).clamp(0, self.xcells - 1);
        let z0 = (((center.z - pad) / CELL_SIZE) as i32).clamp(0, self.zcells - 1);
        let z1 = (((center.z + pad) / CELL_SIZE) as i32).clamp(0, self.zcells - 1);
        (x0, x1, z0, z1)
    }

    /// Units whose live position lies within `radius` (2D) of `center`,
    /// ascending by id.
    #[must_use]
    pub fn units_exact(&self, units: &UnitStorage, center: Vec3, radius: f32) -> Vec<UnitId> {
        let (x0, x1, z0, z1) = self.cell_range(center, radius);
        let mut found = Vec::new();

        for cz in z0..=z1 {
            for cx in x0..=x1 {
                for &id in &self.unit_cells[(cz * self.xcells + cx) as usize] {
                    if let Some(unit) = units.get(id) {
                        if sq_length_2d(unit.pos - center) <= radius * radius {
                            found.push(id);
                        }
                    }
                }
            }
        }

        found.sort_unstable();
        found.dedup();
        found
    }

    /// Features whose live position lies within `radius` (2D) of `center`,
    /// ascending by id.
    #[must_use]
    pub fn features_exact(
        &self,
        features: &FeatureStorage,
        center: Vec3,
        radius: f32,
    ) -> Vec<FeatureId> {
        let (x0, x1, z0, z1) = self.cell_range(center, radius);
        let mut found = Vec::new();

        for cz in z0..=z1 {
            for cx in x0..=x1 {
                for &id in &self.feature_cells[(cz * self.xcells + cx) as usize] {
                    if let Some(feature) = features.get(id) {
                        if sq_length_2d(feature.pos - center) <= radius * radius {
                            found.push(id);
                        }
                    }
                }
            }
        }

        found.sort_unstable();
        found.dedup();
        found
    }

    /// All solids within `radius` of `center`: units first, then features,
    /// each ascending by id.
    #[must_use]
    pub fn solids_exact(
        &self,
        units: &UnitStorage,
        features: &FeatureStorage,
        center: Vec3,
        radius: f32,
    ) -> Vec<SolidRef> {
        let mut found: Vec<SolidRef> = self
            .units_exact(units, center, radius)
            .into_iter()
            .map(SolidRef::Unit)
            .collect();
        found.extend(
            self.features_exact(features, center, radius)
                .into_iter()
                .map(SolidRef::Feature),
        );
        found
    }
}
