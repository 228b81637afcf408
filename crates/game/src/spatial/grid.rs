use std::collections::HashMap;

use crate::entity::EntityId;
use crate::math::{Fx, FxVec3};

pub const DEFAULT_CELL_SIZE: f32 = 32.0;

/// Grid cell on the (x, z) plane. Cell math runs on raw fixed-point units
/// so two zones always bucket the same position identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellCoord {
    pub x: i32,
    pub z: i32,
}

/// Uniform-grid hash from 2D cell to entity set. Insert and remove are
/// O(1); range queries visit the square of cells covering the radius.
/// Tick-thread only.
#[derive(Debug)]
pub struct SpatialGrid {
    cell_units: i32,
    cells: HashMap<CellCoord, Vec<EntityId>>,
    positions: HashMap<EntityId, CellCoord>,
}

impl SpatialGrid {
    pub fn new(cell_size: f32) -> Self {
        let cell_units = (Fx::from_f32(cell_size).raw()).max(1);
        Self {
            cell_units,
            cells: HashMap::new(),
            positions: HashMap::new(),
        }
    }

    pub fn cell_of(&self, pos: FxVec3) -> CellCoord {
        CellCoord {
            x: pos.x.raw().div_euclid(self.cell_units),
            z: pos.z.raw().div_euclid(self.cell_units),
        }
    }

    pub fn insert(&mut self, id: EntityId, pos: FxVec3) {
        let cell = self.cell_of(pos);
        if let Some(old) = self.positions.insert(id, cell) {
            if old == cell {
                return;
            }
            self.remove_from_cell(id, old);
        }
        self.cells.entry(cell).or_default().push(id);
    }

    pub fn remove(&mut self, id: EntityId) {
        if let Some(cell) = self.positions.remove(&id) {
            self.remove_from_cell(id, cell);
        }
    }

    /// Incremental rebuild: cheap no-op while the entity stays in its cell.
    pub fn update(&mut self, id: EntityId, new_pos: FxVec3) {
        let new_cell = self.cell_of(new_pos);
        match self.positions.get(&id) {
            Some(&old_cell) if old_cell == new_cell => {}
            Some(&old_cell) => {
                self.remove_from_cell(id, old_cell);
                self.positions.insert(id, new_cell);
                self.cells.entry(new_cell).or_default().push(id);
            }
            None => self.insert(id, new_pos),
        }
    }

    /// Collects every entity in the square of cells covering `radius`
    /// around `center`. Callers filter by exact distance afterwards.
    pub fn query_radius(&self, center: FxVec3, radius: f32, out: &mut Vec<EntityId>) {
        let center_cell = self.cell_of(center);
        let radius_units = Fx::from_f32(radius.max(0.0)).raw();
        let span = radius_units.div_euclid(self.cell_units) + 1;

        for cz in (center_cell.z - span)..=(center_cell.z + span) {
            for cx in (center_cell.x - span)..=(center_cell.x + span) {
                if let Some(ids) = self.cells.get(&CellCoord { x: cx, z: cz }) {
                    out.extend_from_slice(ids);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn remove_from_cell(&mut self, id: EntityId, cell: CellCoord) {
        if let Some(ids) = self.cells.get_mut(&cell) {
            if let Some(slot) = ids.iter().position(|&e| e == id) {
                ids.swap_remove(slot);
            }
            if ids.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::entity::EntityStore;

    fn at(x: f32, z: f32) -> FxVec3 {
        FxVec3::from_vec3(Vec3::new(x, 0.0, z))
    }

    #[test]
    fn query_finds_neighbors_within_radius() {
        let mut store = EntityStore::new();
        let mut grid = SpatialGrid::default();

        let near = store.spawn();
        let far = store.spawn();
        grid.insert(near, at(10.0, 10.0));
        grid.insert(far, at(500.0, 500.0));

        let mut found = Vec::new();
        grid.query_radius(at(0.0, 0.0), 50.0, &mut found);

        assert!(found.contains(&near));
        assert!(!found.contains(&far));
    }

    #[test]
    fn update_moves_between_cells() {
        let mut store = EntityStore::new();
        let mut grid = SpatialGrid::default();

        let id = store.spawn();
        grid.insert(id, at(0.0, 0.0));
        grid.update(id, at(100.0, 0.0));

        let mut found = Vec::new();
        grid.query_radius(at(0.0, 0.0), 10.0, &mut found);
        assert!(found.is_empty());

        found.clear();
        grid.query_radius(at(100.0, 0.0), 10.0, &mut found);
        assert_eq!(found, vec![id]);
    }

    #[test]
    fn update_within_cell_is_stable() {
        let mut store = EntityStore::new();
        let mut grid = SpatialGrid::default();

        let id = store.spawn();
        grid.insert(id, at(1.0, 1.0));
        grid.update(id, at(2.0, 2.0));

        let mut found = Vec::new();
        grid.query_radius(at(0.0, 0.0), 5.0, &mut found);
        assert_eq!(found, vec![id]);
    }

    #[test]
    fn negative_coordinates_bucket_consistently() {
        let mut store = EntityStore::new();
        let mut grid = SpatialGrid::default();

        let id = store.spawn();
        grid.insert(id, at(-1.0, -1.0));

        let mut found = Vec::new();
        grid.query_radius(at(-5.0, -5.0), 16.0, &mut found);
        assert_eq!(found, vec![id]);
    }

    #[test]
    fn remove_clears_entity() {
        let mut store = EntityStore::new();
        let mut grid = SpatialGrid::default();

        let id = store.spawn();
        grid.insert(id, at(0.0, 0.0));
        grid.remove(id);
        assert!(grid.is_empty());

        let mut found = Vec::new();
        grid.query_radius(at(0.0, 0.0), 10.0, &mut found);
        assert!(found.is_empty());
    }
}
