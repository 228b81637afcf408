mod grid;

pub use grid::{CellCoord, SpatialGrid};
