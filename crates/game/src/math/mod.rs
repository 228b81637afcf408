mod fixed;

pub use fixed::{Fx, FxVec3, WorldBounds};
