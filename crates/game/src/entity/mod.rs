mod components;
mod store;

pub use components::{
    CheatTrack, Combat, EntityKind, InputState, LifeState, NetLink, Ownership, Position, Rotation,
    Velocity,
};
pub use store::{ComponentPool, EntityId, EntityStore, join2};
