mod config;
mod controller;

pub use config::MovementConfig;
pub use controller::{
    MoveOutcome, integrate_steps, max_displacement, resolve_overlap, validate_displacement,
};
