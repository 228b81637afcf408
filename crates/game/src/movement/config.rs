use crate::math::WorldBounds;

#[derive(Debug, Clone)]
pub struct MovementConfig {
    pub base_speed: f32,
    pub sprint_multiplier: f32,

    /// Blend rate toward target velocity, per second.
    pub acceleration: f32,

    /// Velocity fraction removed per step with no directional input.
    pub friction_per_step: f32,

    /// Speeds below this snap to zero.
    pub stop_epsilon: f32,

    /// Multiplier on the kinematic maximum before a displacement is
    /// rejected as a speed violation.
    pub speed_tolerance: f32,

    pub collision_radius: f32,

    pub bounds: WorldBounds,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            base_speed: 6.0,
            sprint_multiplier: 1.5,
            acceleration: 10.0,
            friction_per_step: 0.15,
            stop_epsilon: 0.01,
            speed_tolerance: 1.2,
            collision_radius: 0.5,
            bounds: WorldBounds::default(),
        }
    }
}

impl MovementConfig {
    pub fn max_speed(&self) -> f32 {
        self.base_speed * self.sprint_multiplier
    }
}
