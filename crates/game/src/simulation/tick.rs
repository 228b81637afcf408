pub const TICK_RATE_HZ: u32 = 60;

/// Fixed-timestep accumulator: wall-clock deltas in, whole ticks out. The
/// accumulator clamp bounds catch-up after a stall so the loop never
/// spirals.
pub struct FixedTimestep {
    tick_rate: u32,
    dt: f32,
    accumulator: f32,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick_rate,
            dt: 1.0 / tick_rate as f32,
            accumulator: 0.0,
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn dt_ms(&self) -> u64 {
        (self.dt * 1000.0).round() as u64
    }

    pub fn accumulate(&mut self, delta_secs: f32) {
        self.accumulator += delta_secs.min(0.25);
    }

    pub fn should_tick(&self) -> bool {
        self.accumulator >= self.dt
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    pub fn alpha(&self) -> f32 {
        self.accumulator / self.dt
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}
