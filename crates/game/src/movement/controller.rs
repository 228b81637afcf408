use glam::Vec3;

use crate::math::FxVec3;
use crate::net::{InputFlags, InputFrame};

use super::MovementConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveOutcome {
    pub position: FxVec3,
    pub velocity: FxVec3,
}

/// Integrates `steps` fixed steps of the *same* stored input frame.
/// Replaying the stored frame for every elapsed step (instead of stretching
/// the latest one over the gap) is what closes the catch-up speed exploit.
pub fn integrate_steps(
    config: &MovementConfig,
    frame: &InputFrame,
    position: FxVec3,
    velocity: FxVec3,
    steps: u32,
    dt: f32,
) -> MoveOutcome {
    let mut pos = position.to_vec3();
    let mut vel = velocity.to_vec3();

    let wish = wish_direction(frame);
    let target = if wish.length_squared() > 0.0 {
        let speed = if frame.flags().contains(InputFlags::SPRINT) {
            config.base_speed * config.sprint_multiplier
        } else {
            config.base_speed
        };
        wish * speed
    } else {
        Vec3::ZERO
    };

    let blend = (config.acceleration * dt).clamp(0.0, 1.0);

    for _ in 0..steps {
        if target.length_squared() > 0.0 {
            vel = vel.lerp(target, blend);
        } else {
            vel *= 1.0 - config.friction_per_step;
            if vel.length() < config.stop_epsilon {
                vel = Vec3::ZERO;
            }
        }

        pos += vel * dt;
        pos = config.bounds.clamp(pos);
    }

    MoveOutcome {
        position: FxVec3::from_vec3(pos),
        velocity: FxVec3::from_vec3(vel),
    }
}

/// Direction flags rotated into world space by yaw, normalized.
fn wish_direction(frame: &InputFrame) -> Vec3 {
    let flags = frame.flags();
    let mut local = Vec3::ZERO;
    if flags.contains(InputFlags::FORWARD) {
        local.z += 1.0;
    }
    if flags.contains(InputFlags::BACK) {
        local.z -= 1.0;
    }
    if flags.contains(InputFlags::LEFT) {
        local.x -= 1.0;
    }
    if flags.contains(InputFlags::RIGHT) {
        local.x += 1.0;
    }

    if local.length_squared() < 0.001 {
        return Vec3::ZERO;
    }
    let local = local.normalize();

    let (sin_yaw, cos_yaw) = frame.yaw.sin_cos();
    Vec3::new(
        local.x * cos_yaw + local.z * sin_yaw,
        0.0,
        -local.x * sin_yaw + local.z * cos_yaw,
    )
}

pub fn max_displacement(config: &MovementConfig, elapsed_ms: u64) -> f32 {
    config.max_speed() * (elapsed_ms as f32 / 1000.0) * config.speed_tolerance
}

/// True when the displacement is kinematically reachable inside
/// `elapsed_ms`. False is a SPEED_HACK signal; the caller reverts to `p0`.
pub fn validate_displacement(
    config: &MovementConfig,
    p0: FxVec3,
    p1: FxVec3,
    elapsed_ms: u64,
) -> bool {
    p0.distance(p1) <= max_displacement(config, elapsed_ms)
}

/// Soft collision: when two entities overlap, push each half the overlap
/// apart along the connecting vector. Coincident entities separate along x.
pub fn resolve_overlap(
    a_pos: FxVec3,
    b_pos: FxVec3,
    a_radius: f32,
    b_radius: f32,
) -> Option<(FxVec3, FxVec3)> {
    let a = a_pos.to_vec3();
    let b = b_pos.to_vec3();
    let combined = a_radius + b_radius;

    let delta = b - a;
    let dist_sq = delta.length_squared();
    if dist_sq >= combined * combined {
        return None;
    }

    let dist = dist_sq.sqrt();
    let dir = if dist > 1e-6 { delta / dist } else { Vec3::X };
    let push = (combined - dist) * 0.5;

    Some((
        FxVec3::from_vec3(a - dir * push),
        FxVec3::from_vec3(b + dir * push),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::InputFlags;

    const DT: f32 = 1.0 / 60.0;

    fn forward_frame(sprint: bool) -> InputFrame {
        let mut flags = InputFlags::FORWARD;
        if sprint {
            flags |= InputFlags::SPRINT;
        }
        InputFrame {
            sequence: 1,
            client_timestamp: 0,
            flags: flags.bits(),
            yaw: 0.0,
            pitch: 0.0,
            target_id: 0,
            last_received_tick: 0,
        }
    }

    #[test]
    fn accelerates_toward_base_speed() {
        let config = MovementConfig::default();
        let frame = forward_frame(false);

        let mut pos = FxVec3::ZERO;
        let mut vel = FxVec3::ZERO;
        for _ in 0..120 {
            let out = integrate_steps(&config, &frame, pos, vel, 1, DT);
            pos = out.position;
            vel = out.velocity;
        }

        let speed = vel.to_vec3().length();
        assert!((speed - config.base_speed).abs() < 0.2, "speed {}", speed);
        assert!(pos.to_vec3().z > 0.0);
    }

    #[test]
    fn sprint_caps_at_multiplier() {
        let config = MovementConfig::default();
        let frame = forward_frame(true);

        let mut vel = FxVec3::ZERO;
        for _ in 0..240 {
            vel = integrate_steps(&config, &frame, FxVec3::ZERO, vel, 1, DT).velocity;
        }

        let speed = vel.to_vec3().length();
        assert!(speed <= config.max_speed() + 0.01);
        assert!((speed - config.max_speed()).abs() < 0.2);
    }

    #[test]
    fn friction_stops_coasting_entity() {
        let config = MovementConfig::default();
        let idle = InputFrame::default();

        let mut vel = FxVec3::from_vec3(Vec3::new(6.0, 0.0, 0.0));
        for _ in 0..120 {
            vel = integrate_steps(&config, &idle, FxVec3::ZERO, vel, 1, DT).velocity;
        }

        assert_eq!(vel, FxVec3::ZERO);
    }

    #[test]
    fn multiple_steps_replay_same_input() {
        let config = MovementConfig::default();
        let frame = forward_frame(false);

        let stepped = integrate_steps(&config, &frame, FxVec3::ZERO, FxVec3::ZERO, 3, DT);

        let mut pos = FxVec3::ZERO;
        let mut vel = FxVec3::ZERO;
        for _ in 0..3 {
            let out = integrate_steps(&config, &frame, pos, vel, 1, DT);
            pos = out.position;
            vel = out.velocity;
        }

        assert_eq!(stepped.position, pos);
        assert_eq!(stepped.velocity, vel);
    }

    #[test]
    fn yaw_rotates_movement() {
        let config = MovementConfig::default();
        let mut frame = forward_frame(false);
        frame.yaw = std::f32::consts::FRAC_PI_2;

        let mut pos = FxVec3::ZERO;
        let mut vel = FxVec3::ZERO;
        for _ in 0..60 {
            let out = integrate_steps(&config, &frame, pos, vel, 1, DT);
            pos = out.position;
            vel = out.velocity;
        }

        let p = pos.to_vec3();
        assert!(p.x.abs() > p.z.abs(), "expected x-dominant motion: {:?}", p);
    }

    #[test]
    fn position_clamps_to_world_bounds() {
        let mut config = MovementConfig::default();
        config.bounds = crate::math::WorldBounds::new(Vec3::ZERO, Vec3::splat(10.0));
        let frame = forward_frame(true);

        let mut pos = FxVec3::from_vec3(Vec3::new(5.0, 0.0, 9.0));
        let mut vel = FxVec3::ZERO;
        for _ in 0..600 {
            let out = integrate_steps(&config, &frame, pos, vel, 1, DT);
            pos = out.position;
            vel = out.velocity;
        }

        assert!(pos.to_vec3().z <= 10.0);
    }

    #[test]
    fn displacement_validation_tolerance() {
        let config = MovementConfig::default();
        let p0 = FxVec3::ZERO;

        // 0.15 m in one tick: legal at sprint (9 m/s * 16.67 ms * 1.2 = 0.18 m).
        let legal = FxVec3::from_vec3(Vec3::new(0.15, 0.0, 0.0));
        assert!(validate_displacement(&config, p0, legal, 17));

        // 3 m in one tick is a blatant speed hack.
        let teleport = FxVec3::from_vec3(Vec3::new(3.0, 0.0, 0.0));
        assert!(!validate_displacement(&config, p0, teleport, 17));
    }

    #[test]
    fn overlap_pushes_apart() {
        let a = FxVec3::ZERO;
        let b = FxVec3::from_vec3(Vec3::new(0.5, 0.0, 0.0));

        let (na, nb) = resolve_overlap(a, b, 0.5, 0.5).unwrap();
        let dist = na.distance(nb);
        assert!((dist - 1.0).abs() < 0.01, "distance after push {}", dist);

        // Disjoint pairs are untouched.
        let c = FxVec3::from_vec3(Vec3::new(5.0, 0.0, 0.0));
        assert!(resolve_overlap(a, c, 0.5, 0.5).is_none());
    }
}
