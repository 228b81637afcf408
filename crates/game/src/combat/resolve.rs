use glam::Vec3;

use crate::entity::{Combat, ComponentPool, EntityId, Position};
use crate::history::HistoryStore;
use crate::math::FxVec3;
use crate::spatial::SpatialGrid;

use super::lag::LagCompensator;

#[derive(Debug, Clone)]
pub struct CombatConfig {
    pub melee_range: f32,
    pub melee_arc_radians: f32,
    pub ranged_hit_radius: f32,
    pub ranged_max_range: f32,
    pub base_damage: u8,
    pub damage_variance: f32,
    pub crit_chance: f32,
    pub crit_multiplier: f32,
    pub attack_cooldown_ms: u64,
    pub friendly_fire: bool,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            melee_range: 2.5,
            melee_arc_radians: 60.0_f32.to_radians(),
            ranged_hit_radius: 0.5,
            ranged_max_range: 100.0,
            base_damage: 20,
            damage_variance: 0.1,
            crit_chance: 0.1,
            crit_multiplier: 1.5,
            attack_cooldown_ms: 500,
            friendly_fire: false,
        }
    }
}

/// Read-only view the combat phase borrows from the zone. The store is
/// passed by reference; the lag compensator only ever reads history.
pub struct CombatView<'a> {
    pub spatial: &'a SpatialGrid,
    pub history: &'a HistoryStore,
    pub positions: &'a ComponentPool<Position>,
    pub combat: &'a ComponentPool<Combat>,
    pub lag: &'a LagCompensator,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeleeHit {
    pub target: EntityId,
    pub location: FxVec3,
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitOutcome {
    /// `applied` is the health actually removed, so damage events always
    /// sum to the victims' health delta even on overkill.
    Applied { lethal: bool, applied: u8 },
    /// Target died between the compensated hit test and application.
    Late,
}

/// xorshift64* roll source, seeded per zone. Deterministic under a fixed
/// seed, which keeps combat tests reproducible.
#[derive(Debug, Clone)]
pub struct CombatRng(u64);

impl CombatRng {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Uniform in [0, 1).
    pub fn unit(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    pub fn roll_damage(&mut self, config: &CombatConfig) -> (u8, bool) {
        let variance = 1.0 + (self.unit() * 2.0 - 1.0) * config.damage_variance;
        let crit = self.unit() < config.crit_chance;
        let mut damage = config.base_damage as f32 * variance;
        if crit {
            damage *= config.crit_multiplier;
        }
        (damage.round().clamp(1.0, 255.0) as u8, crit)
    }
}

/// Cone test against historical positions. Candidates come from the
/// spatial index at present positions padded by the rewind distance, then
/// filter by team, liveness, and cone membership at `attack_time_ms`.
pub fn resolve_melee(
    config: &CombatConfig,
    view: &CombatView<'_>,
    attacker: EntityId,
    attacker_pos: FxVec3,
    yaw: f32,
    attack_time_ms: u64,
) -> Vec<MeleeHit> {
    let attacker_team = view.combat.get(attacker).map(|c| c.team_id);
    let origin = attacker_pos.to_vec3();
    let facing = Vec3::new(yaw.sin(), 0.0, yaw.cos());
    let half_arc_cos = (config.melee_arc_radians * 0.5).cos();

    let mut candidates = Vec::new();
    // Pad the query so a target that has since moved away is still found.
    view.spatial
        .query_radius(attacker_pos, config.melee_range + 4.0, &mut candidates);

    let mut hits = Vec::new();
    for target in candidates {
        if target == attacker {
            continue;
        }
        let Some(target_combat) = view.combat.get(target) else {
            continue;
        };
        if !target_combat.is_alive() {
            continue;
        }
        if !config.friendly_fire
            && attacker_team.is_some_and(|team| team == target_combat.team_id)
        {
            continue;
        }

        let Some(sample) = view.lag.sample(view.history, target, attack_time_ms) else {
            continue;
        };
        let then = sample.position.to_vec3();

        let to_target = Vec3::new(then.x - origin.x, 0.0, then.z - origin.z);
        let distance = to_target.length();
        if distance > config.melee_range {
            continue;
        }
        if distance > 1e-4 && to_target.normalize().dot(facing) < half_arc_cos {
            continue;
        }

        hits.push(MeleeHit {
            target,
            location: sample.position,
            distance,
        });
    }

    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    hits
}

/// Ray-sphere test against historical positions; returns the closest
/// intersecting target in aim-line order.
pub fn resolve_ranged(
    config: &CombatConfig,
    view: &CombatView<'_>,
    attacker: EntityId,
    origin: FxVec3,
    yaw: f32,
    pitch: f32,
    attack_time_ms: u64,
) -> Option<MeleeHit> {
    let attacker_team = view.combat.get(attacker).map(|c| c.team_id);
    let start = origin.to_vec3();
    let direction = aim_direction(yaw, pitch);

    let mut candidates = Vec::new();
    view.spatial
        .query_radius(origin, config.ranged_max_range, &mut candidates);

    let mut best: Option<(f32, MeleeHit)> = None;
    for target in candidates {
        if target == attacker {
            continue;
        }
        let Some(target_combat) = view.combat.get(target) else {
            continue;
        };
        if !target_combat.is_alive() {
            continue;
        }
        if !config.friendly_fire
            && attacker_team.is_some_and(|team| team == target_combat.team_id)
        {
            continue;
        }

        let Some(sample) = view.lag.sample(view.history, target, attack_time_ms) else {
            continue;
        };
        let center = sample.position.to_vec3();

        let Some(t) = ray_sphere(start, direction, center, config.ranged_hit_radius) else {
            continue;
        };
        if t > config.ranged_max_range {
            continue;
        }

        if best.as_ref().is_none_or(|(best_t, _)| t < *best_t) {
            best = Some((
                t,
                MeleeHit {
                    target,
                    location: sample.position,
                    distance: t,
                },
            ));
        }
    }

    best.map(|(_, hit)| hit)
}

/// Applies damage at present time. A target that died since the hit test
/// yields `Late` and no state change.
pub fn apply_damage(
    combat: &mut ComponentPool<Combat>,
    target: EntityId,
    amount: u8,
) -> Option<HitOutcome> {
    let entry = combat.get_mut(target)?;
    if !entry.is_alive() {
        return Some(HitOutcome::Late);
    }
    let applied = amount.min(entry.health_percent);
    let lethal = entry.apply_damage(amount);
    Some(HitOutcome::Applied { lethal, applied })
}

fn aim_direction(yaw: f32, pitch: f32) -> Vec3 {
    let cos_pitch = pitch.cos();
    Vec3::new(yaw.sin() * cos_pitch, -pitch.sin(), yaw.cos() * cos_pitch).normalize()
}

fn ray_sphere(origin: Vec3, direction: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let to_center = center - origin;
    let projection = to_center.dot(direction);
    if projection < 0.0 {
        return None;
    }
    let closest_sq = to_center.length_squared() - projection * projection;
    let radius_sq = radius * radius;
    if closest_sq > radius_sq {
        return None;
    }
    let offset = (radius_sq - closest_sq).sqrt();
    Some((projection - offset).max(0.0))
}
