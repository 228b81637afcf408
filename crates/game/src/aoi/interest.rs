use std::collections::HashMap;

use crate::entity::{ComponentPool, EntityId, Position};
use crate::math::FxVec3;
use crate::net::{MASK_ALL, MASK_ANIM, MASK_VELOCITY};
use crate::spatial::SpatialGrid;

#[derive(Debug, Clone)]
pub struct AoiConfig {
    pub near_m: f32,
    pub mid_m: f32,
    pub far_m: f32,
    /// Send intervals in ticks at 60 Hz: 20 / 10 / 5 Hz.
    pub near_interval_ticks: u32,
    pub mid_interval_ticks: u32,
    pub far_interval_ticks: u32,
    pub max_visible: usize,
}

impl Default for AoiConfig {
    fn default() -> Self {
        Self {
            near_m: 50.0,
            mid_m: 100.0,
            far_m: 200.0,
            near_interval_ticks: 3,
            mid_interval_ticks: 6,
            far_interval_ticks: 12,
            max_visible: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Near = 0,
    Mid = 1,
    Far = 2,
}

impl Tier {
    pub fn from_distance_sq(config: &AoiConfig, distance_sq: f32) -> Option<Tier> {
        if distance_sq <= config.near_m * config.near_m {
            Some(Tier::Near)
        } else if distance_sq <= config.mid_m * config.mid_m {
            Some(Tier::Mid)
        } else if distance_sq <= config.far_m * config.far_m {
            Some(Tier::Far)
        } else {
            None
        }
    }

    pub fn interval_ticks(self, config: &AoiConfig) -> u32 {
        match self {
            Tier::Near => config.near_interval_ticks,
            Tier::Mid => config.mid_interval_ticks,
            Tier::Far => config.far_interval_ticks,
        }
    }

    /// Field culling: mid drops animation, far drops animation and
    /// velocity (position coarsening is the codec's threshold).
    pub fn field_mask(self) -> u16 {
        match self {
            Tier::Near => MASK_ALL,
            Tier::Mid => MASK_ALL & !MASK_ANIM,
            Tier::Far => MASK_ALL & !(MASK_ANIM | MASK_VELOCITY),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VisibleEntry {
    pub tier: Tier,
    pub last_sent_tick: u32,
}

/// Per-tick interest output for one viewer.
#[derive(Debug, Default)]
pub struct InterestDelta {
    /// Entities due for replication this tick, with their tier.
    pub due: Vec<(EntityId, Tier)>,
    pub enters: Vec<EntityId>,
    /// Left the visible set; each produces an explicit removal entry.
    pub leaves: Vec<EntityId>,
}

/// Tracks one viewer's visible set across ticks: tier classification,
/// priority capping, per-tier send scheduling, and enter/leave deltas.
#[derive(Debug, Default)]
pub struct ViewerInterest {
    entries: HashMap<EntityId, VisibleEntry>,
    scratch: Vec<EntityId>,
}

impl ViewerInterest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visible_count(&self) -> usize {
        self.entries.len()
    }

    pub fn tier_of(&self, id: EntityId) -> Option<Tier> {
        self.entries.get(&id).map(|e| e.tier)
    }

    /// Computes the visible set for this tick. `interval_scale` stretches
    /// tier intervals under QoS degradation (1 = nominal, 2 = halved
    /// rates). The viewer's own entity is always near-tier.
    #[allow(clippy::too_many_arguments)]
    pub fn compute(
        &mut self,
        config: &AoiConfig,
        viewer_entity: EntityId,
        viewer_pos: FxVec3,
        spatial: &SpatialGrid,
        positions: &ComponentPool<Position>,
        current_tick: u32,
        interval_scale: u32,
    ) -> InterestDelta {
        self.scratch.clear();
        spatial.query_radius(viewer_pos, config.far_m, &mut self.scratch);

        let mut ranked: Vec<(Tier, f32, EntityId)> = Vec::with_capacity(self.scratch.len());
        for &id in &self.scratch {
            if id == viewer_entity {
                continue;
            }
            let Some(position) = positions.get(id) else {
                continue;
            };
            let distance_sq = viewer_pos.planar_distance_squared(position.pos);
            if let Some(tier) = Tier::from_distance_sq(config, distance_sq) {
                ranked.push((tier, distance_sq, id));
            }
        }

        // (tier, distance²) lexicographic priority, capped.
        ranked.sort_by(|a, b| (a.0, a.1).partial_cmp(&(b.0, b.1)).unwrap());
        ranked.truncate(config.max_visible.saturating_sub(1));
        ranked.push((Tier::Near, 0.0, viewer_entity));

        let mut delta = InterestDelta::default();
        let mut next: HashMap<EntityId, VisibleEntry> = HashMap::with_capacity(ranked.len());

        for (tier, _, id) in ranked {
            let previous = self.entries.get(&id);
            let entered = previous.is_none();
            let mut entry = previous.copied().unwrap_or(VisibleEntry {
                tier,
                last_sent_tick: 0,
            });
            entry.tier = tier;

            let interval = tier.interval_ticks(config).saturating_mul(interval_scale.max(1));
            let due = entered
                || entry.last_sent_tick == 0
                || current_tick.wrapping_sub(entry.last_sent_tick) >= interval;

            if entered {
                delta.enters.push(id);
            }
            if due {
                entry.last_sent_tick = current_tick;
                delta.due.push((id, tier));
            }
            next.insert(id, entry);
        }

        for id in self.entries.keys() {
            if !next.contains_key(id) {
                delta.leaves.push(*id);
            }
        }

        self.entries = next;
        delta
    }

    pub fn forget(&mut self, id: EntityId) {
        self.entries.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::entity::EntityStore;

    struct Fixture {
        store: EntityStore,
        spatial: SpatialGrid,
        positions: ComponentPool<Position>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: EntityStore::new(),
                spatial: SpatialGrid::default(),
                positions: ComponentPool::new(),
            }
        }

        fn spawn(&mut self, x: f32, z: f32) -> EntityId {
            let id = self.store.spawn();
            let pos = FxVec3::from_vec3(Vec3::new(x, 0.0, z));
            self.positions.insert(id, Position::new(pos, 0));
            self.spatial.insert(id, pos);
            id
        }
    }

    #[test]
    fn tier_classification_by_distance() {
        let config = AoiConfig::default();
        assert_eq!(Tier::from_distance_sq(&config, 30.0 * 30.0), Some(Tier::Near));
        assert_eq!(Tier::from_distance_sq(&config, 80.0 * 80.0), Some(Tier::Mid));
        assert_eq!(Tier::from_distance_sq(&config, 150.0 * 150.0), Some(Tier::Far));
        assert_eq!(Tier::from_distance_sq(&config, 250.0 * 250.0), None);
    }

    #[test]
    fn enters_and_leaves_tracked() {
        let config = AoiConfig::default();
        let mut f = Fixture::new();
        let viewer = f.spawn(0.0, 0.0);
        let other = f.spawn(10.0, 0.0);

        let mut interest = ViewerInterest::new();
        let delta = interest.compute(
            &config,
            viewer,
            FxVec3::ZERO,
            &f.spatial,
            &f.positions,
            1,
            1,
        );
        assert!(delta.enters.contains(&other));
        assert!(delta.leaves.is_empty());

        // Move the other entity out past far range.
        let gone = FxVec3::from_vec3(Vec3::new(500.0, 0.0, 0.0));
        f.spatial.update(other, gone);
        f.positions.get_mut(other).unwrap().pos = gone;

        let delta = interest.compute(
            &config,
            viewer,
            FxVec3::ZERO,
            &f.spatial,
            &f.positions,
            2,
            1,
        );
        assert_eq!(delta.leaves, vec![other]);
    }

    #[test]
    fn tier_intervals_gate_updates() {
        let config = AoiConfig::default();
        let mut f = Fixture::new();
        let viewer = f.spawn(0.0, 0.0);
        // Far-tier entity: 12-tick interval.
        let far = f.spawn(150.0, 0.0);

        let mut interest = ViewerInterest::new();
        let first = interest.compute(
            &config,
            viewer,
            FxVec3::ZERO,
            &f.spatial,
            &f.positions,
            1,
            1,
        );
        assert!(first.due.iter().any(|(id, _)| *id == far));

        // Next tick: not due yet.
        let second = interest.compute(
            &config,
            viewer,
            FxVec3::ZERO,
            &f.spatial,
            &f.positions,
            2,
            1,
        );
        assert!(!second.due.iter().any(|(id, _)| *id == far));

        // 12 ticks later it is.
        let third = interest.compute(
            &config,
            viewer,
            FxVec3::ZERO,
            &f.spatial,
            &f.positions,
            13,
            1,
        );
        assert!(third.due.iter().any(|(id, _)| *id == far));
    }

    #[test]
    fn qos_scale_stretches_intervals() {
        let config = AoiConfig::default();
        let mut f = Fixture::new();
        let viewer = f.spawn(0.0, 0.0);
        let near = f.spawn(10.0, 0.0);

        let mut interest = ViewerInterest::new();
        interest.compute(&config, viewer, FxVec3::ZERO, &f.spatial, &f.positions, 1, 2);

        // Nominal interval 3, scaled to 6: tick 4 not due, tick 7 due.
        let at4 = interest.compute(&config, viewer, FxVec3::ZERO, &f.spatial, &f.positions, 4, 2);
        assert!(!at4.due.iter().any(|(id, _)| *id == near));

        let at7 = interest.compute(&config, viewer, FxVec3::ZERO, &f.spatial, &f.positions, 7, 2);
        assert!(at7.due.iter().any(|(id, _)| *id == near));
    }

    #[test]
    fn visible_set_caps_by_priority() {
        let mut config = AoiConfig::default();
        config.max_visible = 5;
        let mut f = Fixture::new();
        let viewer = f.spawn(0.0, 0.0);

        for i in 0..10 {
            f.spawn(5.0 + i as f32 * 15.0, 0.0);
        }

        let mut interest = ViewerInterest::new();
        let delta = interest.compute(
            &config,
            viewer,
            FxVec3::ZERO,
            &f.spatial,
            &f.positions,
            1,
            1,
        );

        assert_eq!(interest.visible_count(), 5);
        // Self plus the four closest.
        assert!(delta.due.iter().any(|(id, _)| *id == viewer));
        assert_eq!(delta.due.len(), 5);
    }

    #[test]
    fn viewer_always_sees_itself() {
        let config = AoiConfig::default();
        let mut f = Fixture::new();
        let viewer = f.spawn(0.0, 0.0);

        let mut interest = ViewerInterest::new();
        let delta = interest.compute(
            &config,
            viewer,
            FxVec3::ZERO,
            &f.spatial,
            &f.positions,
            1,
            1,
        );
        assert_eq!(interest.tier_of(viewer), Some(Tier::Near));
        assert!(delta.due.iter().any(|(id, _)| *id == viewer));
    }

    #[test]
    fn far_tier_mask_drops_velocity_and_animation() {
        assert_eq!(Tier::Near.field_mask(), MASK_ALL);
        assert_eq!(Tier::Mid.field_mask() & MASK_ANIM, 0);
        assert_eq!(Tier::Far.field_mask() & (MASK_ANIM | MASK_VELOCITY), 0);
        assert_ne!(Tier::Far.field_mask() & crate::net::MASK_POSITION, 0);
    }
}
