use std::collections::HashMap;

use crate::entity::EntityId;

use super::messages::GhostState;

/// Ghost entries older than this are dropped.
pub const GHOST_STALE_MS: u64 = 200;

/// Ghost refresh cadence over the bus: every 3 ticks at 60 Hz ≈ 20 Hz.
pub const GHOST_EGRESS_INTERVAL_TICKS: u32 = 3;

#[derive(Debug, Clone, Copy)]
struct GhostEntry {
    local: EntityId,
    last_update_ms: u64,
}

/// Tracks read-only projections of neighbor-owned entities keyed by
/// (owning zone, remote entity id). The zone spawns/despawns the local
/// mirror entities; this table only maps identity and staleness.
#[derive(Debug, Default)]
pub struct GhostTable {
    ghosts: HashMap<(u32, u32), GhostEntry>,
}

pub enum GhostUpdate {
    /// A mirror entity must be spawned for this state.
    New,
    /// Existing mirror refreshed.
    Refreshed(EntityId),
}

impl GhostTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, source_zone: u32, remote_id: u32) -> Option<EntityId> {
        self.ghosts
            .get(&(source_zone, remote_id))
            .map(|entry| entry.local)
    }

    /// Applies one ghost refresh. Returns `New` when the caller must spawn
    /// a local mirror and then call [`GhostTable::insert`].
    pub fn apply(&mut self, source_zone: u32, state: &GhostState, now_ms: u64) -> GhostUpdate {
        match self.ghosts.get_mut(&(source_zone, state.remote_id)) {
            Some(entry) => {
                entry.last_update_ms = now_ms;
                GhostUpdate::Refreshed(entry.local)
            }
            None => GhostUpdate::New,
        }
    }

    pub fn insert(&mut self, source_zone: u32, remote_id: u32, local: EntityId, now_ms: u64) {
        self.ghosts.insert(
            (source_zone, remote_id),
            GhostEntry {
                local,
                last_update_ms: now_ms,
            },
        );
    }

    pub fn remove(&mut self, source_zone: u32, remote_id: u32) -> Option<EntityId> {
        self.ghosts
            .remove(&(source_zone, remote_id))
            .map(|entry| entry.local)
    }

    /// Drops entries not refreshed within [`GHOST_STALE_MS`]; returns the
    /// local entities to despawn.
    pub fn sweep_stale(&mut self, now_ms: u64) -> Vec<EntityId> {
        let mut stale = Vec::new();
        self.ghosts.retain(|_, entry| {
            if now_ms.saturating_sub(entry.last_update_ms) > GHOST_STALE_MS {
                stale.push(entry.local);
                false
            } else {
                true
            }
        });
        stale
    }

    /// Every ghost mirrored from one zone; used when a neighbor goes away.
    pub fn remove_zone(&mut self, source_zone: u32) -> Vec<EntityId> {
        let mut removed = Vec::new();
        self.ghosts.retain(|(zone, _), entry| {
            if *zone == source_zone {
                removed.push(entry.local);
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.ghosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ghosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityStore;
    use crate::math::FxVec3;

    fn state(remote_id: u32) -> GhostState {
        GhostState {
            remote_id,
            player_id: 1,
            kind: 0,
            team: 0,
            health: 100,
            pos: FxVec3::ZERO,
            vel: FxVec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    #[test]
    fn new_then_refresh() {
        let mut table = GhostTable::new();
        let mut store = EntityStore::new();

        assert!(matches!(table.apply(2, &state(7), 100), GhostUpdate::New));
        let local = store.spawn();
        table.insert(2, 7, local, 100);

        match table.apply(2, &state(7), 150) {
            GhostUpdate::Refreshed(id) => assert_eq!(id, local),
            GhostUpdate::New => panic!("expected refresh"),
        }
    }

    #[test]
    fn stale_ghosts_swept_after_200ms() {
        let mut table = GhostTable::new();
        let mut store = EntityStore::new();

        let fresh = store.spawn();
        let stale = store.spawn();
        table.insert(2, 1, stale, 100);
        table.insert(2, 2, fresh, 350);

        let swept = table.sweep_stale(400);
        assert_eq!(swept, vec![stale]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(2, 2), Some(fresh));
    }

    #[test]
    fn remove_zone_clears_all_its_ghosts() {
        let mut table = GhostTable::new();
        let mut store = EntityStore::new();

        let a = store.spawn();
        let b = store.spawn();
        let c = store.spawn();
        table.insert(2, 1, a, 0);
        table.insert(2, 2, b, 0);
        table.insert(3, 1, c, 0);

        let mut removed = table.remove_zone(2);
        removed.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(removed, expected);
        assert_eq!(table.len(), 1);
    }
}
