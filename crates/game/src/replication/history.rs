use std::collections::HashMap;

use crate::net::EntityRecord;

/// One second of world snapshots at 60 Hz.
pub const SNAPSHOT_HISTORY_TICKS: usize = 60;

/// Quantized world state at one tick: every replicable entity's wire
/// record, captured once after simulation and shared by all clients.
#[derive(Debug, Clone, Default)]
pub struct WorldCapture {
    pub tick: u32,
    pub records: HashMap<u32, EntityRecord>,
}

impl WorldCapture {
    pub fn new(tick: u32) -> Self {
        Self {
            tick,
            records: HashMap::new(),
        }
    }
}

/// Tick-indexed ring of world captures. Slot reuse is detected by the
/// stored tick, so a stale slot never masquerades as the requested one.
#[derive(Debug)]
pub struct SnapshotHistory {
    slots: Vec<Option<WorldCapture>>,
    capacity: usize,
}

impl Default for SnapshotHistory {
    fn default() -> Self {
        Self::new(SNAPSHOT_HISTORY_TICKS)
    }
}

impl SnapshotHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            capacity,
        }
    }

    pub fn push(&mut self, capture: WorldCapture) {
        let index = (capture.tick as usize) % self.capacity;
        self.slots[index] = Some(capture);
    }

    pub fn get(&self, tick: u32) -> Option<&WorldCapture> {
        let index = (tick as usize) % self.capacity;
        self.slots[index].as_ref().filter(|c| c.tick == tick)
    }

    pub fn latest(&self) -> Option<&WorldCapture> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref())
            .max_by_key(|c| c.tick)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_tick_is_exact() {
        let mut history = SnapshotHistory::default();
        for tick in 1..=100u32 {
            history.push(WorldCapture::new(tick));
        }

        assert!(history.get(100).is_some());
        assert!(history.get(41).is_some());
        // Evicted by ring reuse.
        assert!(history.get(40).is_none());
        assert_eq!(history.latest().unwrap().tick, 100);
    }

    #[test]
    fn stale_slot_not_returned() {
        let mut history = SnapshotHistory::new(8);
        history.push(WorldCapture::new(3));
        // Tick 11 shares slot 3 % 8.
        assert!(history.get(11).is_none());
    }
}
