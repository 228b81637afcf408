use std::collections::HashMap;
use std::sync::RwLock;

use crate::entity::EntityId;
use crate::math::FxVec3;

/// Two seconds of samples at 60 Hz.
pub const RING_CAPACITY: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistorySample {
    pub timestamp_ms: u64,
    pub position: FxVec3,
    pub velocity: FxVec3,
    pub yaw: f32,
    pub pitch: f32,
}

/// Append-only ring of authoritative post-physics samples. Timestamps are
/// monotone; a non-monotone push is dropped rather than rewriting history.
#[derive(Debug)]
pub struct PositionRing {
    samples: Vec<HistorySample>,
    head: usize,
}

impl Default for PositionRing {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionRing {
    pub fn new() -> Self {
        Self {
            samples: Vec::with_capacity(RING_CAPACITY),
            head: 0,
        }
    }

    pub fn push(&mut self, sample: HistorySample) -> bool {
        if let Some(latest) = self.latest() {
            if sample.timestamp_ms <= latest.timestamp_ms {
                return false;
            }
        }

        if self.samples.len() < RING_CAPACITY {
            self.samples.push(sample);
            self.head = self.samples.len() % RING_CAPACITY;
        } else {
            self.samples[self.head] = sample;
            self.head = (self.head + 1) % RING_CAPACITY;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&HistorySample> {
        if self.samples.len() < RING_CAPACITY {
            self.samples.last()
        } else {
            self.samples.get((self.head + RING_CAPACITY - 1) % RING_CAPACITY)
        }
    }

    pub fn oldest(&self) -> Option<&HistorySample> {
        if self.samples.is_empty() {
            return None;
        }
        if self.samples.len() < RING_CAPACITY {
            self.samples.first()
        } else {
            self.samples.get(self.head)
        }
    }

    /// Interpolated sample at `timestamp_ms`. Fails when the timestamp
    /// predates the oldest retained sample; clamps to the newest sample
    /// for future timestamps.
    pub fn sample_at(&self, timestamp_ms: u64) -> Option<HistorySample> {
        let oldest = self.oldest()?;
        if timestamp_ms < oldest.timestamp_ms {
            return None;
        }
        let latest = self.latest()?;
        if timestamp_ms >= latest.timestamp_ms {
            return Some(*latest);
        }

        let (before, after) = self.bracketing(timestamp_ms)?;
        let span = (after.timestamp_ms - before.timestamp_ms) as f32;
        if span <= 0.0 {
            return Some(before);
        }
        let t = (timestamp_ms - before.timestamp_ms) as f32 / span;

        Some(HistorySample {
            timestamp_ms,
            position: before.position.lerp(after.position, t),
            velocity: before.velocity.lerp(after.velocity, t),
            yaw: before.yaw + (after.yaw - before.yaw) * t,
            pitch: before.pitch + (after.pitch - before.pitch) * t,
        })
    }

    fn iter_ordered(&self) -> impl Iterator<Item = &HistorySample> {
        let (start, len) = if self.samples.len() < RING_CAPACITY {
            (0, self.samples.len())
        } else {
            (self.head, RING_CAPACITY)
        };
        (0..len).map(move |i| &self.samples[(start + i) % self.samples.len().max(1)])
    }

    fn bracketing(&self, timestamp_ms: u64) -> Option<(HistorySample, HistorySample)> {
        let mut prev: Option<&HistorySample> = None;
        for sample in self.iter_ordered() {
            if sample.timestamp_ms >= timestamp_ms {
                return match prev {
                    Some(p) => Some((*p, *sample)),
                    None => Some((*sample, *sample)),
                };
            }
            prev = Some(sample);
        }
        None
    }
}

/// Per-entity position history behind a reader-writer lock. The tick
/// thread is the only writer; combat lookups and diagnostics read
/// concurrently.
#[derive(Debug, Default)]
pub struct HistoryStore {
    rings: RwLock<HashMap<EntityId, PositionRing>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, id: EntityId, sample: HistorySample) {
        let mut rings = self.rings.write().expect("history lock poisoned");
        rings.entry(id).or_default().push(sample);
    }

    pub fn sample_at(&self, id: EntityId, timestamp_ms: u64) -> Option<HistorySample> {
        let rings = self.rings.read().expect("history lock poisoned");
        rings.get(&id)?.sample_at(timestamp_ms)
    }

    pub fn latest(&self, id: EntityId) -> Option<HistorySample> {
        let rings = self.rings.read().expect("history lock poisoned");
        rings.get(&id)?.latest().copied()
    }

    pub fn remove(&self, id: EntityId) {
        let mut rings = self.rings.write().expect("history lock poisoned");
        rings.remove(&id);
    }

    pub fn tracked(&self) -> usize {
        self.rings.read().expect("history lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    fn sample(ts: u64, x: f32) -> HistorySample {
        HistorySample {
            timestamp_ms: ts,
            position: FxVec3::from_vec3(Vec3::new(x, 0.0, 0.0)),
            velocity: FxVec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    #[test]
    fn interpolates_between_samples() {
        let mut ring = PositionRing::new();
        ring.push(sample(1000, 0.0));
        ring.push(sample(1100, 10.0));

        let mid = ring.sample_at(1050).unwrap();
        assert!((mid.position.to_vec3().x - 5.0).abs() < 0.02);
    }

    #[test]
    fn rejects_timestamps_before_window() {
        let mut ring = PositionRing::new();
        for i in 0..RING_CAPACITY as u64 + 10 {
            ring.push(sample(1000 + i * 16, i as f32));
        }

        let oldest = ring.oldest().unwrap().timestamp_ms;
        assert!(ring.sample_at(oldest - 1).is_none());
        assert!(ring.sample_at(oldest).is_some());
    }

    #[test]
    fn clamps_future_timestamps_to_latest() {
        let mut ring = PositionRing::new();
        ring.push(sample(1000, 0.0));
        ring.push(sample(1016, 1.0));

        let s = ring.sample_at(99_999).unwrap();
        assert_eq!(s.timestamp_ms, 1016);
    }

    #[test]
    fn drops_non_monotonic_pushes() {
        let mut ring = PositionRing::new();
        assert!(ring.push(sample(1000, 0.0)));
        assert!(!ring.push(sample(1000, 1.0)));
        assert!(!ring.push(sample(900, 1.0)));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn ring_is_bounded() {
        let mut ring = PositionRing::new();
        for i in 0..500u64 {
            ring.push(sample(i * 16 + 1, i as f32));
        }
        assert_eq!(ring.len(), RING_CAPACITY);
    }

    #[test]
    fn bracketing_covers_any_window_timestamp() {
        let mut ring = PositionRing::new();
        for i in 0..200u64 {
            ring.push(sample(1000 + i * 16, i as f32));
        }

        let oldest = ring.oldest().unwrap().timestamp_ms;
        let latest = ring.latest().unwrap().timestamp_ms;
        let mut t = oldest;
        while t <= latest {
            assert!(ring.sample_at(t).is_some());
            t += 7;
        }
    }

    #[test]
    fn store_shared_reads() {
        let store = HistoryStore::new();
        let mut entities = crate::entity::EntityStore::new();
        let id = entities.spawn();

        store.record(id, sample(1000, 0.0));
        store.record(id, sample(1100, 10.0));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let s = store.sample_at(id, 1050).unwrap();
                    assert!((s.position.to_vec3().x - 5.0).abs() < 0.02);
                });
            }
        });
    }
}
