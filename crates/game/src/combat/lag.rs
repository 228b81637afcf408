use crate::entity::EntityId;
use crate::history::{HistorySample, HistoryStore};

/// Claims older than this are resolved at present time instead of rewound.
pub const MAX_REWIND_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewindOutcome {
    pub attack_time_ms: u64,
    pub rewound: bool,
}

/// Reader-only view over position history used by the combat phase. The
/// compensator never touches live components; targets are evaluated where
/// the attacker saw them.
#[derive(Debug)]
pub struct LagCompensator {
    max_rewind_ms: u64,
}

impl Default for LagCompensator {
    fn default() -> Self {
        Self {
            max_rewind_ms: MAX_REWIND_MS,
        }
    }
}

impl LagCompensator {
    pub fn new(max_rewind_ms: u64) -> Self {
        Self { max_rewind_ms }
    }

    /// `attack_time = client_timestamp + rtt/2`, clamped: a claim further
    /// than the rewind cap in the past is processed at present time.
    pub fn resolve_attack_time(
        &self,
        now_ms: u64,
        client_timestamp_ms: u64,
        rtt_ms: u64,
    ) -> RewindOutcome {
        let attack_time_ms = (client_timestamp_ms + rtt_ms / 2).min(now_ms);
        if now_ms.saturating_sub(attack_time_ms) > self.max_rewind_ms {
            return RewindOutcome {
                attack_time_ms: now_ms,
                rewound: false,
            };
        }
        RewindOutcome {
            attack_time_ms,
            rewound: attack_time_ms < now_ms,
        }
    }

    /// Target position at the resolved attack time. Falls back to the
    /// newest sample when the ring cannot bracket the timestamp.
    pub fn sample(
        &self,
        history: &HistoryStore,
        target: EntityId,
        attack_time_ms: u64,
    ) -> Option<HistorySample> {
        history
            .sample_at(target, attack_time_ms)
            .or_else(|| history.latest(target))
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::history::HistorySample;
    use crate::math::FxVec3;

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
    fn rewinds_half_rtt() {
        let comp = LagCompensator::default();
        // Claim 150 ms old, RTT 150 ms -> rewind 75 ms.
        let outcome = comp.resolve_attack_time(10_000, 10_000 - 150, 150);
        assert!(outcome.rewound);
        assert_eq!(outcome.attack_time_ms, 10_000 - 75);
    }

    #[test]
    fn stale_claims_resolve_at_present() {
        let comp = LagCompensator::default();
        let outcome = comp.resolve_attack_time(10_000, 10_000 - 2_000, 400);
        assert!(!outcome.rewound);
        assert_eq!(outcome.attack_time_ms, 10_000);
    }

    #[test]
    fn future_claims_clamp_to_now() {
        let comp = LagCompensator::default();
        let outcome = comp.resolve_attack_time(10_000, 10_500, 100);
        assert_eq!(outcome.attack_time_ms, 10_000);
    }

    #[test]
    fn sample_reads_historical_position() {
        let comp = LagCompensator::default();
        let history = HistoryStore::new();
        let mut store = crate::entity::EntityStore::new();
        let id = store.spawn();

        for i in 0..20u64 {
            history.record(id, sample(1000 + i * 16, i as f32));
        }

        let s = comp.sample(&history, id, 1000 + 8 * 16).unwrap();
        assert!((s.position.to_vec3().x - 8.0).abs() < 0.02);
    }
}
