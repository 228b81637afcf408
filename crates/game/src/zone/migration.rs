use crate::entity::EntityId;

use super::messages::EntitySnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    None,
    /// Snapshot captured, MIGRATION_REQUEST sent; still simulating locally.
    Preparing,
    /// Pushing periodic state updates to the target.
    Transferring,
    /// Target constructed the shadow copy; lockstep.
    Syncing,
    /// Client told to switch connections; waiting for the target's
    /// MIGRATION_COMPLETE.
    Completing,
    Completed,
    Failed,
}

impl MigrationPhase {
    pub fn is_active(self) -> bool {
        !matches!(
            self,
            MigrationPhase::None | MigrationPhase::Completed | MigrationPhase::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationEvent {
    Begin,
    /// Target accepted the MIGRATION_REQUEST.
    TargetAccepted,
    /// Target declined (capacity or otherwise).
    TargetDeclined,
    /// Target acked a state update; shadow copy is live.
    TargetSynced,
    /// ZONE_HANDOFF dispatched to the client.
    ClientRedirected,
    /// Target broadcast MIGRATION_COMPLETE after the client re-handshake.
    TargetConfirmed,
    Timeout,
    ClientDisconnected,
}

/// Per-phase deadlines: PREP 5 s, SYNC 3 s, SWITCH 2 s.
#[derive(Debug, Clone, Copy)]
pub struct MigrationTimeouts {
    pub prepare_ms: u64,
    pub sync_ms: u64,
    pub switch_ms: u64,
}

impl Default for MigrationTimeouts {
    fn default() -> Self {
        Self {
            prepare_ms: 5_000,
            sync_ms: 3_000,
            switch_ms: 2_000,
        }
    }
}

impl MigrationTimeouts {
    pub fn deadline_ms(&self, phase: MigrationPhase) -> Option<u64> {
        match phase {
            MigrationPhase::Preparing | MigrationPhase::Transferring => Some(self.prepare_ms),
            MigrationPhase::Syncing => Some(self.sync_ms),
            MigrationPhase::Completing => Some(self.switch_ms),
            _ => None,
        }
    }
}

/// Pure transition function; timers and side effects stay with the caller,
/// which makes event-ordering properties directly testable.
pub fn step(phase: MigrationPhase, event: MigrationEvent) -> MigrationPhase {
    use MigrationEvent as E;
    use MigrationPhase as P;

    match (phase, event) {
        (P::None, E::Begin) => P::Preparing,
        (P::Preparing, E::TargetAccepted) => P::Transferring,
        (P::Transferring, E::TargetSynced) => P::Syncing,
        (P::Syncing, E::ClientRedirected) => P::Completing,
        (P::Completing, E::TargetConfirmed) => P::Completed,

        // Lateral failure path from any active phase.
        (p, E::Timeout) if p.is_active() => P::Failed,
        (p, E::TargetDeclined) if p.is_active() => P::Failed,
        (p, E::ClientDisconnected) if p.is_active() => P::Failed,

        // Anything else is a stale or out-of-order event; hold position.
        (p, _) => p,
    }
}

/// Source-side migration for one entity.
#[derive(Debug)]
pub struct OutboundMigration {
    pub entity: EntityId,
    pub player_id: u64,
    pub target_zone: u32,
    pub migration_seq: u64,
    pub phase: MigrationPhase,
    pub phase_started_ms: u64,
    timeouts: MigrationTimeouts,
}

impl OutboundMigration {
    pub fn begin(
        entity: EntityId,
        player_id: u64,
        target_zone: u32,
        migration_seq: u64,
        now_ms: u64,
        timeouts: MigrationTimeouts,
    ) -> Self {
        Self {
            entity,
            player_id,
            target_zone,
            migration_seq,
            phase: step(MigrationPhase::None, MigrationEvent::Begin),
            phase_started_ms: now_ms,
            timeouts,
        }
    }

    pub fn apply(&mut self, event: MigrationEvent, now_ms: u64) -> MigrationPhase {
        let next = step(self.phase, event);
        if next != self.phase {
            self.phase = next;
            self.phase_started_ms = now_ms;
        }
        self.phase
    }

    /// Fires the per-phase deadline; a timed-out migration rolls back to
    /// source authority.
    pub fn check_timeout(&mut self, now_ms: u64) -> bool {
        let Some(deadline) = self.timeouts.deadline_ms(self.phase) else {
            return false;
        };
        if now_ms.saturating_sub(self.phase_started_ms) > deadline {
            self.apply(MigrationEvent::Timeout, now_ms);
            true
        } else {
            false
        }
    }
}

/// Target-side shadow construction for one inbound entity.
#[derive(Debug)]
pub struct InboundMigration {
    pub source_zone: u32,
    pub migration_seq: u64,
    pub player_id: u64,
    pub shadow_entity: EntityId,
    pub snapshot: EntitySnapshot,
    pub phase: MigrationPhase,
    pub phase_started_ms: u64,
    timeouts: MigrationTimeouts,
}

impl InboundMigration {
    pub fn accept(
        source_zone: u32,
        migration_seq: u64,
        shadow_entity: EntityId,
        snapshot: EntitySnapshot,
        now_ms: u64,
        timeouts: MigrationTimeouts,
    ) -> Self {
        Self {
            source_zone,
            migration_seq,
            player_id: snapshot.player_id,
            shadow_entity,
            snapshot,
            phase: MigrationPhase::Syncing,
            phase_started_ms: now_ms,
            timeouts,
        }
    }

    pub fn apply(&mut self, event: MigrationEvent, now_ms: u64) -> MigrationPhase {
        let next = step(self.phase, event);
        if next != self.phase {
            self.phase = next;
            self.phase_started_ms = now_ms;
        }
        self.phase
    }

    pub fn check_timeout(&mut self, now_ms: u64) -> bool {
        let Some(deadline) = self.timeouts.deadline_ms(self.phase) else {
            return false;
        };
        if now_ms.saturating_sub(self.phase_started_ms) > deadline {
            self.apply(MigrationEvent::Timeout, now_ms);
            true
        } else {
            false
        }
    }
}

/// One-time redirect token: migration sequence plus a keyed digest the
/// target recomputes on the re-handshake. Opaque to the client.
pub fn make_handoff_token(secret: u64, player_id: u64, migration_seq: u64) -> Vec<u8> {
    let digest = token_digest(secret, player_id, migration_seq);
    let mut token = Vec::with_capacity(16);
    token.extend_from_slice(&migration_seq.to_le_bytes());
    token.extend_from_slice(&digest.to_le_bytes());
    token
}

pub fn verify_handoff_token(secret: u64, player_id: u64, token: &[u8]) -> Option<u64> {
    if token.len() != 16 {
        return None;
    }
    let migration_seq = u64::from_le_bytes(token[..8].try_into().ok()?);
    let digest = u64::from_le_bytes(token[8..].try_into().ok()?);
    (digest == token_digest(secret, player_id, migration_seq)).then_some(migration_seq)
}

fn token_digest(secret: u64, player_id: u64, migration_seq: u64) -> u64 {
    // FNV-1a over the keyed tuple; enough to make tokens unforgeable
    // without the shared fleet secret.
    let mut hash: u64 = 0xcbf29ce484222325;
    for chunk in [secret, player_id, migration_seq, secret.rotate_left(17)] {
        for byte in chunk.to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use MigrationEvent as E;
    use MigrationPhase as P;

    #[test]
    fn happy_path_walks_all_phases() {
        let mut phase = P::None;
        for (event, expected) in [
            (E::Begin, P::Preparing),
            (E::TargetAccepted, P::Transferring),
            (E::TargetSynced, P::Syncing),
            (E::ClientRedirected, P::Completing),
            (E::TargetConfirmed, P::Completed),
        ] {
            phase = step(phase, event);
            assert_eq!(phase, expected);
        }
    }

    #[test]
    fn timeout_fails_any_active_phase() {
        for phase in [P::Preparing, P::Transferring, P::Syncing, P::Completing] {
            assert_eq!(step(phase, E::Timeout), P::Failed);
        }
        // Terminal states hold.
        assert_eq!(step(P::Completed, E::Timeout), P::Completed);
        assert_eq!(step(P::None, E::Timeout), P::None);
    }

    #[test]
    fn out_of_order_events_hold_position() {
        assert_eq!(step(P::Preparing, E::TargetConfirmed), P::Preparing);
        assert_eq!(step(P::Syncing, E::TargetAccepted), P::Syncing);
        assert_eq!(step(P::Completed, E::Begin), P::Completed);
    }

    #[test]
    fn client_disconnect_aborts() {
        for phase in [P::Preparing, P::Transferring, P::Syncing, P::Completing] {
            assert_eq!(step(phase, E::ClientDisconnected), P::Failed);
        }
    }

    #[test]
    fn random_event_orderings_end_terminal_or_active() {
        // Property: no event sequence can escape the enum or revive a
        // terminal state.
        let events = [
            E::Begin,
            E::TargetAccepted,
            E::TargetDeclined,
            E::TargetSynced,
            E::ClientRedirected,
            E::TargetConfirmed,
            E::Timeout,
            E::ClientDisconnected,
        ];

        let mut seed = 0x9E3779B97F4A7C15u64;
        for _ in 0..200 {
            let mut phase = P::None;
            let mut reached_terminal_at: Option<P> = None;
            for _ in 0..20 {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                let event = events[(seed % events.len() as u64) as usize];
                phase = step(phase, event);
                if let Some(terminal) = reached_terminal_at {
                    assert_eq!(phase, terminal, "terminal state revived");
                } else if matches!(phase, P::Completed | P::Failed) {
                    reached_terminal_at = Some(phase);
                }
            }
        }
    }

    #[test]
    fn sync_timeout_rolls_back() {
        // No target ack during SYNCING for 3 s.
        let mut store = crate::entity::EntityStore::new();
        let entity = store.spawn();
        let mut migration = OutboundMigration::begin(
            entity,
            7,
            2,
            1,
            10_000,
            MigrationTimeouts::default(),
        );
        migration.apply(E::TargetAccepted, 10_100);
        migration.apply(E::TargetSynced, 10_200);
        assert_eq!(migration.phase, P::Syncing);

        assert!(!migration.check_timeout(12_000));
        assert!(migration.check_timeout(13_300));
        assert_eq!(migration.phase, P::Failed);
    }

    #[test]
    fn phase_timer_resets_on_transition() {
        let mut store = crate::entity::EntityStore::new();
        let entity = store.spawn();
        let mut migration =
            OutboundMigration::begin(entity, 7, 2, 1, 0, MigrationTimeouts::default());

        // 4.9 s in Preparing: fine.
        assert!(!migration.check_timeout(4_900));
        migration.apply(E::TargetAccepted, 4_900);
        migration.apply(E::TargetSynced, 5_000);
        // Sync clock starts at 5 s; 3 s deadline holds until 8 s.
        assert!(!migration.check_timeout(7_900));
        assert!(migration.check_timeout(8_100));
    }

    #[test]
    fn handoff_token_roundtrip_and_tamper() {
        let token = make_handoff_token(0xDEAD_BEEF, 42, 9);
        assert_eq!(verify_handoff_token(0xDEAD_BEEF, 42, &token), Some(9));

        // Wrong player, wrong secret, corrupted bytes.
        assert_eq!(verify_handoff_token(0xDEAD_BEEF, 43, &token), None);
        assert_eq!(verify_handoff_token(0xFEED_FACE, 42, &token), None);
        let mut bad = token.clone();
        bad[3] ^= 1;
        assert_eq!(verify_handoff_token(0xDEAD_BEEF, 42, &bad), None);
    }
}
