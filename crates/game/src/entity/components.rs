use rkyv::{Archive, Deserialize, Serialize};

use crate::math::FxVec3;
use crate::net::InputFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
#[repr(u8)]
pub enum EntityKind {
    Player = 0,
    Projectile = 1,
    Loot = 2,
}

impl From<u8> for EntityKind {
    fn from(value: u8) -> Self {
        match value {
            0 => EntityKind::Player,
            1 => EntityKind::Projectile,
            _ => EntityKind::Loot,
        }
    }
}

/// Authoritative fixed-point position stamped with server time.
#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Position {
    pub pos: FxVec3,
    pub timestamp_ms: u64,
}

impl Position {
    pub fn new(pos: FxVec3, timestamp_ms: u64) -> Self {
        Self { pos, timestamp_ms }
    }
}

/// Fixed-point velocity, world units per second.
#[derive(Debug, Clone, Copy, PartialEq, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Velocity(pub FxVec3);

#[derive(Debug, Clone, Copy, PartialEq, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Rotation {
    pub yaw: f32,
    pub pitch: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum LifeState {
    Alive,
    /// Health reached zero; holds until a respawn trigger.
    Dead,
}

#[derive(Debug, Clone, Copy, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Combat {
    pub health_percent: u8,
    pub last_attack_ms: u64,
    pub team_id: u8,
    pub life: LifeState,
}

impl Combat {
    pub fn new(team_id: u8) -> Self {
        Self {
            health_percent: 100,
            last_attack_ms: 0,
            team_id,
            life: LifeState::Alive,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.life == LifeState::Alive
    }

    /// Applies damage, clamping into [0, 100]. Returns true when this hit
    /// was lethal.
    pub fn apply_damage(&mut self, amount: u8) -> bool {
        if self.life == LifeState::Dead {
            return false;
        }
        self.health_percent = self.health_percent.saturating_sub(amount);
        if self.health_percent == 0 {
            self.life = LifeState::Dead;
            return true;
        }
        false
    }

    pub fn respawn(&mut self) {
        self.health_percent = 100;
        self.life = LifeState::Alive;
    }
}

/// Last accepted input frame for an entity, replayed by every elapsed
/// physics step until a newer frame arrives.
#[derive(Debug, Clone, Copy, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct InputState {
    pub frame: InputFrame,
    pub received_ms: u64,
}

/// Binding between an entity and the connection/player that owns it.
#[derive(Debug, Clone, Copy, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct NetLink {
    pub connection_id: u32,
    pub player_id: u64,
    pub last_processed_input_seq: u32,
}

/// Per-entity anti-cheat bookkeeping. Mutated only on the tick thread;
/// diagnostics get snapshot copies.
#[derive(Debug, Clone, Copy, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct CheatTrack {
    pub last_valid_pos: FxVec3,
    pub last_valid_ms: u64,
    pub suspicious_count: u32,
    pub trust_score: u8,
    pub last_packet_ms: u64,
    pub packet_count_window: u32,
    /// Milliseconds of sustained upward motion without jump input.
    pub rising_ms: u32,
}

impl CheatTrack {
    pub const INITIAL_TRUST: u8 = 50;

    pub fn new(pos: FxVec3, now_ms: u64) -> Self {
        Self {
            last_valid_pos: pos,
            last_valid_ms: now_ms,
            suspicious_count: 0,
            trust_score: Self::INITIAL_TRUST,
            last_packet_ms: now_ms,
            packet_count_window: 0,
            rising_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct Ownership {
    pub owning_zone_id: u32,
    pub is_ghost: bool,
}

impl Ownership {
    pub fn local(zone_id: u32) -> Self {
        Self {
            owning_zone_id: zone_id,
            is_ghost: false,
        }
    }

    pub fn ghost(zone_id: u32) -> Self {
        Self {
            owning_zone_id: zone_id,
            is_ghost: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn damage_clamps_and_kills() {
        let mut combat = Combat::new(0);
        assert!(!combat.apply_damage(40));
        assert_eq!(combat.health_percent, 60);

        assert!(combat.apply_damage(255));
        assert_eq!(combat.health_percent, 0);
        assert_eq!(combat.life, LifeState::Dead);

        // Dead entities absorb no further damage until respawn.
        assert!(!combat.apply_damage(10));

        combat.respawn();
        assert!(combat.is_alive());
        assert_eq!(combat.health_percent, 100);
    }
}
