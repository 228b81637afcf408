use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::entity::{CheatTrack, Combat, EntityKind, Rotation};
use crate::math::FxVec3;
use crate::net::InputFrame;

pub fn zone_channel(zone_id: u32) -> String {
    format!("zone:{zone_id}:messages")
}

pub fn broadcast_channel() -> String {
    "zone:broadcast".to_string()
}

/// Ghost refresh payload: the slice of an entity neighbors need to mirror
/// it read-only.
#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct GhostState {
    pub remote_id: u32,
    pub player_id: u64,
    pub kind: u8,
    pub team: u8,
    pub health: u8,
    pub pos: FxVec3,
    pub vel: FxVec3,
    pub yaw: f32,
    pub pitch: f32,
}

/// Full migration capture: every component plus the last input and
/// anti-cheat counters, enough for the target to reconstruct the entity
/// mid-motion.
#[derive(Debug, Clone, Copy, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntitySnapshot {
    pub player_id: u64,
    /// The entity id in the source zone; lets the target fold any plain
    /// ghost of the same entity into the migration shadow.
    pub source_entity_id: u32,
    pub kind: EntityKind,
    pub pos: FxVec3,
    pub vel: FxVec3,
    pub rotation: Rotation,
    pub combat: Combat,
    pub input: InputFrame,
    pub cheat: CheatTrack,
    pub last_processed_input_seq: u32,
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum ZonePayload {
    EntitySync {
        entities: Vec<GhostState>,
    },
    MigrationRequest {
        migration_seq: u64,
        snapshot: EntitySnapshot,
    },
    MigrationState {
        migration_seq: u64,
        /// Fresh entity state while the shadow copy runs in lockstep.
        snapshot: EntitySnapshot,
    },
    MigrationAck {
        migration_seq: u64,
        accepted: bool,
        /// Set when `accepted` is false: CAPACITY and friends.
        reason: u8,
    },
    MigrationComplete {
        migration_seq: u64,
        player_id: u64,
    },
    Broadcast {
        data: Vec<u8>,
    },
    Chat {
        player_id: u64,
        text: String,
    },
    ZoneStatus {
        player_count: u32,
        capacity: u32,
    },
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ZoneMessage {
    pub source_zone: u32,
    /// 0 = broadcast.
    pub target_zone: u32,
    pub timestamp_ms: u64,
    /// Sender-assigned; receivers deduplicate on (source_zone, sequence).
    pub sequence: u64,
    pub payload: ZonePayload,
}

impl ZoneMessage {
    pub fn serialize(&self) -> Result<Vec<u8>, rancor::Error> {
        rkyv::to_bytes::<rancor::Error>(self).map(|aligned| aligned.into_vec())
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, rancor::Error> {
        rkyv::from_bytes::<Self, rancor::Error>(data)
    }
}
