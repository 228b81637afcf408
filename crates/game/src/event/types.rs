use crate::entity::EntityId;
use crate::math::FxVec3;
use crate::net::{EventKind, WireError, WireReader, WireWriter};

/// Simulation events surfaced to clients over the reliable channel and to
/// the combat log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GameEvent {
    Damage {
        source: EntityId,
        target: EntityId,
        amount: u8,
        crit: bool,
        location: FxVec3,
    },
    Death {
        entity: EntityId,
        killer: EntityId,
    },
    Respawn {
        entity: EntityId,
        position: FxVec3,
    },
    Spawn {
        entity: EntityId,
        kind: u8,
        position: FxVec3,
    },
    Despawn {
        entity: EntityId,
    },
    /// Authoritative anti-cheat correction; carries the last input sequence
    /// the server integrated so the client replays from there.
    SetPosition {
        entity: EntityId,
        position: FxVec3,
        last_input_seq: u32,
    },
}

impl GameEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GameEvent::Damage { .. } => EventKind::Damage,
            GameEvent::Death { .. } => EventKind::Death,
            GameEvent::Respawn { .. } => EventKind::Respawn,
            GameEvent::Spawn { .. } => EventKind::Spawn,
            GameEvent::Despawn { .. } => EventKind::Despawn,
            GameEvent::SetPosition { .. } => EventKind::SetPosition,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(32);
        match self {
            GameEvent::Damage {
                source,
                target,
                amount,
                crit,
                location,
            } => {
                w.u32(source.raw());
                w.u32(target.raw());
                w.u8(*amount);
                w.u8(*crit as u8);
                write_pos(&mut w, *location);
            }
            GameEvent::Death { entity, killer } => {
                w.u32(entity.raw());
                w.u32(killer.raw());
            }
            GameEvent::Respawn { entity, position } => {
                w.u32(entity.raw());
                write_pos(&mut w, *position);
            }
            GameEvent::Spawn {
                entity,
                kind,
                position,
            } => {
                w.u32(entity.raw());
                w.u8(*kind);
                write_pos(&mut w, *position);
            }
            GameEvent::Despawn { entity } => w.u32(entity.raw()),
            GameEvent::SetPosition {
                entity,
                position,
                last_input_seq,
            } => {
                w.u32(entity.raw());
                write_pos(&mut w, *position);
                w.u32(*last_input_seq);
            }
        }
        w.into_vec()
    }

    pub fn decode_payload(kind: EventKind, payload: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(payload);
        Ok(match kind {
            EventKind::Damage => GameEvent::Damage {
                source: EntityId::from_raw(r.u32()?),
                target: EntityId::from_raw(r.u32()?),
                amount: r.u8()?,
                crit: r.u8()? != 0,
                location: read_pos(&mut r)?,
            },
            EventKind::Death => GameEvent::Death {
                entity: EntityId::from_raw(r.u32()?),
                killer: EntityId::from_raw(r.u32()?),
            },
            EventKind::Respawn => GameEvent::Respawn {
                entity: EntityId::from_raw(r.u32()?),
                position: read_pos(&mut r)?,
            },
            EventKind::Spawn => GameEvent::Spawn {
                entity: EntityId::from_raw(r.u32()?),
                kind: r.u8()?,
                position: read_pos(&mut r)?,
            },
            EventKind::Despawn => GameEvent::Despawn {
                entity: EntityId::from_raw(r.u32()?),
            },
            EventKind::SetPosition => GameEvent::SetPosition {
                entity: EntityId::from_raw(r.u32()?),
                position: read_pos(&mut r)?,
                last_input_seq: r.u32()?,
            },
        })
    }

    /// Events every nearby client should hear about, as opposed to ones
    /// addressed to a single connection.
    pub fn is_broadcast(&self) -> bool {
        !matches!(self, GameEvent::SetPosition { .. })
    }
}

fn write_pos(w: &mut WireWriter, pos: FxVec3) {
    w.i32(pos.x.raw());
    w.i32(pos.y.raw());
    w.i32(pos.z.raw());
}

fn read_pos(r: &mut WireReader<'_>) -> Result<FxVec3, WireError> {
    use crate::math::Fx;
    Ok(FxVec3::new(
        Fx::from_raw(r.i32()?),
        Fx::from_raw(r.i32()?),
        Fx::from_raw(r.i32()?),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrip_all_kinds() {
        let a = EntityId::from_raw(10);
        let b = EntityId::from_raw(20);
        let pos = FxVec3::from_vec3(glam::Vec3::new(1.0, 2.0, -3.0));

        let events = [
            GameEvent::Damage {
                source: a,
                target: b,
                amount: 35,
                crit: true,
                location: pos,
            },
            GameEvent::Death {
                entity: b,
                killer: a,
            },
            GameEvent::Respawn {
                entity: b,
                position: pos,
            },
            GameEvent::Spawn {
                entity: a,
                kind: 1,
                position: pos,
            },
            GameEvent::Despawn { entity: a },
            GameEvent::SetPosition {
                entity: a,
                position: pos,
                last_input_seq: 77,
            },
        ];

        for event in events {
            let payload = event.encode_payload();
            let decoded = GameEvent::decode_payload(event.kind(), &payload).unwrap();
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn corrections_are_not_broadcast() {
        let correction = GameEvent::SetPosition {
            entity: EntityId::from_raw(1),
            position: FxVec3::ZERO,
            last_input_seq: 0,
        };
        assert!(!correction.is_broadcast());

        let death = GameEvent::Death {
            entity: EntityId::from_raw(1),
            killer: EntityId::from_raw(2),
        };
        assert!(death.is_broadcast());
    }
}
