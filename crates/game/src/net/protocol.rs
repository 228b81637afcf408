use super::input::InputFrame;
use super::wire::{WireError, WireReader, WireWriter};

pub const MAX_PACKET_SIZE: usize = 1200;
pub const PROTOCOL_VERSION: u32 = 1;

// Byte-0 discriminators.
pub const DISC_CONNECT: u8 = 0x10;
pub const DISC_CONNECT_ACK: u8 = 0x11;
pub const DISC_CONNECTED: u8 = 0x12;
pub const DISC_DISCONNECT: u8 = 0x13;
pub const DISC_HEARTBEAT: u8 = 0x14;
pub const DISC_INPUT: u8 = 0x20;
pub const DISC_SNAPSHOT: u8 = 0x21;
pub const DISC_EVENT: u8 = 0x22;
pub const DISC_ZONE_HANDOFF: u8 = 0x30;

/// Header carried by every reliable-channel packet: sequence plus a
/// piggybacked ack and 32-bit ack bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReliableHeader {
    pub sequence: u32,
    pub ack: u32,
    pub ack_bitfield: u32,
}

impl ReliableHeader {
    pub fn encode(&self, w: &mut WireWriter) {
        w.u32(self.sequence);
        w.u32(self.ack);
        w.u32(self.ack_bitfield);
    }

    pub fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            sequence: r.u32()?,
            ack: r.u32()?,
            ack_bitfield: r.u32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    Damage = 1,
    Death = 2,
    Respawn = 3,
    Spawn = 4,
    Despawn = 5,
    /// Authoritative anti-cheat position correction.
    SetPosition = 6,
}

impl TryFrom<u8> for EventKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        Ok(match value {
            1 => EventKind::Damage,
            2 => EventKind::Death,
            3 => EventKind::Respawn,
            4 => EventKind::Spawn,
            5 => EventKind::Despawn,
            6 => EventKind::SetPosition,
            _ => return Err(WireError::BadValue),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("unsupported protocol version {0}")]
    Version(u32),
    #[error("packet exceeds MTU: {0} bytes")]
    TooLarge(usize),
}

/// Decoded client-wire packet. SNAPSHOT bodies stay as raw bytes here; the
/// delta codec owns their layout.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect {
        version: u32,
        player_id: u64,
        /// One-time handoff token on a migration re-handshake, else empty.
        token: Vec<u8>,
    },
    ConnectAck {
        header: ReliableHeader,
        entity_id: u32,
        zone_id: u32,
        server_tick: u32,
    },
    Connected {
        header: ReliableHeader,
    },
    Disconnect {
        header: ReliableHeader,
        reason: u8,
    },
    Heartbeat {
        timestamp_ms: u64,
        /// Piggybacked reliable-channel ack; a peer that just received
        /// reliable traffic sends one immediately rather than waiting for
        /// the keepalive cadence.
        ack: u32,
        ack_bitfield: u32,
    },
    Input(InputFrame),
    Snapshot {
        body: Vec<u8>,
    },
    Event {
        header: ReliableHeader,
        event_id: u32,
        timestamp: u32,
        kind: EventKind,
        payload: Vec<u8>,
    },
    ZoneHandoff {
        header: ReliableHeader,
        zone_id: u32,
        host: String,
        port: u16,
        token: Vec<u8>,
    },
}

pub fn packet_discriminator(packet: &Packet) -> u8 {
    match packet {
        Packet::Connect { .. } => DISC_CONNECT,
        Packet::ConnectAck { .. } => DISC_CONNECT_ACK,
        Packet::Connected { .. } => DISC_CONNECTED,
        Packet::Disconnect { .. } => DISC_DISCONNECT,
        Packet::Heartbeat { .. } => DISC_HEARTBEAT,
        Packet::Input(_) => DISC_INPUT,
        Packet::Snapshot { .. } => DISC_SNAPSHOT,
        Packet::Event { .. } => DISC_EVENT,
        Packet::ZoneHandoff { .. } => DISC_ZONE_HANDOFF,
    }
}

impl Packet {
    pub fn is_reliable(&self) -> bool {
        !matches!(
            self,
            Packet::Heartbeat { .. } | Packet::Input(_) | Packet::Snapshot { .. }
        )
    }

    pub fn reliable_header(&self) -> Option<ReliableHeader> {
        match self {
            Packet::ConnectAck { header, .. }
            | Packet::Connected { header }
            | Packet::Disconnect { header, .. }
            | Packet::Event { header, .. }
            | Packet::ZoneHandoff { header, .. } => Some(*header),
            _ => None,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        let mut w = WireWriter::with_capacity(64);
        w.u8(packet_discriminator(self));

        match self {
            Packet::Connect {
                version,
                player_id,
                token,
            } => {
                w.u32(*version);
                w.u64(*player_id);
                w.blob(token);
            }
            Packet::ConnectAck {
                header,
                entity_id,
                zone_id,
                server_tick,
            } => {
                header.encode(&mut w);
                w.u32(*entity_id);
                w.u32(*zone_id);
                w.u32(*server_tick);
            }
            Packet::Connected { header } => header.encode(&mut w),
            Packet::Disconnect { header, reason } => {
                header.encode(&mut w);
                w.u8(*reason);
            }
            Packet::Heartbeat {
                timestamp_ms,
                ack,
                ack_bitfield,
            } => {
                w.u64(*timestamp_ms);
                w.u32(*ack);
                w.u32(*ack_bitfield);
            }
            Packet::Input(frame) => frame.encode(&mut w),
            Packet::Snapshot { body } => w.bytes(body),
            Packet::Event {
                header,
                event_id,
                timestamp,
                kind,
                payload,
            } => {
                header.encode(&mut w);
                w.u32(*event_id);
                w.u32(*timestamp);
                w.u8(*kind as u8);
                w.blob(payload);
            }
            Packet::ZoneHandoff {
                header,
                zone_id,
                host,
                port,
                token,
            } => {
                header.encode(&mut w);
                w.u32(*zone_id);
                w.blob(host.as_bytes());
                w.u16(*port);
                w.blob(token);
            }
        }

        if w.len() > MAX_PACKET_SIZE {
            return Err(PacketError::TooLarge(w.len()));
        }
        Ok(w.into_vec())
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        let mut r = WireReader::new(data);
        let disc = r.u8()?;

        let packet = match disc {
            DISC_CONNECT => {
                let version = r.u32()?;
                if version != PROTOCOL_VERSION {
                    return Err(PacketError::Version(version));
                }
                Packet::Connect {
                    version,
                    player_id: r.u64()?,
                    token: r.blob()?.to_vec(),
                }
            }
            DISC_CONNECT_ACK => Packet::ConnectAck {
                header: ReliableHeader::decode(&mut r)?,
                entity_id: r.u32()?,
                zone_id: r.u32()?,
                server_tick: r.u32()?,
            },
            DISC_CONNECTED => Packet::Connected {
                header: ReliableHeader::decode(&mut r)?,
            },
            DISC_DISCONNECT => Packet::Disconnect {
                header: ReliableHeader::decode(&mut r)?,
                reason: r.u8()?,
            },
            DISC_HEARTBEAT => Packet::Heartbeat {
                timestamp_ms: r.u64()?,
                ack: r.u32()?,
                ack_bitfield: r.u32()?,
            },
            DISC_INPUT => Packet::Input(InputFrame::decode(&mut r)?),
            DISC_SNAPSHOT => Packet::Snapshot {
                body: r.bytes(r.remaining())?.to_vec(),
            },
            DISC_EVENT => {
                let header = ReliableHeader::decode(&mut r)?;
                let event_id = r.u32()?;
                let timestamp = r.u32()?;
                let kind = EventKind::try_from(r.u8()?)?;
                Packet::Event {
                    header,
                    event_id,
                    timestamp,
                    kind,
                    payload: r.blob()?.to_vec(),
                }
            }
            DISC_ZONE_HANDOFF => {
                let header = ReliableHeader::decode(&mut r)?;
                let zone_id = r.u32()?;
                let host = String::from_utf8(r.blob()?.to_vec())
                    .map_err(|_| WireError::BadValue)?;
                Packet::ZoneHandoff {
                    header,
                    zone_id,
                    host,
                    port: r.u16()?,
                    token: r.blob()?.to_vec(),
                }
            }
            other => return Err(WireError::BadDiscriminator(other).into()),
        };

        Ok(packet)
    }
}
