mod codec;
mod connection;
mod endpoint;
mod input;
mod protocol;
mod rate;
mod tracking;
mod wire;

pub use codec::{
    EntityRecord, MASK_ALL, MASK_ANIM, MASK_HEALTH, MASK_KIND, MASK_POSITION, MASK_ROTATION,
    MASK_TEAM, MASK_VELOCITY, POS_QUANTUM_PER_METER, SnapshotDecoder, SnapshotHeader,
    decode_snapshot, dequantize_position, dequantize_rotation, dequantize_velocity,
    encode_snapshot, quantize_position, quantize_rotation, quantize_velocity,
};
pub use connection::{
    AcceptError, CONNECTION_TIMEOUT_MS, Connection, ConnectionManager, ConnectionState,
    DisconnectReason, HEARTBEAT_INTERVAL_MS,
};
pub use endpoint::{Datagram, NetworkEndpoint};
pub use input::{InputError, InputFlags, InputFrame, InputIntake, SequenceWindow};
pub use protocol::{
    EventKind, MAX_PACKET_SIZE, PROTOCOL_VERSION, Packet, PacketError, ReliableHeader,
    packet_discriminator,
};
pub use rate::{ConnectionGate, LimiterKind, RateLimits, TokenBucket};
pub use tracking::{AckTracker, OrderedReceiver, ReceiveTracker, sequence_greater_than};
pub use wire::{WireError, WireReader, WireWriter};
