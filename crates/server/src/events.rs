use std::net::SocketAddr;

use skein::anticheat::{Response, ViolationKind};
use skein::entity::EntityId;
use skein::net::DisconnectReason;

/// Operator-visible zone events, drained by the run loop for logging.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnecting {
        addr: SocketAddr,
    },
    ClientConnected {
        connection_id: u32,
        addr: SocketAddr,
        entity: EntityId,
        player_id: u64,
    },
    ClientDisconnected {
        connection_id: u32,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: DisconnectReason,
    },
    CheatDetected {
        player_id: u64,
        kind: ViolationKind,
        response: Response,
    },
    MigrationStarted {
        player_id: u64,
        target_zone: u32,
    },
    MigrationCompleted {
        player_id: u64,
    },
    MigrationFailed {
        player_id: u64,
    },
    Error {
        message: String,
    },
}
