use std::collections::HashMap;
use std::net::SocketAddr;

use crate::entity::EntityId;

use super::input::InputIntake;
use super::protocol::{Packet, PacketError, ReliableHeader};
use super::rate::{ConnectionGate, RateLimits, TokenBucket};
use super::tracking::{AckTracker, OrderedReceiver, ReceiveTracker};

pub const HEARTBEAT_INTERVAL_MS: u64 = 5_000;
pub const CONNECTION_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// CONNECT accepted, CONNECT_ACK sent, waiting for CONNECTED.
    AwaitingConnected,
    Established,
    Disconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DisconnectReason {
    Normal = 0,
    Timeout = 1,
    Kick = 2,
    Ban = 3,
    ServerShutdown = 4,
    ZoneHandoff = 5,
    ProtocolError = 6,
    CheatDetected = 7,
    RateLimited = 8,
    ServerFull = 9,
}

impl DisconnectReason {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => DisconnectReason::Normal,
            1 => DisconnectReason::Timeout,
            2 => DisconnectReason::Kick,
            3 => DisconnectReason::Ban,
            4 => DisconnectReason::ServerShutdown,
            5 => DisconnectReason::ZoneHandoff,
            6 => DisconnectReason::ProtocolError,
            7 => DisconnectReason::CheatDetected,
            8 => DisconnectReason::RateLimited,
            9 => DisconnectReason::ServerFull,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectReason::Normal => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kick => "kicked",
            DisconnectReason::Ban => "banned",
            DisconnectReason::ServerShutdown => "server shutdown",
            DisconnectReason::ZoneHandoff => "zone handoff",
            DisconnectReason::ProtocolError => "protocol error",
            DisconnectReason::CheatDetected => "cheat detected",
            DisconnectReason::RateLimited => "rate limited",
            DisconnectReason::ServerFull => "server full",
        }
    }
}

#[derive(Debug)]
pub struct Connection {
    pub addr: SocketAddr,
    pub connection_id: u32,
    pub player_id: u64,
    pub state: ConnectionState,
    pub entity: Option<EntityId>,
    pub intake: InputIntake,
    /// Latest server_tick this client has acknowledged; baseline selection.
    pub last_acked_tick: u32,
    pub last_attack_ms: u64,
    pub last_receive_ms: u64,
    pub last_heartbeat_sent_ms: u64,

    reliable_send_seq: u32,
    ack_tracker: AckTracker,
    receive_tracker: ReceiveTracker,
    ordered_rx: OrderedReceiver,
    packet_bucket: TokenBucket,
    reliable_bucket: TokenBucket,
    next_event_id: u32,
}

impl Connection {
    pub fn new(
        addr: SocketAddr,
        connection_id: u32,
        player_id: u64,
        limits: &RateLimits,
        now_ms: u64,
    ) -> Self {
        Self {
            addr,
            connection_id,
            player_id,
            state: ConnectionState::AwaitingConnected,
            entity: None,
            intake: InputIntake::new(),
            last_acked_tick: 0,
            last_attack_ms: 0,
            last_receive_ms: now_ms,
            last_heartbeat_sent_ms: now_ms,
            reliable_send_seq: 0,
            ack_tracker: AckTracker::new(256),
            receive_tracker: ReceiveTracker::new(),
            ordered_rx: OrderedReceiver::new(0, 256),
            packet_bucket: TokenBucket::new(
                limits.packets_per_connection.0,
                limits.packets_per_connection.1,
                now_ms,
            ),
            reliable_bucket: TokenBucket::new(
                limits.reliable_per_connection.0,
                limits.reliable_per_connection.1,
                now_ms,
            ),
            next_event_id: 0,
        }
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_receive_ms = now_ms;
    }

    pub fn is_timed_out(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_receive_ms) > CONNECTION_TIMEOUT_MS
    }

    pub fn heartbeat_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_heartbeat_sent_ms) >= HEARTBEAT_INTERVAL_MS
    }

    /// Token-bucket admission for any inbound datagram on this connection.
    pub fn allow_packet(&mut self, now_ms: u64) -> bool {
        self.packet_bucket.allow(now_ms)
    }

    /// Extra budget check for inbound reliable-channel traffic.
    pub fn allow_reliable(&mut self, now_ms: u64) -> bool {
        self.reliable_bucket.allow(now_ms)
    }

    pub fn rtt_ms(&self) -> f32 {
        self.ack_tracker.srtt_ms()
    }

    pub fn next_event_id(&mut self) -> u32 {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        id
    }

    /// Builds, serializes, and tracks a reliable packet. The closure
    /// receives the filled channel header.
    pub fn build_reliable(
        &mut self,
        now_ms: u64,
        build: impl FnOnce(ReliableHeader) -> Packet,
    ) -> Result<Vec<u8>, PacketError> {
        let (ack, ack_bitfield) = self.receive_tracker.ack_data();
        let header = ReliableHeader {
            sequence: self.reliable_send_seq,
            ack,
            ack_bitfield,
        };
        self.reliable_send_seq = self.reliable_send_seq.wrapping_add(1);

        let bytes = build(header).serialize()?;
        self.ack_tracker.track(header.sequence, bytes.clone(), now_ms);
        Ok(bytes)
    }

    /// Handles the channel header of an inbound reliable packet. Returns
    /// false when the packet is a duplicate and must not be re-processed.
    pub fn on_reliable_received(&mut self, header: ReliableHeader, now_ms: u64) -> bool {
        self.ack_tracker
            .process_ack(header.ack, header.ack_bitfield, now_ms);
        self.receive_tracker.record(header.sequence)
    }

    /// In-order delivery for reliable payloads that must be processed
    /// sequentially (handoff control). Returns everything now deliverable.
    pub fn deliver_ordered(&mut self, sequence: u32, bytes: Vec<u8>) -> Vec<Vec<u8>> {
        self.ordered_rx.accept(sequence, bytes)
    }

    /// Processes a piggybacked heartbeat ack.
    pub fn on_heartbeat(&mut self, ack: u32, ack_bitfield: u32, now_ms: u64) {
        self.ack_tracker.process_ack(ack, ack_bitfield, now_ms);
    }

    pub fn build_heartbeat(&mut self, now_ms: u64) -> Result<Vec<u8>, PacketError> {
        self.last_heartbeat_sent_ms = now_ms;
        let (ack, ack_bitfield) = self.receive_tracker.ack_data();
        Packet::Heartbeat {
            timestamp_ms: now_ms,
            ack,
            ack_bitfield,
        }
        .serialize()
    }

    /// Reliable packets whose retransmission timer expired.
    pub fn due_resends(&mut self, now_ms: u64) -> Vec<Vec<u8>> {
        self.ack_tracker
            .due_for_resend(now_ms)
            .into_iter()
            .map(|(_, bytes)| bytes)
            .collect()
    }

    pub fn unacked_reliable(&self) -> usize {
        self.ack_tracker.unacked_count()
    }
}

/// Connection table indexed both ways, plus the pre-handshake per-IP gate.
#[derive(Debug)]
pub struct ConnectionManager {
    connections: HashMap<u32, Connection>,
    by_addr: HashMap<SocketAddr, u32>,
    by_player: HashMap<u64, u32>,
    gate: ConnectionGate,
    limits: RateLimits,
    next_connection_id: u32,
    max_connections: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptError {
    RateLimited,
    ServerFull,
    /// The player already has a live session; invariant: one owned player
    /// entity per player. The existing connection id is returned so the
    /// caller can kick it first.
    AlreadyConnected(u32),
}

impl ConnectionManager {
    pub fn new(max_connections: usize, limits: RateLimits) -> Self {
        Self {
            connections: HashMap::new(),
            by_addr: HashMap::new(),
            by_player: HashMap::new(),
            gate: ConnectionGate::new(limits.connections_per_ip),
            limits,
            next_connection_id: 1,
            max_connections,
        }
    }

    pub fn accept(
        &mut self,
        addr: SocketAddr,
        player_id: u64,
        now_ms: u64,
    ) -> Result<&mut Connection, AcceptError> {
        if let Some(&existing) = self.by_addr.get(&addr) {
            // Re-handshake from the same address reuses the connection.
            return Ok(self.connections.get_mut(&existing).unwrap());
        }

        if !self.gate.allow(addr.ip(), now_ms) {
            return Err(AcceptError::RateLimited);
        }
        if let Some(&existing) = self.by_player.get(&player_id) {
            return Err(AcceptError::AlreadyConnected(existing));
        }
        if self.connections.len() >= self.max_connections {
            return Err(AcceptError::ServerFull);
        }

        let connection_id = self.next_connection_id;
        self.next_connection_id = self.next_connection_id.wrapping_add(1);

        let connection = Connection::new(addr, connection_id, player_id, &self.limits, now_ms);
        self.connections.insert(connection_id, connection);
        self.by_addr.insert(addr, connection_id);
        self.by_player.insert(player_id, connection_id);

        Ok(self.connections.get_mut(&connection_id).unwrap())
    }

    pub fn get(&self, connection_id: u32) -> Option<&Connection> {
        self.connections.get(&connection_id)
    }

    pub fn get_mut(&mut self, connection_id: u32) -> Option<&mut Connection> {
        self.connections.get_mut(&connection_id)
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut Connection> {
        let id = *self.by_addr.get(addr)?;
        self.connections.get_mut(&id)
    }

    pub fn id_for_player(&self, player_id: u64) -> Option<u32> {
        self.by_player.get(&player_id).copied()
    }

    pub fn remove(&mut self, connection_id: u32) -> Option<Connection> {
        let connection = self.connections.remove(&connection_id)?;
        self.by_addr.remove(&connection.addr);
        self.by_player.remove(&connection.player_id);
        Some(connection)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.connections.keys().copied().collect()
    }

    pub fn timed_out(&self, now_ms: u64) -> Vec<u32> {
        self.connections
            .values()
            .filter(|c| c.is_timed_out(now_ms))
            .map(|c| c.connection_id)
            .collect()
    }

    pub fn sweep_gate(&mut self, now_ms: u64) {
        self.gate.sweep(now_ms);
    }

    pub fn established_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.state == ConnectionState::Established)
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn manager() -> ConnectionManager {
        ConnectionManager::new(4, RateLimits::default())
    }

    #[test]
    fn accept_assigns_unique_ids() {
        let mut m = manager();
        let a = m.accept(addr(5000), 1, 0).unwrap().connection_id;
        let b = m.accept(addr(5001), 2, 0).unwrap().connection_id;
        assert_ne!(a, b);
        assert_eq!(m.total_count(), 2);
    }

    #[test]
    fn duplicate_player_rejected_with_existing_id() {
        let mut m = manager();
        let first = m.accept(addr(5000), 7, 0).unwrap().connection_id;
        let err = m.accept(addr(5001), 7, 0).unwrap_err();
        assert_eq!(err, AcceptError::AlreadyConnected(first));
    }

    #[test]
    fn server_full() {
        let mut m = manager();
        for i in 0..4 {
            m.accept(addr(5000 + i), i as u64 + 1, 0).unwrap();
        }
        assert_eq!(
            m.accept(addr(6000), 99, 0).unwrap_err(),
            AcceptError::ServerFull
        );
    }

    #[test]
    fn same_addr_rehandshake_reuses_connection() {
        let mut m = manager();
        let id = m.accept(addr(5000), 1, 0).unwrap().connection_id;
        let again = m.accept(addr(5000), 1, 0).unwrap().connection_id;
        assert_eq!(id, again);
        assert_eq!(m.total_count(), 1);
    }

    #[test]
    fn remove_clears_all_indexes() {
        let mut m = manager();
        let id = m.accept(addr(5000), 1, 0).unwrap().connection_id;
        assert!(m.remove(id).is_some());
        assert!(m.get(id).is_none());
        assert!(m.id_for_player(1).is_none());

        // Address and player are free again.
        assert!(m.accept(addr(5000), 1, 0).is_ok());
    }

    #[test]
    fn reliable_roundtrip_acks_clear_pending() {
        let mut m = manager();
        let id = m.accept(addr(5000), 1, 0).unwrap().connection_id;
        let conn = m.get_mut(id).unwrap();

        let bytes = conn
            .build_reliable(0, |header| Packet::Connected { header })
            .unwrap();
        assert_eq!(conn.unacked_reliable(), 1);

        let sent = Packet::deserialize(&bytes).unwrap();
        let seq = sent.reliable_header().unwrap().sequence;

        conn.on_heartbeat(seq, 0, 50);
        assert_eq!(conn.unacked_reliable(), 0);
    }

    #[test]
    fn duplicate_reliable_detected() {
        let mut m = manager();
        let id = m.accept(addr(5000), 1, 0).unwrap().connection_id;
        let conn = m.get_mut(id).unwrap();

        let header = ReliableHeader {
            sequence: 3,
            ack: 0,
            ack_bitfield: 0,
        };
        assert!(conn.on_reliable_received(header, 0));
        assert!(!conn.on_reliable_received(header, 0));
    }

    #[test]
    fn timeout_sweep() {
        let mut m = manager();
        let id = m.accept(addr(5000), 1, 0).unwrap().connection_id;

        assert!(m.timed_out(CONNECTION_TIMEOUT_MS).is_empty());
        assert_eq!(m.timed_out(CONNECTION_TIMEOUT_MS + 1), vec![id]);
    }

    #[test]
    fn disconnect_reason_codes_roundtrip() {
        for code in 0..=9u8 {
            let reason = DisconnectReason::from_code(code).unwrap();
            assert_eq!(reason.code(), code);
        }
        assert!(DisconnectReason::from_code(10).is_none());
    }
}
