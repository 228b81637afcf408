use std::net::SocketAddr;
use std::time::{Duration, Instant};

use skein::net::{
    AcceptError, ConnectionManager, ConnectionState, Datagram, DisconnectReason, InputFrame,
    NetworkEndpoint, Packet, PROTOCOL_VERSION, RateLimits,
};

fn wait_for_packets(endpoint: &NetworkEndpoint, timeout_ms: u64) -> Vec<Datagram> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let mut got = Vec::new();
    while got.is_empty() && Instant::now() < deadline {
        endpoint.drain_ingress(&mut got);
        std::thread::sleep(Duration::from_millis(1));
    }
    got
}

fn connect_packet(player_id: u64) -> Packet {
    Packet::Connect {
        version: PROTOCOL_VERSION,
        player_id,
        token: Vec::new(),
    }
}

#[test]
fn test_connect_handshake_full_flow() {
    let server = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
    let client = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
    let mut connections = ConnectionManager::new(8, RateLimits::default());

    // CONNECT
    let bytes = connect_packet(42).serialize().unwrap();
    assert!(client.send_to(bytes, server.local_addr()));

    let received = wait_for_packets(&server, 500);
    assert_eq!(received.len(), 1);
    let from_addr = received[0].addr;
    let Packet::Connect { player_id, .. } = Packet::deserialize(&received[0].bytes).unwrap()
    else {
        panic!("expected CONNECT");
    };
    assert_eq!(player_id, 42);

    // CONNECT_ACK carries entity, zone, and current tick.
    let conn = connections.accept(from_addr, player_id, 0).unwrap();
    let connection_id = conn.connection_id;
    let ack = conn
        .build_reliable(0, |header| Packet::ConnectAck {
            header,
            entity_id: 7,
            zone_id: 1,
            server_tick: 120,
        })
        .unwrap();
    server.send_to(ack, from_addr);

    let received = wait_for_packets(&client, 500);
    assert_eq!(received.len(), 1);
    let Packet::ConnectAck {
        entity_id,
        zone_id,
        server_tick,
        ..
    } = Packet::deserialize(&received[0].bytes).unwrap()
    else {
        panic!("expected CONNECT_ACK");
    };
    assert_eq!((entity_id, zone_id, server_tick), (7, 1, 120));

    // CONNECTED
    let connected = Packet::Connected {
        header: Default::default(),
    }
    .serialize()
    .unwrap();
    client.send_to(connected, server.local_addr());

    let received = wait_for_packets(&server, 500);
    let Packet::Connected { header } = Packet::deserialize(&received[0].bytes).unwrap() else {
        panic!("expected CONNECTED");
    };
    let conn = connections.get_mut(connection_id).unwrap();
    assert!(conn.on_reliable_received(header, 10));
    conn.state = ConnectionState::Established;

    assert_eq!(connections.established_count(), 1);
}

#[test]
fn test_input_flow_updates_intake_and_ack() {
    let server = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
    let client = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
    let mut connections = ConnectionManager::new(8, RateLimits::default());

    let client_addr = client.local_addr();
    let conn = connections.accept(client_addr, 1, 0).unwrap();
    conn.state = ConnectionState::Established;
    let connection_id = conn.connection_id;

    for seq in 1..=3u32 {
        let frame = InputFrame {
            sequence: seq,
            client_timestamp: seq * 16,
            last_received_tick: 100 + seq,
            ..Default::default()
        };
        client.send_to(
            Packet::Input(frame).serialize().unwrap(),
            server.local_addr(),
        );
    }

    let deadline = Instant::now() + Duration::from_millis(500);
    let mut frames = Vec::new();
    while frames.len() < 3 && Instant::now() < deadline {
        let mut got = Vec::new();
        server.drain_ingress(&mut got);
        for datagram in got {
            if let Ok(Packet::Input(frame)) = Packet::deserialize(&datagram.bytes) {
                frames.push(frame);
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(frames.len(), 3);

    let conn = connections.get_mut(connection_id).unwrap();
    for frame in frames {
        conn.intake.submit(frame).unwrap();
        if frame.last_received_tick > conn.last_acked_tick {
            conn.last_acked_tick = frame.last_received_tick;
        }
    }

    assert_eq!(conn.intake.last_sequence(), 3);
    assert_eq!(conn.last_acked_tick, 103);
    assert_eq!(conn.intake.current().unwrap().sequence, 3);
}

#[test]
fn test_server_full_and_duplicate_player() {
    let mut connections = ConnectionManager::new(1, RateLimits::default());
    let a: SocketAddr = "127.0.0.1:50001".parse().unwrap();
    let b: SocketAddr = "127.0.0.1:50002".parse().unwrap();

    connections.accept(a, 1, 0).unwrap();
    assert_eq!(connections.accept(b, 2, 0).unwrap_err(), AcceptError::ServerFull);

    // Same player from a new address is a duplicate-session signal, not a
    // capacity failure.
    let err = connections.accept(b, 1, 0).unwrap_err();
    assert!(matches!(err, AcceptError::AlreadyConnected(_)));
}

#[test]
fn test_heartbeat_acks_reliable_traffic() {
    let mut connections = ConnectionManager::new(8, RateLimits::default());
    let addr: SocketAddr = "127.0.0.1:50010".parse().unwrap();
    let conn = connections.accept(addr, 1, 0).unwrap();

    let bytes = conn
        .build_reliable(0, |header| Packet::Event {
            header,
            event_id: 1,
            timestamp: 0,
            kind: skein::net::EventKind::Damage,
            payload: vec![0; 8],
        })
        .unwrap();
    assert_eq!(conn.unacked_reliable(), 1);

    // Without an ack the packet becomes due for retransmission.
    assert!(!conn.due_resends(50).is_empty() || conn.due_resends(2_000).len() == 1);

    let sent = Packet::deserialize(&bytes).unwrap();
    let seq = sent.reliable_header().unwrap().sequence;
    conn.on_heartbeat(seq, 0, 100);
    assert_eq!(conn.unacked_reliable(), 0);
    assert!(conn.due_resends(10_000).is_empty());
}

#[test]
fn test_disconnect_reason_on_wire() {
    let packet = Packet::Disconnect {
        header: Default::default(),
        reason: DisconnectReason::ServerShutdown.code(),
    };
    let bytes = packet.serialize().unwrap();
    let Packet::Disconnect { reason, .. } = Packet::deserialize(&bytes).unwrap() else {
        panic!("expected DISCONNECT");
    };
    assert_eq!(
        DisconnectReason::from_code(reason),
        Some(DisconnectReason::ServerShutdown)
    );
}
