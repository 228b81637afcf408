use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use skein::anticheat::{CheatMonitor, Detection, Response, ViolationKind, speed_confidence};
use skein::aoi::ViewerInterest;
use skein::arena::Pool;
use skein::combat::{
    CombatRng, CombatView, HitOutcome, LagCompensator, apply_damage, resolve_melee, resolve_ranged,
};
use skein::entity::{
    CheatTrack, Combat, ComponentPool, EntityId, EntityKind, InputState, NetLink, Ownership,
    Position, Rotation, Velocity,
};
use skein::event::{EventQueue, GameEvent};
use skein::history::{HistorySample, HistoryStore};
use skein::math::FxVec3;
use skein::movement::{integrate_steps, max_displacement};
use skein::net::{
    AcceptError, ConnectionManager, ConnectionState, Datagram, DisconnectReason, InputError,
    InputFlags, NetworkEndpoint, Packet,
};
use skein::persist::{
    CombatLogWriter, MemoryCombatLog, MemorySessionBackend, SESSION_TTL_SECS, SessionWriter, keys,
};
use skein::replication::{ClientView, SnapshotHistory, WorldCapture, build_for_client, capture_record};
use skein::simulation::{BudgetMonitor, FixedTimestep, PhaseTimer};
use skein::spatial::SpatialGrid;
use skein::zone::{
    EntitySnapshot, GhostState, GhostUpdate, GhostTable, InboundMigration, MessageDedup,
    MigrationEvent, MigrationPhase, OutboundMigration, ZoneBus, ZoneMessage, ZonePayload,
    ZoneRegion, broadcast_channel, make_handoff_token, verify_handoff_token, zone_channel,
};

use crate::config::ZoneConfig;
use crate::events::ServerEvent;

const RESPAWN_DELAY_MS: u64 = 5_000;
const MIGRATION_RETRY_MS: u64 = 5_000;
const SESSION_WRITE_INTERVAL_TICKS: u32 = 60;

/// Component pools, split out so phases can borrow fields disjointly.
#[derive(Default)]
struct World {
    kinds: ComponentPool<EntityKind>,
    positions: ComponentPool<Position>,
    velocities: ComponentPool<Velocity>,
    rotations: ComponentPool<Rotation>,
    combat: ComponentPool<Combat>,
    inputs: ComponentPool<InputState>,
    links: ComponentPool<NetLink>,
    cheat: ComponentPool<CheatTrack>,
    ownership: ComponentPool<Ownership>,
    anims: ComponentPool<u8>,
}

struct ClientState {
    interest: ViewerInterest,
    view: ClientView,
}

pub struct ZoneServer<B: ZoneBus> {
    config: ZoneConfig,
    region: ZoneRegion,
    endpoint: NetworkEndpoint,
    connections: ConnectionManager,

    store: skein::entity::EntityStore,
    world: World,
    spatial: SpatialGrid,
    history: HistoryStore,
    lag: LagCompensator,

    cheat_monitor: CheatMonitor,
    events: EventQueue,
    snapshot_history: SnapshotHistory,
    clients: HashMap<u32, ClientState>,

    bus: B,
    bus_seq: u64,
    dedup: MessageDedup,
    ghosts: GhostTable,

    outbound: HashMap<u64, OutboundMigration>,
    inbound: HashMap<(u32, u64), InboundMigration>,
    migration_retry: HashMap<u64, u64>,
    next_migration_seq: u64,

    session: SessionWriter,
    combat_log: CombatLogWriter,
    log_backend: MemoryCombatLog,

    timestep: FixedTimestep,
    budget: BudgetMonitor,
    tick: u32,
    epoch: Instant,
    last_update: Instant,
    rng: CombatRng,

    death_times: HashMap<EntityId, u64>,
    ghost_batches: Pool<Vec<GhostState>>,
    ingress_scratch: Vec<Datagram>,
    bus_scratch: Vec<ZoneMessage>,

    pending_events: VecDeque<ServerEvent>,
    running: Arc<AtomicBool>,
    accepting: bool,
}

impl<B: ZoneBus> ZoneServer<B> {
    pub fn new(bind_addr: &str, config: ZoneConfig, bus: B) -> io::Result<Self> {
        let endpoint = NetworkEndpoint::bind(bind_addr)?;
        let region = ZoneRegion::new(config.zone_id, config.core)
            .with_neighbors(config.neighbors.clone());
        let seed = if config.combat_seed != 0 {
            config.combat_seed
        } else {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(1)
        };

        let log_backend = MemoryCombatLog::new();
        Ok(Self {
            endpoint,
            region,
            connections: ConnectionManager::new(config.max_clients, config.limits.clone()),
            store: skein::entity::EntityStore::new(),
            world: World::default(),
            spatial: SpatialGrid::default(),
            history: HistoryStore::new(),
            lag: LagCompensator::default(),
            cheat_monitor: CheatMonitor::new(config.cheat.clone()),
            events: EventQueue::new(1024),
            snapshot_history: SnapshotHistory::default(),
            clients: HashMap::new(),
            bus,
            bus_seq: 0,
            dedup: MessageDedup::new(),
            ghosts: GhostTable::new(),
            outbound: HashMap::new(),
            inbound: HashMap::new(),
            migration_retry: HashMap::new(),
            next_migration_seq: 1,
            session: SessionWriter::spawn(MemorySessionBackend::new()),
            combat_log: CombatLogWriter::spawn(log_backend.clone()),
            log_backend,
            timestep: FixedTimestep::new(config.tick_rate),
            budget: BudgetMonitor::new(config.budget.clone()),
            tick: 0,
            epoch: Instant::now(),
            last_update: Instant::now(),
            rng: CombatRng::new(seed),
            death_times: HashMap::new(),
            ghost_batches: Pool::new(8),
            ingress_scratch: Vec::new(),
            bus_scratch: Vec::new(),
            pending_events: VecDeque::new(),
            running: Arc::new(AtomicBool::new(true)),
            accepting: true,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn zone_id(&self) -> u32 {
        self.config.zone_id
    }

    pub fn current_tick(&self) -> u32 {
        self.tick
    }

    pub fn entity_count(&self) -> usize {
        self.store.len()
    }

    pub fn ghost_count(&self) -> usize {
        self.ghosts.len()
    }

    pub fn combat_log_backend(&self) -> &MemoryCombatLog {
        &self.log_backend
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64 + 1
    }

    pub fn run(&mut self) {
        let mut last_stats_tick = 0u32;
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            for event in self.pending_events.drain(..) {
                log_event(&event);
            }
            if self.tick.wrapping_sub(last_stats_tick) >= 600 {
                last_stats_tick = self.tick;
                let stats = self.stats();
                log::info!(
                    "tick {} clients={} entities={} ghosts={} last={:.2}ms degraded={}",
                    stats.tick,
                    stats.clients,
                    stats.entities,
                    stats.ghosts,
                    stats.last_tick_ms,
                    stats.degraded
                );
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        self.shutdown();
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = (now - self.last_update).as_secs_f32();
        self.last_update = now;
        self.timestep.accumulate(delta);

        while self.timestep.consume_tick() {
            self.tick = self.tick.wrapping_add(1).max(1);
            self.run_tick();
        }
    }

    /// Runs one fixed tick: the ten phases, in order, on this thread.
    fn run_tick(&mut self) {
        let tick_started = Instant::now();
        let now_ms = self.now_ms();
        let mut phases = Vec::with_capacity(10);

        let timer = PhaseTimer::start("ingress");
        self.phase_ingress(now_ms);
        phases.push(timer.stop());

        let timer = PhaseTimer::start("bus");
        self.phase_bus(now_ms);
        phases.push(timer.stop());

        let timer = PhaseTimer::start("physics");
        self.phase_physics(now_ms);
        phases.push(timer.stop());

        let timer = PhaseTimer::start("combat");
        self.phase_combat(now_ms);
        phases.push(timer.stop());

        let timer = PhaseTimer::start("anticheat");
        self.phase_anticheat(now_ms);
        phases.push(timer.stop());

        let timer = PhaseTimer::start("replication");
        self.phase_replication(now_ms);
        phases.push(timer.stop());

        let timer = PhaseTimer::start("aura");
        self.phase_aura(now_ms);
        phases.push(timer.stop());

        let timer = PhaseTimer::start("persistence");
        self.phase_persistence(now_ms);
        phases.push(timer.stop());

        let tick_ms = tick_started.elapsed().as_secs_f32() * 1000.0;
        self.budget.record_tick(now_ms, tick_ms, phases);
    }

    // ---- phase 1: network ingress ------------------------------------

    fn phase_ingress(&mut self, now_ms: u64) {
        let mut ingress = std::mem::take(&mut self.ingress_scratch);
        ingress.clear();
        self.endpoint.drain_ingress(&mut ingress);

        for datagram in &ingress {
            match Packet::deserialize(&datagram.bytes) {
                Ok(packet) => self.handle_packet(packet, datagram.addr, now_ms),
                Err(error) => {
                    log::debug!("malformed packet from {}: {}", datagram.addr, error);
                }
            }
        }
        self.ingress_scratch = ingress;

        // Heartbeats and reliable retransmissions.
        let mut sends: Vec<(SocketAddr, Vec<u8>)> = Vec::new();
        for conn in self.connections.iter_mut() {
            for bytes in conn.due_resends(now_ms) {
                sends.push((conn.addr, bytes));
            }
            if conn.heartbeat_due(now_ms) {
                if let Ok(bytes) = conn.build_heartbeat(now_ms) {
                    sends.push((conn.addr, bytes));
                }
            }
        }
        for (addr, bytes) in sends {
            self.endpoint.send_to(bytes, addr);
        }

        // Timeouts.
        for connection_id in self.connections.timed_out(now_ms) {
            self.drop_connection(connection_id, DisconnectReason::Timeout, now_ms, false);
        }
    }

    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr, now_ms: u64) {
        // Per-connection packet budget; handshake packets pass through to
        // the per-IP gate instead.
        if !matches!(packet, Packet::Connect { .. }) {
            let Some(conn) = self.connections.get_by_addr_mut(&addr) else {
                return;
            };
            if !conn.allow_packet(now_ms) {
                let entity = conn.entity;
                if let Some(entity) = entity {
                    self.flag_packet_flood(entity, now_ms);
                }
                return;
            }
            conn.touch(now_ms);
        }

        match packet {
            Packet::Connect {
                player_id, token, ..
            } => self.handle_connect(addr, player_id, token, now_ms),
            Packet::Connected { header } => {
                let established = {
                    let Some(conn) = self.connections.get_by_addr_mut(&addr) else {
                        return;
                    };
                    if !conn.on_reliable_received(header, now_ms) {
                        return;
                    }
                    if conn.state == ConnectionState::AwaitingConnected {
                        conn.state = ConnectionState::Established;
                        Some((conn.connection_id, conn.player_id))
                    } else {
                        None
                    }
                };
                if let Some((connection_id, player_id)) = established {
                    self.finish_connect(connection_id, player_id, addr, now_ms);
                }
            }
            Packet::Input(frame) => self.handle_input(addr, frame, now_ms),
            Packet::Heartbeat {
                ack, ack_bitfield, ..
            } => {
                if let Some(conn) = self.connections.get_by_addr_mut(&addr) {
                    conn.on_heartbeat(ack, ack_bitfield, now_ms);
                }
            }
            Packet::Disconnect { header, .. } => {
                let connection_id = {
                    let Some(conn) = self.connections.get_by_addr_mut(&addr) else {
                        return;
                    };
                    conn.on_reliable_received(header, now_ms);
                    conn.connection_id
                };
                self.drop_connection(connection_id, DisconnectReason::Normal, now_ms, false);
            }
            // Server-to-client only; a client sending these is broken.
            Packet::ConnectAck { .. }
            | Packet::Snapshot { .. }
            | Packet::Event { .. }
            | Packet::ZoneHandoff { .. } => {
                log::debug!("unexpected server-bound packet from {addr}");
            }
        }
    }

    fn handle_connect(&mut self, addr: SocketAddr, player_id: u64, token: Vec<u8>, now_ms: u64) {
        self.pending_events
            .push_back(ServerEvent::ClientConnecting { addr });

        if !self.accepting {
            self.deny(addr, DisconnectReason::ServerShutdown);
            return;
        }

        let accepted = self.connections.accept(addr, player_id, now_ms).map(|c| c.connection_id);
        let connection_id = match accepted {
            Ok(id) => id,
            Err(AcceptError::RateLimited) => {
                self.deny(addr, DisconnectReason::RateLimited);
                return;
            }
            Err(AcceptError::ServerFull) => {
                self.deny(addr, DisconnectReason::ServerFull);
                return;
            }
            Err(AcceptError::AlreadyConnected(existing)) => {
                // One session per player fleet-wide; the new handshake
                // supersedes the stale one.
                self.drop_connection(existing, DisconnectReason::Kick, now_ms, true);
                match self.connections.accept(addr, player_id, now_ms).map(|c| c.connection_id) {
                    Ok(id) => id,
                    Err(_) => {
                        self.deny(addr, DisconnectReason::ServerFull);
                        return;
                    }
                }
            }
        };

        // Handoff re-handshake: token binds the player to an inbound
        // migration started by the source zone. Claimed only once the
        // connection is admitted, so a denied handshake cannot strand a
        // promoted entity.
        let already_bound = self
            .connections
            .get(connection_id)
            .and_then(|c| c.entity)
            .is_some();
        let migrated_entity = if token.is_empty() || already_bound {
            None
        } else {
            match self.claim_inbound_migration(player_id, &token, now_ms) {
                Some(entity) => Some(entity),
                None => {
                    self.connections.remove(connection_id);
                    self.deny(addr, DisconnectReason::ProtocolError);
                    return;
                }
            }
        };

        let (zone_id, server_tick) = (self.config.zone_id, self.tick);
        let Some(conn) = self.connections.get_mut(connection_id) else {
            return;
        };
        if let Some(entity) = migrated_entity {
            conn.entity = Some(entity);
        }
        let entity_wire_id = conn.entity.map(|e| e.raw()).unwrap_or(0);
        let ack = conn.build_reliable(now_ms, |header| Packet::ConnectAck {
            header,
            entity_id: entity_wire_id,
            zone_id,
            server_tick,
        });
        if let Ok(bytes) = ack {
            self.endpoint.send_to(bytes, addr);
        }
    }

    /// Completes the handshake after CONNECTED: spawns the player entity
    /// (or binds the migrated one) and announces it.
    fn finish_connect(
        &mut self,
        connection_id: u32,
        player_id: u64,
        addr: SocketAddr,
        now_ms: u64,
    ) {
        let existing = self.connections.get(connection_id).and_then(|c| c.entity);
        let entity = match existing {
            Some(entity) => entity,
            None => {
                let spawn_pos = self.spawn_position(player_id);
                let entity = self.spawn_player(player_id, connection_id, spawn_pos, now_ms);
                if let Some(conn) = self.connections.get_mut(connection_id) {
                    conn.entity = Some(entity);
                }
                entity
            }
        };

        if let Some(link) = self.world.links.get_mut(entity) {
            link.connection_id = connection_id;
        }
        self.clients.insert(
            connection_id,
            ClientState {
                interest: ViewerInterest::new(),
                view: ClientView::new(),
            },
        );

        self.session.set(
            keys::player_session(player_id),
            format!("zone={};conn={}", self.config.zone_id, connection_id),
            SESSION_TTL_SECS,
        );

        self.pending_events.push_back(ServerEvent::ClientConnected {
            connection_id,
            addr,
            entity,
            player_id,
        });
    }

    fn handle_input(&mut self, addr: SocketAddr, frame: skein::net::InputFrame, now_ms: u64) {
        let (connection_id, entity, result, acked_tick) = {
            let Some(conn) = self.connections.get_by_addr_mut(&addr) else {
                return;
            };
            if conn.state != ConnectionState::Established {
                return;
            }
            let result = conn.intake.submit(frame);
            if result.is_ok()
                && skein::net::sequence_greater_than(
                    frame.last_received_tick,
                    conn.last_acked_tick,
                )
            {
                conn.last_acked_tick = frame.last_received_tick;
            }
            (conn.connection_id, conn.entity, result, conn.last_acked_tick)
        };

        if let Some(client) = self.clients.get_mut(&connection_id) {
            client.view.ack(acked_tick);
        }

        let Some(entity) = entity else { return };
        match result {
            Ok(()) => {
                self.world.inputs.insert(
                    entity,
                    InputState {
                        frame,
                        received_ms: now_ms,
                    },
                );
                if let Some(track) = self.world.cheat.get_mut(entity) {
                    if let Some(detection) = self.cheat_monitor.record_packet(track, now_ms) {
                        self.punish(entity, detection, now_ms);
                    }
                }
            }
            Err(InputError::AngleOutOfRange) | Err(InputError::ConflictingFlags(_)) => {
                let detection = self.cheat_monitor.input_manipulation();
                self.punish(entity, detection, now_ms);
            }
            // Stale, duplicate, out-of-window: silent drop.
            Err(_) => {}
        }
    }

    // ---- phase 2: cross-zone bus -------------------------------------

    fn phase_bus(&mut self, now_ms: u64) {
        let mut messages = std::mem::take(&mut self.bus_scratch);
        messages.clear();
        self.bus.poll(&mut messages);

        for message in &messages {
            if message.target_zone != 0 && message.target_zone != self.config.zone_id {
                continue;
            }
            if message.source_zone == self.config.zone_id {
                continue;
            }
            if !self.dedup.accept(message.source_zone, message.sequence) {
                continue;
            }
            self.handle_zone_message(message, now_ms);
        }
        self.bus_scratch = messages;
    }

    fn handle_zone_message(&mut self, message: &ZoneMessage, now_ms: u64) {
        match &message.payload {
            ZonePayload::EntitySync { entities } => {
                for state in entities {
                    self.apply_ghost(message.source_zone, state, now_ms);
                }
            }
            ZonePayload::MigrationRequest {
                migration_seq,
                snapshot,
            } => self.handle_migration_request(message.source_zone, *migration_seq, snapshot, now_ms),
            ZonePayload::MigrationState {
                migration_seq,
                snapshot,
            } => self.handle_migration_state(message.source_zone, *migration_seq, snapshot, now_ms),
            ZonePayload::MigrationAck {
                migration_seq,
                accepted,
                ..
            } => self.handle_migration_ack(*migration_seq, *accepted, now_ms),
            ZonePayload::MigrationComplete {
                migration_seq,
                player_id,
            } => self.handle_migration_complete(*migration_seq, *player_id, now_ms),
            ZonePayload::Broadcast { .. } | ZonePayload::Chat { .. } => {}
            ZonePayload::ZoneStatus { .. } => {}
        }
    }

    fn apply_ghost(&mut self, source_zone: u32, state: &GhostState, now_ms: u64) {
        // An inbound migration shadow supersedes the plain ghost stream.
        if self
            .inbound
            .values()
            .any(|m| m.source_zone == source_zone && m.snapshot.source_entity_id == state.remote_id)
        {
            return;
        }

        match self.ghosts.apply(source_zone, state, now_ms) {
            GhostUpdate::Refreshed(local) => {
                if let Some(position) = self.world.positions.get_mut(local) {
                    position.pos = state.pos;
                    position.timestamp_ms = now_ms;
                }
                if let Some(velocity) = self.world.velocities.get_mut(local) {
                    velocity.0 = state.vel;
                }
                if let Some(rotation) = self.world.rotations.get_mut(local) {
                    rotation.yaw = state.yaw;
                    rotation.pitch = state.pitch;
                }
                if let Some(combat) = self.world.combat.get_mut(local) {
                    combat.health_percent = state.health;
                    combat.team_id = state.team;
                }
                self.spatial.update(local, state.pos);
            }
            GhostUpdate::New => {
                let local = self.store.spawn();
                self.world.kinds.insert(local, EntityKind::from(state.kind));
                self.world
                    .positions
                    .insert(local, Position::new(state.pos, now_ms));
                self.world.velocities.insert(local, Velocity(state.vel));
                self.world.rotations.insert(
                    local,
                    Rotation {
                        yaw: state.yaw,
                        pitch: state.pitch,
                    },
                );
                let mut combat = Combat::new(state.team);
                combat.health_percent = state.health;
                self.world.combat.insert(local, combat);
                self.world
                    .ownership
                    .insert(local, Ownership::ghost(source_zone));
                self.world.anims.insert(local, 0);
                self.spatial.insert(local, state.pos);
                self.ghosts.insert(source_zone, state.remote_id, local, now_ms);
            }
        }
    }

    // ---- phase 3: physics & movement validation ----------------------

    fn phase_physics(&mut self, now_ms: u64) {
        let dt = self.timestep.dt();
        let dt_ms = self.timestep.dt_ms();

        let movers: Vec<EntityId> = self
            .world
            .inputs
            .iter()
            .map(|(id, _)| id)
            .filter(|id| {
                self.world
                    .ownership
                    .get(*id)
                    .is_some_and(|o| !o.is_ghost)
            })
            .collect();

        for entity in movers {
            let Some(input) = self.world.inputs.get(entity).copied() else {
                continue;
            };
            let Some(position) = self.world.positions.get(entity).copied() else {
                continue;
            };
            let Some(velocity) = self.world.velocities.get(entity).copied() else {
                continue;
            };
            if self
                .world
                .combat
                .get(entity)
                .is_some_and(|c| !c.is_alive())
            {
                continue;
            }

            let outcome = integrate_steps(
                &self.config.movement,
                &input.frame,
                position.pos,
                velocity.0,
                1,
                dt,
            );

            // Server-side validation before the result is committed.
            let observed = position.pos.distance(outcome.position);
            let allowed = max_displacement(&self.config.movement, dt_ms);
            let teleport = self
                .cheat_monitor
                .check_teleport(position.pos, outcome.position);

            if observed > allowed || teleport.is_some() {
                let detection = teleport.unwrap_or(Detection {
                    kind: ViolationKind::SpeedHack,
                    confidence: speed_confidence(observed, allowed),
                    suggested_correction: Some(position.pos),
                });
                self.punish(entity, detection, now_ms);
                // Revert: hold the last valid position, kill velocity.
                self.world.velocities.insert(entity, Velocity(FxVec3::ZERO));
                continue;
            }

            self.commit_move(entity, outcome.position, outcome.velocity, &input, now_ms);
        }

        self.resolve_collisions(now_ms);
    }

    fn commit_move(
        &mut self,
        entity: EntityId,
        new_pos: FxVec3,
        new_vel: FxVec3,
        input: &InputState,
        now_ms: u64,
    ) {
        self.world
            .positions
            .insert(entity, Position::new(new_pos, now_ms));
        self.world.velocities.insert(entity, Velocity(new_vel));

        let frame = input.frame;
        self.world.rotations.insert(
            entity,
            Rotation {
                yaw: frame.yaw,
                pitch: frame.pitch,
            },
        );
        if let Some(link) = self.world.links.get_mut(entity) {
            link.last_processed_input_seq = frame.sequence;
        }
        if let Some(track) = self.world.cheat.get_mut(entity) {
            track.last_valid_pos = new_pos;
            track.last_valid_ms = now_ms;

            let vy = new_vel.y.to_f32();
            let grounded = new_pos.y.to_f32() <= self.config.movement.bounds.min.y + 0.05;
            let jump_held = frame.flags & InputFlags::JUMP.bits() != 0;
            let dt_ms = self.timestep.dt_ms() as u32;
            if let Some(detection) =
                self.cheat_monitor
                    .check_fly(track, vy, jump_held, grounded, dt_ms)
            {
                self.punish(entity, detection, now_ms);
            }
        }
        self.spatial.update(entity, new_pos);

        // Post-physics authoritative history sample (append-only).
        self.history.record(
            entity,
            HistorySample {
                timestamp_ms: now_ms,
                position: new_pos,
                velocity: new_vel,
                yaw: frame.yaw,
                pitch: frame.pitch,
            },
        );
    }

    fn resolve_collisions(&mut self, now_ms: u64) {
        let radius = self.config.movement.collision_radius;
        let owned: Vec<(EntityId, FxVec3)> = self
            .world
            .positions
            .iter()
            .filter(|(id, _)| {
                self.world
                    .ownership
                    .get(*id)
                    .is_some_and(|o| !o.is_ghost)
            })
            .map(|(id, p)| (id, p.pos))
            .collect();

        let mut neighbors = Vec::new();
        for (entity, pos) in &owned {
            neighbors.clear();
            self.spatial.query_radius(*pos, radius * 2.0, &mut neighbors);
            for other in &neighbors {
                if *other <= *entity {
                    continue;
                }
                let Some(other_pos) = self.world.positions.get(*other).map(|p| p.pos) else {
                    continue;
                };
                if let Some((a, b)) =
                    skein::movement::resolve_overlap(*pos, other_pos, radius, radius)
                {
                    let a = FxVec3::from_vec3(self.config.movement.bounds.clamp(a.to_vec3()));
                    let b = FxVec3::from_vec3(self.config.movement.bounds.clamp(b.to_vec3()));
                    if let Some(p) = self.world.positions.get_mut(*entity) {
                        p.pos = a;
                        p.timestamp_ms = now_ms;
                    }
                    if let Some(p) = self.world.positions.get_mut(*other) {
                        p.pos = b;
                        p.timestamp_ms = now_ms;
                    }
                    self.spatial.update(*entity, a);
                    self.spatial.update(*other, b);
                }
            }
        }
    }

    // ---- phase 4: combat ---------------------------------------------

    fn phase_combat(&mut self, now_ms: u64) {
        struct AttackIntent {
            attacker: EntityId,
            pos: FxVec3,
            yaw: f32,
            pitch: f32,
            target_id: u32,
            attack_time_ms: u64,
        }

        let cooldown = self.config.combat.attack_cooldown_ms;
        let mut intents = Vec::new();

        for (entity, input) in self.world.inputs.iter() {
            if input.frame.flags & InputFlags::ATTACK.bits() == 0 {
                continue;
            }
            if self
                .world
                .ownership
                .get(entity)
                .is_none_or(|o| o.is_ghost)
            {
                continue;
            }
            let Some(combat) = self.world.combat.get(entity) else {
                continue;
            };
            if !combat.is_alive() || now_ms.saturating_sub(combat.last_attack_ms) < cooldown {
                continue;
            }
            let Some(position) = self.world.positions.get(entity) else {
                continue;
            };

            let rtt_ms = self
                .world
                .links
                .get(entity)
                .and_then(|link| self.connections.get(link.connection_id))
                .map(|conn| conn.rtt_ms() as u64)
                .unwrap_or(0);
            let rewind = self.lag.resolve_attack_time(
                now_ms,
                input.frame.client_timestamp as u64,
                rtt_ms,
            );

            intents.push(AttackIntent {
                attacker: entity,
                pos: position.pos,
                yaw: input.frame.yaw,
                pitch: input.frame.pitch,
                target_id: input.frame.target_id,
                attack_time_ms: rewind.attack_time_ms,
            });
        }

        for intent in intents {
            let hits = {
                let view = CombatView {
                    spatial: &self.spatial,
                    history: &self.history,
                    positions: &self.world.positions,
                    combat: &self.world.combat,
                    lag: &self.lag,
                };
                if intent.target_id != 0 {
                    resolve_ranged(
                        &self.config.combat,
                        &view,
                        intent.attacker,
                        intent.pos,
                        intent.yaw,
                        intent.pitch,
                        intent.attack_time_ms,
                    )
                    .into_iter()
                    .collect()
                } else {
                    resolve_melee(
                        &self.config.combat,
                        &view,
                        intent.attacker,
                        intent.pos,
                        intent.yaw,
                        intent.attack_time_ms,
                    )
                }
            };

            if let Some(combat) = self.world.combat.get_mut(intent.attacker) {
                combat.last_attack_ms = now_ms;
            }

            for hit in hits {
                // Ghost targets have no authority here; their owner zone
                // resolves damage.
                if self
                    .world
                    .ownership
                    .get(hit.target)
                    .is_none_or(|o| o.is_ghost)
                {
                    continue;
                }

                let (amount, crit) = self.rng.roll_damage(&self.config.combat);
                if let Some(detection) =
                    self.cheat_monitor
                        .check_damage(intent.attacker, amount, now_ms)
                {
                    self.punish(intent.attacker, detection, now_ms);
                    continue;
                }

                match apply_damage(&mut self.world.combat, hit.target, amount) {
                    Some(HitOutcome::Applied { lethal, applied }) => {
                        self.events.push(
                            self.tick,
                            now_ms,
                            GameEvent::Damage {
                                source: intent.attacker,
                                target: hit.target,
                                amount: applied,
                                crit,
                                location: hit.location,
                            },
                        );
                        if lethal {
                            self.death_times.insert(hit.target, now_ms);
                            self.events.push(
                                self.tick,
                                now_ms,
                                GameEvent::Death {
                                    entity: hit.target,
                                    killer: intent.attacker,
                                },
                            );
                        }
                    }
                    Some(HitOutcome::Late) | None => {
                        log::debug!("late hit on {} discarded", hit.target);
                    }
                }
            }
        }
    }

    // ---- phase 5: remaining anti-cheat + respawns --------------------

    fn phase_anticheat(&mut self, now_ms: u64) {
        let players: Vec<EntityId> = self
            .world
            .links
            .iter()
            .map(|(id, _)| id)
            .collect();
        for entity in players {
            if let Some(track) = self.world.cheat.get_mut(entity) {
                self.cheat_monitor.credit_clean(entity, track, now_ms);
            }
        }

        let due: Vec<EntityId> = self
            .death_times
            .iter()
            .filter(|(_, died)| now_ms.saturating_sub(**died) >= RESPAWN_DELAY_MS)
            .map(|(id, _)| *id)
            .collect();
        for entity in due {
            self.death_times.remove(&entity);
            let Some(combat) = self.world.combat.get_mut(entity) else {
                continue;
            };
            combat.respawn();

            let player_id = self.world.links.get(entity).map(|l| l.player_id).unwrap_or(0);
            let spawn = self.spawn_position(player_id);
            if let Some(position) = self.world.positions.get_mut(entity) {
                position.pos = spawn;
                position.timestamp_ms = now_ms;
            }
            self.world.velocities.insert(entity, Velocity(FxVec3::ZERO));
            self.spatial.update(entity, spawn);
            self.events.push(
                self.tick,
                now_ms,
                GameEvent::Respawn {
                    entity,
                    position: spawn,
                },
            );
        }

        self.connections.sweep_gate(now_ms);
    }

    // ---- phases 6 & 7: AOI, snapshot build, event dispatch -----------

    fn phase_replication(&mut self, now_ms: u64) {
        // Capture the quantized world once.
        let mut capture = WorldCapture::new(self.tick);
        for (entity, kind) in self.world.kinds.iter() {
            let (Some(position), Some(combat)) = (
                self.world.positions.get(entity),
                self.world.combat.get(entity),
            ) else {
                continue;
            };
            let velocity = self.world.velocities.get(entity).copied().unwrap_or_default();
            let rotation = self.world.rotations.get(entity).copied().unwrap_or_default();
            let anim = self.world.anims.get(entity).copied().unwrap_or(0);
            capture.records.insert(
                entity.raw(),
                capture_record(entity.raw(), *kind, position, &velocity, &rotation, combat, anim),
            );
        }

        let scale = self.budget.interval_scale();
        let mut sends: Vec<(SocketAddr, Vec<u8>)> = Vec::new();

        // Dispatch runs at the 20 Hz snapshot cadence; tier intervals are
        // multiples of it, so per-entity scheduling stays aligned.
        if self.tick % self.config.snapshot_interval_ticks != 0 {
            self.snapshot_history.push(capture);
            self.dispatch_events(now_ms);
            return;
        }

        for conn in self.connections.iter() {
            if conn.state != ConnectionState::Established {
                continue;
            }
            let Some(entity) = conn.entity else { continue };
            let Some(viewer_pos) = self.world.positions.get(entity).map(|p| p.pos) else {
                continue;
            };
            let Some(client) = self.clients.get_mut(&conn.connection_id) else {
                continue;
            };

            let interest = client.interest.compute(
                &self.config.aoi,
                entity,
                viewer_pos,
                &self.spatial,
                &self.world.positions,
                self.tick,
                scale,
            );

            let built = build_for_client(
                &capture,
                &mut client.view,
                &interest,
                conn.last_acked_tick,
                conn.intake.last_sequence(),
                skein::net::MAX_PACKET_SIZE - 64,
            );
            match (Packet::Snapshot { body: built.bytes }).serialize() {
                Ok(bytes) => sends.push((conn.addr, bytes)),
                Err(error) => log::error!("snapshot serialize failed: {error}"),
            }
        }

        for (addr, bytes) in sends {
            if !bytes.is_empty() {
                self.endpoint.send_to(bytes, addr);
            }
        }

        self.snapshot_history.push(capture);
        self.dispatch_events(now_ms);
    }

    fn dispatch_events(&mut self, now_ms: u64) {
        let drained: Vec<skein::event::PendingEvent> = self.events.drain().collect();
        if drained.is_empty() {
            return;
        }

        let mut sends: Vec<(SocketAddr, Vec<u8>)> = Vec::new();
        for pending in &drained {
            self.combat_log
                .record(pending.tick, pending.timestamp_ms, pending.event);

            let payload = pending.event.encode_payload();
            let kind = pending.event.kind();

            if pending.event.is_broadcast() {
                for conn in self.connections.iter_mut() {
                    if conn.state != ConnectionState::Established {
                        continue;
                    }
                    let bytes = conn.build_reliable(now_ms, |header| Packet::Event {
                        header,
                        event_id: pending.event_id,
                        timestamp: pending.timestamp_ms as u32,
                        kind,
                        payload: payload.clone(),
                    });
                    if let Ok(bytes) = bytes {
                        sends.push((conn.addr, bytes));
                    }
                }
            } else if let GameEvent::SetPosition { entity, .. } = pending.event {
                let connection_id = self
                    .world
                    .links
                    .get(entity)
                    .map(|link| link.connection_id);
                if let Some(conn) = connection_id.and_then(|id| self.connections.get_mut(id)) {
                    let bytes = conn.build_reliable(now_ms, |header| Packet::Event {
                        header,
                        event_id: pending.event_id,
                        timestamp: pending.timestamp_ms as u32,
                        kind,
                        payload: payload.clone(),
                    });
                    if let Ok(bytes) = bytes {
                        sends.push((conn.addr, bytes));
                    }
                }
            }
        }

        for (addr, bytes) in sends {
            self.endpoint.send_to(bytes, addr);
        }
    }

    // ---- phase 8: aura egress & migration ----------------------------

    fn phase_aura(&mut self, now_ms: u64) {
        self.check_migration_triggers(now_ms);
        self.drive_migrations(now_ms);

        // Ghost staleness sweep runs every tick; egress at 20 Hz.
        for stale in self.ghosts.sweep_stale(now_ms) {
            self.despawn_entity(stale);
        }

        if self.tick % skein::zone::GHOST_EGRESS_INTERVAL_TICKS != 0 {
            return;
        }

        let mut per_zone: HashMap<u32, Vec<GhostState>> = HashMap::new();
        for (entity, ownership) in self.world.ownership.iter() {
            if ownership.is_ghost {
                continue;
            }
            let Some(position) = self.world.positions.get(entity) else {
                continue;
            };
            let targets = self.region.aura_targets(position.pos);
            if targets.is_empty() {
                continue;
            }

            let combat = self.world.combat.get(entity);
            let state = GhostState {
                remote_id: entity.raw(),
                player_id: self.world.links.get(entity).map(|l| l.player_id).unwrap_or(0),
                kind: self.world.kinds.get(entity).map(|k| *k as u8).unwrap_or(0),
                team: combat.map(|c| c.team_id).unwrap_or(0),
                health: combat.map(|c| c.health_percent).unwrap_or(100),
                pos: position.pos,
                vel: self.world.velocities.get(entity).map(|v| v.0).unwrap_or_default(),
                yaw: self.world.rotations.get(entity).map(|r| r.yaw).unwrap_or(0.0),
                pitch: self.world.rotations.get(entity).map(|r| r.pitch).unwrap_or(0.0),
            };
            for zone in targets {
                per_zone
                    .entry(zone)
                    .or_insert_with(|| self.ghost_batches.acquire())
                    .push(state);
            }
        }

        for (zone, batch) in per_zone {
            let payload = ZonePayload::EntitySync {
                entities: batch.clone(),
            };
            self.publish(&zone_channel(zone), zone, payload, now_ms);
            self.ghost_batches.release(batch);
        }
    }

    fn check_migration_triggers(&mut self, now_ms: u64) {
        struct Trigger {
            entity: EntityId,
            player_id: u64,
            target_zone: u32,
        }

        let mut triggers = Vec::new();
        for (entity, link) in self.world.links.iter() {
            if self
                .world
                .ownership
                .get(entity)
                .is_none_or(|o| o.is_ghost)
            {
                continue;
            }
            if self.outbound.contains_key(&link.player_id) {
                continue;
            }
            if self
                .migration_retry
                .get(&link.player_id)
                .is_some_and(|until| *until > now_ms)
            {
                continue;
            }
            let Some(position) = self.world.positions.get(entity) else {
                continue;
            };
            if let Some(neighbor) = self.region.migration_target(position.pos) {
                triggers.push(Trigger {
                    entity,
                    player_id: link.player_id,
                    target_zone: neighbor.zone_id,
                });
            }
        }

        for trigger in triggers {
            let Some(snapshot) = self.capture_entity_snapshot(trigger.entity) else {
                continue;
            };
            let migration_seq = self.next_migration_seq;
            self.next_migration_seq += 1;

            self.publish(
                &zone_channel(trigger.target_zone),
                trigger.target_zone,
                ZonePayload::MigrationRequest {
                    migration_seq,
                    snapshot,
                },
                now_ms,
            );

            self.outbound.insert(
                trigger.player_id,
                OutboundMigration::begin(
                    trigger.entity,
                    trigger.player_id,
                    trigger.target_zone,
                    migration_seq,
                    now_ms,
                    self.config.migration,
                ),
            );
            self.pending_events.push_back(ServerEvent::MigrationStarted {
                player_id: trigger.player_id,
                target_zone: trigger.target_zone,
            });
        }
    }

    fn drive_migrations(&mut self, now_ms: u64) {
        // Source side: push state updates, dispatch handoffs, reap
        // timeouts and terminal states.
        let player_ids: Vec<u64> = self.outbound.keys().copied().collect();
        for player_id in player_ids {
            let (phase, entity, target_zone, migration_seq, timed_out) = {
                let migration = self.outbound.get_mut(&player_id).unwrap();
                let timed_out = migration.check_timeout(now_ms);
                (
                    migration.phase,
                    migration.entity,
                    migration.target_zone,
                    migration.migration_seq,
                    timed_out,
                )
            };

            if timed_out || phase == MigrationPhase::Failed {
                self.outbound.remove(&player_id);
                self.migration_retry
                    .insert(player_id, now_ms + MIGRATION_RETRY_MS);
                self.pending_events
                    .push_back(ServerEvent::MigrationFailed { player_id });
                log::warn!("migration_failed player={player_id} target={target_zone}");
                continue;
            }

            match phase {
                MigrationPhase::Transferring => {
                    if self.tick % skein::zone::GHOST_EGRESS_INTERVAL_TICKS == 0 {
                        if let Some(snapshot) = self.capture_entity_snapshot(entity) {
                            self.publish(
                                &zone_channel(target_zone),
                                target_zone,
                                ZonePayload::MigrationState {
                                    migration_seq,
                                    snapshot,
                                },
                                now_ms,
                            );
                        }
                    }
                }
                MigrationPhase::Syncing => {
                    self.send_handoff(player_id, entity, target_zone, migration_seq, now_ms);
                }
                MigrationPhase::Completed => {
                    self.outbound.remove(&player_id);
                }
                _ => {}
            }
        }

        // Target side: reap shadow timeouts.
        let keys: Vec<(u32, u64)> = self.inbound.keys().copied().collect();
        for key in keys {
            let (timed_out, phase, shadow) = {
                let migration = self.inbound.get_mut(&key).unwrap();
                let timed_out = migration.check_timeout(now_ms);
                (timed_out, migration.phase, migration.shadow_entity)
            };
            if timed_out || phase == MigrationPhase::Failed {
                self.inbound.remove(&key);
                self.despawn_entity(shadow);
                log::warn!("inbound migration abandoned from zone {}", key.0);
            }
        }
    }

    fn send_handoff(
        &mut self,
        player_id: u64,
        entity: EntityId,
        target_zone: u32,
        migration_seq: u64,
        now_ms: u64,
    ) {
        let Some(neighbor) = self.region.neighbor(target_zone).copied() else {
            return;
        };
        let token = make_handoff_token(self.config.handoff_secret, player_id, migration_seq);

        let Some(link) = self.world.links.get(entity) else {
            return;
        };
        let Some(conn) = self.connections.get_mut(link.connection_id) else {
            // No live client to redirect.
            if let Some(migration) = self.outbound.get_mut(&player_id) {
                migration.apply(MigrationEvent::ClientDisconnected, now_ms);
            }
            return;
        };

        let addr = conn.addr;
        let bytes = conn.build_reliable(now_ms, |header| Packet::ZoneHandoff {
            header,
            zone_id: target_zone,
            host: neighbor.host_string(),
            port: neighbor.port,
            token,
        });
        if let Ok(bytes) = bytes {
            self.endpoint.send_to(bytes, addr);
            if let Some(migration) = self.outbound.get_mut(&player_id) {
                migration.apply(MigrationEvent::ClientRedirected, now_ms);
            }
        }
    }

    fn handle_migration_request(
        &mut self,
        source_zone: u32,
        migration_seq: u64,
        snapshot: &EntitySnapshot,
        now_ms: u64,
    ) {
        if self.inbound.contains_key(&(source_zone, migration_seq)) {
            return;
        }

        // Admission control: a full zone declines with CAPACITY.
        if self.connections.total_count() >= self.config.max_clients {
            self.publish(
                &zone_channel(source_zone),
                source_zone,
                ZonePayload::MigrationAck {
                    migration_seq,
                    accepted: false,
                    reason: DisconnectReason::ServerFull.code(),
                },
                now_ms,
            );
            return;
        }

        // Supersede any plain ghost of this entity.
        if let Some(ghost) = self.ghosts.remove(source_zone, snapshot.source_entity_id) {
            self.despawn_entity(ghost);
        }

        let shadow = self.spawn_from_snapshot(snapshot, source_zone, now_ms);
        self.inbound.insert(
            (source_zone, migration_seq),
            InboundMigration::accept(
                source_zone,
                migration_seq,
                shadow,
                *snapshot,
                now_ms,
                self.config.migration,
            ),
        );

        self.publish(
            &zone_channel(source_zone),
            source_zone,
            ZonePayload::MigrationAck {
                migration_seq,
                accepted: true,
                reason: 0,
            },
            now_ms,
        );
    }

    fn handle_migration_state(
        &mut self,
        source_zone: u32,
        migration_seq: u64,
        snapshot: &EntitySnapshot,
        now_ms: u64,
    ) {
        let Some(migration) = self.inbound.get_mut(&(source_zone, migration_seq)) else {
            return;
        };
        let shadow = migration.shadow_entity;
        migration.snapshot = *snapshot;
        migration.phase_started_ms = now_ms;

        // Lockstep: apply the source's authoritative state to the shadow.
        if let Some(position) = self.world.positions.get_mut(shadow) {
            position.pos = snapshot.pos;
            position.timestamp_ms = now_ms;
        }
        self.world.velocities.insert(shadow, Velocity(snapshot.vel));
        self.world.rotations.insert(shadow, snapshot.rotation);
        self.world.combat.insert(shadow, snapshot.combat);
        self.spatial.update(shadow, snapshot.pos);

        // Echo the sync ack the source is waiting on.
        self.publish(
            &zone_channel(source_zone),
            source_zone,
            ZonePayload::MigrationAck {
                migration_seq,
                accepted: true,
                reason: 0,
            },
            now_ms,
        );
    }

    fn handle_migration_ack(&mut self, migration_seq: u64, accepted: bool, now_ms: u64) {
        let Some((player_id, _)) = self
            .outbound
            .iter()
            .find(|(_, m)| m.migration_seq == migration_seq)
            .map(|(id, m)| (*id, m.phase))
        else {
            return;
        };

        let migration = self.outbound.get_mut(&player_id).unwrap();
        if !accepted {
            migration.apply(MigrationEvent::TargetDeclined, now_ms);
            return;
        }
        match migration.phase {
            MigrationPhase::Preparing => {
                migration.apply(MigrationEvent::TargetAccepted, now_ms);
            }
            MigrationPhase::Transferring => {
                migration.apply(MigrationEvent::TargetSynced, now_ms);
            }
            _ => {}
        }
    }

    fn handle_migration_complete(&mut self, migration_seq: u64, player_id: u64, now_ms: u64) {
        let Some(migration) = self.outbound.get_mut(&player_id) else {
            return;
        };
        if migration.migration_seq != migration_seq {
            return;
        }
        let entity = migration.entity;
        let target_zone = migration.target_zone;
        migration.apply(MigrationEvent::TargetConfirmed, now_ms);

        // The target owns the entity now; tear down the local copy and the
        // stale connection.
        let connection_id = self.world.links.get(entity).map(|l| l.connection_id);
        self.despawn_entity(entity);
        if let Some(connection_id) = connection_id {
            self.drop_connection(connection_id, DisconnectReason::ZoneHandoff, now_ms, true);
        }
        self.session.set(
            keys::player_session(player_id),
            format!("zone={target_zone}"),
            SESSION_TTL_SECS,
        );
        self.outbound.remove(&player_id);
        self.pending_events
            .push_back(ServerEvent::MigrationCompleted { player_id });
    }

    /// A migrated client presented its token: promote the shadow entity to
    /// owned and tell the fleet.
    fn claim_inbound_migration(
        &mut self,
        player_id: u64,
        token: &[u8],
        now_ms: u64,
    ) -> Option<EntityId> {
        let migration_seq =
            verify_handoff_token(self.config.handoff_secret, player_id, token)?;
        let key = self
            .inbound
            .iter()
            .find(|(_, m)| m.player_id == player_id && m.migration_seq == migration_seq)
            .map(|(key, _)| *key)?;

        let migration = self.inbound.remove(&key)?;
        let shadow = migration.shadow_entity;
        self.world
            .ownership
            .insert(shadow, Ownership::local(self.config.zone_id));
        // From here the entity simulates with authority; give it history.
        if let Some(position) = self.world.positions.get(shadow) {
            self.history.record(
                shadow,
                HistorySample {
                    timestamp_ms: now_ms,
                    position: position.pos,
                    velocity: self.world.velocities.get(shadow).map(|v| v.0).unwrap_or_default(),
                    yaw: self.world.rotations.get(shadow).map(|r| r.yaw).unwrap_or(0.0),
                    pitch: 0.0,
                },
            );
        }

        self.publish(
            &zone_channel(migration.source_zone),
            migration.source_zone,
            ZonePayload::MigrationComplete {
                migration_seq,
                player_id,
            },
            now_ms,
        );
        self.publish(
            &broadcast_channel(),
            0,
            ZonePayload::MigrationComplete {
                migration_seq,
                player_id,
            },
            now_ms,
        );

        Some(shadow)
    }

    // ---- phase 9: persistence ----------------------------------------

    fn phase_persistence(&mut self, now_ms: u64) {
        if self.tick % SESSION_WRITE_INTERVAL_TICKS == 0 {
            for (entity, link) in self.world.links.iter() {
                if let Some(position) = self.world.positions.get(entity) {
                    let p = position.pos.to_vec3();
                    self.session.set(
                        keys::player_pos(link.player_id),
                        format!("{:.2},{:.2},{:.2}", p.x, p.y, p.z),
                        60,
                    );
                }
            }
            self.session.set(
                keys::zone_players(self.config.zone_id),
                self.connections.established_count().to_string(),
                SESSION_TTL_SECS,
            );
            self.publish(
                &broadcast_channel(),
                0,
                ZonePayload::ZoneStatus {
                    player_count: self.connections.established_count() as u32,
                    capacity: self.config.max_clients as u32,
                },
                now_ms,
            );
        }

        self.combat_log.flush();
    }

    // ---- shared helpers ----------------------------------------------

    fn publish(&mut self, channel: &str, target_zone: u32, payload: ZonePayload, now_ms: u64) {
        self.bus_seq += 1;
        let message = ZoneMessage {
            source_zone: self.config.zone_id,
            target_zone,
            timestamp_ms: now_ms,
            sequence: self.bus_seq,
            payload,
        };
        if let Err(error) = self.bus.publish(channel, &message) {
            log::warn!("bus publish to {channel} failed: {error}");
        }
    }

    fn punish(&mut self, entity: EntityId, detection: Detection, now_ms: u64) {
        let Some(track) = self.world.cheat.get_mut(entity) else {
            return;
        };
        let response = self
            .cheat_monitor
            .observe(entity, &detection, track, now_ms);
        let player_id = self.world.links.get(entity).map(|l| l.player_id).unwrap_or(0);

        self.pending_events.push_back(ServerEvent::CheatDetected {
            player_id,
            kind: detection.kind,
            response,
        });

        match response {
            Response::Log => {
                log::info!("anticheat {}: player={player_id}", detection.kind.as_str());
            }
            Response::Warn | Response::Flag => {
                log::warn!(
                    "anticheat {} flagged: player={player_id} confidence={:.2}",
                    detection.kind.as_str(),
                    detection.confidence
                );
            }
            Response::Correct => {
                let correction = detection
                    .suggested_correction
                    .or_else(|| self.world.cheat.get(entity).map(|t| t.last_valid_pos));
                if let Some(position) = correction {
                    self.apply_correction(entity, position, now_ms);
                }
            }
            Response::Kick | Response::Ban => {
                let reason = if response == Response::Ban {
                    DisconnectReason::Ban
                } else {
                    DisconnectReason::CheatDetected
                };
                if let Some(link) = self.world.links.get(entity) {
                    self.drop_connection(link.connection_id, reason, now_ms, true);
                }
            }
        }
    }

    fn apply_correction(&mut self, entity: EntityId, position: FxVec3, now_ms: u64) {
        if let Some(p) = self.world.positions.get_mut(entity) {
            p.pos = position;
            p.timestamp_ms = now_ms;
        }
        self.world.velocities.insert(entity, Velocity(FxVec3::ZERO));
        self.spatial.update(entity, position);

        let last_input_seq = self
            .world
            .links
            .get(entity)
            .map(|l| l.last_processed_input_seq)
            .unwrap_or(0);
        self.events.push(
            self.tick,
            now_ms,
            GameEvent::SetPosition {
                entity,
                position,
                last_input_seq,
            },
        );
    }

    fn flag_packet_flood(&mut self, entity: EntityId, now_ms: u64) {
        let detection = {
            let Some(track) = self.world.cheat.get_mut(entity) else {
                return;
            };
            self.cheat_monitor.record_packet(track, now_ms)
        };
        if let Some(detection) = detection {
            self.punish(entity, detection, now_ms);
        }
    }

    fn spawn_position(&self, player_id: u64) -> FxVec3 {
        // Deterministic scatter around the zone center.
        let center_x = (self.region.core.min_x + self.region.core.max_x) * 0.5;
        let center_z = (self.region.core.min_z + self.region.core.max_z) * 0.5;
        let offset = (player_id % 16) as f32;
        FxVec3::from_vec3(glam::Vec3::new(
            center_x + offset * 2.0,
            0.0,
            center_z + ((player_id / 16) % 16) as f32 * 2.0,
        ))
    }

    fn spawn_player(
        &mut self,
        player_id: u64,
        connection_id: u32,
        pos: FxVec3,
        now_ms: u64,
    ) -> EntityId {
        let entity = self.store.spawn();
        self.world.kinds.insert(entity, EntityKind::Player);
        self.world.positions.insert(entity, Position::new(pos, now_ms));
        self.world.velocities.insert(entity, Velocity(FxVec3::ZERO));
        self.world.rotations.insert(entity, Rotation::default());
        self.world
            .combat
            .insert(entity, Combat::new((player_id % 2) as u8));
        self.world.inputs.insert(entity, InputState::default());
        self.world.links.insert(
            entity,
            NetLink {
                connection_id,
                player_id,
                last_processed_input_seq: 0,
            },
        );
        self.world
            .cheat
            .insert(entity, CheatTrack::new(pos, now_ms));
        self.world
            .ownership
            .insert(entity, Ownership::local(self.config.zone_id));
        self.world.anims.insert(entity, 0);
        self.spatial.insert(entity, pos);
        self.history.record(
            entity,
            HistorySample {
                timestamp_ms: now_ms,
                position: pos,
                velocity: FxVec3::ZERO,
                yaw: 0.0,
                pitch: 0.0,
            },
        );
        self.events.push(
            self.tick,
            now_ms,
            GameEvent::Spawn {
                entity,
                kind: EntityKind::Player as u8,
                position: pos,
            },
        );
        entity
    }

    fn spawn_from_snapshot(
        &mut self,
        snapshot: &EntitySnapshot,
        source_zone: u32,
        now_ms: u64,
    ) -> EntityId {
        let entity = self.store.spawn();
        self.world.kinds.insert(entity, snapshot.kind);
        self.world
            .positions
            .insert(entity, Position::new(snapshot.pos, now_ms));
        self.world.velocities.insert(entity, Velocity(snapshot.vel));
        self.world.rotations.insert(entity, snapshot.rotation);
        self.world.combat.insert(entity, snapshot.combat);
        self.world.inputs.insert(
            entity,
            InputState {
                frame: snapshot.input,
                received_ms: now_ms,
            },
        );
        self.world.links.insert(
            entity,
            NetLink {
                connection_id: 0,
                player_id: snapshot.player_id,
                last_processed_input_seq: snapshot.last_processed_input_seq,
            },
        );
        self.world.cheat.insert(entity, snapshot.cheat);
        // Shadow simulates silently until the client re-handshakes.
        self.world
            .ownership
            .insert(entity, Ownership::ghost(source_zone));
        self.world.anims.insert(entity, 0);
        self.spatial.insert(entity, snapshot.pos);
        entity
    }

    fn capture_entity_snapshot(&self, entity: EntityId) -> Option<EntitySnapshot> {
        Some(EntitySnapshot {
            player_id: self.world.links.get(entity)?.player_id,
            source_entity_id: entity.raw(),
            kind: *self.world.kinds.get(entity)?,
            pos: self.world.positions.get(entity)?.pos,
            vel: self.world.velocities.get(entity).map(|v| v.0).unwrap_or_default(),
            rotation: self.world.rotations.get(entity).copied().unwrap_or_default(),
            combat: *self.world.combat.get(entity)?,
            input: self.world.inputs.get(entity).map(|i| i.frame).unwrap_or_default(),
            cheat: *self.world.cheat.get(entity)?,
            last_processed_input_seq: self
                .world
                .links
                .get(entity)
                .map(|l| l.last_processed_input_seq)
                .unwrap_or(0),
        })
    }

    fn despawn_entity(&mut self, entity: EntityId) {
        self.world.kinds.remove(entity);
        self.world.positions.remove(entity);
        self.world.velocities.remove(entity);
        self.world.rotations.remove(entity);
        self.world.combat.remove(entity);
        self.world.inputs.remove(entity);
        self.world.links.remove(entity);
        self.world.cheat.remove(entity);
        self.world.ownership.remove(entity);
        self.world.anims.remove(entity);
        self.spatial.remove(entity);
        self.history.remove(entity);
        self.cheat_monitor.forget(entity);
        self.death_times.remove(&entity);
        self.store.despawn(entity);
    }

    fn deny(&mut self, addr: SocketAddr, reason: DisconnectReason) {
        let packet = Packet::Disconnect {
            header: Default::default(),
            reason: reason.code(),
        };
        if let Ok(bytes) = packet.serialize() {
            self.endpoint.send_to(bytes, addr);
        }
        self.pending_events
            .push_back(ServerEvent::ConnectionDenied { addr, reason });
    }

    fn drop_connection(
        &mut self,
        connection_id: u32,
        reason: DisconnectReason,
        now_ms: u64,
        notify: bool,
    ) {
        let Some(mut conn) = self.connections.remove(connection_id) else {
            return;
        };

        if notify {
            let bytes = conn.build_reliable(now_ms, |header| Packet::Disconnect {
                header,
                reason: reason.code(),
            });
            if let Ok(bytes) = bytes {
                self.endpoint.send_to(bytes, conn.addr);
            }
        }

        self.clients.remove(&connection_id);

        if let Some(entity) = conn.entity {
            // An in-flight migration for this player aborts; a handoff
            // disconnect keeps the entity alive on the target.
            if let Some(migration) = self.outbound.get_mut(&conn.player_id) {
                if reason != DisconnectReason::ZoneHandoff {
                    migration.apply(MigrationEvent::ClientDisconnected, now_ms);
                }
            }
            if reason != DisconnectReason::ZoneHandoff {
                self.events.push(
                    self.tick,
                    now_ms,
                    GameEvent::Despawn { entity },
                );
                self.despawn_entity(entity);
                self.session.delete(keys::player_session(conn.player_id));
            }
        }

        self.pending_events
            .push_back(ServerEvent::ClientDisconnected {
                connection_id,
                reason,
            });
    }

    /// FATAL path and operator stop: stop accepting, notify clients, drain
    /// outbound, flush persistence.
    pub fn shutdown(&mut self) {
        self.accepting = false;
        let now_ms = self.now_ms();
        for connection_id in self.connections.ids() {
            self.drop_connection(
                connection_id,
                DisconnectReason::ServerShutdown,
                now_ms,
                true,
            );
        }
        self.combat_log.shutdown();
        self.session.shutdown();
        self.endpoint.shutdown();
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn stats(&self) -> ZoneStats {
        ZoneStats {
            tick: self.tick,
            clients: self.connections.established_count(),
            entities: self.store.len(),
            ghosts: self.ghosts.len(),
            last_tick_ms: self.budget.last_tick_ms(),
            degraded: self.budget.is_degraded(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZoneStats {
    pub tick: u32,
    pub clients: usize,
    pub entities: usize,
    pub ghosts: usize,
    pub last_tick_ms: f32,
    pub degraded: bool,
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::ClientConnecting { addr } => {
            log::debug!("connection request from {addr}");
        }
        ServerEvent::ClientConnected {
            connection_id,
            addr,
            entity,
            player_id,
        } => {
            log::info!("client {connection_id} connected from {addr} (player {player_id}, entity {entity})");
        }
        ServerEvent::ClientDisconnected {
            connection_id,
            reason,
        } => {
            log::info!("client {connection_id} {}", reason.as_str());
        }
        ServerEvent::ConnectionDenied { addr, reason } => {
            log::warn!("connection denied to {addr}: {}", reason.as_str());
        }
        ServerEvent::CheatDetected {
            player_id,
            kind,
            response,
        } => {
            log::warn!("anticheat: player={player_id} {} -> {:?}", kind.as_str(), response);
        }
        ServerEvent::MigrationStarted {
            player_id,
            target_zone,
        } => {
            log::info!("migration started: player={player_id} -> zone {target_zone}");
        }
        ServerEvent::MigrationCompleted { player_id } => {
            log::info!("migration complete: player={player_id}");
        }
        ServerEvent::MigrationFailed { player_id } => {
            log::warn!("migration failed: player={player_id}");
        }
        ServerEvent::Error { message } => {
            log::error!("{message}");
        }
    }
}
