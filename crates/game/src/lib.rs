pub mod anticheat;
pub mod aoi;
pub mod arena;
pub mod combat;
pub mod entity;
pub mod error;
pub mod event;
pub mod history;
pub mod math;
pub mod movement;
pub mod net;
pub mod persist;
pub mod replication;
pub mod simulation;
pub mod spatial;
pub mod zone;

pub use anticheat::{
    CheatConfig, CheatMonitor, Detection, Response, StaticCollider, ViolationKind,
};
pub use aoi::{AoiConfig, InterestDelta, Tier, ViewerInterest};
pub use arena::{BufferPool, Pool, ScratchArena};
pub use combat::{
    CombatConfig, CombatRng, CombatView, HitOutcome, LagCompensator, MeleeHit, RewindOutcome,
    apply_damage, resolve_melee, resolve_ranged,
};
pub use entity::{
    CheatTrack, Combat, ComponentPool, EntityId, EntityKind, EntityStore, InputState, LifeState,
    NetLink, Ownership, Position, Rotation, Velocity,
};
pub use error::{Error, ErrorKind};
pub use event::{EventQueue, GameEvent, PendingEvent};
pub use history::{HistorySample, HistoryStore, PositionRing};
pub use math::{Fx, FxVec3, WorldBounds};
pub use movement::{MovementConfig, integrate_steps, resolve_overlap, validate_displacement};
pub use net::{
    Connection, ConnectionManager, ConnectionState, Datagram, DisconnectReason, EntityRecord,
    EventKind, InputFlags, InputFrame, MAX_PACKET_SIZE, NetworkEndpoint, Packet, PacketError,
    RateLimits, SnapshotDecoder, SnapshotHeader,
};
pub use persist::{CombatLogWriter, MemoryCombatLog, MemorySessionBackend, SessionWriter};
pub use replication::{
    BuiltSnapshot, ClientView, SnapshotHistory, WorldCapture, build_for_client, capture_record,
};
pub use simulation::{BudgetConfig, BudgetMonitor, BudgetVerdict, FixedTimestep, TICK_RATE_HZ};
pub use spatial::SpatialGrid;
pub use zone::{
    EntitySnapshot, GhostState, GhostTable, InProcessFabric, InboundMigration, MessageDedup,
    MigrationEvent, MigrationPhase, MigrationTimeouts, NeighborZone, OutboundMigration, Placement,
    ZoneBus, ZoneBusHandle, ZoneMessage, ZonePayload, ZoneRect, ZoneRegion,
};
