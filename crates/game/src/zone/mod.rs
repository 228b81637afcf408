mod bus;
mod ghost;
mod messages;
mod migration;
mod region;

pub use bus::{BusError, InProcessFabric, MessageDedup, ZoneBus, ZoneBusHandle};
pub use ghost::{GHOST_EGRESS_INTERVAL_TICKS, GHOST_STALE_MS, GhostTable, GhostUpdate};
pub use messages::{
    EntitySnapshot, GhostState, ZoneMessage, ZonePayload, broadcast_channel, zone_channel,
};
pub use migration::{
    InboundMigration, MigrationEvent, MigrationPhase, MigrationTimeouts, OutboundMigration,
    make_handoff_token, verify_handoff_token,
};
pub use region::{NeighborZone, Placement, ZoneRect, ZoneRegion};
