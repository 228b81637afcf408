use skein::anticheat::CheatConfig;
use skein::aoi::AoiConfig;
use skein::combat::CombatConfig;
use skein::movement::MovementConfig;
use skein::net::RateLimits;
use skein::simulation::BudgetConfig;
use skein::zone::{MigrationTimeouts, NeighborZone, ZoneRect};

#[derive(Debug, Clone)]
pub struct ZoneConfig {
    pub zone_id: u32,
    pub tick_rate: u32,
    pub max_clients: usize,

    /// This zone's core region on the world grid.
    pub core: ZoneRect,
    pub neighbors: Vec<NeighborZone>,

    pub movement: MovementConfig,
    pub combat: CombatConfig,
    pub cheat: CheatConfig,
    pub aoi: AoiConfig,
    pub limits: RateLimits,
    pub budget: BudgetConfig,
    pub migration: MigrationTimeouts,

    /// Shared fleet secret for handoff tokens.
    pub handoff_secret: u64,
    /// Deterministic seed for combat rolls; 0 picks from the clock.
    pub combat_seed: u64,
    /// Snapshot dispatch cadence in ticks (3 = 20 Hz at a 60 Hz loop).
    pub snapshot_interval_ticks: u32,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            zone_id: 1,
            tick_rate: 60,
            max_clients: 32,
            core: ZoneRect::new(-1024.0, -1024.0, 1024.0, 1024.0),
            neighbors: Vec::new(),
            movement: MovementConfig::default(),
            combat: CombatConfig::default(),
            cheat: CheatConfig::default(),
            aoi: AoiConfig::default(),
            limits: RateLimits::default(),
            budget: BudgetConfig::default(),
            migration: MigrationTimeouts::default(),
            handoff_secret: 0x5EA1_5EA1_5EA1_5EA1,
            combat_seed: 0,
            snapshot_interval_ticks: 3,
        }
    }
}
