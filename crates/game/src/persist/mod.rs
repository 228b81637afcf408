mod combat_log;
mod session;

pub use combat_log::{CombatLogBackend, CombatLogWriter, LoggedEvent, MemoryCombatLog};
pub use session::{
    MemorySessionBackend, SESSION_TTL_SECS, SessionBackend, SessionOp, SessionWriter, keys,
};
