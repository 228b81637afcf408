mod lag;
mod resolve;

pub use lag::{LagCompensator, RewindOutcome};
pub use resolve::{
    CombatConfig, CombatRng, CombatView, HitOutcome, MeleeHit, apply_damage, resolve_melee,
    resolve_ranged,
};
