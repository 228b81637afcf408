mod budget;
mod tick;

pub use budget::{BudgetConfig, BudgetMonitor, BudgetVerdict, PhaseTimer};
pub use tick::{FixedTimestep, TICK_RATE_HZ};
