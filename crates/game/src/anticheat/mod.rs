mod monitor;

pub use monitor::{
    CheatConfig, CheatMonitor, Detection, Response, StaticCollider, ViolationKind,
    speed_confidence,
};
