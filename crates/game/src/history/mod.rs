mod ring;

pub use ring::{HistorySample, HistoryStore, PositionRing, RING_CAPACITY};
