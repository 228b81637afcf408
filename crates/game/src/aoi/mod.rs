mod interest;

pub use interest::{AoiConfig, InterestDelta, Tier, ViewerInterest, VisibleEntry};
