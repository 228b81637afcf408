mod history;
mod view;

pub use history::{SNAPSHOT_HISTORY_TICKS, SnapshotHistory, WorldCapture};
pub use view::{BuiltSnapshot, ClientView, build_for_client, capture_record};
