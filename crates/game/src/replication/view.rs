use std::collections::{HashMap, VecDeque};

use crate::aoi::InterestDelta;
use crate::entity::{Combat, EntityKind, Position, Rotation, Velocity};
use crate::net::{
    EntityRecord, decode_snapshot, encode_snapshot, quantize_position, quantize_rotation,
    quantize_velocity,
};

use super::history::{SNAPSHOT_HISTORY_TICKS, WorldCapture};

/// Builds the wire record for one entity from its components.
pub fn capture_record(
    wire_id: u32,
    kind: EntityKind,
    position: &Position,
    velocity: &Velocity,
    rotation: &Rotation,
    combat: &Combat,
    anim: u8,
) -> EntityRecord {
    EntityRecord {
        id: wire_id,
        kind: kind as u8,
        team: combat.team_id,
        anim,
        health: combat.health_percent,
        pos_q: [
            quantize_position(position.pos.x),
            quantize_position(position.pos.y),
            quantize_position(position.pos.z),
        ],
        rot_q: [
            quantize_rotation(rotation.yaw),
            quantize_rotation(rotation.pitch),
        ],
        vel_q: [
            quantize_velocity(velocity.0.x),
            quantize_velocity(velocity.0.y),
            quantize_velocity(velocity.0.z),
        ],
    }
}

#[derive(Debug, Clone)]
pub struct BuiltSnapshot {
    pub bytes: Vec<u8>,
    pub server_tick: u32,
    pub baseline_tick: u32,
    pub entity_count: u16,
}

/// Per-client replication state: a short ring of the states this client
/// reconstructs from the snapshots we sent it. The entry for an
/// acknowledged tick is exactly what the client holds for that tick, so a
/// delta against it decodes losslessly no matter which packets dropped in
/// between.
#[derive(Debug)]
pub struct ClientView {
    projected: VecDeque<(u32, HashMap<u32, EntityRecord>)>,
    capacity: usize,
}

impl Default for ClientView {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientView {
    pub fn new() -> Self {
        Self {
            projected: VecDeque::new(),
            capacity: SNAPSHOT_HISTORY_TICKS,
        }
    }

    pub fn baseline(&self, tick: u32) -> Option<&HashMap<u32, EntityRecord>> {
        self.projected
            .iter()
            .find(|(t, _)| *t == tick)
            .map(|(_, state)| state)
    }

    fn push(&mut self, tick: u32, state: HashMap<u32, EntityRecord>) {
        if self.projected.len() >= self.capacity {
            self.projected.pop_front();
        }
        self.projected.push_back((tick, state));
    }

    /// Drops ring entries older than the acked tick; the client will never
    /// be asked to decode against them again.
    pub fn ack(&mut self, acked_tick: u32) {
        while self
            .projected
            .front()
            .is_some_and(|(t, _)| *t < acked_tick)
        {
            self.projected.pop_front();
        }
    }
}

// Worst-case encoded size of one entity delta: id, mask, absolute
// position, rotation, velocity, and the four byte fields.
const ENTRY_SIZE_BOUND: usize = 4 + 2 + 15 + 2 + 6 + 4;
const HEADER_SIZE: usize = 20;

/// Builds one client's snapshot for this tick and records the state it
/// produces. Baseline selection per the codec contract: the client's last
/// acked tick when we still hold it, else a full snapshot. `max_bytes`
/// bounds the packet; entities beyond the budget stay dirty against the
/// baseline and ship on a following tick.
pub fn build_for_client(
    capture: &WorldCapture,
    view: &mut ClientView,
    interest: &InterestDelta,
    acked_tick: u32,
    last_input_seq: u32,
    max_bytes: usize,
) -> BuiltSnapshot {
    let baseline_tick = if acked_tick != 0 && view.baseline(acked_tick).is_some() {
        acked_tick
    } else {
        0
    };

    let empty = HashMap::new();
    let baseline = if baseline_tick == 0 {
        &empty
    } else {
        view.baseline(baseline_tick).unwrap_or(&empty)
    };

    let removed: Vec<u32> = interest.leaves.iter().map(|id| id.raw()).collect();

    let budget = max_bytes.saturating_sub(HEADER_SIZE + removed.len() * 4);
    let max_entries = (budget / ENTRY_SIZE_BOUND).max(1);

    let mut entries = Vec::with_capacity(interest.due.len().min(max_entries));
    for (id, tier) in &interest.due {
        if entries.len() >= max_entries {
            break;
        }
        if let Some(record) = capture.records.get(&id.raw()) {
            entries.push((*record, tier.field_mask()));
        }
    }

    let bytes = encode_snapshot(
        capture.tick,
        baseline_tick,
        last_input_seq,
        &entries,
        baseline,
        &removed,
    );

    // Mirror what the client will reconstruct from these bytes; decoding
    // our own output keeps the mirror exact by construction.
    let (header, records, removed_ids) =
        decode_snapshot(&bytes, baseline).expect("self-encoded snapshot must decode");
    let mut next = baseline.clone();
    for record in records {
        next.insert(record.id, record);
    }
    for id in removed_ids {
        next.remove(&id);
    }
    view.push(capture.tick, next);

    BuiltSnapshot {
        bytes,
        server_tick: capture.tick,
        baseline_tick,
        entity_count: header.entity_count,
    }
}
