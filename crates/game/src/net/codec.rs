use std::collections::{HashMap, VecDeque};

use crate::math::Fx;

use super::wire::{WireError, WireReader, WireWriter};

/// Wire position quantum: 1/64 m.
pub const POS_QUANTUM_PER_METER: f32 = 64.0;

/// Position components whose quantized delta stays below this never ship
/// (≈6 cm), so quantization noise cannot drive traffic.
pub const POS_EPSILON_Q: i32 = 4;
/// Rotation threshold, int8 quanta (≈2°).
pub const ROT_EPSILON_Q: i16 = 2;

pub const MASK_POSITION: u16 = 1 << 0;
pub const MASK_ROTATION: u16 = 1 << 1;
pub const MASK_VELOCITY: u16 = 1 << 2;
pub const MASK_HEALTH: u16 = 1 << 3;
pub const MASK_ANIM: u16 = 1 << 4;
pub const MASK_KIND: u16 = 1 << 5;
pub const MASK_TEAM: u16 = 1 << 6;
pub const MASK_ALL: u16 =
    MASK_POSITION | MASK_ROTATION | MASK_VELOCITY | MASK_HEALTH | MASK_ANIM | MASK_KIND | MASK_TEAM;

// Position delta escape markers: the in-band i8 range excludes these three
// byte values.
const MARK_I16: u8 = 0x7F;
const MARK_I32: u8 = 0x80;
const MARK_ABS: u8 = 0x81;

pub fn quantize_position(v: Fx) -> i32 {
    // 1024 raw units per world unit down to 64 per unit, round-to-nearest.
    let raw = v.raw();
    let bias = if raw >= 0 { 8 } else { -8 };
    (raw + bias) / 16
}

pub fn dequantize_position(q: i32) -> f32 {
    q as f32 / POS_QUANTUM_PER_METER
}

pub fn quantize_rotation(angle: f32) -> i8 {
    (angle / std::f32::consts::PI * 127.0).round().clamp(-127.0, 127.0) as i8
}

pub fn dequantize_rotation(q: i8) -> f32 {
    q as f32 / 127.0 * std::f32::consts::PI
}

pub fn quantize_velocity(v: Fx) -> i16 {
    (v.to_f32() * 100.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn dequantize_velocity(q: i16) -> f32 {
    q as f32 / 100.0
}

/// Quantized wire-side view of one entity. Replication builds these from
/// components; the delta codec only ever compares records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntityRecord {
    pub id: u32,
    pub kind: u8,
    pub team: u8,
    pub anim: u8,
    pub health: u8,
    pub pos_q: [i32; 3],
    pub rot_q: [i8; 2],
    pub vel_q: [i16; 3],
}

impl EntityRecord {
    /// Field mask of everything that differs from `baseline` beyond the
    /// codec thresholds.
    pub fn changed_mask(&self, baseline: &EntityRecord) -> u16 {
        let mut mask = 0;

        if self
            .pos_q
            .iter()
            .zip(baseline.pos_q.iter())
            .any(|(c, b)| (c - b).abs() >= POS_EPSILON_Q)
        {
            mask |= MASK_POSITION;
        }
        if self
            .rot_q
            .iter()
            .zip(baseline.rot_q.iter())
            .any(|(c, b)| (*c as i16 - *b as i16).abs() >= ROT_EPSILON_Q)
        {
            mask |= MASK_ROTATION;
        }
        if self.vel_q != baseline.vel_q {
            mask |= MASK_VELOCITY;
        }
        if self.health != baseline.health {
            mask |= MASK_HEALTH;
        }
        if self.anim != baseline.anim {
            mask |= MASK_ANIM;
        }
        if self.kind != baseline.kind {
            mask |= MASK_KIND;
        }
        if self.team != baseline.team {
            mask |= MASK_TEAM;
        }

        mask
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotHeader {
    pub server_tick: u32,
    /// 0 = full snapshot.
    pub baseline_tick: u32,
    pub entity_count: u16,
    pub removed_count: u16,
    pub flags: u32,
    /// Last input sequence the server integrated for this client, echoed
    /// so prediction can reconcile.
    pub last_input_seq: u32,
}

fn write_pos_component(w: &mut WireWriter, current: i32, baseline: i32, absolute: bool) {
    if absolute {
        w.u8(MARK_ABS);
        w.i32(current);
        return;
    }

    let delta = current.wrapping_sub(baseline);
    let as_byte = delta as u8;
    if (-126..=126).contains(&delta)
        && as_byte != MARK_I16
        && as_byte != MARK_I32
        && as_byte != MARK_ABS
    {
        w.i8(delta as i8);
    } else if (i16::MIN as i32..=i16::MAX as i32).contains(&delta) {
        w.u8(MARK_I16);
        w.i16(delta as i16);
    } else {
        w.u8(MARK_I32);
        w.i32(delta);
    }
}

fn read_pos_component(r: &mut WireReader<'_>, baseline: i32) -> Result<i32, WireError> {
    let first = r.u8()?;
    Ok(match first {
        MARK_ABS => r.i32()?,
        MARK_I16 => baseline.wrapping_add(r.i16()? as i32),
        MARK_I32 => baseline.wrapping_add(r.i32()?),
        b => baseline.wrapping_add((b as i8) as i32),
    })
}

/// Builds a SNAPSHOT body. `entries` pairs each visible entity's current
/// record with the field mask its AOI tier allows; `baseline` is empty for
/// a full snapshot (`baseline_tick` 0).
pub fn encode_snapshot(
    server_tick: u32,
    baseline_tick: u32,
    last_input_seq: u32,
    entries: &[(EntityRecord, u16)],
    baseline: &HashMap<u32, EntityRecord>,
    removed: &[u32],
) -> Vec<u8> {
    let full = baseline_tick == 0;
    let mut body = WireWriter::with_capacity(64 + entries.len() * 24);

    // Deltas build first; only then is the header written, with the count
    // of entries that survived the change thresholds.
    let mut deltas = WireWriter::with_capacity(entries.len() * 24);
    let mut entity_count: u16 = 0;

    for (record, allowed) in entries {
        let zero = EntityRecord::default();
        let base = if full {
            &zero
        } else {
            baseline.get(&record.id).unwrap_or(&zero)
        };
        let known = !full && baseline.contains_key(&record.id);

        let mask = if known {
            record.changed_mask(base) & *allowed
        } else {
            // New to this client: ship everything its tier allows, plus
            // identity fields.
            (*allowed | MASK_KIND | MASK_TEAM | MASK_HEALTH | MASK_POSITION) & MASK_ALL
        };

        if mask == 0 {
            continue;
        }
        entity_count += 1;

        deltas.u32(record.id);
        deltas.u16(mask);

        if mask & MASK_POSITION != 0 {
            let absolute = !known;
            for i in 0..3 {
                write_pos_component(&mut deltas, record.pos_q[i], base.pos_q[i], absolute);
            }
        }
        if mask & MASK_ROTATION != 0 {
            deltas.i8(record.rot_q[0]);
            deltas.i8(record.rot_q[1]);
        }
        if mask & MASK_VELOCITY != 0 {
            for i in 0..3 {
                deltas.i16(record.vel_q[i]);
            }
        }
        if mask & MASK_HEALTH != 0 {
            deltas.u8(record.health);
        }
        if mask & MASK_ANIM != 0 {
            deltas.u8(record.anim);
        }
        if mask & MASK_KIND != 0 {
            deltas.u8(record.kind);
        }
        if mask & MASK_TEAM != 0 {
            deltas.u8(record.team);
        }
    }

    body.u32(server_tick);
    body.u32(baseline_tick);
    body.u16(entity_count);
    body.u16(removed.len() as u16);
    body.u32(0);
    body.u32(last_input_seq);
    body.bytes(&deltas.into_vec());
    for id in removed {
        body.u32(*id);
    }

    body.into_vec()
}

/// Parses a SNAPSHOT body against the receiver's record map, returning the
/// header and the updated records. Does not mutate the caller's state.
pub fn decode_snapshot(
    body: &[u8],
    known: &HashMap<u32, EntityRecord>,
) -> Result<(SnapshotHeader, Vec<EntityRecord>, Vec<u32>), WireError> {
    let mut r = WireReader::new(body);
    let header = SnapshotHeader {
        server_tick: r.u32()?,
        baseline_tick: r.u32()?,
        entity_count: r.u16()?,
        removed_count: r.u16()?,
        flags: r.u32()?,
        last_input_seq: r.u32()?,
    };
    let full = header.baseline_tick == 0;

    let mut records = Vec::with_capacity(header.entity_count as usize);
    for _ in 0..header.entity_count {
        let id = r.u32()?;
        let mask = r.u16()?;

        let mut record = if full {
            EntityRecord {
                id,
                ..Default::default()
            }
        } else {
            known.get(&id).copied().unwrap_or(EntityRecord {
                id,
                ..Default::default()
            })
        };

        if mask & MASK_POSITION != 0 {
            for i in 0..3 {
                record.pos_q[i] = read_pos_component(&mut r, record.pos_q[i])?;
            }
        }
        if mask & MASK_ROTATION != 0 {
            record.rot_q[0] = r.i8()?;
            record.rot_q[1] = r.i8()?;
        }
        if mask & MASK_VELOCITY != 0 {
            for i in 0..3 {
                record.vel_q[i] = r.i16()?;
            }
        }
        if mask & MASK_HEALTH != 0 {
            record.health = r.u8()?;
        }
        if mask & MASK_ANIM != 0 {
            record.anim = r.u8()?;
        }
        if mask & MASK_KIND != 0 {
            record.kind = r.u8()?;
        }
        if mask & MASK_TEAM != 0 {
            record.team = r.u8()?;
        }

        records.push(record);
    }

    let mut removed = Vec::with_capacity(header.removed_count as usize);
    for _ in 0..header.removed_count {
        removed.push(r.u32()?);
    }

    Ok((header, records, removed))
}

/// Client-side snapshot state. Decoded states are kept in a short ring
/// keyed by server_tick: a delta is always reconstructed against the exact
/// state the server named as its baseline, which both sides hold because
/// only acknowledged ticks are ever used as baselines.
#[derive(Debug)]
pub struct SnapshotDecoder {
    states: VecDeque<(u32, HashMap<u32, EntityRecord>)>,
    capacity: usize,
    last_tick: u32,
}

impl Default for SnapshotDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotDecoder {
    pub fn new() -> Self {
        Self {
            states: VecDeque::new(),
            capacity: 60,
            last_tick: 0,
        }
    }

    pub fn last_tick(&self) -> u32 {
        self.last_tick
    }

    /// The newest reconstructed state.
    pub fn records(&self) -> &HashMap<u32, EntityRecord> {
        static EMPTY: std::sync::OnceLock<HashMap<u32, EntityRecord>> = std::sync::OnceLock::new();
        self.states
            .back()
            .map(|(_, state)| state)
            .unwrap_or_else(|| EMPTY.get_or_init(HashMap::new))
    }

    pub fn state_at(&self, tick: u32) -> Option<&HashMap<u32, EntityRecord>> {
        self.states
            .iter()
            .find(|(t, _)| *t == tick)
            .map(|(_, state)| state)
    }

    /// Applies a snapshot body. Out-of-order snapshots (older server_tick)
    /// and deltas against a baseline this client no longer holds are
    /// dropped; the server falls back to a full snapshot on its own once
    /// the ack round-trips.
    pub fn apply(&mut self, body: &[u8]) -> Result<Option<SnapshotHeader>, WireError> {
        let probe = SnapshotHeader {
            baseline_tick: {
                let mut r = WireReader::new(body);
                r.u32()?;
                r.u32()?
            },
            ..Default::default()
        };

        let empty = HashMap::new();
        let base = if probe.baseline_tick == 0 {
            &empty
        } else {
            match self.state_at(probe.baseline_tick) {
                Some(state) => state,
                None => return Ok(None),
            }
        };

        let (header, records, removed) = decode_snapshot(body, base)?;
        if self.last_tick != 0 && header.server_tick <= self.last_tick {
            return Ok(None);
        }

        let mut next = base.clone();
        for record in records {
            next.insert(record.id, record);
        }
        for id in removed {
            next.remove(&id);
        }

        if self.states.len() >= self.capacity {
            self.states.pop_front();
        }
        self.states.push_back((header.server_tick, next));
        self.last_tick = header.server_tick;
        Ok(Some(header))
    }
}
