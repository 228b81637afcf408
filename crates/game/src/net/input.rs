use rkyv::{Archive, Deserialize, Serialize};

use super::wire::{WireError, WireReader, WireWriter};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InputFlags: u8 {
        const FORWARD = 1 << 0;
        const BACK    = 1 << 1;
        const LEFT    = 1 << 2;
        const RIGHT   = 1 << 3;
        const JUMP    = 1 << 4;
        const ATTACK  = 1 << 5;
        const BLOCK   = 1 << 6;
        const SPRINT  = 1 << 7;
    }
}

/// One client input frame. `flags` stays raw on the struct so the frame
/// archives cleanly; use [`InputFrame::flags`] for typed access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct InputFrame {
    pub sequence: u32,
    pub client_timestamp: u32,
    pub flags: u8,
    pub yaw: f32,
    pub pitch: f32,
    pub target_id: u32,
    /// Latest server_tick the client has received; the snapshot-baseline
    /// acknowledgment rides on the input stream.
    pub last_received_tick: u32,
}

impl InputFrame {
    pub fn flags(&self) -> InputFlags {
        InputFlags::from_bits_truncate(self.flags)
    }

    pub fn encode(&self, w: &mut WireWriter) {
        w.u32(self.sequence);
        w.u32(self.client_timestamp);
        w.u8(self.flags);
        w.f32(self.yaw);
        w.f32(self.pitch);
        w.u32(self.target_id);
        w.u32(self.last_received_tick);
    }

    pub fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            sequence: r.u32()?,
            client_timestamp: r.u32()?,
            flags: r.u8()?,
            yaw: r.f32()?,
            pitch: r.f32()?,
            target_id: r.u32()?,
            last_received_tick: r.u32()?,
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InputError {
    #[error("sequence {got} not newer than {last}")]
    StaleSequence { got: u32, last: u32 },
    #[error("sequence {got} outside the {window}-entry window from {last}")]
    OutOfWindow { got: u32, last: u32, window: u32 },
    #[error("duplicate sequence {0}")]
    Duplicate(u32),
    #[error("yaw or pitch out of range")]
    AngleOutOfRange,
    #[error("conflicting direction flags 0b{0:08b}")]
    ConflictingFlags(u8),
}

pub const SEQUENCE_WINDOW: u32 = 1024;

/// Replay-protection bitmap over the last 1024 accepted sequences.
#[derive(Debug)]
pub struct SequenceWindow {
    last_accepted: u32,
    bitmap: [u64; (SEQUENCE_WINDOW / 64) as usize],
    any_accepted: bool,
}

impl Default for SequenceWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceWindow {
    pub fn new() -> Self {
        Self {
            last_accepted: 0,
            bitmap: [0; (SEQUENCE_WINDOW / 64) as usize],
            any_accepted: false,
        }
    }

    pub fn last_accepted(&self) -> u32 {
        self.last_accepted
    }

    /// Accepts strictly-increasing sequences within the window; anything
    /// else is dropped, never reordered.
    pub fn accept(&mut self, sequence: u32) -> Result<(), InputError> {
        if self.any_accepted {
            if sequence <= self.last_accepted {
                if self.is_marked(sequence) {
                    return Err(InputError::Duplicate(sequence));
                }
                return Err(InputError::StaleSequence {
                    got: sequence,
                    last: self.last_accepted,
                });
            }
            let advance = sequence - self.last_accepted;
            if advance > SEQUENCE_WINDOW {
                return Err(InputError::OutOfWindow {
                    got: sequence,
                    last: self.last_accepted,
                    window: SEQUENCE_WINDOW,
                });
            }
            for cleared in (self.last_accepted + 1)..sequence {
                self.clear(cleared);
            }
        }

        self.mark(sequence);
        self.last_accepted = sequence;
        self.any_accepted = true;
        Ok(())
    }

    fn slot(sequence: u32) -> (usize, u64) {
        let bit = sequence % SEQUENCE_WINDOW;
        ((bit / 64) as usize, 1u64 << (bit % 64))
    }

    fn mark(&mut self, sequence: u32) {
        let (word, mask) = Self::slot(sequence);
        self.bitmap[word] |= mask;
    }

    fn clear(&mut self, sequence: u32) {
        let (word, mask) = Self::slot(sequence);
        self.bitmap[word] &= !mask;
    }

    fn is_marked(&self, sequence: u32) -> bool {
        if self.last_accepted.wrapping_sub(sequence) >= SEQUENCE_WINDOW {
            return false;
        }
        let (word, mask) = Self::slot(sequence);
        self.bitmap[word] & mask != 0
    }
}

/// Per-connection input intake: sequence/replay validation, angle and flag
/// sanity, and the single stored frame the physics phase integrates.
#[derive(Debug, Default)]
pub struct InputIntake {
    window: SequenceWindow,
    current: InputFrame,
    has_input: bool,
}

impl InputIntake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and stores a frame. A rejected frame leaves the previous
    /// stored input in place.
    pub fn submit(&mut self, frame: InputFrame) -> Result<(), InputError> {
        validate_frame(&frame)?;
        self.window.accept(frame.sequence)?;
        self.current = frame;
        self.has_input = true;
        Ok(())
    }

    pub fn current(&self) -> Option<&InputFrame> {
        self.has_input.then_some(&self.current)
    }

    pub fn last_sequence(&self) -> u32 {
        self.window.last_accepted()
    }
}

fn validate_frame(frame: &InputFrame) -> Result<(), InputError> {
    use std::f32::consts::{FRAC_PI_2, PI};

    if !frame.yaw.is_finite()
        || !frame.pitch.is_finite()
        || frame.yaw < -PI
        || frame.yaw > PI
        || frame.pitch < -FRAC_PI_2
        || frame.pitch > FRAC_PI_2
    {
        return Err(InputError::AngleOutOfRange);
    }

    let flags = frame.flags();
    if flags.contains(InputFlags::FORWARD | InputFlags::BACK)
        || flags.contains(InputFlags::LEFT | InputFlags::RIGHT)
    {
        return Err(InputError::ConflictingFlags(frame.flags));
    }

    Ok(())
}
