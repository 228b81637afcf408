use std::collections::{HashMap, VecDeque};

use glam::Vec3;

use crate::entity::{CheatTrack, EntityId};
use crate::math::FxVec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    SpeedHack,
    Teleport,
    FlyHack,
    NoClip,
    InputManipulation,
    PacketFlooding,
    DamageHack,
    HitboxExtension,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::SpeedHack => "speed_hack",
            ViolationKind::Teleport => "teleport",
            ViolationKind::FlyHack => "fly_hack",
            ViolationKind::NoClip => "no_clip",
            ViolationKind::InputManipulation => "input_manipulation",
            ViolationKind::PacketFlooding => "packet_flooding",
            ViolationKind::DamageHack => "damage_hack",
            ViolationKind::HitboxExtension => "hitbox_extension",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub kind: ViolationKind,
    pub confidence: f32,
    /// Authoritative position to snap the client back to, when one exists.
    pub suggested_correction: Option<FxVec3>,
}

/// Response ladder, mildest first. Severity picks a rung.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Response {
    Log,
    Warn,
    Flag,
    Correct,
    Kick,
    Ban,
}

/// Axis-aligned static solid used by the no-clip check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticCollider {
    pub min: Vec3,
    pub max: Vec3,
}

impl StaticCollider {
    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Slab test for the segment p0 -> p1.
    fn intersects_segment(&self, p0: Vec3, p1: Vec3) -> bool {
        let dir = p1 - p0;
        let mut t_min = 0.0f32;
        let mut t_max = 1.0f32;

        for axis in 0..3 {
            let (start, delta, min, max) = match axis {
                0 => (p0.x, dir.x, self.min.x, self.max.x),
                1 => (p0.y, dir.y, self.min.y, self.max.y),
                _ => (p0.z, dir.z, self.min.z, self.max.z),
            };
            if delta.abs() < 1e-9 {
                if start < min || start > max {
                    return false;
                }
                continue;
            }
            let inv = 1.0 / delta;
            let (t0, t1) = ((min - start) * inv, (max - start) * inv);
            let (t0, t1) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct CheatConfig {
    /// |Δp| beyond this in one step is a teleport regardless of speed math.
    pub teleport_threshold_m: f32,
    /// Ground-contact grace before sustained ascent reads as flight.
    pub fly_grace_ms: u32,
    pub hitbox_divergence_m: f32,
    pub max_damage_per_hit: u8,
    pub max_dps: f32,
    pub packet_rate_per_sec: u32,
    pub violation_window_ms: u64,
    pub trust_credit_interval_ms: u64,
}

impl Default for CheatConfig {
    fn default() -> Self {
        Self {
            teleport_threshold_m: 100.0,
            fly_grace_ms: 500,
            hitbox_divergence_m: 2.0,
            max_damage_per_hit: 40,
            max_dps: 120.0,
            packet_rate_per_sec: 60,
            violation_window_ms: 5_000,
            trust_credit_interval_ms: 60_000,
        }
    }
}

/// Confidence for a speed violation from the ratio of observed to allowed
/// displacement: barely-over reads low, multiples read certain.
pub fn speed_confidence(observed_m: f32, allowed_m: f32) -> f32 {
    if allowed_m <= 0.0 {
        return 1.0;
    }
    ((observed_m / allowed_m) - 1.0).clamp(0.2, 1.0)
}

/// Process-wide anti-cheat state. Writes are confined to the tick thread;
/// diagnostics read snapshot copies via [`CheatMonitor::violation_counts`].
#[derive(Debug)]
pub struct CheatMonitor {
    config: CheatConfig,
    violations: HashMap<EntityId, VecDeque<(u64, ViolationKind)>>,
    damage_windows: HashMap<EntityId, VecDeque<(u64, u16)>>,
    trust_credit_ms: HashMap<EntityId, u64>,
}

impl CheatMonitor {
    pub fn new(config: CheatConfig) -> Self {
        Self {
            config,
            violations: HashMap::new(),
            damage_windows: HashMap::new(),
            trust_credit_ms: HashMap::new(),
        }
    }

    pub fn config(&self) -> &CheatConfig {
        &self.config
    }

    pub fn check_teleport(&self, p0: FxVec3, p1: FxVec3) -> Option<Detection> {
        let distance = p0.distance(p1);
        if distance > self.config.teleport_threshold_m {
            Some(Detection {
                kind: ViolationKind::Teleport,
                confidence: 1.0,
                suggested_correction: Some(p0),
            })
        } else {
            None
        }
    }

    /// Tracks sustained ascent without jump input. Call once per tick for
    /// each moving entity.
    pub fn check_fly(
        &self,
        track: &mut CheatTrack,
        vertical_velocity: f32,
        jump_held: bool,
        grounded: bool,
        dt_ms: u32,
    ) -> Option<Detection> {
        if grounded || jump_held || vertical_velocity <= 0.0 {
            track.rising_ms = 0;
            return None;
        }

        track.rising_ms = track.rising_ms.saturating_add(dt_ms);
        if track.rising_ms <= self.config.fly_grace_ms {
            return None;
        }

        Some(Detection {
            kind: ViolationKind::FlyHack,
            confidence: ((track.rising_ms - self.config.fly_grace_ms) as f32 / 1000.0)
                .clamp(0.5, 1.0),
            suggested_correction: Some(track.last_valid_pos),
        })
    }

    pub fn check_no_clip(
        &self,
        p0: FxVec3,
        p1: FxVec3,
        colliders: &[StaticCollider],
    ) -> Option<Detection> {
        let a = p0.to_vec3();
        let b = p1.to_vec3();
        for solid in colliders {
            if solid.intersects_segment(a, b) {
                return Some(Detection {
                    kind: ViolationKind::NoClip,
                    confidence: if solid.contains(b) { 1.0 } else { 0.8 },
                    suggested_correction: Some(p0),
                });
            }
        }
        None
    }

    /// Per-entity packet counter over a one-second window, independent of
    /// the transport-level buckets.
    pub fn record_packet(&self, track: &mut CheatTrack, now_ms: u64) -> Option<Detection> {
        if now_ms.saturating_sub(track.last_packet_ms) >= 1_000 {
            track.last_packet_ms = now_ms;
            track.packet_count_window = 0;
        }
        track.packet_count_window += 1;

        if track.packet_count_window > self.config.packet_rate_per_sec {
            let overshoot =
                track.packet_count_window as f32 / self.config.packet_rate_per_sec as f32;
            Some(Detection {
                kind: ViolationKind::PacketFlooding,
                confidence: (overshoot - 1.0).clamp(0.3, 1.0),
                suggested_correction: None,
            })
        } else {
            None
        }
    }

    pub fn check_damage(
        &mut self,
        attacker: EntityId,
        amount: u8,
        now_ms: u64,
    ) -> Option<Detection> {
        if amount > self.config.max_damage_per_hit {
            return Some(Detection {
                kind: ViolationKind::DamageHack,
                confidence: 1.0,
                suggested_correction: None,
            });
        }

        let window = self.damage_windows.entry(attacker).or_default();
        window.push_back((now_ms, amount as u16));
        while window
            .front()
            .is_some_and(|(t, _)| now_ms.saturating_sub(*t) > 1_000)
        {
            window.pop_front();
        }

        let total: u32 = window.iter().map(|(_, d)| *d as u32).sum();
        if total as f32 > self.config.max_dps {
            Some(Detection {
                kind: ViolationKind::DamageHack,
                confidence: (total as f32 / self.config.max_dps - 1.0).clamp(0.5, 1.0),
                suggested_correction: None,
            })
        } else {
            None
        }
    }

    pub fn check_hitbox(&self, claimed: FxVec3, compensated: FxVec3) -> Option<Detection> {
        let divergence = claimed.distance(compensated);
        if divergence > self.config.hitbox_divergence_m {
            Some(Detection {
                kind: ViolationKind::HitboxExtension,
                confidence: (divergence / (self.config.hitbox_divergence_m * 2.0)).clamp(0.5, 1.0),
                suggested_correction: None,
            })
        } else {
            None
        }
    }

    /// Malformed input frames are unambiguous; intake already rejected the
    /// frame, this just feeds the trust ladder.
    pub fn input_manipulation(&self) -> Detection {
        Detection {
            kind: ViolationKind::InputManipulation,
            confidence: 1.0,
            suggested_correction: None,
        }
    }

    /// Records a detection against an entity, decrements trust by severity,
    /// and returns the response rung.
    pub fn observe(
        &mut self,
        entity: EntityId,
        detection: &Detection,
        track: &mut CheatTrack,
        now_ms: u64,
    ) -> Response {
        let window = self.violations.entry(entity).or_default();
        window.push_back((now_ms, detection.kind));
        let window_ms = self.config.violation_window_ms;
        while window
            .front()
            .is_some_and(|(t, _)| now_ms.saturating_sub(*t) > window_ms)
        {
            window.pop_front();
        }
        let recent = window.len() as f32;

        track.suspicious_count = track.suspicious_count.saturating_add(1);

        let band = match track.trust_score {
            75..=100 => 0.7,
            50..=74 => 1.0,
            25..=49 => 1.3,
            _ => 1.6,
        };
        let score = detection.confidence * (1.0 + (recent - 1.0) * 0.5) * band;

        let penalty = (score * 8.0).round() as u8;
        track.trust_score = track.trust_score.saturating_sub(penalty);

        match score {
            s if s < 0.6 => Response::Log,
            s if s < 1.2 => Response::Warn,
            s if s < 2.0 => Response::Flag,
            s if s < 3.0 => Response::Correct,
            s if s < 4.0 => Response::Kick,
            _ => Response::Ban,
        }
    }

    /// Clean-play credit: +1 trust per interval, capped at 100.
    pub fn credit_clean(&mut self, entity: EntityId, track: &mut CheatTrack, now_ms: u64) {
        let last = self.trust_credit_ms.entry(entity).or_insert(now_ms);
        if now_ms.saturating_sub(*last) >= self.config.trust_credit_interval_ms {
            *last = now_ms;
            track.trust_score = (track.trust_score + 1).min(100);
        }
    }

    pub fn forget(&mut self, entity: EntityId) {
        self.violations.remove(&entity);
        self.damage_windows.remove(&entity);
        self.trust_credit_ms.remove(&entity);
    }

    /// Snapshot copy for diagnostics threads.
    pub fn violation_counts(&self) -> HashMap<EntityId, usize> {
        self.violations
            .iter()
            .map(|(id, window)| (*id, window.len()))
            .collect()
    }
}
