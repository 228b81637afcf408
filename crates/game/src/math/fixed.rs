use glam::Vec3;
use rkyv::{Archive, Deserialize, Serialize};

/// Fixed-point world coordinate scalar: 1.0 world unit = 1024 raw units.
/// Storage stays integer so replays and anti-cheat verdicts are identical
/// across platforms; conversion to f32 happens only at integration
/// boundaries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Archive, Serialize,
    Deserialize, serde::Serialize, serde::Deserialize,
)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct Fx(i32);

impl Fx {
    pub const FRAC_BITS: u32 = 10;
    pub const SCALE: i32 = 1 << Self::FRAC_BITS;
    pub const ZERO: Fx = Fx(0);
    pub const ONE: Fx = Fx(Self::SCALE);

    pub const fn from_raw(raw: i32) -> Self {
        Fx(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn from_int(units: i32) -> Self {
        Fx(units << Self::FRAC_BITS)
    }

    pub fn from_f32(v: f32) -> Self {
        Fx((v * Self::SCALE as f32).round() as i32)
    }

    pub fn to_f32(self) -> f32 {
        self.0 as f32 / Self::SCALE as f32
    }

    pub const fn abs(self) -> Self {
        Fx(self.0.abs())
    }

    pub const fn saturating_add(self, rhs: Self) -> Self {
        Fx(self.0.saturating_add(rhs.0))
    }

    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Fx(self.0.saturating_sub(rhs.0))
    }

    pub fn clamp(self, min: Self, max: Self) -> Self {
        Fx(self.0.clamp(min.0, max.0))
    }
}

impl std::ops::Add for Fx {
    type Output = Fx;
    fn add(self, rhs: Fx) -> Fx {
        Fx(self.0.wrapping_add(rhs.0))
    }
}

impl std::ops::Sub for Fx {
    type Output = Fx;
    fn sub(self, rhs: Fx) -> Fx {
        Fx(self.0.wrapping_sub(rhs.0))
    }
}

impl std::ops::Neg for Fx {
    type Output = Fx;
    fn neg(self) -> Fx {
        Fx(-self.0)
    }
}

impl std::fmt::Display for Fx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}", self.to_f32())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Archive, Serialize, Deserialize,
    serde::Serialize, serde::Deserialize,
)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct FxVec3 {
    pub x: Fx,
    pub y: Fx,
    pub z: Fx,
}

impl FxVec3 {
    pub const ZERO: FxVec3 = FxVec3 {
        x: Fx::ZERO,
        y: Fx::ZERO,
        z: Fx::ZERO,
    };

    pub const fn new(x: Fx, y: Fx, z: Fx) -> Self {
        Self { x, y, z }
    }

    pub fn from_vec3(v: Vec3) -> Self {
        Self {
            x: Fx::from_f32(v.x),
            y: Fx::from_f32(v.y),
            z: Fx::from_f32(v.z),
        }
    }

    pub fn to_vec3(self) -> Vec3 {
        Vec3::new(self.x.to_f32(), self.y.to_f32(), self.z.to_f32())
    }

    pub fn distance(self, other: FxVec3) -> f32 {
        self.to_vec3().distance(other.to_vec3())
    }

    pub fn distance_squared(self, other: FxVec3) -> f32 {
        self.to_vec3().distance_squared(other.to_vec3())
    }

    /// Planar (x,z) distance squared, the metric AOI and the spatial grid use.
    pub fn planar_distance_squared(self, other: FxVec3) -> f32 {
        let dx = (self.x - other.x).to_f32();
        let dz = (self.z - other.z).to_f32();
        dx * dx + dz * dz
    }

    pub fn lerp(self, other: FxVec3, t: f32) -> FxVec3 {
        FxVec3::from_vec3(self.to_vec3().lerp(other.to_vec3(), t))
    }
}

impl std::ops::Add for FxVec3 {
    type Output = FxVec3;
    fn add(self, rhs: FxVec3) -> FxVec3 {
        FxVec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for FxVec3 {
    type Output = FxVec3;
    fn sub(self, rhs: FxVec3) -> FxVec3 {
        FxVec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// World-space axis-aligned bounds. Positions integrate in float space and
/// clamp back into these before being stored.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WorldBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl WorldBounds {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, v: Vec3) -> Vec3 {
        v.clamp(self.min, self.max)
    }

    pub fn contains(&self, v: Vec3) -> bool {
        v.cmpge(self.min).all() && v.cmple(self.max).all()
    }
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self {
            min: Vec3::new(-2048.0, -64.0, -2048.0),
            max: Vec3::new(2048.0, 256.0, 2048.0),
        }
    }
}
